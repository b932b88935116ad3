//! Cluster version compatibility. Only major and minor are compared; patch never blocks.

use std::cmp::Ordering;

use anyhow::{anyhow, bail, Context, Result};
use semver::Version;

/// Parse `1.15`, `1.15.0`, `v1.16.3-gke.1` and the like. Missing minor/patch become 0.
pub fn parse_version(s: &str) -> Result<Version> {
    let s = s.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    let split = s.find(|c: char| c == '-' || c == '+').unwrap_or(s.len());
    let (core, rest) = s.split_at(split);
    let padded = match core.split('.').count() {
        1 => format!("{}.0.0{}", core, rest),
        2 => format!("{}.0{}", core, rest),
        _ => s.to_string(),
    };
    Version::parse(&padded).map_err(|e| anyhow!("invalid version {:?}: {}", s, e))
}

pub fn compare_major_minor(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor).cmp(&(b.major, b.minor))
}

/// `expected` is an operator's `kubernetesVersion`; empty means no requirement.
pub fn validate_server_version(expected: &str, server: &str) -> Result<()> {
    if expected.trim().is_empty() {
        return Ok(());
    }
    let want = parse_version(expected).context("unable to parse operators kubernetes version")?;
    let have = parse_version(server).context("unable to parse server version")?;
    if compare_major_minor(&want, &have) == Ordering::Greater {
        bail!("expected kubernetes version of {} is not supported with version: {}", want, have);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_parsing() {
        assert_eq!(parse_version("1.15").unwrap(), Version::new(1, 15, 0));
        assert_eq!(parse_version("v1.16.3").unwrap(), Version::new(1, 16, 3));
        let gke = parse_version("v1.16.3-gke.1").unwrap();
        assert_eq!((gke.major, gke.minor, gke.patch), (1, 16, 3));
        assert!(parse_version("v1.18.0+k3s1").is_ok());
        assert!(parse_version("latest").is_err());
    }

    #[test]
    fn patch_level_never_blocks() {
        assert!(validate_server_version("1.15.9", "v1.15.0").is_ok());
        assert!(validate_server_version("1.15.0", "v1.16.3-gke.1").is_ok());
        assert!(validate_server_version("", "v1.10.0").is_ok());
    }

    #[test]
    fn older_minor_is_rejected() {
        let err = validate_server_version("1.16.0", "v1.15.7").unwrap_err().to_string();
        assert!(err.contains("expected kubernetes version of 1.16.0 is not supported with version: 1.15.7"), "{err}");
        assert!(validate_server_version("2.0", "v1.99.0").is_err());
    }

    #[test]
    fn unparseable_operator_version_is_an_error() {
        let err = validate_server_version("one.two", "v1.15.0").unwrap_err();
        assert!(err.to_string().contains("unable to parse operators kubernetes version"));
    }
}
