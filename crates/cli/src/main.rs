use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kudo_core::OPERATOR_LABEL;
use kudo_kubehub::{install_package, InstallOptions, KubeClient, KudoClient};
use kudo_package::{parse_files, read_path, BatchLoader, Compiler, FsSource, InstallableResourceSet, PackageBundle};
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kudoctl", version, about = "KUDO operator package CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Target namespace
    #[arg(short = 'n', long = "namespace", env = "KUDO_NAMESPACE", global = true, default_value = "default")]
    namespace: String,

    /// Path to a kubeconfig (default: inferred)
    #[arg(long = "kubeconfig", env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Work with operator packages offline
    Package {
        #[command(subcommand)]
        command: PackageCommands,
    },
    /// Install a package (directory or .tgz) into the cluster
    Install {
        path: PathBuf,
        /// Instance name (default: <operator>-<random suffix>)
        #[arg(long = "instance")]
        instance: Option<String>,
        /// Parameter override, repeatable: -p key=value
        #[arg(short = 'p', long = "parameter", value_parser = parse_key_val)]
        parameters: Vec<(String, String)>,
        /// Install Operator and OperatorVersion only
        #[arg(long = "skip-instance", action = ArgAction::SetTrue)]
        skip_instance: bool,
    },
    /// Inspect plan execution
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// List KUDO objects
    Get {
        #[command(subcommand)]
        command: GetCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PackageCommands {
    /// Parse and validate a package
    Verify { path: PathBuf },
    /// Print the Operator, OperatorVersion and Instance a package compiles to
    Compile {
        path: PathBuf,
        /// Fixed instance name suffix instead of a random one
        #[arg(long = "suffix")]
        suffix: Option<String>,
    },
    /// Fingerprint and load many package tarballs, skipping broken ones
    Digest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum PlanCommands {
    /// Show the running or most recently finished plan of an instance
    Status {
        #[arg(long = "instance")]
        instance: String,
    },
}

#[derive(Subcommand, Debug)]
enum GetCommands {
    /// Instance names in the namespace
    Instances {
        /// Only instances of this operator
        #[arg(long = "operator")]
        operator: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KUDO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUDO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KUDO_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

fn read_bundle(path: &Path) -> Result<PackageBundle> {
    let files = read_path(path).with_context(|| format!("reading package {}", path.display()))?;
    Ok(parse_files(files.into_iter().map(|f| (f.path, f.bytes)))?)
}

fn compile_path(path: &Path, compiler: &Compiler) -> Result<InstallableResourceSet> {
    let bundle = read_bundle(path)?;
    Ok(compiler.compile(&bundle)?)
}

fn print<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Output::Human | Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_str();

    match cli.command {
        Commands::Package { command } => match command {
            PackageCommands::Verify { path } => {
                info!(path = %path.display(), "verify invoked");
                let set = compile_path(&path, &Compiler::new())?;
                let ov = &set.operator_version.spec;
                match cli.output {
                    Output::Human => {
                        let name = set.operator.metadata.name.as_deref().unwrap_or("-");
                        println!("package is valid: {} {}", name, ov.version);
                        println!("tasks: {}  plans: {}  parameters: {}", ov.tasks.len(), ov.plans.len(), ov.parameters.len());
                    }
                    _ => print(cli.output, &set.operator_version)?,
                }
            }
            PackageCommands::Compile { path, suffix } => {
                let compiler = match suffix {
                    Some(s) => Compiler::new().with_names(kudo_package::FixedSuffix(s)),
                    None => Compiler::new(),
                };
                let set = compile_path(&path, &compiler)?;
                match cli.output {
                    Output::Json => print(cli.output, &set)?,
                    _ => {
                        print(cli.output, &set.operator)?;
                        println!("---");
                        print(cli.output, &set.operator_version)?;
                        println!("---");
                        print(cli.output, &set.instance)?;
                    }
                }
            }
            PackageCommands::Digest { paths } => {
                let sources: Vec<FsSource> = paths.iter().map(FsSource::new).collect();
                let loaded = BatchLoader::new().load_all(&sources);
                if loaded.len() < sources.len() {
                    error!(skipped = sources.len() - loaded.len(), "some packages failed to load");
                }
                #[derive(Serialize)]
                struct Row<'a> { source: &'a str, digest: &'a str, operator: &'a str, version: &'a str }
                let rows: Vec<_> = loaded
                    .iter()
                    .map(|p| Row {
                        source: &p.source,
                        digest: &p.digest,
                        operator: p.resources.operator.metadata.name.as_deref().unwrap_or(""),
                        version: &p.resources.operator_version.spec.version,
                    })
                    .collect();
                match cli.output {
                    Output::Human => {
                        println!("{:<64}  {:<20} {:<10} SOURCE", "SHA256", "OPERATOR", "VERSION");
                        for r in &rows {
                            println!("{:<64}  {:<20} {:<10} {}", r.digest, r.operator, r.version, r.source);
                        }
                    }
                    _ => print(cli.output, &rows)?,
                }
            }
        },
        Commands::Install { path, instance, parameters, skip_instance } => {
            info!(path = %path.display(), ns = %ns, "install invoked");
            let set = compile_path(&path, &Compiler::new())?;
            let client = KubeClient::connect(cli.kubeconfig.as_deref(), ns).await?;
            let opts = InstallOptions {
                instance_name: instance,
                parameters: parameters.into_iter().collect::<BTreeMap<_, _>>(),
                skip_instance,
            };
            match install_package(&client, &set, ns, &opts).await? {
                Some(inst) => match cli.output {
                    Output::Human => println!("instance {} created", inst.metadata.name.as_deref().unwrap_or("-")),
                    _ => print(cli.output, &inst)?,
                },
                None => {
                    if cli.output == Output::Human {
                        println!("operator {} installed without an instance", set.operator.metadata.name.as_deref().unwrap_or("-"));
                    }
                }
            }
        }
        Commands::Plan { command: PlanCommands::Status { instance } } => {
            let client = KubeClient::connect(cli.kubeconfig.as_deref(), ns).await?;
            let inst = client
                .get_instance(&instance, ns)
                .await?
                .ok_or_else(|| anyhow!("instance {}/{} does not exist", ns, instance))?;
            let plan = inst.last_executed_plan_status();
            match (cli.output, plan) {
                (Output::Human, Some(p)) => {
                    println!("{} (Operator-Version: {})", instance, inst.spec.operator_version.name);
                    print!("{}", p.render_tree());
                }
                (Output::Human, None) => println!("No plan ever run for instance - nothing to show for instance {}", instance),
                (out, p) => print(out, &p)?,
            }
        }
        Commands::Get { command: GetCommands::Instances { operator } } => {
            let client = KubeClient::connect(cli.kubeconfig.as_deref(), ns).await?;
            let selector = operator.map(|op| format!("{}={}", OPERATOR_LABEL, op));
            let names = client.list_instances(ns, selector.as_deref()).await?;
            match cli.output {
                Output::Human => {
                    if names.is_empty() {
                        bail!("no instances found in namespace {}", ns);
                    }
                    for n in names {
                        println!("{}", n);
                    }
                }
                _ => print(cli.output, &names)?,
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_parameters() {
        assert_eq!(parse_key_val("replicas=3").unwrap(), ("replicas".into(), "3".into()));
        assert_eq!(parse_key_val("url=http://x?a=b").unwrap(), ("url".into(), "http://x?a=b".into()));
        assert_eq!(parse_key_val("empty=").unwrap(), ("empty".into(), String::new()));
        assert!(parse_key_val("=3").is_err());
        assert!(parse_key_val("noequals").is_err());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["kudoctl", "plan", "status", "--instance", "zk-1", "-n", "kudo", "-o", "json"]).unwrap();
        assert_eq!(cli.namespace, "kudo");
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Plan { command: PlanCommands::Status { ref instance } } if instance == "zk-1"));
    }

    #[test]
    fn repeated_parameters_collect() {
        let cli = Cli::try_parse_from(["kudoctl", "install", "./zk", "-p", "a=1", "-p", "b=2", "--skip-instance"]).unwrap();
        match cli.command {
            Commands::Install { parameters, skip_instance, .. } => {
                assert_eq!(parameters, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
                assert!(skip_instance);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
