use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kdecl_apply::{KubectlApplier, SsaApplier};
use kdecl_core::{parse_gvk_key, DeclarativeObject, GroupVersionKind, ObjectKey};
use kdecl_kubehub::{run_controller, ApiResolver, KubeObjectClient, KubeStatus, KubeWatcher};
use kdecl_reconcile::{
    application_components, image_registry, source_as_owner, source_labels, static_labels, with_label_maker,
    with_manifest_controller, with_object_transformation, with_owner, with_preserve_namespace, with_prune, with_sink,
    with_status, Applier, Defaults, DirectoryManifestLoader, Host, LabelMaker, LoggingSink, ManifestLoader, ObjectClient,
    Reconciler, ReconcilerOption, TemplatedManifestLoader,
};
use kube::core::DynamicObject;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kdeclctl", version, about = "Declarative manifest controller")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    /// Namespace to watch and apply into (default: all namespaces)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ApplyTool {
    Kubectl,
    Ssa,
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// GVK key of the custom resource, e.g. "addons.example.org/v1alpha1/Dashboard"
    #[arg(long = "gvk")]
    gvk: String,
    /// Package directory: <dir>/<channel> and <dir>/packages/<component>/<version>/manifest.yaml
    #[arg(long = "manifests", env = "KDECL_MANIFESTS")]
    manifests: PathBuf,
    /// Package name under <dir>/packages (default: lowercased kind)
    #[arg(long = "component")]
    component: Option<String>,
    /// Channel file used when the instance pins no version
    #[arg(long = "channel", default_value = "stable")]
    channel: String,
    /// Render manifests as templates over the instance
    #[arg(long = "template", action = ArgAction::SetTrue)]
    template: bool,
    /// Fixed labels (k=v) instead of the <group>/<kind>=<name> default
    #[arg(long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,
    /// Rewrite container images onto this registry
    #[arg(long = "registry")]
    registry: Option<String>,
    /// Image pull secret for every pod spec
    #[arg(long = "pull-secret")]
    pull_secret: Option<String>,
    /// Do not set owner references on applied objects
    #[arg(long = "no-owner", action = ArgAction::SetTrue)]
    no_owner: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every instance of a custom resource type until interrupted
    Run {
        #[command(flatten)]
        controller: ControllerArgs,
        /// Delete labelled objects that are no longer in the manifest
        #[arg(long = "prune", action = ArgAction::SetTrue)]
        prune: bool,
        /// Apply into the namespaces named by the manifest
        #[arg(long = "preserve-namespace", action = ArgAction::SetTrue)]
        preserve_namespace: bool,
        /// Apply tool
        #[arg(long = "applier", value_enum, default_value_t = ApplyTool::Kubectl)]
        applier: ApplyTool,
    },
    /// Build the manifest for one instance file and print it
    Render {
        #[command(flatten)]
        controller: ControllerArgs,
        /// Instance YAML file
        #[arg(long = "instance")]
        instance: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("KDECL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KDECL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KDECL_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

fn controller_options(args: &ControllerArgs, gvk: &GroupVersionKind) -> Vec<ReconcilerOption> {
    let component = args.component.clone().unwrap_or_else(|| gvk.kind.to_lowercase());
    let mut loader: Arc<dyn ManifestLoader> =
        Arc::new(DirectoryManifestLoader::new(&args.manifests, component).with_channel(&args.channel));
    if args.template {
        loader = Arc::new(TemplatedManifestLoader::new(loader));
    }
    let labels: LabelMaker = if args.labels.is_empty() {
        source_labels()
    } else {
        static_labels(args.labels.iter().cloned().collect::<BTreeMap<_, _>>())
    };

    let mut opts = vec![with_manifest_controller(loader), with_label_maker(labels.clone())];
    if args.registry.is_some() || args.pull_secret.is_some() {
        let registry = args.registry.clone().unwrap_or_default();
        let secret = args.pull_secret.clone().unwrap_or_default();
        opts.push(with_object_transformation(image_registry(registry, secret)));
    }
    opts.push(with_object_transformation(application_components(labels)));
    if !args.no_owner {
        opts.push(with_owner(source_as_owner()));
    }
    opts
}

/// Host for offline rendering; nothing may reach a cluster.
struct Offline;

#[async_trait::async_trait]
impl ObjectClient for Offline {
    async fn get(&self, _: &GroupVersionKind, key: &ObjectKey) -> Result<Option<Box<dyn DeclarativeObject>>> {
        Err(anyhow!("offline: cannot fetch {key}"))
    }
}

#[async_trait::async_trait]
impl Applier for Offline {
    async fn apply(&self, _: &CancellationToken, _: Option<&str>, _: &str, _: &[String]) -> Result<()> {
        Err(anyhow!("offline: cannot apply"))
    }
}

async fn render(cli_ns: Option<&str>, output: Output, args: &ControllerArgs, instance_path: &Path) -> Result<()> {
    let gvk = parse_gvk_key(&args.gvk)?;
    let text = std::fs::read_to_string(instance_path).with_context(|| format!("reading {}", instance_path.display()))?;
    let mut instance: DynamicObject = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", instance_path.display()))?;
    if instance.metadata.namespace.is_none() {
        instance.metadata.namespace = cli_ns.map(str::to_string);
    }
    if instance.gvk().as_ref() != Some(&gvk) {
        warn!(expected = %args.gvk, "instance type does not match --gvk");
    }

    let offline = Arc::new(Offline);
    let host = Host { client: offline.clone(), applier: offline, watcher: None };
    let opts = controller_options(args, &gvk);
    let reconciler = Reconciler::new(host, gvk, &Defaults::default(), &opts)?;
    let objects = reconciler.build(&CancellationToken::new(), &instance).await?;
    match output {
        Output::Json => println!("{}", objects.json_manifest()?),
        Output::Yaml => {
            for (i, o) in objects.iter().enumerate() {
                if i != 0 {
                    println!("---");
                }
                print!("{}", serde_yaml::to_string(o.body())?);
            }
        }
    }
    Ok(())
}

async fn run(ns: Option<String>, args: &ControllerArgs, prune: bool, preserve_namespace: bool, tool: ApplyTool) -> Result<()> {
    let gvk = parse_gvk_key(&args.gvk)?;
    let client = kdecl_kubehub::client().await?;
    let resolver = Arc::new(ApiResolver::new(client));
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let applier: Arc<dyn Applier> = match tool {
        ApplyTool::Kubectl => Arc::new(KubectlApplier::new()),
        ApplyTool::Ssa => Arc::new(SsaApplier::new(resolver.clone())),
    };
    let host = Host {
        client: Arc::new(KubeObjectClient::new(resolver.clone())),
        applier,
        watcher: Some(Arc::new(KubeWatcher::new(resolver.clone(), tx, cancel.clone()))),
    };
    let mut opts = controller_options(args, &gvk);
    opts.push(with_prune(prune));
    if preserve_namespace {
        opts.push(with_preserve_namespace());
    }
    opts.push(with_status(Arc::new(KubeStatus::new(resolver.clone()))));
    opts.push(with_sink(Arc::new(LoggingSink)));
    let reconciler = Arc::new(Reconciler::new(host, gvk, &Defaults::default(), &opts)?);

    let mut controller = {
        let cancel = cancel.clone();
        tokio::spawn(async move { run_controller(resolver, reconciler, ns.as_deref(), rx, cancel).await })
    };
    info!(gvk = %args.gvk, prune, "controller running; ctrl-c to stop");

    let joined = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("interrupted");
            cancel.cancel();
            controller.await
        }
        res = &mut controller => res,
    };
    if let Err(e) = joined.context("joining controller")? {
        error!(error = %e, "controller failed");
        return Err(e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { controller, prune, preserve_namespace, applier } => {
            run(cli.namespace.clone(), controller, *prune, *preserve_namespace, *applier).await
        }
        Commands::Render { controller, instance } => render(cli.namespace.as_deref(), cli.output, controller, instance).await,
    }
}
