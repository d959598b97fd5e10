use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_core::metadata::owner_reference_for;
use keel_engine::{
    CancellationToken, EngineConfig, EventSink, KubeEventSink, MetricsDriftCounter, Orchestrator, PassReport,
    ReconcileResult, Request, TracingEventSink,
};
use keel_operands::hook_for;
use keel_store::{KubeStore, ObjectStore};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

mod manifest;
mod status;

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel one-shot reconciler")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for manifest objects that carry none
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Converge the objects of a manifest once against the current context
    Reconcile {
        /// Multi-document YAML of desired objects
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// JSON file keeping the related-object list between runs
        #[arg(long = "status-file")]
        status_file: Option<PathBuf>,
        /// The run follows an operator-intended change; updates are not drift
        #[arg(long = "operator-triggered", action = ArgAction::SetTrue)]
        operator_triggered: bool,
        /// Upgrade in progress; overwrites are not counted
        #[arg(long = "upgrade-mode", action = ArgAction::SetTrue)]
        upgrade_mode: bool,
        /// Stop at the first failing object
        #[arg(long = "fail-fast", action = ArgAction::SetTrue)]
        fail_fast: bool,
        /// Create missing target namespaces first
        #[arg(long = "ensure-namespaces", action = ArgAction::SetTrue)]
        ensure_namespaces: bool,
        /// Deadline for the whole pass
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
        /// Owner set on every object, as apiVersion/Kind/name
        #[arg(long = "owner")]
        owner: Option<String>,
        /// Publish events regarding this object (apiVersion/Kind/name)
        #[arg(long = "events-for")]
        events_for: Option<String>,
    },
    /// Show the hook each manifest object would get; no cluster access
    Plan {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Print a saved related-object list
    Related {
        #[arg(long = "status-file")]
        status_file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(Debug, Serialize)]
struct Row<'a> {
    kind: &'a str,
    name: &'a str,
    outcome: &'static str,
    upgraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn outcome(res: &ReconcileResult) -> &'static str {
    match (&res.error, res.created, res.updated, res.deleted) {
        (Some(_), ..) => "failed",
        (None, true, ..) => "created",
        (None, false, true, _) => "updated",
        (None, false, false, true) => "deleted",
        (None, false, false, false) => "unchanged",
    }
}

fn rows(report: &PassReport) -> Vec<Row<'_>> {
    report
        .hooks
        .iter()
        .map(|h| Row {
            kind: &h.kind,
            name: &h.name,
            outcome: outcome(&h.result),
            upgraded: h.result.upgraded,
            error: h.result.error.as_ref().map(|e| e.to_string()),
        })
        .collect()
}

fn print_report(report: &PassReport, output: Output) -> Result<()> {
    let rows = rows(report);
    match output {
        Output::Human => {
            println!("{:<24} {:<40} RESULT", "KIND", "NAME");
            for r in &rows {
                match &r.error {
                    Some(e) => println!("{:<24} {:<40} {}: {}", r.kind, r.name, r.outcome, e),
                    None => println!("{:<24} {:<40} {}", r.kind, r.name, r.outcome),
                }
            }
            if let Some(e) = &report.setup_error {
                println!("setup failed: {}", e);
            }
            if report.skipped > 0 {
                println!("({} skipped)", report.skipped);
            }
        }
        Output::Json => {
            #[derive(Serialize)]
            struct Out<'a> {
                hooks: Vec<Row<'a>>,
                skipped: usize,
                related_changed: bool,
                #[serde(skip_serializing_if = "Option::is_none")]
                setup_error: Option<String>,
            }
            let out = Out {
                hooks: rows,
                skipped: report.skipped,
                related_changed: report.related_changed,
                setup_error: report.setup_error.as_ref().map(|e| e.to_string()),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn read_manifest(file: &Path, ns: Option<&str>) -> Result<Vec<keel_core::ManagedObject>> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    manifest::parse(&text, ns).with_context(|| format!("parsing {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Reconcile {
            file,
            status_file,
            operator_triggered,
            upgrade_mode,
            fail_fast,
            ensure_namespaces,
            timeout_secs,
            owner,
            events_for,
        } => {
            let objects = read_manifest(&file, ns)?;
            let mut config = EngineConfig::from_env();
            config.fail_fast |= fail_fast;
            config.ensure_namespaces |= ensure_namespaces;
            info!(objects = objects.len(), fail_fast = config.fail_fast, operator_triggered, upgrade_mode, "reconcile invoked");

            let store = Arc::new(KubeStore::try_default().await.context("connecting to the cluster")?);
            let owner_ref = match owner {
                Some(spec) => {
                    let key = manifest::parse_target(&spec, ns)?;
                    let obj = store.get(&key).await.with_context(|| format!("reading owner {}", key))?;
                    Some(owner_reference_for(&obj, false).with_context(|| format!("owner {} has no uid", key))?)
                }
                None => None,
            };
            let events: Arc<dyn EventSink> = match events_for {
                Some(spec) => Arc::new(KubeEventSink::new(store.client(), "keelctl", manifest::reference_to(&manifest::parse_target(&spec, ns)?))),
                None => Arc::new(TracingEventSink),
            };

            let labels = config.labels.clone();
            let mut orch = Orchestrator::new(config, store, events, Arc::new(MetricsDriftCounter));
            for mut obj in objects {
                if let Some(o) = &owner_ref {
                    obj.metadata.owner_references = Some(vec![o.clone()]);
                }
                orch.register_boxed(hook_for(obj, &labels)?);
            }

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        warn!("interrupted; cancelling the pass");
                        cancel.cancel();
                    }
                }
            });
            let related = match &status_file {
                Some(path) => status::load(path)?,
                None => Default::default(),
            };
            let mut req = Request::new(cancel)
                .operator_triggered(operator_triggered)
                .upgrade_mode(upgrade_mode)
                .with_related_objects(related);
            if let Some(secs) = timeout_secs {
                req = req.with_deadline(tokio::time::Instant::now() + Duration::from_secs(secs));
            }

            let report = orch.run_pass(&mut req).await;
            print_report(&report, cli.output)?;
            match (&status_file, req.status_dirty) {
                (Some(path), true) => {
                    status::save(path, &req.related_objects)?;
                    info!(path = %path.display(), entries = req.related_objects.len(), "related objects saved");
                }
                (Some(_), false) => info!("related objects unchanged"),
                (None, _) => {}
            }
            report.into_result().context("reconciliation pass failed")?;
        }
        Commands::Plan { file } => {
            let config = EngineConfig::from_env();
            let mut planned = Vec::new();
            for obj in read_manifest(&file, ns)? {
                let hook = hook_for(obj, &config.labels)?;
                planned.push(hook.object_key()?);
            }
            match cli.output {
                Output::Human => {
                    for key in &planned {
                        println!("{}", key);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&planned)?),
            }
        }
        Commands::Related { status_file } => {
            let related = status::load(&status_file)?;
            match cli.output {
                Output::Human => {
                    println!("{:<24} {:<48} {:<38} RV", "KIND", "NAMESPACE/NAME", "UID");
                    for r in related.entries() {
                        let ns_name = match &r.namespace {
                            Some(ns) => format!("{}/{}", ns, r.name.as_deref().unwrap_or("")),
                            None => r.name.clone().unwrap_or_default(),
                        };
                        println!(
                            "{:<24} {:<48} {:<38} {}",
                            r.kind.as_deref().unwrap_or("-"),
                            ns_name,
                            r.uid.as_deref().unwrap_or("-"),
                            r.resource_version.as_deref().unwrap_or("-")
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&related)?),
            }
        }
    }

    Ok(())
}
