use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chaoscope_broker::BrokerClient;
use chaoscope_core::prelude::{ArchiveVolume, RunReport};
use chaoscope_extract::{ExtractRequest, VolumeExtractor};
use chaoscope_gateway::KubeGateway;
use chaoscope_observer::PodObserver;
use chaoscope_publish::{publish_volumes, PublishOptions};
use chaoscope_report::RunReportAssembler;
use chaoscope_sink::SafeSink;
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "chaoscope", version, about = "chaoscope smoke-test harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a set of pods recover after a chaos scenario
    Observe {
        #[arg(long)]
        label_selector: Option<String>,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        namespace_regex: Option<String>,
        #[arg(long)]
        name_regex: Option<String>,
        #[arg(long, default_value_t = 300)]
        timeout_seconds: u64,
    },
    /// Archive a remote directory from a pod and download it in volumes
    Extract {
        #[arg(long)]
        pod: String,
        #[arg(long)]
        container: String,
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        remote_work_dir: String,
        #[arg(long)]
        target_dir: String,
        #[arg(long, default_value = "backup-")]
        prefix: String,
        #[arg(long, default_value_t = 30_000)]
        part_size: u64,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long)]
        local_dir: String,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        delete_remote: bool,
    },
    /// Upload every `.b64` volume in a local directory to the broker
    Publish {
        #[arg(long)]
        api_url: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        local_dir: String,
        #[arg(long, default_value = "backup-")]
        remote_prefix: String,
        #[arg(long, default_value = ".tar")]
        remote_suffix: String,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 3)]
        max_retry: u32,
        #[arg(long, default_value = "default")]
        telemetry_group: String,
        #[arg(long)]
        request_id: String,
    },
    /// Collect cluster metadata and post a RunReport to the broker
    Report {
        #[arg(long)]
        api_url: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "default")]
        telemetry_group: String,
        #[arg(long, value_delimiter = ',', default_value = "Deployment,Pod,Secret,ConfigMap")]
        kinds: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("CHAOSCOPE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let sink = Arc::new(SafeSink::passthrough());

    match cli.command {
        Commands::Observe {
            label_selector,
            namespace,
            namespace_regex,
            name_regex,
            timeout_seconds,
        } => {
            let gateway = Arc::new(KubeGateway::new().await.context("building cluster gateway")?);
            let observer = PodObserver::new(gateway, sink);

            let handle = if let (Some(name_pattern), Some(ns_pattern)) = (&name_regex, &namespace_regex) {
                observer.observe_by_name_and_namespace_regex(name_pattern, ns_pattern, timeout_seconds)?
            } else if let Some(ns_pattern) = &namespace_regex {
                observer.observe_by_namespace_regex(ns_pattern, label_selector.clone(), timeout_seconds)?
            } else {
                let selector = label_selector.clone().unwrap_or_default();
                observer.observe_by_label(selector, namespace, timeout_seconds)
            };

            let report = handle.wait().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Extract {
            pod,
            container,
            namespace,
            remote_work_dir,
            target_dir,
            prefix,
            part_size,
            workers,
            local_dir,
            delete_remote,
        } => {
            let gateway = Arc::new(KubeGateway::new().await.context("building cluster gateway")?);
            let extractor = VolumeExtractor::new(gateway, sink);
            let volumes = extractor
                .extract(ExtractRequest {
                    pod: &pod,
                    container: &container,
                    namespace: &namespace,
                    remote_work_dir: &remote_work_dir,
                    target_dir: &target_dir,
                    prefix: &prefix,
                    part_size,
                    worker_count: workers,
                    local_dir: &local_dir,
                    delete_after_download: delete_remote,
                })
                .await
                .context("extracting volumes")?;
            info!(count = volumes.len(), "extraction complete");
            println!("{}", serde_json::to_string_pretty(&volumes)?);
        }

        Commands::Publish {
            api_url,
            username,
            password,
            local_dir,
            remote_prefix,
            remote_suffix,
            workers,
            max_retry,
            telemetry_group,
            request_id,
        } => {
            let volumes = local_b64_volumes(&local_dir, &remote_prefix)?;
            let opts = PublishOptions {
                broker: BrokerClient::new(api_url, username, password),
                worker_count: workers,
                max_retry,
                remote_prefix,
                remote_suffix,
                telemetry_group,
                request_id,
            };
            let runtime = tokio::runtime::Handle::current();
            let uploaded = tokio::task::spawn_blocking(move || publish_volumes(&volumes, &opts, sink, runtime))
                .await?
                .context("publishing volumes")?;
            info!(count = uploaded.len(), "publish complete");
        }

        Commands::Report {
            api_url,
            username,
            password,
            telemetry_group,
            kinds,
        } => {
            let gateway = Arc::new(KubeGateway::new().await.context("building cluster gateway")?);
            let assembler = RunReportAssembler::new(gateway, sink);
            let run_uuid = uuid::Uuid::new_v4().to_string();
            let timestamp = chrono::Local::now().to_rfc3339();
            let mut report = RunReport::new(run_uuid, timestamp);

            if let Err(e) = assembler.collect(&mut report, &kinds).await {
                error!(error = %e, "failed to collect cluster metadata");
            }

            let broker = BrokerClient::new(api_url, username, password);
            let json = assembler.publish(&broker, &report, &telemetry_group).await?;
            println!("{json}");
        }
    }

    Ok(())
}

/// Builds the volume list a `Publish` run needs straight from what's on
/// disk, since a standalone publish invocation has no extractor session to
/// hand it one: every `<prefix>NN*.b64` file in `local_dir`, sorted by the
/// sequence number embedded in its name.
fn local_b64_volumes(local_dir: &str, prefix: &str) -> Result<Vec<ArchiveVolume>> {
    let mut volumes = Vec::new();
    for entry in std::fs::read_dir(local_dir).with_context(|| format!("reading {local_dir}"))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(rest) = name.strip_prefix(prefix) else { continue };
        let Some(seq_str) = rest.get(0..2) else { continue };
        let Ok(sequence) = seq_str.parse::<u32>() else { continue };
        if !name.ends_with(".b64") {
            continue;
        }
        volumes.push(ArchiveVolume::new(sequence, entry.path().to_string_lossy().to_string(), String::new()));
    }
    volumes.sort_by_key(|v| v.sequence);
    Ok(volumes)
}
