use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use danube_telemetry::{
    parse_duration, parse_interval, pod_title, MetricsBackend, MetricsClient, MetricsConfig,
    PollScheduler, ResourceIdentity, SeriesCollection, TelemetryConfig,
};
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing::info;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Broker StatefulSet name, pods are matched as `<name>-ss-<ordinal>`
    pub name: String,

    /// Kubernetes namespace of the broker
    #[arg(long, short = 'n')]
    pub namespace: String,

    /// Replica count, narrows the pod matcher to the known ordinals
    #[arg(long)]
    pub size: Option<u32>,

    /// YAML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Prometheus base URL, overrides the configuration file
    #[arg(long, env = "DANUBE_TELEMETRY_PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Visible time window, e.g. 30m, 1h30m, 2w
    #[arg(long)]
    pub span: Option<String>,

    /// Refresh interval, `0` or `off` fetches once
    #[arg(long)]
    pub poll: Option<String>,

    /// Explicit sample count, overrides planning
    #[arg(long)]
    pub samples: Option<usize>,

    /// Pin the end of the window (epoch milliseconds) instead of following now
    #[arg(long)]
    pub end_time: Option<i64>,

    /// Print the first fully loaded snapshot and exit
    #[arg(long)]
    pub once: bool,
}

/// Merge the configuration file (or defaults) with command line overrides.
fn resolve_config(args: &WatchArgs) -> Result<TelemetryConfig> {
    let mut config = match &args.config {
        Some(path) => TelemetryConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TelemetryConfig::default(),
    };

    if let Some(url) = &args.prometheus_url {
        config.prometheus_url = url.clone();
    }
    if let Some(span) = &args.span {
        config.default_span =
            parse_duration(span).with_context(|| format!("invalid --span {:?}", span))?;
    }
    if let Some(poll) = &args.poll {
        config.poll_interval =
            parse_interval(poll).with_context(|| format!("invalid --poll {:?}", poll))?;
    }
    if args.samples.is_some() {
        config.default_samples = args.samples;
    }

    config.validate()?;
    Ok(config)
}

pub async fn handle(args: WatchArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let resource =
        ResourceIdentity::new(args.name.as_str(), args.namespace.as_str()).with_size_hint(args.size);

    let client = MetricsClient::new(MetricsConfig {
        base_url: config.prometheus_url.clone(),
        timeout_ms: config.fetch_timeout.as_millis() as u64,
    })?;
    let backend: Arc<dyn MetricsBackend> = Arc::new(client);
    let scheduler = PollScheduler::new(backend, resource, &config)?;

    info!(
        broker = %args.name,
        namespace = %args.namespace,
        prometheus = %config.prometheus_url,
        "watching broker telemetry"
    );

    let mut updates = WatchStream::new(scheduler.subscribe());
    match args.end_time {
        Some(end_time) => {
            scheduler.set_end_time(Some(end_time)).await;
            scheduler.set_interval(config.poll_interval).await;
        }
        None => scheduler.start().await,
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, stopping poller");
                break;
            }
            next = updates.next() => {
                let Some(snapshot) = next else { break };
                if snapshot.is_initial_loading() {
                    continue;
                }
                print!("{}", render_snapshot(&snapshot));
                if args.once && snapshot.loaded() {
                    break;
                }
            }
        }
    }

    scheduler.stop().await;
    Ok(())
}

fn render_snapshot(snapshot: &SeriesCollection) -> String {
    let mut out = format!(
        "[{:?}] span={}s samples={}\n",
        snapshot.status(),
        snapshot.span.as_secs(),
        snapshot.samples
    );

    for result in &snapshot.results {
        if let Some(err) = &result.error {
            out.push_str(&format!("  {}  error: {}\n", result.identity, err));
        } else if !result.loaded {
            out.push_str(&format!("  {}  loading\n", result.identity));
        } else if result.series.is_empty() {
            out.push_str(&format!("  {}  no data\n", result.identity));
        } else {
            for series in &result.series {
                let latest = series
                    .latest()
                    .map(|(_, v)| format!("{:.3}", v))
                    .unwrap_or_else(|| "-".to_string());
                out.push_str(&format!(
                    "  {}  {}  {}\n",
                    result.identity,
                    pod_title(&series.labels),
                    latest
                ));
            }
        }
    }
    out
}
