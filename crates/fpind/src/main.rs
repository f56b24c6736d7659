//! FPIN fault-recovery daemon
//!
//! Main entry point for fpind. Reads FC fabric notifications and fails
//! impacted multipath paths.

use anyhow::{Context, Result, bail};
use clap::Parser;
use fpind::config::{DEFAULT_CONFIG_PATH, FpindConfig, SourceKind};
use fpind::{
    Actuator, Consumer, DeviceTopology, DmMultipathControl, Pipeline, Receiver, SystemdNotifier,
    flush, frame_queue, source,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Fibre Channel FPIN fault-recovery daemon
#[derive(Debug, Parser)]
#[command(name = "fpind", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Notification source
    #[arg(short, long, value_enum)]
    source: Option<SourceKind>,

    /// Adapter character device
    #[arg(short, long)]
    device: Option<PathBuf>,
}

/// How long shutdown waits for blocking tasks. The receiver thread sits in
/// a kernel read that only returns on the next notification.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = FpindConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    init_logging(&config.logging.level)?;
    info!(config = %args.config.display(), "fpind: Starting FPIN fault-recovery daemon");

    let runtime = build_runtime()?;
    let result = runtime.block_on(run_daemon(config));
    shutdown_runtime(runtime);

    match result {
        Ok(()) => {
            info!("fpind: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(critical = true, error = %format!("{:#}", e), "fpind: Daemon exiting with error");
            Err(e)
        }
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

/// Drops the runtime without joining a receiver still blocked in `read`.
fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

fn apply_overrides(config: &mut FpindConfig, args: &Args) {
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(kind) = args.source {
        config.source.kind = kind;
    }
    if let Some(device) = &args.device {
        config.source.device = device.clone();
    }
}

/// Initialize structured logging; `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn device_topology(config: &FpindConfig) -> Result<Arc<dyn DeviceTopology>> {
    Ok(Arc::new(fpind::UdevTopology::new(config.source.sysfs_root.clone())))
}

#[cfg(not(target_os = "linux"))]
fn device_topology(_config: &FpindConfig) -> Result<Arc<dyn DeviceTopology>> {
    bail!("udev device topology is only available on Linux")
}

async fn run_daemon(config: FpindConfig) -> Result<()> {
    let notifier = SystemdNotifier::new();

    // A source that cannot be opened leaves the daemon nothing to do.
    let source::OpenedSource {
        source: frame_source,
        device,
    } = source::open_source(&config.source).context("opening notification source")?;
    let source_name = frame_source.describe();

    let topology = device_topology(&config)?;
    let control = Arc::new(DmMultipathControl::new(
        config.multipath.dmsetup_cmd.clone(),
        config.multipath.multipathd_cmd.clone(),
    ));
    let flush_notifier: Arc<dyn flush::FlushNotifier> =
        Arc::from(flush::notifier_for(config.flush.mode, &config.source.device, device)?);

    let (tx, rx) = frame_queue(config.queue.capacity);
    let pipeline = Pipeline::new(topology, Actuator::new(control, flush_notifier));

    let mut receiver = tokio::task::spawn_blocking(move || Receiver::new(frame_source, tx).run());
    let mut consumer = tokio::spawn(Consumer::new(rx, pipeline).run());

    info!(
        source = %source_name,
        queue_capacity = config.queue.capacity,
        flush = ?config.flush.mode,
        "fpind: Listening for fabric notifications"
    );
    if let Err(e) = notifier.notify_ready() {
        warn!(error = %e, "fpind: systemd READY notification failed");
    }
    if let Err(e) = notifier.notify_status(&format!("Listening on {}", source_name)) {
        warn!(error = %e, "fpind: systemd STATUS notification failed");
    }

    tokio::select! {
        result = &mut receiver => {
            match result.context("receiver task panicked")? {
                Ok(stats) => {
                    warn!(?stats, "fpind: Notification source closed");
                    bail!("notification source {} closed", source_name)
                }
                Err(e) => Err(e).context("receiver stopped"),
            }
        }
        result = &mut consumer => {
            let stats = result.context("consumer task panicked")?;
            bail!("consumer stopped unexpectedly after {} frames", stats.frames_processed)
        }
        _ = shutdown_signal() => {
            // In-flight cycles are abandoned; the blocking reader gets
            // SHUTDOWN_GRACE before the runtime is torn down.
            info!("fpind: Received shutdown signal");
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "fpind: Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "fpind: Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
