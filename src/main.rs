use anyhow::Result;
use offgrid_bridge::config::Config;
use offgrid_bridge::dbus::{VenusSink, connect_bus};
use offgrid_bridge::logging::init_logging;
use offgrid_bridge::sink::{LogSink, PublicationSink};
use offgrid_bridge::{Bridge, sources};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate()?;
    init_logging(&config.logging)?;

    info!(
        "Offgrid bridge {} starting up",
        option_env!("APP_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
    );

    let sink = build_sink(&config).await?;
    let provider = sources::build_provider(&config);
    let mut bridge = Bridge::new(config, provider, sink)
        .map_err(|e| anyhow::anyhow!("Failed to create bridge: {}", e))?;

    spawn_signal_handler(bridge.shutdown_sender());

    match bridge.run().await {
        Ok(()) => {
            info!("Bridge shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Bridge failed with error: {}", e);
            Err(anyhow::anyhow!("Bridge error: {}", e))
        }
    }
}

/// Venus services, or a logging sink in dry-run mode or without a bus
async fn build_sink(config: &Config) -> Result<Box<dyn PublicationSink>> {
    if config.dry_run {
        info!("Dry run: publications are logged only");
        return Ok(Box::new(LogSink::new()));
    }
    match connect_bus().await {
        Ok(_) => Ok(Box::new(VenusSink::new(
            &config.services,
            config.testmode.enabled(),
        ))),
        Err(e) if config.require_dbus => Err(anyhow::anyhow!("D-Bus required: {}", e)),
        Err(e) => {
            warn!(
                "D-Bus unavailable but require_dbus=false, logging publications instead: {}",
                e
            );
            Ok(Box::new(LogSink::new()))
        }
    }
}

fn spawn_signal_handler(shutdown: mpsc::UnboundedSender<()>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown.send(());
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
