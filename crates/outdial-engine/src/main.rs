//! Outdial binary: configuration, ARI connection, engine dispatcher and the
//! control surface.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use outdial_ari::AriClient;
use outdial_engine::{server, DialerConfig, DialerEngine, EngineEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting outdial");

    // Missing mandatory configuration is fatal with a non-zero exit
    let config = DialerConfig::from_env().inspect_err(|e| {
        error!(error = %e, "Invalid configuration");
    })?;

    tokio::fs::create_dir_all(&config.recording.directory)
        .await
        .with_context(|| {
            format!("cannot create recordings dir {}", config.recording.directory.display())
        })?;

    // ARI connect failure is fatal too
    let (ari, mut ari_events) = AriClient::connect(
        &config.ari.url,
        &config.ari.username,
        &config.ari.password,
        &config.ari.stasis_app,
    )
    .await
    .inspect_err(|e| error!(error = %e, "ARI connection failed"))?;

    let http_port = config.http.port;
    let (engine, engine_events) = DialerEngine::new(config, Arc::new(ari));

    // Forward telephony events into the dispatcher channel
    let events_tx = engine.event_sender();
    tokio::spawn(async move {
        while let Some(event) = ari_events.recv().await {
            if events_tx.send(EngineEvent::Ari(event)).is_err() {
                break;
            }
        }
    });

    tokio::spawn(engine.clone().run(engine_events));

    // First run starts at boot; an empty number list aborts the process
    engine
        .trigger_run(None)
        .await
        .inspect_err(|e| error!(error = %e, "Could not start dialing run"))?;

    tokio::select! {
        result = server::serve(engine.clone(), http_port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping");
        }
    }

    Ok(())
}
