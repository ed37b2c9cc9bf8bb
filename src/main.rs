use speech_relay::artifact::ScratchDir;
use speech_relay::backends::{self, voicevox::VoicevoxBackend};
use speech_relay::config_loader::Settings;
use speech_relay::engine::LocalAudioSink;
use speech_relay::format::MessageFormatter;
use speech_relay::gateway;
use speech_relay::pipeline::SynthesisPipeline;
use speech_relay::playback::DestinationRegistry;
use speech_relay::relay::{RelayController, RelayOptions};
use speech_relay::router::EndpointRouter;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::new()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(endpoints = ?settings.endpoints, "Starting speech relay");

    let router = Arc::new(EndpointRouter::http(
        settings.endpoints.clone(),
        settings.probe_timeout(),
    )?);
    let backend = Arc::new(VoicevoxBackend::new(settings.request_timeout()));
    let fallback = backends::fallback_from_settings(&settings);
    match &fallback {
        Some(provider) => info!(provider = provider.id(), "Fallback synthesis enabled"),
        None => info!("Fallback synthesis disabled"),
    }

    let scratch = ScratchDir::open(&settings.scratch_dir)?;
    let pipeline = Arc::new(SynthesisPipeline::new(router, backend, fallback, scratch));

    let sink = Arc::new(LocalAudioSink::new()?);
    let registry = Arc::new(DestinationRegistry::new(sink));

    let controller = Arc::new(RelayController::new(
        pipeline,
        registry.clone(),
        MessageFormatter::new(settings.char_limit),
        RelayOptions {
            speaker_id: settings.speaker_id,
            command_prefix: settings.command_prefix.clone(),
            announce_membership: settings.announce_membership,
            leave_when_empty: settings.leave_when_empty,
        },
    ));

    let addr = settings.gateway_addr();
    tokio::select! {
        result = gateway::start_server(&addr, controller) => {
            if let Err(e) = result {
                error!("Event gateway stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    // Disconnects every destination and deletes whatever is still queued.
    registry.leave_all().await;
    Ok(())
}
