//! Wayguard - live tracking and duress alarm client

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wayguard::{
    config::{Args, Command},
    duress::{DuressAuthModule, FeedbackPresenter, FileSecretStore, PinResponse},
    emergency::{EmergencySink, HttpEmergencySink, MemorySink},
    location::ReplaySampler,
    session::{SessionEvent, TrackingSessionEngine},
    transport::WsConnector,
};

/// Timeout for a single emergency report request
const EMERGENCY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `unlock` lingers so background reports can finish
const UNLOCK_SETTLE: Duration = Duration::from_secs(3);

/// Grace period for the last replayed fix to come through as an event
const REPLAY_DRAIN: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match args.command.clone() {
        Command::Track { replay, dry_run } => run_track(&args, &replay, dry_run).await,
        Command::Enroll { real, duress } => run_enroll(&args, &real, &duress),
        Command::Unlock { pin } => run_unlock(&args, &pin).await,
    }
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("wayguard={},info", args.log_level).into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn emergency_sink(args: &Args, dry_run: bool) -> anyhow::Result<Arc<dyn EmergencySink>> {
    if dry_run {
        return Ok(Arc::new(MemorySink::new()));
    }
    Ok(Arc::new(HttpEmergencySink::new(
        &args.api_url,
        args.auth_token.clone(),
        EMERGENCY_REQUEST_TIMEOUT,
    )?))
}

async fn run_track(args: &Args, replay: &Path, dry_run: bool) -> anyhow::Result<()> {
    info!("======================================");
    info!("  Wayguard - live tracking");
    info!("======================================");
    info!("Tracking endpoint: {}", args.tracking_url);
    info!("Emergency API: {}", if dry_run { "dry run" } else { args.api_url.as_str() });
    info!("User: {} ({})", args.user_id, args.user_type);
    info!("Interval: {}ms", args.interval_ms);
    info!("Replay: {}", replay.display());
    info!("======================================");

    let source = Arc::new(ReplaySampler::from_json_file(replay)?);
    let engine = TrackingSessionEngine::new(
        source.clone(),
        Arc::new(WsConnector),
        emergency_sink(args, dry_run)?,
        args.engine_settings(),
    );

    let mut events = engine.start_tracking(args.tracking_config()).await?;
    let mut ticker = tokio::time::interval(args.interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = ticker.tick() => {
                if source.remaining() == 0 {
                    info!("Replay finished");
                    tokio::time::sleep(REPLAY_DRAIN).await;
                    for event in events.drain() {
                        log_event(&event);
                    }
                    break;
                }
            }
        }
    }

    if let Some(stats) = engine.stop_tracking().await {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::LocationUpdate { sample, analysis } => match analysis {
            Some(analysis) => info!(
                "Location {:.6},{:.6} (risk {} {:.2})",
                sample.latitude, sample.longitude, analysis.risk_level, analysis.risk_score
            ),
            None => info!("Location {:.6},{:.6}", sample.latitude, sample.longitude),
        },
        SessionEvent::ConnectionChanged(true) => info!("Tracking link up"),
        SessionEvent::ConnectionChanged(false) => warn!("Tracking link down, reconnecting"),
        SessionEvent::Alert { title, message } => warn!("Alert: {} - {}", title, message),
        SessionEvent::Command(command) => info!("Server command {}", command.kind()),
        SessionEvent::SosOutcome { trigger, delivered } => {
            if *delivered {
                info!("SOS ({:?}) delivered", trigger);
            } else {
                error!("SOS ({:?}) could not be delivered", trigger);
            }
        }
    }
}

fn run_enroll(args: &Args, real: &str, duress: &str) -> anyhow::Result<()> {
    let store = FileSecretStore::open(&args.secrets_path)?;
    let module = DuressAuthModule::new(
        Arc::new(store),
        Arc::new(MemorySink::new()),
        args.duress_settings(),
    );
    module.enroll(real, duress)?;

    println!("Credentials stored in {}", args.secrets_path.display());
    Ok(())
}

/// Prints what the device would display
struct ConsolePresenter;

impl FeedbackPresenter for ConsolePresenter {
    fn present(&self, response: &PinResponse) {
        println!("{} {:?}", response.message(), response.haptic().timings_ms());
    }
}

async fn run_unlock(args: &Args, pin: &str) -> anyhow::Result<()> {
    let store = FileSecretStore::open(&args.secrets_path)?;
    let module = DuressAuthModule::new(
        Arc::new(store),
        emergency_sink(args, false)?,
        args.duress_settings(),
    )
    .with_presenter(Arc::new(ConsolePresenter));

    module.verify(pin)?;
    module.settle(UNLOCK_SETTLE).await;
    Ok(())
}
