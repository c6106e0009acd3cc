use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hansom_cloud::sink::{heartbeat_document, trip_document};
use hansom_cloud::{CloudSink, Collection, LoggingCloudSink};
use hansom_core::{MeterMode, TripId};
use hansom_engine::{MemoryTripStore, MeterRepository, MeterStores, SqliteTripStore, TripStore};
use hansom_link::{McuEvent, McuHandle, McuLink};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use hansomd::config::{Config, LinkConfig, StorageConfig};
use hansomd::{mock, transport};

#[derive(Parser)]
#[command(name = "hansomd")]
#[command(about = "Hansom taxi-meter daemon")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "hansomd.toml")]
    config: PathBuf,

    /// Run against the in-process simulated MCU regardless of config
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let cancel = CancellationToken::new();
    let (link, events) = open_link(&config, cli.mock, &cancel).await?;

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory trip store");
            let trips = MemoryTripStore::new();
            run_meter(trips, link, events, cancel, &config).await?;
        }
        StorageConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite trip store");
            let trips = SqliteTripStore::new(path).await?;
            run_meter(trips, link, events, cancel, &config).await?;
        }
    }

    Ok(())
}

async fn open_link(
    config: &Config,
    force_mock: bool,
    cancel: &CancellationToken,
) -> color_eyre::Result<(McuHandle, mpsc::Receiver<McuEvent>)> {
    if force_mock || matches!(config.link, LinkConfig::Mock) {
        info!("Using in-process mock MCU");
        let (host_side, sim_side) = tokio::io::duplex(1024);
        tokio::spawn(mock::run(sim_side, cancel.clone()));
        return Ok(McuLink::start(host_side, cancel.clone()));
    }

    match &config.link {
        LinkConfig::Serial { device, baud } => {
            info!(%device, baud, "Opening serial link");
            let stream = transport::open_serial(device, *baud)?;
            Ok(McuLink::start(stream, cancel.clone()))
        }
        LinkConfig::Tcp { addr } => {
            info!(%addr, "Connecting TCP link");
            let stream = TcpStream::connect(addr).await?;
            Ok(McuLink::start(stream, cancel.clone()))
        }
        LinkConfig::Mock => unreachable!("handled above"),
    }
}

async fn run_meter<S>(
    trips: S,
    link: McuHandle,
    events: mpsc::Receiver<McuEvent>,
    cancel: CancellationToken,
    config: &Config,
) -> color_eyre::Result<()>
where
    S: TripStore,
{
    let stores = MeterStores::new();
    let repo = MeterRepository::start(
        Arc::clone(&stores),
        Arc::new(trips),
        link,
        events,
        cancel.clone(),
    );

    if let Err(e) = repo.enquire_parameters().await {
        warn!(error = %e, "initial parameter enquiry failed");
    }

    if let (Some(base_url), Some(token)) =
        (config.cloud.auth_base_url.clone(), config.cloud.auth_token.clone())
    {
        tokio::spawn(provision_totp(
            Arc::clone(&stores),
            base_url,
            token,
            cancel.clone(),
        ));
    }

    let sink: Arc<dyn CloudSink> = Arc::new(LoggingCloudSink);
    tokio::spawn(heartbeat_loop(
        Arc::clone(&stores),
        Arc::clone(&sink),
        Duration::from_secs(config.cloud.heartbeat_secs.max(1)),
        cancel.clone(),
    ));
    tokio::spawn(trip_upload_loop(
        Arc::clone(&stores),
        sink,
        cancel.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            repo.stop_communication();
        }
        _ = cancel.cancelled() => {
            info!("Link session ended");
        }
    }

    Ok(())
}

fn meter_id(stores: &MeterStores) -> String {
    stores
        .device
        .current()
        .identity
        .map(|id| id.license_plate.into_string())
        .unwrap_or_else(|| "unprovisioned".to_owned())
}

async fn heartbeat_loop(
    stores: Arc<MeterStores>,
    sink: Arc<dyn CloudSink>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                let mode = match stores.trip.current().mode {
                    MeterMode::ForHire => "for_hire",
                    MeterMode::Hired => "hired",
                    MeterMode::Paused => "paused",
                };
                let doc = heartbeat_document(&meter_id(&stores), mode);
                if let Err(e) = sink.publish(Collection::Heartbeat, &meter_id(&stores), doc).await {
                    warn!(error = %e, "heartbeat publish failed");
                }
            }
        }
    }
}

/// Once the MCU has reported the license plate, exchange the device token
/// for a bearer token and fetch the meter's TOTP seed. Driver verification
/// screens consume the seed; here it is only provisioned and confirmed.
async fn provision_totp(
    stores: Arc<MeterStores>,
    base_url: String,
    raw_token: String,
    cancel: CancellationToken,
) {
    let mut device = stores.device.observe();
    let plate = loop {
        if let Some(identity) = device.borrow_and_update().identity.clone() {
            break identity.license_plate;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = device.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    };

    let client = hansom_cloud::AuthClient::new(base_url);
    let bearer = match client.authenticate(&raw_token).await {
        Ok(bearer) => bearer,
        Err(e) => {
            warn!(error = %e, "auth service rejected device token");
            return;
        }
    };
    match client.fetch_totp_seed(&plate, &bearer).await {
        Ok(_seed) => info!(%plate, "TOTP seed provisioned"),
        Err(e) => warn!(error = %e, "TOTP seed fetch failed"),
    }
}

/// Publish each trip to the cloud as it completes.
async fn trip_upload_loop(
    stores: Arc<MeterStores>,
    sink: Arc<dyn CloudSink>,
    cancel: CancellationToken,
) {
    let mut snapshots = stores.trip.observe();
    let mut published: Option<TripId> = None;

    loop {
        let completed = {
            let snap = snapshots.borrow_and_update();
            snap.last_completed.clone()
        };
        if let Some(trip) = completed {
            if published != Some(trip.id) {
                let doc = trip_document(&meter_id(&stores), &trip);
                match sink.publish(Collection::Trips, &trip.id.0.to_string(), doc).await {
                    Ok(()) => published = Some(trip.id),
                    Err(e) => warn!(error = %e, "trip publish failed"),
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
