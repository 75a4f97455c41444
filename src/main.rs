//! gamecast - main entry point
//!
//! Bridges one Moonlight-protocol streaming host to many browsers: pairs
//! with the host, launches and ingests the stream over RTSP/RTP, fans it
//! out over WebRTC, and routes player input back toward the host.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::signal;

use gamecast::config::Config;
use gamecast::input::{InputRouter, LogSink};
use gamecast::orchestrator::Pipeline;
use gamecast::session::SessionManager;
use gamecast::sunshine::{PairState, SunshineClient};
use gamecast::web::{router, AppState};
use gamecast::webrtc::FanOut;

mod args;
use args::Args;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

const DEFAULT_CERT_PATH: &str = "client_cert.pem";
const DEFAULT_KEY_PATH: &str = "client_key.pem";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::init_from_env(
        env_logger::Env::default()
            .filter_or("GAMECAST_LOG", if args.verbose { "debug" } else { "info" }),
    );

    info!("gamecast v{}", env!("CARGO_PKG_VERSION"));

    let mut config = args.load_config().map_err(|e| {
        error!("{}", e);
        e
    })?;

    // Flag overrides
    if let Some(host) = &args.sunshine_host {
        config.sunshine.host = host.clone();
    }
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }
    if config.server.tls_cert.is_some() || config.server.tls_key.is_some() {
        warn!("tls_cert/tls_key are accepted for forward compatibility; terminate TLS in front of gamecast for now");
    }

    let mut sunshine = SunshineClient::new(
        &config.sunshine.host,
        config.sunshine.http_port,
        config.sunshine.https_port,
    )?;

    // One-shot pairing mode
    if let Some(pin) = &args.pair {
        return run_pairing(&mut sunshine, &config, &args.device_name, pin).await;
    }

    // Attach the paired identity when available
    if let (Some(cert_path), Some(key_path)) =
        (&config.sunshine.client_cert, &config.sunshine.client_key)
    {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        sunshine.set_client_identity(&cert_pem, &key_pem)?;
        info!("loaded client certificate from {}", cert_path);
    } else {
        warn!("no client certificate configured; run --pair <PIN> first");
    }

    info!("connecting to Sunshine at {}...", config.sunshine.host);
    match sunshine.server_info().await {
        Ok(server_info) => {
            info!(
                "connected to {} (version {})",
                server_info.hostname, server_info.app_version
            );
            if !server_info.paired {
                warn!("not paired with the host; streaming will fail until paired");
            }
        }
        Err(e) => {
            warn!("could not reach Sunshine: {}", e);
            warn!("the server will start, but streaming needs the host available");
        }
    }

    let config = Arc::new(config);
    let sunshine = Arc::new(sunshine);
    let session = Arc::new(SessionManager::new());

    // Data channel payloads flow straight into the input router
    let input = Arc::new(InputRouter::new(session.clone(), Arc::new(LogSink)));
    let fanout = Arc::new(FanOut::new(
        &config.webrtc,
        Arc::new(move |peer_id, label, data| {
            input.dispatch(&peer_id, &label, &data);
        }),
    )?);

    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        sunshine.clone(),
        fanout.clone(),
        session.clone(),
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        session,
        fanout.clone(),
        pipeline.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| {
            error!("binding {}: {}", config.server.bind_address, e);
            e
        })?;
    info!("listening on http://{}", config.server.bind_address);

    let app = router(state);
    let mut server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {}", e);
        }
    });

    shutdown_signal().await;
    info!("shutting down...");

    // Stop the media path first, then give the signaling server a short
    // drain before it is cut off
    pipeline.stop().await;
    fanout.close().await;
    let _ = tokio::time::timeout(SHUTDOWN_DRAIN, &mut server).await;
    server.abort();

    info!("gamecast stopped");
    Ok(())
}

/// Run the 5-step pairing and persist the resulting identity.
async fn run_pairing(
    sunshine: &mut SunshineClient,
    config: &Config,
    device_name: &str,
    pin: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("pairing with {} as {:?}...", config.sunshine.host, device_name);

    let mut state = PairState::generate(device_name)?;
    sunshine.pair(pin, &mut state).await?;

    let cert_path = config
        .sunshine
        .client_cert
        .clone()
        .unwrap_or_else(|| DEFAULT_CERT_PATH.to_string());
    let key_path = config
        .sunshine
        .client_key
        .clone()
        .unwrap_or_else(|| DEFAULT_KEY_PATH.to_string());

    std::fs::write(&cert_path, state.client_cert_pem())?;
    std::fs::write(&key_path, state.client_key_pem())?;

    info!("pairing complete");
    info!("client certificate written to {}", cert_path);
    info!("client key written to {}", key_path);
    if config.sunshine.client_cert.is_none() {
        info!("add client_cert/client_key paths to the sunshine config section");
    }

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
