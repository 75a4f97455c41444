//! Stream pipeline orchestration
//!
//! Wires the control client, the RTSP/RTP ingestion, and the WebRTC
//! fan-out together: the first participant's arrival launches the host
//! stream and starts feeding the shared tracks; the last departure tears
//! everything down in order (RTSP TEARDOWN, then control cancel, then the
//! tracks are dropped).

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use crate::config::Config;
use crate::rtsp::receiver::{spawn_receiver, PacketSink};
use crate::rtsp::{RtspClient, RtspError};
use crate::session::{SessionManager, StreamSettings};
use crate::sunshine::{LaunchRequest, SunshineClient, SunshineError};
use crate::webrtc::{create_audio_track, create_video_track, FanOut, FanOutError};

const VIDEO_PORT: u16 = 47998;
const AUDIO_PORT: u16 = 48000;
const RTSP_DEFAULT_PORT: u16 = 48010;

/// Errors raised while starting or stopping the pipeline
#[derive(Debug)]
pub enum PipelineError {
    Control(SunshineError),
    Media(RtspError),
    FanOut(FanOutError),
    /// The host's app catalogue is empty
    NoApps,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Control(e) => write!(f, "control client: {}", e),
            PipelineError::Media(e) => write!(f, "media transport: {}", e),
            PipelineError::FanOut(e) => write!(f, "fan-out: {}", e),
            PipelineError::NoApps => write!(f, "host has no applications"),
        }
    }
}

impl Error for PipelineError {}

impl From<SunshineError> for PipelineError {
    fn from(e: SunshineError) -> Self {
        PipelineError::Control(e)
    }
}

impl From<RtspError> for PipelineError {
    fn from(e: RtspError) -> Self {
        PipelineError::Media(e)
    }
}

impl From<FanOutError> for PipelineError {
    fn from(e: FanOutError) -> Self {
        PipelineError::FanOut(e)
    }
}

struct ActiveStream {
    rtsp: RtspClient,
    running: Arc<AtomicBool>,
    receivers: Vec<JoinHandle<()>>,
}

/// Owner of the active media path between host and fan-out.
pub struct Pipeline {
    config: Arc<Config>,
    sunshine: Arc<SunshineClient>,
    fanout: Arc<FanOut>,
    session: Arc<SessionManager>,
    active: Mutex<Option<ActiveStream>>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        sunshine: Arc<SunshineClient>,
        fanout: Arc<FanOut>,
        session: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            sunshine,
            fanout,
            session,
            active: Mutex::new(None),
        }
    }

    /// Launch the host stream and start feeding the fan-out tracks.
    /// Idempotent while a stream is active.
    pub async fn start(&self, settings: &StreamSettings) -> Result<(), PipelineError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        info!(
            "starting stream: {}x{}@{} {} kbps",
            settings.width, settings.height, settings.fps, settings.bitrate
        );

        // Pick the configured app, or fall back to the first one
        let apps = self.sunshine.app_list().await?;
        let default_title = &self.config.stream.default_app;
        let app = apps
            .iter()
            .find(|a| &a.title == default_title)
            .or_else(|| {
                if let Some(first) = apps.first() {
                    warn!(
                        "app {:?} not found, using {:?}",
                        default_title, first.title
                    );
                }
                apps.first()
            })
            .ok_or(PipelineError::NoApps)?;

        let mut ri_key = [0u8; 16];
        OsRng.fill_bytes(&mut ri_key);

        let launch = self
            .sunshine
            .launch(&LaunchRequest {
                app_id: app.id,
                width: settings.width,
                height: settings.height,
                fps: settings.fps,
                ri_key,
                ri_key_id: 1,
                local_audio: false,
                gamepads: self.session.active_gamepads(),
            })
            .await?;
        info!(
            "stream launched: session {} at {:?}",
            launch.session_id, launch.session_url
        );

        let video_track = create_video_track(None);
        let audio_track = create_audio_track();
        self.fanout.set_video_track(video_track.clone()).await;
        self.fanout.set_audio_track(audio_track.clone()).await;

        match self
            .connect_media(&launch.session_url, video_track, audio_track)
            .await
        {
            Ok(stream) => {
                *active = Some(stream);
                info!("stream started");
                Ok(())
            }
            Err(e) => {
                self.fanout.clear_tracks().await;
                if let Err(cancel_err) = self.sunshine.cancel().await {
                    warn!("cancelling failed launch: {}", cancel_err);
                }
                Err(e)
            }
        }
    }

    /// Negotiate RTSP transport and start the RTP receive loops.
    async fn connect_media(
        &self,
        session_url: &str,
        video_track: Arc<TrackLocalStaticRTP>,
        audio_track: Arc<TrackLocalStaticRTP>,
    ) -> Result<ActiveStream, PipelineError> {
        // Hosts that omit sessionUrl0 expect the default RTSP port
        let url = if session_url.is_empty() {
            format!("rtsp://{}:{}", self.config.sunshine.host, RTSP_DEFAULT_PORT)
        } else {
            session_url.to_string()
        };

        let mut rtsp = RtspClient::new(&url);
        rtsp.connect().await?;

        let media = rtsp.describe().await?;
        let running = Arc::new(AtomicBool::new(true));
        let mut receivers = Vec::new();

        for m in &media {
            match m.kind.as_str() {
                "video" => {
                    if let Err(e) = rtsp.setup(m, VIDEO_PORT).await {
                        warn!("video SETUP failed: {}", e);
                        continue;
                    }
                    let handle = spawn_receiver(
                        "video",
                        VIDEO_PORT,
                        track_sink(video_track.clone()),
                        running.clone(),
                    )
                    .await?;
                    receivers.push(handle);
                    info!("video stream on udp/{} (codec: {})", VIDEO_PORT, m.codec);
                }
                "audio" => {
                    if let Err(e) = rtsp.setup(m, AUDIO_PORT).await {
                        warn!("audio SETUP failed: {}", e);
                        continue;
                    }
                    let handle = spawn_receiver(
                        "audio",
                        AUDIO_PORT,
                        track_sink(audio_track.clone()),
                        running.clone(),
                    )
                    .await?;
                    receivers.push(handle);
                    info!("audio stream on udp/{} (codec: {})", AUDIO_PORT, m.codec);
                }
                other => {
                    warn!("ignoring unknown media type {:?}", other);
                }
            }
        }

        rtsp.play().await?;

        Ok(ActiveStream {
            rtsp,
            running,
            receivers,
        })
    }

    /// Tear down the stream: stop the RTP loops, TEARDOWN, cancel the
    /// host session, then drop the tracks. Idempotent.
    pub async fn stop(&self) {
        let Some(mut stream) = self.active.lock().await.take() else {
            return;
        };

        info!("stopping stream");
        stream.running.store(false, Ordering::Relaxed);
        for handle in stream.receivers {
            let _ = handle.await;
        }

        if let Err(e) = stream.rtsp.teardown().await {
            warn!("RTSP teardown: {}", e);
        }
        if let Err(e) = self.sunshine.cancel().await {
            warn!("cancel: {}", e);
        }

        self.fanout.clear_tracks().await;
        info!("stream stopped");
    }
}

/// Sink that writes each received datagram to a fan-out track.
fn track_sink(track: Arc<TrackLocalStaticRTP>) -> PacketSink {
    Box::new(move |packet| {
        let track = track.clone();
        Box::pin(async move {
            if let Err(e) = track.write(&packet).await {
                // Expected while no peer is attached yet
                log::debug!("track write: {}", e);
            }
        })
    })
}
