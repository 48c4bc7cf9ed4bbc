//! Vehicle side of the upload/response cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use remora_common::drive::DriveMode;
use remora_common::frame::Frame;
use remora_common::wire::{UploadRequest, WireResponse};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::lag::LagLog;

/// Pause between two cycles of the background update loop.
const UPDATE_PAUSE: Duration = Duration::from_millis(20);

/// Angle, throttle and drive mode as decided by the server.
pub type Decision = (f32, f32, DriveMode);

const ZERO_DECISION: Decision = (0.0, 0.0, DriveMode::User);

#[derive(Debug)]
struct Latest {
    frame: Frame,
    angle: f32,
    throttle: f32,
    milliseconds: f32,
    decision: Decision,
}

/// Posts frames to the server and returns its commands.
///
/// Cloning is cheap and clones share the background loop state.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    control_url: String,
    http: reqwest::Client,
    lag_log: Option<Arc<LagLog>>,
    latest: Arc<Mutex<Latest>>,
    running: Arc<AtomicBool>,
}

impl RemoteClient {
    pub fn new(remote_url: &str, vehicle_id: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("remora-vehicle/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let control_url = format!(
            "{}/api/vehicles/control/{}/",
            remote_url.trim_end_matches('/'),
            vehicle_id
        );

        Ok(Self {
            control_url,
            http,
            lag_log: None,
            latest: Arc::new(Mutex::new(Latest {
                frame: Frame::default(),
                angle: 0.0,
                throttle: 0.0,
                milliseconds: 0.0,
                decision: ZERO_DECISION,
            })),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_lag_log(mut self, lag_log: LagLog) -> Self {
        self.lag_log = Some(Arc::new(lag_log));
        self
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    /// Uploads one frame and waits for the server's command.
    ///
    /// Error statuses that still carry a command (bad upload, timed out
    /// cycle) are returned as decisions; anything else is an error.
    pub async fn decide(
        &self,
        frame: Frame,
        angle: f32,
        throttle: f32,
        milliseconds: f32,
    ) -> Result<Decision> {
        let upload = UploadRequest {
            image: frame,
            angle,
            throttle,
            milliseconds,
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&self.control_url)
            .json(&upload)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.control_url))?;
        let status = response.status();
        let body: WireResponse = response
            .json()
            .await
            .with_context(|| format!("Unexpected response from server ({})", status))?;
        self.record_lag(start.elapsed());

        if !status.is_success() {
            warn!("Server answered {} with {:?}", status, body);
        }
        let (command, drive_mode) = body.decode()?;
        Ok((command.angle, command.throttle, drive_mode))
    }

    fn record_lag(&self, lag: Duration) {
        debug!("Remote lag: {:?}", lag);
        if let Some(lag_log) = &self.lag_log {
            if let Err(e) = lag_log.record(lag) {
                warn!("Failed to write lag log {:?}: {}", lag_log.path(), e);
            }
        }
    }

    /// Starts the background loop that keeps uploading the latest frame.
    pub fn start(&self) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let client = self.clone();
        tokio::spawn(async move { client.update().await })
    }

    /// Ends the background loop after its current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Hands the latest frame to the background loop and returns the last
    /// decision it received, without waiting for the server.
    pub fn decide_threaded(
        &self,
        frame: Frame,
        angle: f32,
        throttle: f32,
        milliseconds: f32,
    ) -> Result<Decision> {
        let mut latest = self.lock_latest()?;
        latest.frame = frame;
        latest.angle = angle;
        latest.throttle = throttle;
        latest.milliseconds = milliseconds;
        Ok(latest.decision)
    }

    async fn update(&self) {
        info!("Remote update loop started for {}", self.control_url);
        while self.is_running() {
            let upload = self.lock_latest().map(|latest| {
                (
                    latest.frame.clone(),
                    latest.angle,
                    latest.throttle,
                    latest.milliseconds,
                )
            });
            let (frame, angle, throttle, milliseconds) = match upload {
                Ok(upload) => upload,
                Err(e) => {
                    error!("Remote update loop stopping: {}", e);
                    break;
                }
            };

            let decision = match self.decide(frame, angle, throttle, milliseconds).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!("Remote decision failed, stopping the vehicle: {:#}", e);
                    let mode = self
                        .lock_latest()
                        .map(|latest| latest.decision.2)
                        .unwrap_or_default();
                    (0.0, 0.0, mode)
                }
            };
            if let Ok(mut latest) = self.lock_latest() {
                latest.decision = decision;
            }

            tokio::time::sleep(UPDATE_PAUSE).await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Remote update loop stopped for {}", self.control_url);
    }

    fn lock_latest(&self) -> Result<std::sync::MutexGuard<'_, Latest>> {
        self.latest
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))
    }
}

#[cfg(test)]
mod tests;
