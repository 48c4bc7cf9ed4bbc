use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{debug, info, warn};

use remora_common::frame::Frame;
use remora_common::util;
use remora_vehicle::client::RemoteClient;
use remora_vehicle::config::CONFIG;
use remora_vehicle::lag::LagLog;

const FRAME_WIDTH: u32 = 160;
const FRAME_HEIGHT: u32 = 120;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = util::setup_logging(&CONFIG.log_level, "vehicle");
    let vehicle_id = util::get_vehicle_id(&CONFIG.base);
    info!("Starting remora-vehicle simulator as {}", vehicle_id);

    let mut client = RemoteClient::new(&CONFIG.remote_url, &vehicle_id, CONFIG.request_timeout())?;
    if let Some(path) = CONFIG.lag_log_path() {
        client = client.with_lag_log(LagLog::create(&path)?);
        info!("Logging lag to {:?}", path);
    }
    info!("Uploading to {}", client.control_url());

    let update_handle = client.start();
    let mut ticker = tokio::time::interval(CONFIG.loop_interval());
    let started = Instant::now();
    let mut tick: u32 = 0;
    let (mut angle, mut throttle) = (0.0, 0.0);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = synthetic_frame(tick);
                let milliseconds = started.elapsed().as_secs_f32() * 1000.0;
                match client.decide_threaded(frame, angle, throttle, milliseconds) {
                    Ok((next_angle, next_throttle, drive_mode)) => {
                        angle = next_angle;
                        throttle = next_throttle;
                        debug!(
                            "angle: {:+.2} throttle: {:+.2} drive_mode: {}",
                            angle, throttle, drive_mode
                        );
                    }
                    Err(e) => warn!("No decision available: {}", e),
                }
                tick = tick.wrapping_add(1);
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown signal received, stopping simulator...");
                break;
            }
        }
    }

    client.stop();
    if let Err(e) = update_handle.await {
        warn!("Update loop join error: {}", e);
    }
    info!("Simulator stopped");
    Ok(())
}

/// A diagonal gradient that drifts one pixel per tick.
fn synthetic_frame(tick: u32) -> Frame {
    let mut frame = Frame::blank(FRAME_WIDTH, FRAME_HEIGHT);
    for y in 0..FRAME_HEIGHT {
        for x in 0..FRAME_WIDTH {
            let index = (y * FRAME_WIDTH + x) as usize;
            frame.pixels[index] = x.wrapping_add(y).wrapping_add(tick) as u8;
        }
    }
    frame
}
