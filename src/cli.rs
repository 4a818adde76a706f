// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Previewing and saving snapshots
//! - Scanning otpauth QR codes and managing the stored list

use camera_capture::backends::camera::{
    CameraSystem, CaptureController, CaptureStatus, ControllerSettings, create_system,
};
use camera_capture::constants::{app, pipeline, timing};
use camera_capture::pipelines::{ChannelSink, QrScanSink, to_rgb_image};
use camera_capture::storage::UrlStore;
use camera_capture::{AppError, AppResult, Config};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

/// What ended a wait on the running pipeline
enum Waited<T> {
    Item(T),
    Interrupted,
    TimedOut,
    Closed,
}

/// List all available cameras
pub fn list_cameras(config: &Config) -> AppResult<()> {
    let system = create_system(config.backend, config)?;

    if !system.has_camera_permission() {
        println!("Camera permission denied.");
        return Ok(());
    }

    let ids = system.camera_ids()?;
    if ids.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras ({} backend):", system.backend_type());
    println!();
    for id in ids {
        let characteristics = system.characteristics(&id)?;
        println!(
            "  [{}] {} facing, sensor at {}°",
            id, characteristics.lens_facing, characteristics.sensor_orientation
        );

        let sizes = characteristics.output_sizes(config.required_format);
        if sizes.is_empty() {
            println!("      No {:?} sizes", config.required_format);
        } else {
            let sizes: Vec<String> = sizes.iter().map(|(w, h)| format!("{}x{}", w, h)).collect();
            println!("      Sizes: {}", sizes.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Stream preview frames until a frame count, timeout or Ctrl+C
pub async fn preview(config: &Config, frames: Option<u64>, timeout: u64) -> AppResult<()> {
    let controller = new_controller(config)?;
    let interrupt = interrupt_signal()?;
    let mut status = controller.subscribe();

    let (sink, mut rx) = ChannelSink::new(pipeline::CHANNEL_SINK_CAPACITY);
    let sink = Arc::new(sink);
    controller.start(sink.clone())?;

    println!("Previewing... (press Ctrl+C to stop)");
    let started = Instant::now();
    let deadline = started + Duration::from_secs(timeout);
    let mut received: u64 = 0;

    loop {
        match next_item(&mut rx, &mut status, &interrupt, deadline).await? {
            Waited::Item(frame) => {
                if received == 0 {
                    println!(
                        "Streaming {}x{}, rotation {}°",
                        frame.width, frame.height, frame.rotation_degrees
                    );
                }
                received += 1;
                if frames.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            Waited::Interrupted => {
                println!();
                println!("Stopping early...");
                break;
            }
            Waited::TimedOut | Waited::Closed => break,
        }
    }

    controller.stop();
    let elapsed = started.elapsed().as_secs_f64();
    let stats = controller.frame_stats();

    println!();
    println!("Frames produced: {}", stats.produced);
    println!("Frames delivered: {}", stats.delivered);
    println!("Frames received: {}", received);
    println!("Dropped (extraction): {}", stats.dropped);
    println!("Dropped (sink full): {}", sink.dropped());
    println!("Discarded (slot busy): {}", stats.discarded);
    println!("Spurious notifications: {}", stats.spurious);
    if elapsed > 0.0 {
        println!("Average rate: {:.1} fps", received as f64 / elapsed);
    }

    Ok(())
}

/// Save one preview frame as an upright PNG
pub async fn snapshot(config: &Config, output: Option<PathBuf>) -> AppResult<()> {
    let controller = new_controller(config)?;
    let interrupt = interrupt_signal()?;
    let mut status = controller.subscribe();

    let (sink, mut rx) = ChannelSink::new(1);
    controller.start(Arc::new(sink))?;

    println!("Capturing...");
    let deadline = Instant::now() + Duration::from_secs(timing::CLI_DEFAULT_TIMEOUT_SECS);
    let frame = match next_item(&mut rx, &mut status, &interrupt, deadline).await? {
        Waited::Item(frame) => frame,
        Waited::Interrupted => return Err(AppError::Other("Interrupted".to_string())),
        Waited::TimedOut => return Err(AppError::Timeout("a preview frame".to_string())),
        Waited::Closed => return Err(AppError::Other("Frame channel closed".to_string())),
    };
    controller.stop();

    let rgb = to_rgb_image(&frame)?;
    let path = match output {
        Some(path) => path,
        None => get_default_snapshot_dir().join(format!(
            "snapshot_{}.png",
            Local::now().format("%Y%m%d_%H%M%S")
        )),
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    rgb.save_with_format(&path, image::ImageFormat::Png)?;
    info!(path = %path.display(), width = rgb.width(), height = rgb.height(), "Snapshot saved");
    println!("Snapshot saved: {}", path.display());

    Ok(())
}

/// Scan QR codes until an otpauth URL is seen
pub async fn scan(config: &Config, timeout: u64) -> AppResult<()> {
    let store = UrlStore::new(config.codes_path()?);
    let controller = new_controller(config)?;
    let interrupt = interrupt_signal()?;
    let mut status = controller.subscribe();

    let (sink, mut events) = QrScanSink::new(store);
    controller.start(Arc::new(sink))?;

    println!("Scanning for otpauth QR codes... (press Ctrl+C to stop)");
    let deadline = Instant::now() + Duration::from_secs(timeout);
    let result = match next_item(&mut events, &mut status, &interrupt, deadline).await? {
        Waited::Item(event) => {
            if event.newly_stored {
                println!("Stored: {}", event.url);
            } else {
                println!("Already stored: {}", event.url);
            }
            Ok(())
        }
        Waited::Interrupted => {
            println!();
            println!("Stopped.");
            Ok(())
        }
        Waited::TimedOut => Err(AppError::Timeout("an otpauth QR code".to_string())),
        Waited::Closed => Err(AppError::Other("Scan channel closed".to_string())),
    };
    controller.stop();

    result
}

/// Print the stored URLs
pub fn codes_list(config: &Config) -> AppResult<()> {
    let store = UrlStore::new(config.codes_path()?);
    let urls = store.list()?;
    if urls.is_empty() {
        println!("No stored codes.");
    }
    for (index, url) in urls.iter().enumerate() {
        println!("  [{}] {}", index, url);
    }
    Ok(())
}

pub fn codes_add(config: &Config, url: &str) -> AppResult<()> {
    UrlStore::new(config.codes_path()?).add(url)?;
    println!("Added.");
    Ok(())
}

pub fn codes_remove(config: &Config, url: &str) -> AppResult<()> {
    UrlStore::new(config.codes_path()?).remove(url)?;
    println!("Removed.");
    Ok(())
}

pub fn codes_edit(config: &Config, old: &str, new: &str) -> AppResult<()> {
    UrlStore::new(config.codes_path()?).edit(old, new)?;
    println!("Replaced.");
    Ok(())
}

pub fn codes_swap(config: &Config, first: &str, second: &str) -> AppResult<()> {
    UrlStore::new(config.codes_path()?).swap(first, second)?;
    println!("Swapped.");
    Ok(())
}

fn new_controller(config: &Config) -> AppResult<CaptureController> {
    let system = create_system(config.backend, config)?;
    Ok(CaptureController::new(
        system,
        ControllerSettings::from_config(config),
    ))
}

/// Ctrl+C notification; the handler can only be installed once per process
fn interrupt_signal() -> AppResult<Arc<Notify>> {
    let notify = Arc::new(Notify::new());
    let handler = Arc::clone(&notify);
    ctrlc::set_handler(move || {
        debug!("Interrupt received");
        handler.notify_one();
    })
    .map_err(|e| AppError::Other(format!("Failed to install Ctrl+C handler: {}", e)))?;
    Ok(notify)
}

/// Wait for the next item from a sink channel
///
/// A capture failure published by the controller ends the wait with an error.
async fn next_item<T>(
    rx: &mut mpsc::Receiver<T>,
    status: &mut watch::Receiver<CaptureStatus>,
    interrupt: &Notify,
    deadline: Instant,
) -> AppResult<Waited<T>> {
    if let Some(failure) = status.borrow_and_update().failure.clone() {
        return Err(failure.into());
    }

    loop {
        tokio::select! {
            item = rx.recv() => {
                return Ok(match item {
                    Some(item) => Waited::Item(item),
                    None => Waited::Closed,
                });
            }
            _ = interrupt.notified() => return Ok(Waited::Interrupted),
            _ = tokio::time::sleep_until(deadline) => return Ok(Waited::TimedOut),
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(Waited::Closed);
                }
                let current = status.borrow_and_update().clone();
                debug!(state = %current.state, generation = current.generation, "Capture status changed");
                if let Some(failure) = current.failure {
                    return Err(failure.into());
                }
            }
        }
    }
}

/// Get default snapshot directory
fn get_default_snapshot_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(app::SNAPSHOT_DIR)
}
