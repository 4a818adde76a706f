// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the frame-processing loop
//!
//! Each capture cycle gets one dedicated thread that sleeps until woken by
//! the image reader's listener. Wake-ups go through a capacity-1 channel, so
//! bursts of notifications coalesce into one pending wake.
//!
//! The thread exits on its own once every [`FrameWaker`] is dropped (the
//! reader closed) or its stop signal is set. Stopping never joins, so a
//! caller on an async task is never blocked behind a sink call.

use crate::constants::timing;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Wait for the next wake
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Sending half of a frame loop wake channel
#[derive(Debug, Clone)]
pub struct FrameWaker {
    tx: SyncSender<()>,
}

impl FrameWaker {
    /// Wake the loop; a wake already pending absorbs this one
    pub fn wake(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => trace!("Wake already pending"),
            Err(TrySendError::Disconnected(())) => trace!("Frame loop gone, wake ignored"),
        }
    }
}

/// Receiving half of a frame loop wake channel
#[derive(Debug)]
pub struct WakeReceiver {
    rx: Receiver<()>,
}

/// Create a coalescing wake channel
pub fn wake_channel() -> (FrameWaker, WakeReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (FrameWaker { tx }, WakeReceiver { rx })
}

/// Controller for a wake-driven loop running in a separate thread
pub struct FrameLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl FrameLoop {
    /// Spawn the loop thread
    ///
    /// `on_wake` runs once per received wake, strictly sequentially.
    pub fn spawn<F>(name: &str, wake: WakeReceiver, mut on_wake: F) -> io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting frame loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Frame loop thread started");

                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match wake.rx.recv_timeout(timing::FRAME_LOOP_POLL) {
                        Ok(()) => {}
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!(name = %name_clone, "Wake channel closed");
                            break;
                        }
                    }

                    if stop_signal_clone.load(Ordering::SeqCst) {
                        break;
                    }

                    if on_wake() == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %name_clone, "Frame loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop thread is still alive
    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting frame loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    #[cfg(test)]
    fn stop_and_join(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!(name = %self.name, "Frame loop thread panicked");
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        // Detach; the thread notices the signal or the closed channel
        self.request_stop();
    }
}
