// SPDX-License-Identifier: GPL-3.0-only

//! Background loop thread lifecycle
//!
//! The output side of a decoder runs on its own named thread. The loop
//! body decides after every iteration whether to keep going, and the
//! owner can ask it to stop between iterations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Returned by a loop iteration to control the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    /// Pause the loop; it is restarted by the next start or flush
    Stop,
}

/// Controller for a loop running on a separate thread
pub struct LoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl LoopController {
    /// Run `loop_fn` on a new thread until it returns [`LoopAction::Stop`]
    /// or [`stop`](Self::stop) is called
    pub fn start<F>(name: &str, mut loop_fn: F) -> std::io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        debug!(name = %name, "Starting loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    if loop_fn() == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop paused itself");
                        break;
                    }
                }

                info!(name = %name_clone, "Loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Whether the thread is still iterating
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Joining from inside the loop would deadlock; the loop
                // exits on its own once the stop signal is seen
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Loop thread finished");
            }
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
