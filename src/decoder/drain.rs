// SPDX-License-Identifier: GPL-3.0-only

//! End-of-stream handshake and output format waiter
//!
//! Draining queues an empty end-of-stream input buffer and blocks until
//! the output loop sees the matching end-of-stream output. The handshake
//! uses its own lock so the output loop can complete it without taking
//! the stream lock the drainer gave up while waiting.

use super::{Shared, StreamState};
use super::feeder::return_slot;
use crate::codec::{BufferInfo, InputSlot};
use crate::constants::NSECONDS_PER_USECOND;
use crate::errors::{DecoderError, DecoderResult};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
pub(crate) struct DrainState {
    draining: bool,
    at_eos: bool,
    cancelled: bool,
}

/// How a drain wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainWait {
    Drained,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Default)]
pub(crate) struct DrainCoordinator {
    state: Mutex<DrainState>,
    cond: Condvar,
}

impl DrainCoordinator {
    fn lock(&self) -> MutexGuard<'_, DrainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a drain in progress; hold the guard until waiting
    pub(crate) fn begin(&self, at_eos: bool) -> MutexGuard<'_, DrainState> {
        let mut state = self.lock();
        state.draining = true;
        state.at_eos = at_eos;
        state.cancelled = false;
        state
    }

    /// Give up a drain that never reached the device
    pub(crate) fn abort(&self, mut guard: MutexGuard<'_, DrainState>) {
        guard.draining = false;
    }

    pub(crate) fn wait(&self, guard: MutexGuard<'_, DrainState>, timeout: Duration) -> DrainWait {
        let (mut state, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |s| s.draining)
            .unwrap_or_else(|e| e.into_inner());

        if state.draining {
            state.draining = false;
            DrainWait::TimedOut
        } else if state.cancelled {
            DrainWait::Cancelled
        } else {
            DrainWait::Drained
        }
    }

    /// Called by the output loop on an end-of-stream output
    ///
    /// Returns the pending drain's `at_eos`, or `None` when nobody was
    /// draining and the device ended the stream on its own.
    pub(crate) fn complete(&self) -> Option<bool> {
        let mut state = self.lock();
        if !state.draining {
            return None;
        }
        state.draining = false;
        self.cond.notify_all();
        Some(state.at_eos)
    }

    /// Wake a waiting drainer without completing the drain
    pub(crate) fn cancel(&self) {
        let mut state = self.lock();
        if state.draining {
            state.draining = false;
            state.cancelled = true;
            self.cond.notify_all();
        }
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.lock().draining
    }
}

/// Signals that the first output format has been processed
#[derive(Debug, Default)]
pub(crate) struct CapsWaiter {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl CapsWaiter {
    pub(crate) fn signal(&self) {
        *self.ready.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cond.notify_all();
    }

    pub(crate) fn reset(&self) {
        *self.ready.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    /// Wait up to `timeout` for [`signal`](Self::signal); true if signalled
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        let (ready, _) = self
            .cond
            .wait_timeout_while(ready, timeout, |ready| !*ready)
            .unwrap_or_else(|e| e.into_inner());
        *ready
    }
}

/// Queue an end-of-stream buffer and wait until it comes out the other side
///
/// Does nothing when the decoder is not started or end of stream was
/// already queued. Must be called without the stream lock held.
pub(crate) fn drain(shared: &Shared, at_eos: bool) -> DecoderResult<()> {
    let mut s = shared.lock();
    if !s.started {
        debug!("Drain skipped, codec not started");
        return Ok(());
    }
    if s.eos {
        debug!("Drain skipped, end of stream already queued");
        return Ok(());
    }
    if at_eos {
        s.eos = true;
    }
    let Some(device) = s.device.clone() else {
        return Ok(());
    };
    let epoch = s.flush_epoch;
    drop(s);

    let config = &shared.config;
    let flushed = |s: &StreamState| s.flushing || s.flush_epoch != epoch;
    let mut slot = None;
    for attempt in 0..config.drain_input_attempts {
        let result = device.dequeue_input(config.input_timeout());
        if flushed(&*shared.lock()) {
            if let Ok(InputSlot::Slot(index)) = result {
                return_slot(device.as_ref(), index);
            }
            return Err(DecoderError::Flushing);
        }
        match result {
            Ok(InputSlot::Slot(index)) => {
                slot = Some(index);
                break;
            }
            Ok(InputSlot::TryAgain) => trace!(attempt, "No input slot for drain yet"),
            Err(e) => return Err(DecoderError::DrainFailed(e.to_string())),
        }
    }
    let Some(index) = slot else {
        warn!("No input slot for the end-of-stream buffer");
        return Err(DecoderError::DrainFailed(
            "no input slot available".to_string(),
        ));
    };

    let s = shared.lock();
    if flushed(&*s) {
        return_slot(device.as_ref(), index);
        return Err(DecoderError::Flushing);
    }
    if let Err(e) = s.input_buffers.acquire(index) {
        return Err(DecoderError::DrainFailed(e.to_string()));
    }

    let pts = (s.last_upstream_ts / NSECONDS_PER_USECOND) as i64;
    let info = BufferInfo::end_of_stream(pts);

    // The drain lock is taken before queueing so the end-of-stream output
    // cannot be seen before we wait for it
    let guard = shared.drain.begin(at_eos);
    if let Err(e) = device.queue_input(index, &info) {
        shared.drain.abort(guard);
        return Err(DecoderError::DrainFailed(e.to_string()));
    }
    drop(s);

    debug!(at_eos, pts, "Waiting until codec is drained");
    match shared.drain.wait(guard, config.drain_timeout()) {
        DrainWait::Drained => {
            debug!("Drained codec");
            Ok(())
        }
        DrainWait::Cancelled => Err(DecoderError::Flushing),
        DrainWait::TimedOut => Err(DecoderError::DrainFailed(format!(
            "no end-of-stream output within {:?}",
            config.drain_timeout()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_complete_wakes_waiter() {
        let coordinator = Arc::new(DrainCoordinator::default());
        let guard = coordinator.begin(true);

        let completer = Arc::clone(&coordinator);
        let handle = thread::spawn(move || {
            loop {
                if let Some(at_eos) = completer.complete() {
                    return at_eos;
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        assert_eq!(
            coordinator.wait(guard, Duration::from_secs(5)),
            DrainWait::Drained
        );
        assert!(handle.join().unwrap());
        assert!(!coordinator.is_draining());
    }

    #[test]
    fn test_complete_without_drain() {
        let coordinator = DrainCoordinator::default();
        assert_eq!(coordinator.complete(), None);
    }

    #[test]
    fn test_wait_times_out() {
        let coordinator = DrainCoordinator::default();
        let guard = coordinator.begin(false);
        assert_eq!(
            coordinator.wait(guard, Duration::from_millis(10)),
            DrainWait::TimedOut
        );
        assert!(!coordinator.is_draining());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let coordinator = Arc::new(DrainCoordinator::default());
        let guard = coordinator.begin(false);

        let canceller = Arc::clone(&coordinator);
        let handle = thread::spawn(move || {
            while !canceller.is_draining() {
                thread::sleep(Duration::from_millis(1));
            }
            canceller.cancel();
        });

        // begin() holds the lock, so is_draining() only succeeds once we wait
        assert_eq!(
            coordinator.wait(guard, Duration::from_secs(5)),
            DrainWait::Cancelled
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_caps_waiter() {
        let caps = CapsWaiter::default();
        assert!(!caps.wait(Duration::from_millis(1)));
        caps.signal();
        assert!(caps.wait(Duration::from_millis(1)));
        caps.reset();
        assert!(!caps.wait(Duration::from_millis(1)));
    }
}
