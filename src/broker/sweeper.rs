//! Sweep scheduler
//!
//! A single background task that calls a tick function at a fixed period.
//! The broker uses it to evict idle consumer groups across all topics.
//!
//! States are `Stopped` and `Running`. `start` arms the timer (no-op when
//! already running), `stop` cancels it. A tick in progress when `stop` is
//! called runs to completion; no further tick is scheduled. The first tick
//! fires one period after `start`, and late ticks are delayed rather than
//! fired in a burst.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::utils::error::BrokerError;

#[derive(Debug, Default)]
enum SweepState {
    #[default]
    Stopped,
    Running {
        cancel: CancellationToken,
        // Detached on stop so an in-flight tick can finish.
        _task: JoinHandle<()>,
    },
}

#[derive(Debug, Default)]
pub struct Sweeper {
    state: Mutex<SweepState>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), SweepState::Running { .. })
    }

    /// Arm the periodic timer on the current tokio runtime.
    pub fn start<F>(&self, period: Duration, tick: F) -> Result<(), BrokerError>
    where
        F: Fn() + Send + 'static,
    {
        if period.is_zero() {
            return Err(BrokerError::InvalidSweepInterval);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BrokerError::NoRuntime)?;

        let mut state = self.state.lock();
        if matches!(*state, SweepState::Running { .. }) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick(),
                }
            }
            debug!("Sweep task exited");
        });

        *state = SweepState::Running {
            cancel,
            _task: task,
        };
        info!("Sweep scheduler started (every {} ms)", period.as_millis());
        Ok(())
    }

    /// Cancel the timer. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let previous = std::mem::take(&mut *self.state.lock());
        if let SweepState::Running { cancel, .. } = previous {
            cancel.cancel();
            info!("Sweep scheduler stopped");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
