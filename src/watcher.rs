//! Stimulator presence detection.
//!
//! The stimulator may be powered on long after the acquisition starts. The
//! watcher polls a [`Probe`] at a fixed interval and moves from
//! [`WatchState::Waiting`] to [`WatchState::Connected`] on the first success.
//! The wait has no built-in limit; callers bound it with a cancellation token
//! and/or an optional deadline.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Interval between presence probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Non-intrusive presence check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Name of the probed resource, for logs.
    fn target(&self) -> &str;

    /// True when the device answered. Never fails.
    async fn probe(&self) -> bool;
}

/// Watcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No successful probe yet.
    Waiting,
    /// A probe succeeded.
    Connected,
}

/// Polls a probe until it succeeds.
pub struct ConnectionWatcher<'a, P: Probe + ?Sized> {
    probe: &'a P,
    interval: Duration,
    state: WatchState,
    attempts: u32,
}

impl<'a, P: Probe + ?Sized> ConnectionWatcher<'a, P> {
    /// Watcher polling `probe` every `interval`.
    #[must_use]
    pub fn new(probe: &'a P, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            state: WatchState::Waiting,
            attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Probes issued so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Probes once and updates the state.
    pub async fn poll_once(&mut self) -> WatchState {
        self.attempts += 1;
        if self.probe.probe().await {
            self.state = WatchState::Connected;
        }
        self.state
    }

    /// Blocks until connected.
    ///
    /// At least one probe is always issued. Returns `Cancelled` when `cancel`
    /// fires and `DeviceNotReady` once `deadline` has elapsed without success.
    pub async fn wait(
        &mut self,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> SyncResult<()> {
        let give_up_at = deadline.map(|d| Instant::now() + d);
        loop {
            if self.poll_once().await == WatchState::Connected {
                info!(
                    "Stimulator detected on '{}' after {} attempt(s)",
                    self.probe.target(),
                    self.attempts
                );
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if give_up_at.is_some_and(|at| Instant::now() >= at) {
                return Err(SyncError::DeviceNotReady(self.probe.target().to_string()));
            }

            // never sleep past the deadline
            let pause = match give_up_at {
                Some(at) => self.interval.min(at.saturating_duration_since(Instant::now())),
                None => self.interval,
            };
            info!(
                "Waiting for VHP device on '{}' (attempt {}), retrying in {:?}",
                self.probe.target(),
                self.attempts,
                pause
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

/// Polls `probe` every `interval` until it reports presence.
pub async fn wait_until_connected<P: Probe + ?Sized>(
    probe: &P,
    interval: Duration,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> SyncResult<u32> {
    let mut watcher = ConnectionWatcher::new(probe, interval);
    watcher.wait(cancel, deadline).await?;
    Ok(watcher.attempts())
}
