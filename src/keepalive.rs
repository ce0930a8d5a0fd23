//! Background keepalive for wireless acquisition boards.
//!
//! BLE boards drop the link when nothing talks to them for a while. During a
//! long sweep the orchestrator is mostly sleeping, so this task issues a
//! cheap read against the session at a fixed interval. It only holds a
//! [`SessionReader`], so it can never prepare, stop or release the session.
//!
//! The first error ends the task quietly: it is logged and reported through
//! [`KeepAliveExit`], never propagated into the sweep.

use crate::acquisition::{BoardBackend, SessionReader};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default poll interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Why the keepalive task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAliveExit {
    /// Stopped through its cancellation token.
    Cancelled,
    /// Stopped itself after a failed read.
    Failed(String),
}

/// Handle to a running keepalive task.
pub struct KeepAlive {
    cancel: CancellationToken,
    handle: JoinHandle<KeepAliveExit>,
}

impl KeepAlive {
    /// Spawns the task. It also stops when `parent` is cancelled.
    #[must_use]
    pub fn spawn<B: BoardBackend + 'static>(
        reader: SessionReader<B>,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("Keepalive stopped");
                        return KeepAliveExit::Cancelled;
                    }
                    _ = ticker.tick() => {
                        match reader.poll().await {
                            Ok(count) => trace!("Keepalive poll: {} samples buffered", count),
                            Err(e) => {
                                warn!("Keepalive read failed, stopping keepalive: {}", e);
                                return KeepAliveExit::Failed(e.to_string());
                            }
                        }
                    }
                }
            }
        });
        debug!("Keepalive started, interval {:?}", interval);
        Self { cancel, handle }
    }

    /// True once the task has ended on its own or been stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task and waits for it to end.
    pub async fn shutdown(self) -> KeepAliveExit {
        self.cancel.cancel();
        match self.handle.await {
            Ok(exit) => exit,
            Err(e) => KeepAliveExit::Failed(format!("keepalive task aborted: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquisitionSession, BoardId};
    use crate::error::{SyncError, SyncResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct PolledBoard {
        polls: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl BoardBackend for PolledBoard {
        fn board_id(&self) -> BoardId {
            BoardId::Muse2
        }
        async fn prepare_session(&mut self) -> SyncResult<()> {
            Ok(())
        }
        async fn release_session(&mut self) -> SyncResult<()> {
            Ok(())
        }
        fn is_prepared(&self) -> bool {
            true
        }
        async fn start_stream(&mut self) -> SyncResult<()> {
            Ok(())
        }
        async fn stop_stream(&mut self) -> SyncResult<()> {
            Ok(())
        }
        async fn add_streamer(&mut self, _uri: &str) -> SyncResult<()> {
            Ok(())
        }
        async fn delete_streamer(&mut self, _uri: &str) -> SyncResult<()> {
            Ok(())
        }
        async fn insert_marker(&mut self, _code: f64) -> SyncResult<()> {
            Ok(())
        }
        async fn data_count(&self) -> SyncResult<usize> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.fail_after {
                Some(limit) if n > limit => Err(SyncError::Session("BLE link lost".into())),
                _ => Ok(n),
            }
        }
    }

    async fn prepared_session(
        fail_after: Option<usize>,
    ) -> (crate::acquisition::SharedSession<PolledBoard>, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut session = AcquisitionSession::new(PolledBoard {
            polls: Arc::clone(&polls),
            fail_after,
        });
        session.prepare().await.unwrap();
        (session.into_shared(), polls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval_until_cancelled() {
        let (shared, polls) = prepared_session(None).await;
        let root = CancellationToken::new();
        let keepalive = KeepAlive::spawn(SessionReader::new(&shared), Duration::from_secs(1), &root);

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(keepalive.shutdown().await, KeepAliveExit::Cancelled);
        // ticks at 0, 1, 2, 3, 4 s
        assert_eq!(polls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_task_without_touching_session() {
        let (shared, _polls) = prepared_session(Some(2)).await;
        let root = CancellationToken::new();
        let keepalive = KeepAlive::spawn(SessionReader::new(&shared), Duration::from_secs(1), &root);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(keepalive.is_finished());
        assert!(matches!(keepalive.shutdown().await, KeepAliveExit::Failed(_)));
        assert_eq!(
            shared.read().await.state(),
            crate::acquisition::SessionState::Prepared
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_task() {
        let (shared, _polls) = prepared_session(None).await;
        let root = CancellationToken::new();
        let keepalive = KeepAlive::spawn(SessionReader::new(&shared), Duration::from_secs(1), &root);
        root.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(keepalive.is_finished());
        assert_eq!(keepalive.shutdown().await, KeepAliveExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_session_stops_keepalive() {
        let (shared, _polls) = prepared_session(None).await;
        let root = CancellationToken::new();
        let keepalive = KeepAlive::spawn(SessionReader::new(&shared), Duration::from_secs(1), &root);
        shared.write().await.release().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(keepalive.shutdown().await, KeepAliveExit::Failed(_)));
    }
}
