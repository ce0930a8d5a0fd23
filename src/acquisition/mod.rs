//! Acquisition session lifecycle.
//!
//! The biosignal board is driven through the [`BoardBackend`] trait, which
//! mirrors the BrainFlow board API (prepare, stream, streamers, markers).
//! [`AcquisitionSession`] wraps a backend with an explicit state machine:
//!
//! ```text
//! Idle --prepare--> Prepared --start--> Streaming --stop--> Prepared
//!   \                   \                    \
//!    `-------------------`--------------------`--release--> Released
//! ```
//!
//! `Released` is terminal and `release()` is idempotent, so cleanup paths can
//! call it unconditionally after a partial failure.
//!
//! # Sharing
//!
//! The orchestrator owns the session behind a [`SharedSession`] (a Tokio
//! `RwLock`) and takes the write half for every mutating call. Background
//! tasks only get a [`SessionReader`], which can take the read half and exposes
//! nothing but [`AcquisitionSession::poll`].

pub mod board;
pub mod simulated;

pub use board::{BoardId, BoardParams};
pub use simulated::SimulatedBoard;

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Consumed board API.
///
/// Mutating calls take `&mut self`; `data_count` is the only read-style call
/// and is what the keepalive task uses to keep the transport busy.
#[async_trait]
pub trait BoardBackend: Send + Sync {
    /// Board driven by this backend.
    fn board_id(&self) -> BoardId;

    /// Opens the device and allocates driver resources.
    async fn prepare_session(&mut self) -> SyncResult<()>;

    /// Frees everything acquired by `prepare_session`.
    async fn release_session(&mut self) -> SyncResult<()>;

    /// True between a successful prepare and release.
    fn is_prepared(&self) -> bool;

    /// Starts sample acquisition.
    async fn start_stream(&mut self) -> SyncResult<()>;

    /// Stops sample acquisition.
    async fn stop_stream(&mut self) -> SyncResult<()>;

    /// Adds a streamer, `uri` has the form `file://<path>:w`.
    async fn add_streamer(&mut self, uri: &str) -> SyncResult<()>;

    /// Removes a streamer previously added with the same `uri`.
    async fn delete_streamer(&mut self, uri: &str) -> SyncResult<()>;

    /// Writes `code` into the marker channel of the next sample.
    async fn insert_marker(&mut self, code: f64) -> SyncResult<()>;

    /// Samples currently buffered by the driver.
    async fn data_count(&self) -> SyncResult<usize>;
}

/// Annotation codes written into the marker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Stimulus switched on.
    StimulusOn,
    /// Stimulus switched off.
    StimulusOff,
    /// Start of the pre-start window of a sweep condition.
    PreStart,
    /// Baseline recording started with the stimulator powered off.
    DeviceOff,
    /// Stimulator detected during the baseline recording.
    DeviceOn,
}

impl Marker {
    /// Numeric code stored in the stream.
    #[must_use]
    pub fn code(&self) -> f64 {
        match self {
            Marker::StimulusOn => 1.0,
            Marker::StimulusOff => 11.0,
            Marker::PreStart => 3.0,
            Marker::DeviceOff => 333.0,
            Marker::DeviceOn => 33.0,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marker::StimulusOn => "stimulus-on",
            Marker::StimulusOff => "stimulus-off",
            Marker::PreStart => "pre-start",
            Marker::DeviceOff => "device-off",
            Marker::DeviceOn => "device-on",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// How a file sink opens its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Truncate and write.
    Write,
    /// Append to an existing file.
    Append,
}

impl SinkMode {
    fn flag(&self) -> &'static str {
        match self {
            SinkMode::Write => "w",
            SinkMode::Append => "a",
        }
    }
}

/// File-backed recording destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSink {
    /// Target file.
    pub path: PathBuf,
    /// Open mode.
    pub mode: SinkMode,
}

impl StreamSink {
    /// Sink that truncates `path`.
    #[must_use]
    pub fn write(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: SinkMode::Write,
        }
    }

    /// Streamer URI understood by the board backend.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("file://{}:{}", self.path.display(), self.mode.flag())
    }

    /// Parses a `file://<path>:<mode>` URI.
    pub fn parse(uri: &str) -> SyncResult<Self> {
        let rest = uri
            .strip_prefix("file://")
            .ok_or_else(|| SyncError::Session(format!("Unsupported streamer '{}'", uri)))?;
        let (path, flag) = rest
            .rsplit_once(':')
            .ok_or_else(|| SyncError::Session(format!("Streamer '{}' has no mode", uri)))?;
        let mode = match flag {
            "w" => SinkMode::Write,
            "a" => SinkMode::Append,
            other => {
                return Err(SyncError::Session(format!(
                    "Unknown streamer mode '{}' in '{}'",
                    other, uri
                )))
            }
        };
        if path.is_empty() {
            return Err(SyncError::Session(format!("Streamer '{}' has no path", uri)));
        }
        Ok(Self {
            path: PathBuf::from(path),
            mode,
        })
    }
}

/// Lifecycle state of an acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, device untouched.
    Idle,
    /// Device prepared, not streaming.
    Prepared,
    /// Device streaming samples.
    Streaming,
    /// Terminal state.
    Released,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State machine around one board backend.
pub struct AcquisitionSession<B> {
    backend: B,
    state: SessionState,
    sink: Option<StreamSink>,
}

/// Session shared between the orchestrator and background readers.
pub type SharedSession<B> = Arc<RwLock<AcquisitionSession<B>>>;

impl<B: BoardBackend> AcquisitionSession<B> {
    /// Wraps `backend` in an idle session.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: SessionState::Idle,
            sink: None,
        }
    }

    /// Wraps the session for sharing with a [`SessionReader`].
    #[must_use]
    pub fn into_shared(self) -> SharedSession<B> {
        Arc::new(RwLock::new(self))
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sink currently attached, if any.
    #[must_use]
    pub fn active_sink(&self) -> Option<&StreamSink> {
        self.sink.as_ref()
    }

    /// Board driven by this session.
    #[must_use]
    pub fn board_id(&self) -> BoardId {
        self.backend.board_id()
    }

    /// Borrow of the backend, mostly for inspection in tests.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn ensure(&self, operation: &'static str, allowed: &[SessionState]) -> SyncResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SyncError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Idle -> Prepared.
    pub async fn prepare(&mut self) -> SyncResult<()> {
        self.ensure("prepare", &[SessionState::Idle])?;
        self.backend.prepare_session().await?;
        self.state = SessionState::Prepared;
        info!("Acquisition session prepared on {}", self.backend.board_id());
        Ok(())
    }

    /// Prepared -> Streaming.
    pub async fn start_stream(&mut self) -> SyncResult<()> {
        self.ensure("start_stream", &[SessionState::Prepared])?;
        self.backend.start_stream().await?;
        self.state = SessionState::Streaming;
        debug!("Acquisition stream started");
        Ok(())
    }

    /// Streaming -> Prepared.
    pub async fn stop_stream(&mut self) -> SyncResult<()> {
        self.ensure("stop_stream", &[SessionState::Streaming])?;
        self.backend.stop_stream().await?;
        self.state = SessionState::Prepared;
        debug!("Acquisition stream stopped");
        Ok(())
    }

    /// Starts recording into `path`. Only one sink may be attached at a time.
    pub async fn attach_sink(&mut self, path: &Path) -> SyncResult<()> {
        self.ensure("attach_sink", &[SessionState::Prepared, SessionState::Streaming])?;
        let requested = StreamSink::write(path);
        if let Some(active) = &self.sink {
            return Err(SyncError::SinkConflict {
                active: active.path.display().to_string(),
                requested: requested.path.display().to_string(),
            });
        }
        self.backend.add_streamer(&requested.uri()).await?;
        debug!("Sink attached: {}", requested.path.display());
        self.sink = Some(requested);
        Ok(())
    }

    /// Stops recording into `path`.
    pub async fn detach_sink(&mut self, path: &Path) -> SyncResult<()> {
        self.ensure("detach_sink", &[SessionState::Prepared, SessionState::Streaming])?;
        let sink = match &self.sink {
            Some(sink) if sink.path == path => sink.clone(),
            _ => {
                return Err(SyncError::Session(format!(
                    "No sink attached at '{}'",
                    path.display()
                )))
            }
        };
        self.backend.delete_streamer(&sink.uri()).await?;
        self.sink = None;
        debug!("Sink detached: {}", sink.path.display());
        Ok(())
    }

    /// Annotates the current sample position.
    pub async fn insert_marker(&mut self, marker: Marker) -> SyncResult<()> {
        self.ensure("insert_marker", &[SessionState::Prepared, SessionState::Streaming])?;
        self.backend.insert_marker(marker.code()).await?;
        debug!("Marker inserted: {}", marker);
        Ok(())
    }

    /// Read-only query used to keep the transport alive.
    pub async fn poll(&self) -> SyncResult<usize> {
        self.ensure("poll", &[SessionState::Prepared, SessionState::Streaming])?;
        self.backend.data_count().await
    }

    /// Any state -> Released. Safe to call repeatedly.
    ///
    /// Stream stop and sink removal are best effort; the first hard error
    /// from the backend release is returned, but the session is Released
    /// either way.
    pub async fn release(&mut self) -> SyncResult<()> {
        if self.state == SessionState::Released {
            return Ok(());
        }
        if self.state == SessionState::Streaming {
            if let Err(e) = self.backend.stop_stream().await {
                warn!("Stopping stream during release failed: {}", e);
            }
        }
        if let Some(sink) = self.sink.take() {
            if let Err(e) = self.backend.delete_streamer(&sink.uri()).await {
                warn!("Removing sink '{}' during release failed: {}", sink.path.display(), e);
            }
        }
        self.state = SessionState::Released;

        if self.backend.is_prepared() {
            info!("Releasing session");
            self.backend.release_session().await?;
        }
        Ok(())
    }
}

/// Read-only view of a shared session.
pub struct SessionReader<B> {
    session: SharedSession<B>,
}

impl<B> Clone for SessionReader<B> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<B: BoardBackend> SessionReader<B> {
    /// Creates a reader over `session`.
    #[must_use]
    pub fn new(session: &SharedSession<B>) -> Self {
        Self {
            session: Arc::clone(session),
        }
    }

    /// See [`AcquisitionSession::poll`].
    pub async fn poll(&self) -> SyncResult<usize> {
        self.session.read().await.poll().await
    }
}
