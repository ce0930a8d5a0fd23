//! Custom error types for the application.
//!
//! This module defines the primary error type, `SyncError`, shared by every
//! component of the experiment. Using the `thiserror` crate, it provides a
//! consistent taxonomy for the failures that can occur while the acquisition
//! board and the stimulator are driven together.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: A required field is missing or a value is logically
//!   invalid (zero step, negative duration). Fatal at startup, never retried.
//! - **`LinkUnavailable`**: The stimulator serial port could not be opened.
//! - **`LinkIo`**: A read or write on an open stimulator port failed. Fatal to
//!   the current run.
//! - **`Session`**: The acquisition board refused to prepare, stream or record.
//! - **`InvalidState`** / **`SinkConflict`**: Contract violations on the
//!   acquisition session (operation in the wrong state, second sink attached).
//! - **`DeviceNotReady`**: The stimulator is not physically connected yet. This
//!   is the only retryable condition.
//! - **`Cancelled`**: An external cancellation signal interrupted a wait.
//!
//! By using `#[from]`, `SyncError` can be created from underlying I/O errors
//! with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Every failure the experiment engine can report.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File or directory I/O outside the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stimulator port could not be opened.
    #[error("Stimulator link unavailable on '{port}': {reason}")]
    LinkUnavailable {
        /// Serial port path.
        port: String,
        /// Reason reported by the driver.
        reason: String,
    },

    /// Read or write failure on an open stimulator link.
    #[error("Stimulator link I/O error: {0}")]
    LinkIo(String),

    /// Acquisition board failure.
    #[error("Acquisition session error: {0}")]
    Session(String),

    /// Session operation attempted in a state that does not allow it.
    #[error("Operation '{operation}' not allowed in session state {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the session was in.
        state: String,
    },

    /// A sink was attached while another one was still active.
    #[error("Sink '{requested}' rejected, '{active}' is still attached")]
    SinkConflict {
        /// Sink that is currently attached.
        active: String,
        /// Sink that was requested.
        requested: String,
    },

    /// Stimulator not physically connected yet.
    #[error("Stimulator not ready on '{0}'")]
    DeviceNotReady(String),

    /// Interrupted by the cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// True only for conditions worth waiting out and retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::DeviceNotReady(_))
    }
}
