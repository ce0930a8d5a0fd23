//! Recording artifacts: file naming and run metadata.
//!
//! Every file of a run shares the run timestamp prefix so the recordings and
//! the metadata record sort together:
//!
//! - `<root>/<ts>_<board>_c<channel>_f<frequency>_v<volume>.csv` per condition
//! - `<root>/<ts>_<board>_baseline_with_VHP_powered_OFF.csv` while waiting for
//!   the stimulator
//! - `<root>/<ts>_metadata.txt` with a header and both configuration documents
//!   echoed verbatim
//!
//! ## `RunMetadata`
//!
//! The metadata record is assembled with [`RunMetadataBuilder`] and rendered
//! as plain text. The subject, location and finger lines are left blank for
//! the experimenter to fill in.

use crate::acquisition::BoardId;
use crate::sweep::SweepCondition;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default output directory.
pub const DEFAULT_OUTPUT_ROOT: &str = "./Recordings";

/// Run timestamp in file-name form.
#[must_use]
pub fn run_timestamp(at: DateTime<Local>) -> String {
    at.format("%y%m%d-%H%M").to_string()
}

/// Names the files of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingLayout {
    root: PathBuf,
    timestamp: String,
}

impl RecordingLayout {
    /// Layout under `root` for the run started at `timestamp`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, timestamp: &str) -> Self {
        Self {
            root: root.into(),
            timestamp: timestamp.to_string(),
        }
    }

    /// Output directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the output directory if needed.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Recording of one sweep condition.
    #[must_use]
    pub fn condition_path(&self, board: BoardId, condition: &SweepCondition) -> PathBuf {
        self.root.join(format!(
            "{}_{}_c{}_f{}_v{}.csv",
            self.timestamp, board, condition.channel, condition.frequency, condition.volume
        ))
    }

    /// Recording made while the stimulator is still off.
    #[must_use]
    pub fn baseline_path(&self, board: BoardId) -> PathBuf {
        self.root.join(format!(
            "{}_{}_baseline_with_VHP_powered_OFF.csv",
            self.timestamp, board
        ))
    }

    /// Metadata record of the run.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(format!("{}_metadata.txt", self.timestamp))
    }
}

/// Human-readable record of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    /// Wall-clock start of the run.
    pub recorded_at: DateTime<Local>,
    /// Raw measurement configuration document.
    pub measurement_config: String,
    /// Raw device configuration document.
    pub device_config: String,
    /// Set when the run did not complete.
    pub failure: Option<String>,
}

/// Builder for [`RunMetadata`].
pub struct RunMetadataBuilder {
    inner: RunMetadata,
}

impl RunMetadataBuilder {
    /// Starts a record for a run begun at `recorded_at`.
    #[must_use]
    pub fn new(recorded_at: DateTime<Local>) -> Self {
        Self {
            inner: RunMetadata {
                recorded_at,
                measurement_config: String::new(),
                device_config: String::new(),
                failure: None,
            },
        }
    }

    /// Raw measurement document.
    #[must_use]
    pub fn measurement_config(mut self, text: &str) -> Self {
        self.inner.measurement_config = text.to_string();
        self
    }

    /// Raw device document.
    #[must_use]
    pub fn device_config(mut self, text: &str) -> Self {
        self.inner.device_config = text.to_string();
        self
    }

    /// Marks the run as aborted.
    #[must_use]
    pub fn failure(mut self, reason: &str) -> Self {
        self.inner.failure = Some(reason.to_string());
        self
    }

    /// Finishes the record.
    #[must_use]
    pub fn build(self) -> RunMetadata {
        self.inner
    }
}

impl RunMetadata {
    /// Plain-text form of the record.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Recording on: {}\n",
            self.recorded_at.format("%d/%m/%Y %H:%M:%S")
        ));
        if let Some(reason) = &self.failure {
            out.push_str(&format!("Run aborted: {}\n", reason));
        }
        out.push('\n');
        out.push_str("Subject name: \n");
        out.push_str("Recording location: \n");
        out.push_str("finger tested: \n\n");

        out.push_str("*** Contents of Measure Configuration ***\n");
        out.push_str(&self.measurement_config);
        if !self.measurement_config.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("*** Contents of Device Configuration:***\n");
        out.push_str(&self.device_config);
        if !self.device_config.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    /// Writes the record to `path`, replacing any previous file.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render())?;
        info!("Metadata written to '{}'", path.display());
        Ok(())
    }
}
