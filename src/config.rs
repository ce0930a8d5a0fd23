//! Experiment configuration.
//!
//! Two YAML documents describe a run:
//!
//! ```yaml
//! # measurement document
//! Channel:   { Start: 1, End: 8, Steps: 1 }
//! Volume:    { Start: 50, End: 100, Steps: 25 }
//! Frequency: { Start: 100, End: 300, Steps: 50 }
//! Measurements:
//!   Number: 10
//!   Duration_on: 1
//!   Duration_off: 2
//!   Pre-start_EEG_measurement: 5
//! ```
//!
//! ```yaml
//! # device document
//! Board:
//!   Id: SYNTHETIC_BOARD
//!   Master:          # set for playback: board that recorded `File`
//!   Mac:
//!   File:
//!   Serial:
//!   Keep_ble_alive: false
//! VHP:
//!   Serial: /dev/ttyACM0
//! ```
//!
//! Parsing produces immutable [`SweepParameters`] and [`DeviceConfig`] values
//! that are handed to the components by reference. The raw text of both
//! documents is kept for the metadata record.

use crate::acquisition::{BoardId, BoardParams};
use crate::error::{SyncError, SyncResult};
use crate::recording::run_timestamp;
use crate::sweep::{SweepParameters, SweepRange};
use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RangeDocument {
    #[serde(rename = "Start")]
    start: i64,
    #[serde(rename = "End")]
    end: i64,
    #[serde(rename = "Steps")]
    steps: i64,
}

#[derive(Debug, Deserialize)]
struct MeasurementsDocument {
    #[serde(rename = "Number")]
    number: i64,
    #[serde(rename = "Duration_on")]
    duration_on: f64,
    #[serde(rename = "Duration_off")]
    duration_off: f64,
    #[serde(rename = "Pre-start_EEG_measurement", default)]
    pre_start: f64,
}

#[derive(Debug, Deserialize)]
struct MeasurementDocument {
    #[serde(rename = "Channel")]
    channel: RangeDocument,
    #[serde(rename = "Volume")]
    volume: RangeDocument,
    #[serde(rename = "Frequency")]
    frequency: RangeDocument,
    #[serde(rename = "Measurements")]
    measurements: MeasurementsDocument,
}

/// Board reference written either as a name or a numeric id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoardRef {
    Number(i64),
    Name(String),
}

impl BoardRef {
    fn resolve(&self) -> SyncResult<BoardId> {
        match self {
            BoardRef::Number(id) => BoardId::from_id(*id),
            BoardRef::Name(name) => name.parse(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BoardDocument {
    #[serde(rename = "Id")]
    id: BoardRef,
    #[serde(rename = "Master", default, deserialize_with = "blank_board_as_none")]
    master: Option<BoardRef>,
    #[serde(rename = "Mac", default, deserialize_with = "blank_as_none")]
    mac: Option<String>,
    #[serde(rename = "File", default, deserialize_with = "blank_as_none")]
    file: Option<String>,
    #[serde(rename = "Serial", default, deserialize_with = "blank_as_none")]
    serial: Option<String>,
    #[serde(rename = "Keep_ble_alive", default)]
    keep_ble_alive: bool,
}

#[derive(Debug, Deserialize)]
struct VhpDocument {
    #[serde(rename = "Serial")]
    serial: String,
}

#[derive(Debug, Deserialize)]
struct DeviceDocument {
    #[serde(rename = "Board")]
    board: BoardDocument,
    #[serde(rename = "VHP")]
    vhp: VhpDocument,
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn blank_board_as_none<'de, D>(deserializer: D) -> Result<Option<BoardRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<BoardRef> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(BoardRef::Name(name)) if name.trim().is_empty() => None,
        other => other,
    })
}

/// Immutable description of the two devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Acquisition board.
    pub board: BoardId,
    /// Board that recorded the playback file (playback mode only).
    pub master: Option<BoardId>,
    /// BLE MAC address of a live board.
    pub mac: Option<String>,
    /// Serial port of a live board.
    pub board_serial: Option<String>,
    /// Source recording for playback mode.
    pub playback_file: Option<PathBuf>,
    /// Stimulator serial port.
    pub stimulator_port: String,
}

impl DeviceConfig {
    /// True when samples come from a file instead of a live board.
    #[must_use]
    pub fn is_playback(&self) -> bool {
        self.master.is_some()
    }

    /// Connection parameters for the board backend.
    #[must_use]
    pub fn board_params(&self) -> BoardParams {
        BoardParams {
            mac_address: self.mac.clone(),
            serial_port: self.board_serial.clone(),
            master_board: self.master,
            file: self.playback_file.clone(),
        }
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Board: Id = {}, Master = {:?}, Mac = {:?}, Serial = {:?}, File = {:?}; VHP: Serial = {}",
            self.board,
            self.master.map(|m| m.name()),
            self.mac,
            self.board_serial,
            self.playback_file,
            self.stimulator_port
        )
    }
}

/// Everything a run needs, built once at startup.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Sweep definition.
    pub sweep: SweepParameters,
    /// Device definition.
    pub device: DeviceConfig,
    /// Raw measurement document.
    pub measurement_source: String,
    /// Raw device document.
    pub device_source: String,
    /// Start of the run.
    pub started_at: DateTime<Local>,
}

fn seconds(field: &str, value: f64) -> SyncResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        SyncError::Configuration(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, value
        ))
    })
}

fn range(group: &str, doc: &RangeDocument) -> SyncResult<SweepRange> {
    if doc.steps <= 0 {
        return Err(SyncError::Configuration(format!(
            "{}.Steps must be positive, got {}",
            group, doc.steps
        )));
    }
    let range = SweepRange::new(doc.start, doc.end, doc.steps);
    if range.checked_len().is_none() {
        return Err(SyncError::Configuration(format!(
            "{} range {} has too many values",
            group, range
        )));
    }
    Ok(range)
}

/// Parses the measurement document.
pub fn parse_measurement(text: &str, keep_ble_alive: bool) -> SyncResult<SweepParameters> {
    let doc: MeasurementDocument = serde_yaml::from_str(text)
        .map_err(|e| SyncError::Configuration(format!("measurement document: {}", e)))?;

    if doc.measurements.number < 1 {
        return Err(SyncError::Configuration(format!(
            "Measurements.Number must be at least 1, got {}",
            doc.measurements.number
        )));
    }
    let measurements_number = u32::try_from(doc.measurements.number).map_err(|_| {
        SyncError::Configuration(format!(
            "Measurements.Number too large: {}",
            doc.measurements.number
        ))
    })?;

    let sweep = SweepParameters {
        channel: range("Channel", &doc.channel)?,
        frequency: range("Frequency", &doc.frequency)?,
        volume: range("Volume", &doc.volume)?,
        measurements_number,
        duration_on: seconds("Measurements.Duration_on", doc.measurements.duration_on)?,
        duration_off: seconds("Measurements.Duration_off", doc.measurements.duration_off)?,
        pre_start: seconds(
            "Measurements.Pre-start_EEG_measurement",
            doc.measurements.pre_start,
        )?,
        keep_ble_alive,
    };
    if sweep.condition_count().is_none() {
        return Err(SyncError::Configuration(format!(
            "Sweep has too many conditions: {} channel(s) x {} frequency(ies) x {} volume(s)",
            sweep.channel.len(),
            sweep.frequency.len(),
            sweep.volume.len()
        )));
    }
    Ok(sweep)
}

/// Parses the device document. Returns the keepalive flag separately since it
/// belongs to the sweep parameters.
pub fn parse_device(text: &str) -> SyncResult<(DeviceConfig, bool)> {
    let doc: DeviceDocument = serde_yaml::from_str(text)
        .map_err(|e| SyncError::Configuration(format!("device document: {}", e)))?;

    let board = doc.board.id.resolve()?;
    let master = doc.board.master.as_ref().map(BoardRef::resolve).transpose()?;
    let playback_file = doc.board.file.map(PathBuf::from);
    if master.is_some() && playback_file.is_none() {
        return Err(SyncError::Configuration(
            "Board.Master is set but Board.File is empty".to_string(),
        ));
    }
    let stimulator_port = doc.vhp.serial.trim().to_string();
    if stimulator_port.is_empty() {
        return Err(SyncError::Configuration("VHP.Serial is empty".to_string()));
    }

    Ok((
        DeviceConfig {
            board,
            master,
            mac: doc.board.mac,
            board_serial: doc.board.serial,
            playback_file,
            stimulator_port,
        },
        doc.board.keep_ble_alive,
    ))
}

impl ExperimentConfig {
    /// Builds the configuration from the two document texts.
    pub fn from_documents(measurement: &str, device: &str) -> SyncResult<Self> {
        let (device_config, keep_ble_alive) = parse_device(device)?;
        let sweep = parse_measurement(measurement, keep_ble_alive)?;
        Ok(Self {
            sweep,
            device: device_config,
            measurement_source: measurement.to_string(),
            device_source: device.to_string(),
            started_at: Local::now(),
        })
    }

    /// Reads and parses both documents.
    pub fn load(measurement_path: &Path, device_path: &Path) -> SyncResult<Self> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|e| {
                SyncError::Configuration(format!("cannot read '{}': {}", path.display(), e))
            })
        };
        Self::from_documents(&read(measurement_path)?, &read(device_path)?)
    }

    /// File-name timestamp of this run.
    #[must_use]
    pub fn timestamp(&self) -> String {
        run_timestamp(self.started_at)
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.sweep)?;
        write!(f, "{}", self.device)
    }
}
