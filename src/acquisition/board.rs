//! Acquisition board identifiers.
//!
//! Boards are named the way BrainFlow names them (`SYNTHETIC_BOARD`,
//! `CYTON_BOARD`, ...) so the device configuration documents stay compatible
//! with the recordings already on disk. Numeric ids follow the same table.

use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Supported acquisition boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BoardId {
    /// Playback file board (replays a recording through a master board)
    PlaybackFile = -3,
    /// Synthetic board
    Synthetic = -1,
    /// OpenBCI Cyton (8-channel)
    Cyton = 0,
    /// OpenBCI Ganglion (4-channel)
    Ganglion = 1,
    /// OpenBCI Cyton + Daisy (16-channel)
    CytonDaisy = 2,
    /// BrainBit
    BrainBit = 7,
    /// FreeEEG32
    FreeEeg32 = 17,
    /// Muse S
    MuseS = 21,
    /// Muse 2
    Muse2 = 22,
    /// Mentalab Explore, 4 channels
    Explore4Chan = 44,
    /// Mentalab Explore, 8 channels
    Explore8Chan = 45,
}

const ALL_BOARDS: [BoardId; 11] = [
    BoardId::PlaybackFile,
    BoardId::Synthetic,
    BoardId::Cyton,
    BoardId::Ganglion,
    BoardId::CytonDaisy,
    BoardId::BrainBit,
    BoardId::FreeEeg32,
    BoardId::MuseS,
    BoardId::Muse2,
    BoardId::Explore4Chan,
    BoardId::Explore8Chan,
];

impl BoardId {
    /// Configuration name of the board.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlaybackFile => "PLAYBACK_FILE_BOARD",
            Self::Synthetic => "SYNTHETIC_BOARD",
            Self::Cyton => "CYTON_BOARD",
            Self::Ganglion => "GANGLION_BOARD",
            Self::CytonDaisy => "CYTON_DAISY_BOARD",
            Self::BrainBit => "BRAINBIT_BOARD",
            Self::FreeEeg32 => "FREEEEG32_BOARD",
            Self::MuseS => "MUSE_S_BOARD",
            Self::Muse2 => "MUSE_2_BOARD",
            Self::Explore4Chan => "EXPLORE_4_CHAN_BOARD",
            Self::Explore8Chan => "EXPLORE_8_CHAN_BOARD",
        }
    }

    /// Numeric board id.
    #[must_use]
    pub fn id(&self) -> i32 {
        *self as i32
    }

    /// Looks a board up by numeric id.
    pub fn from_id(id: i64) -> SyncResult<Self> {
        ALL_BOARDS
            .iter()
            .copied()
            .find(|board| i64::from(board.id()) == id)
            .ok_or_else(|| SyncError::Configuration(format!("Unknown board id {}", id)))
    }

    /// Number of EEG channels.
    #[must_use]
    pub fn eeg_channels(&self) -> usize {
        match self {
            Self::PlaybackFile | Self::Synthetic => 16,
            Self::Cyton => 8,
            Self::Ganglion => 4,
            Self::CytonDaisy => 16,
            Self::BrainBit => 4,
            Self::FreeEeg32 => 32,
            Self::MuseS | Self::Muse2 => 4,
            Self::Explore4Chan => 4,
            Self::Explore8Chan => 8,
        }
    }

    /// Sampling rate in Hz.
    #[must_use]
    pub fn sampling_rate(&self) -> u32 {
        match self {
            Self::PlaybackFile | Self::Synthetic => 250,
            Self::Cyton | Self::CytonDaisy => 250,
            Self::Ganglion => 200,
            Self::BrainBit => 250,
            Self::FreeEeg32 => 512,
            Self::MuseS | Self::Muse2 => 256,
            Self::Explore4Chan | Self::Explore8Chan => 250,
        }
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BoardId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Self::from_id(id);
        }
        ALL_BOARDS
            .iter()
            .copied()
            .find(|board| board.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| SyncError::Configuration(format!("Unknown board '{}'", trimmed)))
    }
}

/// Connection parameters handed to a board backend, shaped like BrainFlow's
/// input params. Unused fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardParams {
    /// BLE MAC address of a live board.
    pub mac_address: Option<String>,
    /// Serial port of a live board.
    pub serial_port: Option<String>,
    /// Board that recorded `file` (playback only).
    pub master_board: Option<BoardId>,
    /// Source recording (playback only).
    pub file: Option<PathBuf>,
}

impl fmt::Display for BoardParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mac={} serial={}",
            self.mac_address.as_deref().unwrap_or("-"),
            self.serial_port.as_deref().unwrap_or("-")
        )
    }
}
