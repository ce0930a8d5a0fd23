//! Vibrotactile stimulator (VHP) control over a serial line.
//!
//! Protocol Overview:
//! - Format: `<letter><integer>\n` (ASCII), `1`/`0`/`S`/`X` carry no argument
//! - Baud rate 115200, read/write timeout 1 s
//! - The device resets when the port opens; nothing is sent for 2 s
//! - After every command the link waits 50 ms and drains reply lines. Replies
//!   are logged verbatim and never interpreted.
//!
//! Every numeric argument is clamped to the device's safety envelope before it
//! is encoded, so out-of-range requests are corrected rather than rejected.
//!
//! # Example Usage
//!
//! ```no_run
//! use measure_sync::stimulator::{LinkTiming, StimulatorLink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut link = StimulatorLink::open("/dev/ttyACM0", LinkTiming::default()).await?;
//!     link.set_channel(2).await?;
//!     link.set_volume(150).await?; // sent as V100
//!     link.start_stream().await?;
//!     link.stop_stream().await?;
//!     link.close().await?;
//!     Ok(())
//! }
//! ```

pub mod serial;

pub use serial::{SerialProbe, SerialStimulator, SerialTransport};

use crate::error::{SyncError, SyncResult};
use crate::watcher::Probe;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Serial baud rate of the stimulator.
pub const BAUD_RATE: u32 = 115_200;
/// Read/write timeout on the serial port.
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Line-oriented transport under a [`StimulatorLink`].
#[async_trait]
pub trait LineTransport: Send {
    /// Writes `line` followed by `\n`.
    async fn write_line(&mut self, line: &str) -> SyncResult<()>;

    /// Returns every complete reply line currently waiting, without blocking
    /// for more.
    async fn drain_lines(&mut self) -> SyncResult<Vec<String>>;

    /// Releases the port. Further writes fail.
    async fn close(&mut self) -> SyncResult<()>;
}

/// Stimulator as seen by the orchestrator: presence probe plus link factory.
#[async_trait]
pub trait StimulatorHardware: Probe {
    /// Transport of the opened link.
    type Transport: LineTransport + 'static;

    /// Opens the persistent command link.
    async fn open(&self) -> SyncResult<StimulatorLink<Self::Transport>>;
}

/// Delays around the serial exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Wait after opening the port (device reset).
    pub settle: Duration,
    /// Wait after each command before draining replies.
    pub reply_wait: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            reply_wait: Duration::from_millis(50),
        }
    }
}

impl LinkTiming {
    /// No delays at all, for fakes.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            reply_wait: Duration::ZERO,
        }
    }
}

/// One stimulator command with its raw (unclamped) argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulatorCommand {
    /// `D`: pulse duration, 1..=65535
    Duration(i64),
    /// `Y`: cycle period, 1..=65535
    CyclePeriod(i64),
    /// `P`: pause cycle period, 0..=100
    PauseCyclePeriod(i64),
    /// `Q`: paused cycles, 0..=100
    PausedCycles(i64),
    /// `J`: jitter, 0..=1000
    Jitter(i64),
    /// `M`: test mode on/off
    TestMode(bool),
    /// `C`: channel, 0..=8
    Channel(i64),
    /// `V`: volume, 0..=100
    Volume(i64),
    /// `F`: frequency, sent as is
    Frequency(i64),
    /// `1`: start stimulation
    Start,
    /// `0`: stop stimulation
    Stop,
    /// `S`: firmware query
    Firmware,
    /// `X`: parameter query
    Parameters,
}

impl StimulatorCommand {
    /// Wire form without the line terminator, argument clamped.
    #[must_use]
    pub fn encode(&self) -> String {
        match *self {
            Self::Duration(v) => format!("D{}", v.clamp(1, 65_535)),
            Self::CyclePeriod(v) => format!("Y{}", v.clamp(1, 65_535)),
            Self::PauseCyclePeriod(v) => format!("P{}", v.clamp(0, 100)),
            Self::PausedCycles(v) => format!("Q{}", v.clamp(0, 100)),
            Self::Jitter(v) => format!("J{}", v.clamp(0, 1000)),
            Self::TestMode(on) => format!("M{}", u8::from(on)),
            Self::Channel(v) => format!("C{}", v.clamp(0, 8)),
            Self::Volume(v) => format!("V{}", v.clamp(0, 100)),
            Self::Frequency(v) => format!("F{}", v),
            Self::Start => "1".to_string(),
            Self::Stop => "0".to_string(),
            Self::Firmware => "S".to_string(),
            Self::Parameters => "X".to_string(),
        }
    }
}

impl fmt::Display for StimulatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Operating parameters pushed once after the link comes up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulatorDefaults {
    /// Pulse duration.
    pub duration: i64,
    /// Cycle period.
    pub cycle_period: i64,
    /// Pause cycle period.
    pub pause_cycle_period: i64,
    /// Paused cycles.
    pub paused_cycles: i64,
    /// Jitter.
    pub jitter: i64,
    /// Test mode.
    pub test_mode: bool,
}

impl Default for StimulatorDefaults {
    fn default() -> Self {
        Self {
            duration: 8000,
            cycle_period: 64_000,
            pause_cycle_period: 1,
            paused_cycles: 0,
            jitter: 0,
            test_mode: true,
        }
    }
}

/// Open command link to the stimulator.
pub struct StimulatorLink<T: LineTransport> {
    port: String,
    transport: Option<T>,
    timing: LinkTiming,
    stimulating: bool,
}

impl StimulatorLink<SerialTransport> {
    /// Opens `port` at 115200 baud and waits for the device reset.
    pub async fn open(port: &str, timing: LinkTiming) -> SyncResult<Self> {
        let transport = SerialTransport::open(port)?;
        Ok(Self::from_transport(port, transport, timing).await)
    }
}

impl<T: LineTransport> StimulatorLink<T> {
    /// Wraps an already opened transport, then waits the settle time.
    pub async fn from_transport(port: &str, transport: T, timing: LinkTiming) -> Self {
        debug!("Stimulator link on '{}' settling for {:?}", port, timing.settle);
        tokio::time::sleep(timing.settle).await;
        Self {
            port: port.to_string(),
            transport: Some(transport),
            timing,
            stimulating: false,
        }
    }

    /// Port path of this link.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    /// True once `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// True between `start_stream` and `stop_stream`.
    #[must_use]
    pub fn is_stimulating(&self) -> bool {
        self.stimulating
    }

    /// Sends one command, waits, then drains and logs the replies.
    pub async fn send(&mut self, command: StimulatorCommand) -> SyncResult<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| SyncError::LinkIo(format!("link to '{}' is closed", self.port)))?;

        let line = command.encode();
        transport.write_line(&line).await?;
        debug!("Serial VHP Sent: {}", line);

        tokio::time::sleep(self.timing.reply_wait).await;

        for reply in transport.drain_lines().await? {
            debug!("Serial VHP Received: {}", reply);
        }
        Ok(())
    }

    /// Sets the pulse duration.
    pub async fn set_duration(&mut self, duration: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::Duration(duration)).await
    }

    /// Sets the cycle period.
    pub async fn set_cycle_period(&mut self, period: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::CyclePeriod(period)).await
    }

    /// Sets the pause cycle period.
    pub async fn set_pause_cycle_period(&mut self, period: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::PauseCyclePeriod(period)).await
    }

    /// Sets the number of paused cycles.
    pub async fn set_paused_cycles(&mut self, cycles: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::PausedCycles(cycles)).await
    }

    /// Sets the jitter.
    pub async fn set_jitter(&mut self, jitter: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::Jitter(jitter)).await
    }

    /// Enables or disables test mode.
    pub async fn set_test_mode(&mut self, enabled: bool) -> SyncResult<()> {
        self.send(StimulatorCommand::TestMode(enabled)).await
    }

    /// Selects the output channel.
    pub async fn set_channel(&mut self, channel: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::Channel(channel)).await
    }

    /// Sets the volume.
    pub async fn set_volume(&mut self, volume: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::Volume(volume)).await
    }

    /// Sets the vibration frequency.
    pub async fn set_frequency(&mut self, frequency: i64) -> SyncResult<()> {
        self.send(StimulatorCommand::Frequency(frequency)).await
    }

    /// Starts stimulation.
    pub async fn start_stream(&mut self) -> SyncResult<()> {
        self.send(StimulatorCommand::Start).await?;
        self.stimulating = true;
        Ok(())
    }

    /// Stops stimulation.
    pub async fn stop_stream(&mut self) -> SyncResult<()> {
        self.send(StimulatorCommand::Stop).await?;
        self.stimulating = false;
        Ok(())
    }

    /// Asks for the firmware version; the reply only reaches the log.
    pub async fn query_firmware(&mut self) -> SyncResult<()> {
        self.send(StimulatorCommand::Firmware).await
    }

    /// Asks for the current parameter set; the reply only reaches the log.
    pub async fn query_parameters(&mut self) -> SyncResult<()> {
        self.send(StimulatorCommand::Parameters).await
    }

    /// Pushes the fixed operating parameters.
    pub async fn apply_defaults(&mut self, defaults: &StimulatorDefaults) -> SyncResult<()> {
        self.set_duration(defaults.duration).await?;
        self.set_cycle_period(defaults.cycle_period).await?;
        self.set_pause_cycle_period(defaults.pause_cycle_period).await?;
        self.set_paused_cycles(defaults.paused_cycles).await?;
        self.set_jitter(defaults.jitter).await?;
        self.set_test_mode(defaults.test_mode).await
    }

    /// Releases the port. A no-op once closed.
    pub async fn close(&mut self) -> SyncResult<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
            debug!("Serial closed: {}", self.port);
        }
        Ok(())
    }
}
