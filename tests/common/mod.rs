//! Fake devices shared by the integration tests.
//!
//! Both fakes append to one event log so tests can assert the interleaving of
//! board calls and stimulator commands.

#![allow(dead_code)]

use async_trait::async_trait;
use measure_sync::acquisition::{BoardBackend, BoardId, StreamSink};
use measure_sync::stimulator::{LineTransport, LinkTiming, StimulatorHardware, StimulatorLink};
use measure_sync::watcher::Probe;
use measure_sync::{SyncError, SyncResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Ordered record of every device interaction.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.snapshot().iter().filter(|e| *e == event).count()
    }
}

fn file_name(uri: &str) -> String {
    let sink = StreamSink::parse(uri).unwrap();
    sink.path.file_name().unwrap().to_string_lossy().into_owned()
}

/// Board that records calls instead of streaming.
pub struct FakeBoard {
    events: EventLog,
    prepared: bool,
    markers: usize,
    fail_on_marker: Option<usize>,
    polls: Arc<AtomicUsize>,
}

impl FakeBoard {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            prepared: false,
            markers: 0,
            fail_on_marker: None,
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The `n`-th marker insertion (1-based) fails.
    pub fn failing_on_marker(mut self, n: usize) -> Self {
        self.fail_on_marker = Some(n);
        self
    }

    pub fn polls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.polls)
    }
}

#[async_trait]
impl BoardBackend for FakeBoard {
    fn board_id(&self) -> BoardId {
        BoardId::Synthetic
    }

    async fn prepare_session(&mut self) -> SyncResult<()> {
        self.events.push("prepare");
        self.prepared = true;
        Ok(())
    }

    async fn release_session(&mut self) -> SyncResult<()> {
        self.events.push("release");
        self.prepared = false;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    async fn start_stream(&mut self) -> SyncResult<()> {
        self.events.push("start_stream");
        Ok(())
    }

    async fn stop_stream(&mut self) -> SyncResult<()> {
        self.events.push("stop_stream");
        Ok(())
    }

    async fn add_streamer(&mut self, uri: &str) -> SyncResult<()> {
        self.events.push(format!("add_streamer {}", file_name(uri)));
        Ok(())
    }

    async fn delete_streamer(&mut self, uri: &str) -> SyncResult<()> {
        self.events.push(format!("delete_streamer {}", file_name(uri)));
        Ok(())
    }

    async fn insert_marker(&mut self, code: f64) -> SyncResult<()> {
        self.markers += 1;
        if self.fail_on_marker == Some(self.markers) {
            return Err(SyncError::Session("board disconnected".to_string()));
        }
        self.events.push(format!("marker {}", code));
        Ok(())
    }

    async fn data_count(&self) -> SyncResult<usize> {
        if !self.prepared {
            return Err(SyncError::Session("not prepared".to_string()));
        }
        Ok(self.polls.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Transport that logs every line as `vhp <line>`.
pub struct FakeTransport {
    events: EventLog,
}

#[async_trait]
impl LineTransport for FakeTransport {
    async fn write_line(&mut self, line: &str) -> SyncResult<()> {
        self.events.push(format!("vhp {}", line));
        Ok(())
    }

    async fn drain_lines(&mut self) -> SyncResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.events.push("vhp close");
        Ok(())
    }
}

/// Stimulator that shows up on the `connect_on`-th probe (never when 0).
pub struct FakeStimulator {
    events: EventLog,
    connect_on: usize,
    probes: Arc<AtomicUsize>,
}

impl FakeStimulator {
    pub fn new(events: EventLog, connect_on: usize) -> Self {
        Self {
            events,
            connect_on,
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn probes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.probes)
    }
}

#[async_trait]
impl Probe for FakeStimulator {
    fn target(&self) -> &str {
        "/dev/fake-vhp"
    }

    async fn probe(&self) -> bool {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        self.connect_on != 0 && n >= self.connect_on
    }
}

#[async_trait]
impl StimulatorHardware for FakeStimulator {
    type Transport = FakeTransport;

    async fn open(&self) -> SyncResult<StimulatorLink<FakeTransport>> {
        self.events.push("link open");
        let transport = FakeTransport {
            events: self.events.clone(),
        };
        Ok(StimulatorLink::from_transport(self.target(), transport, LinkTiming::immediate()).await)
    }
}

/// Measurement document: channel 1, frequencies 10 and 20, volume 50,
/// `cycles` ON/OFF cycles of 1 s + 0.5 s.
pub fn measurement_yaml(cycles: u32, pre_start: u32) -> String {
    format!(
        "Channel:\n  Start: 1\n  End: 1\n  Steps: 1\n\
         Frequency:\n  Start: 10\n  End: 20\n  Steps: 10\n\
         Volume:\n  Start: 50\n  End: 50\n  Steps: 1\n\
         Measurements:\n  Number: {}\n  Duration_on: 1\n  Duration_off: 0.5\n  \
         Pre-start_EEG_measurement: {}\n",
        cycles, pre_start
    )
}

pub fn device_yaml(keep_ble_alive: bool) -> String {
    format!(
        "Board:\n  Id: SYNTHETIC_BOARD\n  Master:\n  Mac:\n  File:\n  Serial:\n  \
         Keep_ble_alive: {}\nVHP:\n  Serial: /dev/fake-vhp\n",
        keep_ble_alive
    )
}
