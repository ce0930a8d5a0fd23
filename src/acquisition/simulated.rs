//! Built-in board backend for synthetic and playback acquisition.
//!
//! `SYNTHETIC_BOARD` generates one sinusoid per EEG channel plus noise.
//! `PLAYBACK_FILE_BOARD` replays the rows of a previously recorded file
//! (tab-separated, one sample per row), looping at the end, at the sampling
//! rate of its master board.
//!
//! While streaming, a background task emits a batch of rows every 40 ms and
//! writes them to every attached file streamer. Rows are laid out as
//! `package, eeg..., timestamp, marker`; the marker column is zero except on
//! the first row emitted after an `insert_marker` call.
//!
//! Live hardware boards are not handled here: preparing one fails with a
//! session error so the run aborts before any stimulus is delivered.

use super::{BoardBackend, BoardId, BoardParams, SinkMode, StreamSink};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::fs::{File, OpenOptions};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BATCH_PERIOD: Duration = Duration::from_millis(40);
/// Samples kept before the oldest are dropped from the count.
const RING_CAPACITY: usize = 450_000;

enum SampleSource {
    Synthetic { channels: usize, rng: StdRng },
    Playback { rows: Vec<Vec<f64>>, cursor: usize },
}

struct Streamer {
    uri: String,
    writer: csv::Writer<File>,
}

/// Mutable acquisition state shared with the emitter task.
struct Feed {
    source: Option<SampleSource>,
    rate: u32,
    streamers: Vec<Streamer>,
    pending_markers: VecDeque<f64>,
    buffered: usize,
    package: u64,
    emitted: u64,
}

impl Feed {
    fn new() -> Self {
        Self {
            source: None,
            rate: 0,
            streamers: Vec::new(),
            pending_markers: VecDeque::new(),
            buffered: 0,
            package: 0,
            emitted: 0,
        }
    }

    fn next_row(&mut self, timestamp: f64) -> Vec<f64> {
        let marker = self.pending_markers.pop_front().unwrap_or(0.0);
        let t = self.emitted as f64 / f64::from(self.rate.max(1));
        self.emitted += 1;
        let package = (self.package % 256) as f64;
        self.package += 1;

        match &mut self.source {
            Some(SampleSource::Synthetic { channels, rng }) => {
                let mut row = Vec::with_capacity(*channels + 3);
                row.push(package);
                for ch in 0..*channels {
                    let freq = 5.0 + ch as f64;
                    row.push(10.0 * (TAU * freq * t).sin() + rng.gen_range(-1.0..1.0));
                }
                row.push(timestamp);
                row.push(marker);
                row
            }
            Some(SampleSource::Playback { rows, cursor }) => {
                let mut row = rows[*cursor].clone();
                *cursor = (*cursor + 1) % rows.len();
                if let Some(last) = row.last_mut() {
                    *last = marker;
                }
                row
            }
            None => Vec::new(),
        }
    }

    fn emit_batch(&mut self) -> Result<(), csv::Error> {
        let rows_per_batch =
            ((u128::from(self.rate) * BATCH_PERIOD.as_millis()) / 1000).max(1) as usize;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        for i in 0..rows_per_batch {
            let row = self.next_row(now + i as f64 / f64::from(self.rate.max(1)));
            for streamer in &mut self.streamers {
                streamer
                    .writer
                    .write_record(row.iter().map(|v| format!("{:.6}", v)))?;
            }
        }
        for streamer in &mut self.streamers {
            streamer.writer.flush()?;
        }
        self.buffered = (self.buffered + rows_per_batch).min(RING_CAPACITY);
        Ok(())
    }

    fn flush_all(&mut self) {
        for streamer in &mut self.streamers {
            if let Err(e) = streamer.writer.flush() {
                warn!("Flushing streamer '{}' failed: {}", streamer.uri, e);
            }
        }
    }
}

struct Emitter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Board backend producing synthetic or replayed samples.
pub struct SimulatedBoard {
    board: BoardId,
    params: BoardParams,
    feed: Arc<Mutex<Feed>>,
    emitter: Option<Emitter>,
    prepared: bool,
}

impl SimulatedBoard {
    /// Backend for `board`; playback needs `master_board` and `file` set in
    /// `params`.
    #[must_use]
    pub fn new(board: BoardId, params: BoardParams) -> Self {
        Self {
            board,
            params,
            feed: Arc::new(Mutex::new(Feed::new())),
            emitter: None,
            prepared: false,
        }
    }

    /// Synthetic board backend.
    #[must_use]
    pub fn synthetic() -> Self {
        Self::new(BoardId::Synthetic, BoardParams::default())
    }

    /// Connection parameters this backend was built with.
    #[must_use]
    pub fn params(&self) -> &BoardParams {
        &self.params
    }

    fn load_playback(&self) -> SyncResult<(Vec<Vec<f64>>, u32)> {
        let master = self.params.master_board.ok_or_else(|| {
            SyncError::Session("Playback board requires a master board".to_string())
        })?;
        let path = self.params.file.as_ref().ok_or_else(|| {
            SyncError::Session("Playback board requires a source file".to_string())
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| {
                SyncError::Session(format!("Cannot open playback file '{}': {}", path.display(), e))
            })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                SyncError::Session(format!("Bad playback file '{}': {}", path.display(), e))
            })?;
            let row = record
                .iter()
                .map(|field| field.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    SyncError::Session(format!("Bad sample in '{}': {}", path.display(), e))
                })?;
            if !row.is_empty() {
                rows.push(row);
            }
        }
        if rows.is_empty() {
            return Err(SyncError::Session(format!(
                "Playback file '{}' contains no samples",
                path.display()
            )));
        }
        Ok((rows, master.sampling_rate()))
    }

    fn require_prepared(&self, operation: &str) -> SyncResult<()> {
        if self.prepared {
            Ok(())
        } else {
            Err(SyncError::Session(format!(
                "{} requires a prepared {} session",
                operation, self.board
            )))
        }
    }

    async fn halt_emitter(&mut self) {
        if let Some(emitter) = self.emitter.take() {
            emitter.cancel.cancel();
            if let Err(e) = emitter.handle.await {
                warn!("Sample emitter ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait]
impl BoardBackend for SimulatedBoard {
    fn board_id(&self) -> BoardId {
        self.board
    }

    async fn prepare_session(&mut self) -> SyncResult<()> {
        if self.prepared {
            return Err(SyncError::Session(format!("{} already prepared", self.board)));
        }
        let (source, rate) = match self.board {
            BoardId::Synthetic => (
                SampleSource::Synthetic {
                    channels: self.board.eeg_channels(),
                    rng: StdRng::from_entropy(),
                },
                self.board.sampling_rate(),
            ),
            BoardId::PlaybackFile => {
                let (rows, rate) = self.load_playback()?;
                (SampleSource::Playback { rows, cursor: 0 }, rate)
            }
            other => {
                return Err(SyncError::Session(format!(
                    "No built-in driver for {} ({}); live boards need an external backend",
                    other, self.params
                )))
            }
        };

        let mut feed = self.feed.lock().await;
        *feed = Feed::new();
        feed.source = Some(source);
        feed.rate = rate;
        drop(feed);

        self.prepared = true;
        debug!("{} prepared at {} Hz", self.board, rate);
        Ok(())
    }

    async fn release_session(&mut self) -> SyncResult<()> {
        self.halt_emitter().await;
        let mut feed = self.feed.lock().await;
        feed.flush_all();
        *feed = Feed::new();
        self.prepared = false;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.prepared
    }

    async fn start_stream(&mut self) -> SyncResult<()> {
        self.require_prepared("start_stream")?;
        if self.emitter.is_some() {
            return Err(SyncError::Session("Stream already running".to_string()));
        }
        let feed = Arc::clone(&self.feed);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BATCH_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = feed.lock().await.emit_batch() {
                            warn!("Writing samples failed: {}", e);
                        }
                    }
                }
            }
        });
        self.emitter = Some(Emitter { cancel, handle });
        Ok(())
    }

    async fn stop_stream(&mut self) -> SyncResult<()> {
        if self.emitter.is_none() {
            return Err(SyncError::Session("Stream is not running".to_string()));
        }
        self.halt_emitter().await;
        self.feed.lock().await.flush_all();
        Ok(())
    }

    async fn add_streamer(&mut self, uri: &str) -> SyncResult<()> {
        self.require_prepared("add_streamer")?;
        let sink = StreamSink::parse(uri)?;
        let mut feed = self.feed.lock().await;
        if feed.streamers.iter().any(|s| s.uri == uri) {
            return Err(SyncError::Session(format!("Streamer '{}' already added", uri)));
        }
        let file = match sink.mode {
            SinkMode::Write => File::create(&sink.path),
            SinkMode::Append => OpenOptions::new().create(true).append(true).open(&sink.path),
        }
        .map_err(|e| {
            SyncError::Session(format!("Cannot open '{}': {}", sink.path.display(), e))
        })?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_writer(file);
        feed.streamers.push(Streamer {
            uri: uri.to_string(),
            writer,
        });
        Ok(())
    }

    async fn delete_streamer(&mut self, uri: &str) -> SyncResult<()> {
        let mut feed = self.feed.lock().await;
        let index = feed
            .streamers
            .iter()
            .position(|s| s.uri == uri)
            .ok_or_else(|| SyncError::Session(format!("Streamer '{}' not found", uri)))?;
        let mut streamer = feed.streamers.remove(index);
        streamer
            .writer
            .flush()
            .map_err(|e| SyncError::Session(format!("Flushing '{}' failed: {}", uri, e)))?;
        Ok(())
    }

    async fn insert_marker(&mut self, code: f64) -> SyncResult<()> {
        self.require_prepared("insert_marker")?;
        self.feed.lock().await.pending_markers.push_back(code);
        Ok(())
    }

    async fn data_count(&self) -> SyncResult<usize> {
        self.require_prepared("data_count")?;
        Ok(self.feed.lock().await.buffered)
    }
}

impl Drop for SimulatedBoard {
    fn drop(&mut self) {
        if let Some(emitter) = &self.emitter {
            emitter.cancel.cancel();
        }
    }
}
