//! Experiment orchestration.
//!
//! [`ExperimentOrchestrator`] sequences one run:
//!
//! 1. prepare the acquisition session and start streaming
//! 2. optionally start the BLE keepalive
//! 3. if the stimulator is absent, record a baseline until it shows up
//! 4. open the stimulator link and push the operating defaults
//! 5. for every sweep condition: configure the stimulator, attach a sink and
//!    run the ON/OFF cycles with a marker before every stimulator command
//! 6. stop, release, write the metadata record
//!
//! # Cleanup
//!
//! Whatever happens in steps 1-6, the keepalive is cancelled and joined, the
//! stimulator is stopped and its port closed, and the session is stopped and
//! released before `run` returns. Cleanup errors are logged and never replace
//! the first failure.
//!
//! # Timing
//!
//! Every wait is a plain `tokio::time::sleep` raced against the cancellation
//! token. Nothing overlaps: markers and stimulator commands are issued
//! strictly in sequence so the annotations line up with the physical stimulus.

use crate::acquisition::{
    AcquisitionSession, BoardBackend, BoardId, Marker, SessionReader, SessionState, SharedSession,
};
use crate::config::ExperimentConfig;
use crate::error::{SyncError, SyncResult};
use crate::keepalive::{KeepAlive, KeepAliveExit, DEFAULT_KEEPALIVE_INTERVAL};
use crate::recording::{RecordingLayout, RunMetadata, RunMetadataBuilder};
use crate::stimulator::{LineTransport, StimulatorDefaults, StimulatorHardware, StimulatorLink};
use crate::sweep::SweepCondition;
use crate::watcher::{ConnectionWatcher, DEFAULT_PROBE_INTERVAL};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fixed intervals of the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperimentTiming {
    /// Interval between stimulator presence probes.
    pub probe_interval: Duration,
    /// Interval between keepalive reads.
    pub keepalive_interval: Duration,
    /// Give up waiting for the stimulator after this long. `None` waits forever.
    pub connect_deadline: Option<Duration>,
}

impl Default for ExperimentTiming {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            connect_deadline: None,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Conditions measured, in order.
    pub conditions: Vec<SweepCondition>,
    /// One recording per condition, same order.
    pub recordings: Vec<PathBuf>,
    /// Baseline recording, when the stimulator was not connected at start.
    pub baseline: Option<PathBuf>,
    /// Markers written into the stream.
    pub markers: usize,
    /// Metadata record.
    pub metadata: PathBuf,
}

#[derive(Default)]
struct Progress {
    conditions: Vec<SweepCondition>,
    recordings: Vec<PathBuf>,
    baseline: Option<PathBuf>,
    markers: usize,
}

/// Resources that must be torn down on every exit path.
struct Resources<T: LineTransport> {
    link: Option<StimulatorLink<T>>,
    keepalive: Option<KeepAlive>,
}

/// Drives one experiment run.
pub struct ExperimentOrchestrator<B, S> {
    config: ExperimentConfig,
    layout: RecordingLayout,
    board: BoardId,
    session: SharedSession<B>,
    stimulator: S,
    timing: ExperimentTiming,
    defaults: StimulatorDefaults,
    cancel: CancellationToken,
}

impl<B, S> ExperimentOrchestrator<B, S>
where
    B: BoardBackend + 'static,
    S: StimulatorHardware,
{
    /// Orchestrator writing under `output_root`.
    #[must_use]
    pub fn new(
        config: ExperimentConfig,
        backend: B,
        stimulator: S,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        let layout = RecordingLayout::new(output_root, &config.timestamp());
        let board = backend.board_id();
        Self {
            config,
            layout,
            board,
            session: AcquisitionSession::new(backend).into_shared(),
            stimulator,
            timing: ExperimentTiming::default(),
            defaults: StimulatorDefaults::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the loop intervals.
    #[must_use]
    pub fn with_timing(mut self, timing: ExperimentTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Overrides the stimulator operating defaults.
    #[must_use]
    pub fn with_defaults(mut self, defaults: StimulatorDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Uses `token` to interrupt waits.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the run when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// File layout of this run.
    #[must_use]
    pub fn layout(&self) -> &RecordingLayout {
        &self.layout
    }

    /// Runs the experiment to completion or first fatal error.
    pub async fn run(self) -> SyncResult<RunSummary> {
        info!("Config loaded:\n{}", self.config);

        let mut resources = Resources {
            link: None,
            keepalive: None,
        };
        let mut progress = Progress::default();

        let outcome = self.execute(&mut resources, &mut progress).await;
        self.cleanup(resources).await;

        let metadata_path = self.layout.metadata_path();
        match outcome {
            Ok(()) => {
                self.metadata(None).write_to(&metadata_path)?;
                info!(
                    "Sweep complete: {} condition(s), {} marker(s)",
                    progress.conditions.len(),
                    progress.markers
                );
                Ok(RunSummary {
                    conditions: progress.conditions,
                    recordings: progress.recordings,
                    baseline: progress.baseline,
                    markers: progress.markers,
                    metadata: metadata_path,
                })
            }
            Err(e) => {
                error!("Experiment failed: {}", e);
                if let Err(write_err) = self
                    .metadata(Some(&e.to_string()))
                    .write_to(&metadata_path)
                {
                    warn!("Could not write metadata for failed run: {}", write_err);
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        resources: &mut Resources<S::Transport>,
        progress: &mut Progress,
    ) -> SyncResult<()> {
        self.layout.ensure_root()?;
        {
            let mut session = self.session.write().await;
            session.prepare().await?;
            session.start_stream().await?;
        }

        if self.config.sweep.keep_ble_alive {
            resources.keepalive = Some(KeepAlive::spawn(
                SessionReader::new(&self.session),
                self.timing.keepalive_interval,
                &self.cancel,
            ));
        }

        progress.baseline = self.capture_baseline(progress).await?;

        let link = resources.link.insert(self.stimulator.open().await?);
        link.apply_defaults(&self.defaults).await?;
        link.query_firmware().await?;
        link.query_parameters().await?;

        let plan = self.config.sweep.plan();
        let total = plan.len();
        for (index, condition) in plan.enumerate() {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            info!("Measuring {} ({}/{})", condition, index + 1, total);
            self.measure(link, &condition, progress).await?;
        }

        if let Some(keepalive) = resources.keepalive.take() {
            log_keepalive_exit(keepalive.shutdown().await);
        }
        link.close().await?;

        let mut session = self.session.write().await;
        session.stop_stream().await?;
        session.release().await
    }

    /// Records a baseline while the stimulator is still powered off.
    async fn capture_baseline(&self, progress: &mut Progress) -> SyncResult<Option<PathBuf>> {
        if self.stimulator.probe().await {
            debug!("Stimulator already connected, no baseline needed");
            return Ok(None);
        }

        let path = self.layout.baseline_path(self.board);
        info!(
            "VHP device not found on '{}', recording baseline to '{}'",
            self.stimulator.target(),
            path.display()
        );
        self.session.write().await.attach_sink(&path).await?;
        self.mark(Marker::DeviceOff, progress).await?;

        ConnectionWatcher::new(&self.stimulator, self.timing.probe_interval)
            .wait(&self.cancel, self.timing.connect_deadline)
            .await?;

        self.mark(Marker::DeviceOn, progress).await?;
        self.pause(self.config.sweep.pre_start).await?;
        self.session.write().await.detach_sink(&path).await?;
        Ok(Some(path))
    }

    /// Runs all ON/OFF cycles of one condition into its own recording.
    async fn measure(
        &self,
        link: &mut StimulatorLink<S::Transport>,
        condition: &SweepCondition,
        progress: &mut Progress,
    ) -> SyncResult<()> {
        let sweep = &self.config.sweep;

        link.set_channel(condition.channel).await?;
        link.set_volume(condition.volume).await?;
        link.set_frequency(condition.frequency).await?;

        let path = self.layout.condition_path(self.board, condition);
        self.session.write().await.attach_sink(&path).await?;

        if !sweep.pre_start.is_zero() {
            self.mark(Marker::PreStart, progress).await?;
            self.pause(sweep.pre_start).await?;
        }

        for cycle in 0..sweep.measurements_number {
            debug!("Cycle {}/{}", cycle + 1, sweep.measurements_number);
            self.mark(Marker::StimulusOn, progress).await?;
            link.start_stream().await?;
            self.pause(sweep.duration_on).await?;

            self.mark(Marker::StimulusOff, progress).await?;
            link.stop_stream().await?;
            self.pause(sweep.duration_off).await?;
        }

        self.session.write().await.detach_sink(&path).await?;
        progress.conditions.push(*condition);
        progress.recordings.push(path);
        Ok(())
    }

    async fn mark(&self, marker: Marker, progress: &mut Progress) -> SyncResult<()> {
        self.session.write().await.insert_marker(marker).await?;
        progress.markers += 1;
        Ok(())
    }

    async fn pause(&self, duration: Duration) -> SyncResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn cleanup(&self, mut resources: Resources<S::Transport>) {
        if let Some(keepalive) = resources.keepalive.take() {
            log_keepalive_exit(keepalive.shutdown().await);
        }

        if let Some(mut link) = resources.link.take() {
            if link.is_stimulating() {
                if let Err(e) = link.stop_stream().await {
                    warn!("Stopping stimulator during cleanup failed: {}", e);
                }
            }
            if let Err(e) = link.close().await {
                warn!("Closing stimulator link failed: {}", e);
            }
        }

        let mut session = self.session.write().await;
        if session.state() == SessionState::Streaming {
            if let Err(e) = session.stop_stream().await {
                warn!("Stopping acquisition stream during cleanup failed: {}", e);
            }
        }
        if let Err(e) = session.release().await {
            warn!("Releasing acquisition session failed: {}", e);
        }
    }

    fn metadata(&self, failure: Option<&str>) -> RunMetadata {
        let builder = RunMetadataBuilder::new(self.config.started_at)
            .measurement_config(&self.config.measurement_source)
            .device_config(&self.config.device_source);
        match failure {
            Some(reason) => builder.failure(reason).build(),
            None => builder.build(),
        }
    }

    /// Output directory of this run.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        self.layout.root()
    }
}

fn log_keepalive_exit(exit: KeepAliveExit) {
    match exit {
        KeepAliveExit::Cancelled => debug!("Keepalive shut down"),
        KeepAliveExit::Failed(reason) => warn!("Keepalive had stopped early: {}", reason),
    }
}
