//! Background frame scheduler: preloads frame 0, waits for playback to
//! begin, then publishes one frame per tick of an absolute timeline.

use crate::error::{FrameError, PlaybackError};
use crate::mailbox::Mailbox;
use crate::timeline::{frame_duration, Timeline};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;
use tokio::time::Instant;

/// Turns one source location into a frame ready for display.
///
/// Called on the scheduler thread; blocking I/O is fine here.
pub trait FrameLoader: Send + Sync + 'static {
    type Frame: Send + 'static;

    fn load(&self, source: &Path) -> Result<Self::Frame, FrameError>;
}

/// Elapsed time of the external audio track, if one is playing.
pub trait AudioClock: Send + Sync {
    fn elapsed_seconds(&self) -> Option<f64>;
}

impl<F> AudioClock for F
where
    F: Fn() -> Option<f64> + Send + Sync,
{
    fn elapsed_seconds(&self) -> Option<f64> {
        self()
    }
}

/// A frame together with where it sits on the timeline.
#[derive(Debug)]
pub struct ScheduledFrame<T> {
    /// Timeline index (monotonic, not wrapped).
    pub index: u64,
    /// Position in the source list (`index % len`).
    pub source_index: usize,
    pub frame: T,
}

pub type FrameMailbox<T> = Mailbox<ScheduledFrame<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub fps: u32,
    /// Report drift against the audio clock every this many frames.
    pub drift_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            drift_interval: 30,
        }
    }
}

/// Counters shared with the HUD; all reads are lock-free.
#[derive(Debug)]
pub struct PlaybackStats {
    published: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    current_index: AtomicU64,
    last_drift: AtomicU64,
}

impl Default for PlaybackStats {
    fn default() -> Self {
        Self {
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            current_index: AtomicU64::new(0),
            last_drift: AtomicU64::new(f64::NAN.to_bits()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub published: u64,
    pub dropped: u64,
    pub failed: u64,
    pub current_index: u64,
    pub last_drift: Option<f64>,
}

impl PlaybackStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let drift = f64::from_bits(self.last_drift.load(Ordering::Relaxed));
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            current_index: self.current_index.load(Ordering::Relaxed),
            last_drift: (!drift.is_nan()).then_some(drift),
        }
    }

    fn record_drift(&self, drift: f64) {
        self.last_drift.store(drift.to_bits(), Ordering::Relaxed);
    }
}

/// Drift of the video timeline relative to audio, in seconds.
/// Positive means video is ahead.
pub fn drift_seconds(index: u64, fps: u32, audio_seconds: f64) -> f64 {
    index as f64 / f64::from(fps.max(1)) - audio_seconds
}

pub struct Scheduler<L: FrameLoader> {
    loader: L,
    sources: Arc<[PathBuf]>,
    mailbox: Arc<FrameMailbox<L::Frame>>,
    generation: u64,
    config: SchedulerConfig,
    audio: Option<Arc<dyn AudioClock>>,
    stats: Arc<PlaybackStats>,
}

impl<L: FrameLoader> Scheduler<L> {
    /// Declines to build a scheduler over an empty source list.
    pub fn new(
        loader: L,
        sources: Vec<PathBuf>,
        mailbox: Arc<FrameMailbox<L::Frame>>,
        config: SchedulerConfig,
    ) -> Result<Self, PlaybackError> {
        if sources.is_empty() {
            return Err(PlaybackError::NoSources);
        }
        Ok(Self {
            loader,
            sources: sources.into(),
            generation: mailbox.generation(),
            mailbox,
            config,
            audio: None,
            stats: Arc::default(),
        })
    }

    pub fn with_audio_clock(mut self, clock: Arc<dyn AudioClock>) -> Self {
        self.audio = Some(clock);
        self
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        self.stats.clone()
    }

    /// Runs the scheduler on its own thread with a current-thread runtime.
    pub fn spawn_on_thread(self) -> Result<PlaybackHandle<L::Frame>, PlaybackError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mailbox = self.mailbox.clone();
        let stats = self.stats.clone();

        let thread = std::thread::Builder::new()
            .name("frame-scheduler".into())
            .spawn(move || rt.block_on(self.run(cancel_rx)))?;

        Ok(PlaybackHandle {
            cancel: cancel_tx,
            thread: Some(thread),
            mailbox,
            stats,
        })
    }

    /// Drives preload and playback until cancelled.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        let len = self.sources.len() as u64;

        let Some(preloaded) = self.preload(&cancel) else {
            return;
        };

        tokio::select! {
            _ = self.mailbox.wait_started() => {}
            _ = cancelled(&mut cancel) => return,
        }

        let mut timeline = Timeline::new(
            Instant::now(),
            frame_duration(self.config.fps),
            preloaded + 1,
        );
        tracing::info!(fps = self.config.fps, sources = len, "playback started");

        loop {
            if is_cancelled(&cancel) {
                break;
            }

            let index = timeline.index();
            let source_index = (index % len) as usize;
            if let Some(frame) = self.load(index, source_index) {
                if is_cancelled(&cancel) {
                    break;
                }
                self.publish(ScheduledFrame {
                    index,
                    source_index,
                    frame,
                });
            }
            self.report_drift(index);

            // Hold until this frame's deadline. A late frame moves straight on
            // without skipping ahead.
            let target = timeline.target();
            if target > Instant::now() {
                tokio::select! {
                    _ = tokio::time::sleep_until(target) => {}
                    _ = cancelled(&mut cancel) => break,
                }
            }
            timeline.advance();
        }

        tracing::info!(frame = timeline.index(), "playback stopped");
    }

    /// Loads the first displayable frame, starting at source 0.
    fn preload(&self, cancel: &watch::Receiver<bool>) -> Option<u64> {
        for index in 0..self.sources.len() as u64 {
            if is_cancelled(cancel) {
                return None;
            }
            if let Some(frame) = self.load(index, index as usize) {
                self.publish(ScheduledFrame {
                    index,
                    source_index: index as usize,
                    frame,
                });
                tracing::debug!(frame = index, "preloaded");
                return Some(index);
            }
        }
        tracing::error!("no source could be loaded; scheduler exiting");
        None
    }

    fn load(&self, index: u64, source_index: usize) -> Option<L::Frame> {
        let source = &self.sources[source_index];
        match self.loader.load(source) {
            Ok(frame) => Some(frame),
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    source = %source.display(),
                    frame = index,
                    kind = err.kind(),
                    error = %err,
                    "frame skipped"
                );
                None
            }
        }
    }

    fn publish(&self, frame: ScheduledFrame<L::Frame>) {
        let index = frame.index;
        match self.mailbox.put_current(self.generation, frame) {
            Ok(None) => {}
            Ok(Some(unread)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(frame = unread.index, "unread frame replaced");
            }
            Err(stale) => {
                tracing::debug!(frame = stale.index, "playback stopped; frame discarded");
                return;
            }
        }
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        self.stats.current_index.store(index, Ordering::Relaxed);
    }

    fn report_drift(&self, index: u64) {
        let interval = self.config.drift_interval.max(1);
        if index % interval != 0 {
            return;
        }
        let Some(audio) = self.audio.as_ref().and_then(|clock| clock.elapsed_seconds()) else {
            return;
        };
        let drift = drift_seconds(index, self.config.fps, audio);
        self.stats.record_drift(drift);
        tracing::info!(frame = index, audio_s = audio, drift_s = drift, "audio drift");
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Resolves when cancellation is requested or the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A closed channel also means nobody can resume us.
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// Owner of a running scheduler thread.
pub struct PlaybackHandle<T> {
    cancel: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
    mailbox: Arc<FrameMailbox<T>>,
    stats: Arc<PlaybackStats>,
}

impl<T> PlaybackHandle<T> {
    pub fn stats(&self) -> &Arc<PlaybackStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancels the scheduler and clears the mailbox and started flag without
    /// waiting for the thread. A load still in flight finishes in the
    /// background and its frame is refused by the mailbox.
    pub fn stop(&mut self) {
        self.cancel.send_replace(true);
        drop(self.mailbox.clear());
        if let Some(thread) = self.thread.take() {
            let reaper = std::thread::Builder::new()
                .name("frame-scheduler-reaper".into())
                .spawn(move || join_scheduler(thread));
            if let Err(err) = reaper {
                tracing::warn!(error = %err, "scheduler thread detached");
            }
        }
    }

    /// Cancels the scheduler and blocks until its thread has exited.
    pub fn join(mut self) {
        self.cancel.send_replace(true);
        if let Some(thread) = self.thread.take() {
            join_scheduler(thread);
        }
        drop(self.mailbox.clear());
    }
}

fn join_scheduler(thread: JoinHandle<()>) {
    if thread.join().is_err() {
        tracing::error!("scheduler thread panicked");
    }
}

impl<T> Drop for PlaybackHandle<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
