//! Per-tick renderer integration: drains the mailbox, converts each new
//! frame once and issues the instanced draw when the placement is known.

use crate::gpu::buffers::FrameBuffers;
use crate::gpu::splat::QUAD_VERTICES;
use crate::placement::PlacementGate;
use crate::scheduler::{FrameMailbox, ScheduledFrame};
use glam::Mat4;
use std::sync::Arc;

/// Log the missing placement at most once per this many ticks.
const ABSENT_LOG_EVERY: u64 = 240;

/// Anything the presenter can draw as `point_count` instances.
pub trait PointFrame {
    fn point_count(&self) -> u32;
}

impl PointFrame for FrameBuffers {
    fn point_count(&self) -> u32 {
        FrameBuffers::point_count(self)
    }
}

impl PointFrame for plyframe::Frame {
    fn point_count(&self) -> u32 {
        u32::try_from(plyframe::Frame::point_count(self)).unwrap_or(u32::MAX)
    }
}

/// One instanced billboard draw over a converted frame.
#[derive(Debug)]
pub struct DrawCall<'a, F> {
    pub frame: &'a F,
    pub placement: Mat4,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// The GPU side of a render tick.
pub trait RenderBackend {
    type Frame: PointFrame;

    /// Runs the conversion pass over a newly active frame.
    fn convert(&mut self, frame: &Self::Frame);

    /// Records this tick's pass: always a clear, plus `draw` when placed.
    fn present(&mut self, draw: Option<DrawCall<'_, Self::Frame>>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame has arrived yet; nothing was recorded.
    Idle,
    /// A frame is active but there is no placement; only the clear pass ran.
    Cleared { index: u64 },
    Drawn { index: u64, instances: u32 },
}

pub struct FramePresenter<F> {
    mailbox: Arc<FrameMailbox<F>>,
    placement: PlacementGate,
    active: Option<ScheduledFrame<F>>,
    converted: bool,
    armed: bool,
    on_begin: Box<dyn FnMut() + Send>,
    absent_ticks: u64,
}

impl<F: PointFrame> FramePresenter<F> {
    pub fn new(mailbox: Arc<FrameMailbox<F>>, placement: PlacementGate) -> Self {
        Self {
            mailbox,
            placement,
            active: None,
            converted: false,
            armed: false,
            on_begin: Box::new(|| {}),
            absent_ticks: 0,
        }
    }

    /// Command issued once per start when the first frame is ready to show
    /// (typically: start the audio track).
    pub fn with_begin_playback(mut self, on_begin: impl FnMut() + Send + 'static) -> Self {
        self.on_begin = Box::new(on_begin);
        self
    }

    /// Drops the active frame and arms the begin-playback command for the
    /// next frame that arrives.
    pub fn start_animation(&mut self) {
        self.reset();
        self.armed = true;
    }

    /// Drops the active frame; subsequent ticks render nothing until a new
    /// frame arrives.
    pub fn reset(&mut self) {
        self.active = None;
        self.converted = false;
        self.armed = false;
    }

    pub fn active_index(&self) -> Option<u64> {
        self.active.as_ref().map(|f| f.index)
    }

    pub fn active_source(&self) -> Option<usize> {
        self.active.as_ref().map(|f| f.source_index)
    }

    pub fn is_converted(&self) -> bool {
        self.converted
    }

    pub fn tick<B>(&mut self, backend: &mut B) -> TickOutcome
    where
        B: RenderBackend<Frame = F>,
    {
        if let Some(next) = self.mailbox.take() {
            // Replacing the active frame releases its buffers here.
            self.active = Some(next);
            self.converted = false;

            if self.armed {
                self.armed = false;
                self.mailbox.mark_started();
                tracing::info!("first frame ready; beginning playback");
                (self.on_begin)();
            }
        }

        let Some(active) = self.active.as_ref() else {
            return TickOutcome::Idle;
        };

        if !self.converted {
            backend.convert(&active.frame);
            self.converted = true;
        }

        let Some(placement) = self.placement.get() else {
            if self.absent_ticks % ABSENT_LOG_EVERY == 0 {
                tracing::debug!(ticks = self.absent_ticks, "no placement; skipping draw");
            }
            self.absent_ticks += 1;
            backend.present(None);
            return TickOutcome::Cleared {
                index: active.index,
            };
        };
        self.absent_ticks = 0;

        let instances = active.frame.point_count();
        backend.present(Some(DrawCall {
            frame: &active.frame,
            placement,
            vertex_count: QUAD_VERTICES,
            instance_count: instances,
        }));
        TickOutcome::Drawn {
            index: active.index,
            instances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::convert::{convert_points_cpu, ConversionOptions, ConvertedPoint};
    use crate::mailbox::Mailbox;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use crate::testing::MemoryLoader;
    use plyframe::{Frame, PointRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Default)]
    struct MockBackend {
        conversions: usize,
        clears: usize,
        draws: Vec<(u32, u32, Mat4)>,
        output: Vec<ConvertedPoint>,
    }

    impl RenderBackend for MockBackend {
        type Frame = Frame;

        fn convert(&mut self, frame: &Frame) {
            self.conversions += 1;
            self.output = convert_points_cpu(&frame.to_records(), ConversionOptions::default());
        }

        fn present(&mut self, draw: Option<DrawCall<'_, Frame>>) {
            self.clears += 1;
            if let Some(d) = draw {
                self.draws.push((d.vertex_count, d.instance_count, d.placement));
            }
        }
    }

    fn frame(points: usize) -> Frame {
        let records: Vec<_> = (0..points)
            .map(|i| PointRecord::new([i as f32, 0.0, 0.0], [0, 0, 0], [0.0; 3]))
            .collect();
        Frame::from_points(&records)
    }

    fn scheduled(index: u64, points: usize) -> ScheduledFrame<Frame> {
        ScheduledFrame {
            index,
            source_index: index as usize,
            frame: frame(points),
        }
    }

    fn presenter(placement: Option<Mat4>) -> (FramePresenter<Frame>, Arc<FrameMailbox<Frame>>) {
        let mailbox = Arc::new(Mailbox::new());
        let p = FramePresenter::new(mailbox.clone(), PlacementGate::new(placement));
        (p, mailbox)
    }

    #[test]
    fn idle_without_frames() {
        let (mut p, _) = presenter(Some(Mat4::IDENTITY));
        let mut backend = MockBackend::default();
        assert_eq!(p.tick(&mut backend), TickOutcome::Idle);
        assert_eq!(backend.clears, 0);
        assert_eq!(backend.conversions, 0);
    }

    #[test]
    fn absent_placement_clears_without_drawing() {
        let (mut p, mailbox) = presenter(None);
        let mut backend = MockBackend::default();
        let _ = mailbox.put(scheduled(0, 8));

        assert_eq!(p.tick(&mut backend), TickOutcome::Cleared { index: 0 });
        assert!(backend.draws.is_empty());
        assert_eq!(backend.clears, 1);
        // Conversion still runs so the frame is ready once placed.
        assert!(p.is_converted());
    }

    #[test]
    fn placement_can_appear_mid_playback() {
        let gate = PlacementGate::default();
        let mailbox = Arc::new(Mailbox::new());
        let mut p = FramePresenter::new(mailbox.clone(), gate.clone());
        let mut backend = MockBackend::default();
        let _ = mailbox.put(scheduled(0, 5));

        p.tick(&mut backend);
        let anchor = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -3.0));
        gate.set(Some(anchor));
        assert_eq!(
            p.tick(&mut backend),
            TickOutcome::Drawn {
                index: 0,
                instances: 5
            }
        );
        assert_eq!(backend.draws, [(6, 5, anchor)]);
        assert_eq!(p.absent_ticks, 0);
    }

    #[test]
    fn converts_once_per_frame() {
        let (mut p, mailbox) = presenter(Some(Mat4::IDENTITY));
        let mut backend = MockBackend::default();

        let _ = mailbox.put(scheduled(0, 3));
        for _ in 0..3 {
            p.tick(&mut backend);
        }
        assert_eq!(backend.conversions, 1);
        assert_eq!(backend.draws.len(), 3);

        let _ = mailbox.put(scheduled(1, 3));
        p.tick(&mut backend);
        assert_eq!(backend.conversions, 2);
        assert_eq!(p.active_index(), Some(1));
    }

    #[test]
    fn begin_playback_fires_once_per_start() {
        let (p, mailbox) = presenter(Some(Mat4::IDENTITY));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut p = p.with_begin_playback({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut backend = MockBackend::default();

        p.start_animation();
        p.tick(&mut backend);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no frame yet");

        let _ = mailbox.put(scheduled(0, 1));
        p.tick(&mut backend);
        let _ = mailbox.put(scheduled(1, 1));
        p.tick(&mut backend);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(mailbox.is_started());

        p.start_animation();
        assert_eq!(p.tick(&mut backend), TickOutcome::Idle);
        let _ = mailbox.put(scheduled(0, 1));
        p.tick(&mut backend);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_renders_nothing() {
        let (mut p, mailbox) = presenter(Some(Mat4::IDENTITY));
        let mut backend = MockBackend::default();
        let _ = mailbox.put(scheduled(0, 2));
        p.tick(&mut backend);

        p.reset();
        assert_eq!(p.tick(&mut backend), TickOutcome::Idle);
        assert_eq!(p.active_index(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_three_frames_at_thirty_fps() {
        let (loader, sources) = MemoryLoader::with_frames(3, 4);
        let mailbox = Arc::new(Mailbox::new());
        let scheduler =
            Scheduler::new(loader, sources, mailbox.clone(), SchedulerConfig::default()).unwrap();
        let (cancel, rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(rx));

        let mut p = FramePresenter::new(mailbox.clone(), PlacementGate::new(Some(Mat4::IDENTITY)));
        p.start_animation();
        let mut backend = MockBackend::default();

        // Preload lands frame 0; showing it starts the clock.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            p.tick(&mut backend),
            TickOutcome::Drawn {
                index: 0,
                instances: 4
            }
        );
        assert!(mailbox.is_started());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let outcome = p.tick(&mut backend);
        assert_eq!(
            outcome,
            TickOutcome::Drawn {
                index: 3,
                instances: 4
            }
        );
        assert_eq!(p.active_source(), Some(0));

        // Source 0 holds x = j + 1.
        let xs: Vec<f32> = backend.output.iter().map(|pt| pt.position[0]).collect();
        assert_eq!(xs, [-1.0, -2.0, -3.0, -4.0]);

        cancel.send_replace(true);
        task.await.unwrap();
    }
}
