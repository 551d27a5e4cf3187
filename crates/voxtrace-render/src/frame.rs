//! Frame synchronization and the render loop.

use crate::recorder::{table_index, FrameVariant};
use crate::upload::UploadReceiver;
use std::sync::atomic::{AtomicBool, Ordering};
use voxtrace_core::{CameraSource, CameraTransform, FramebufferSize, FramebufferSource};
use voxtrace_gpu::error::{GpuError, Result};

/// Outcome of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image(usize),
    /// The swapchain no longer matches the surface.
    Stale,
}

/// Outcome of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Done,
    /// Out of date or suboptimal.
    Stale,
}

/// GPU side of a frame, as driven by [`FrameLoop`].
///
/// Frame slots index the per-frame sync objects, images index the current
/// swapchain generation.
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;

    fn image_count(&self) -> usize;

    /// Block until the slot's last submission has completed.
    fn wait_for_frame(&mut self, frame: usize) -> Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, frame: usize) -> Result<Acquire>;

    /// Copy the camera record into the image's uniform buffer.
    fn write_camera(&mut self, image: usize, transform: &CameraTransform) -> Result<()>;

    /// Reset the slot's fence and submit a command buffer from the table.
    fn submit(&mut self, frame: usize, command_buffer: usize) -> Result<()>;

    fn present(&mut self, frame: usize, image: usize) -> Result<Present>;

    /// Replace the swapchain generation for a new framebuffer size.
    fn recreate(&mut self, framebuffer: FramebufferSize) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;
}

/// Circular frame slot index and per-image ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCursor {
    frames_in_flight: usize,
    current: usize,
    image_owners: Vec<Option<usize>>,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current: 0,
            image_owners: vec![None; image_count],
        }
    }

    /// Current frame slot.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot that last submitted work for the image.
    pub fn owner(&self, image: usize) -> Option<usize> {
        self.image_owners.get(image).copied().flatten()
    }

    /// Record the current slot as the image's owner.
    ///
    /// Returns the previous owner when it is a different slot, which the
    /// caller must wait on before reusing the image.
    pub fn claim(&mut self, image: usize) -> Option<usize> {
        let current = self.current;
        let slot = self.image_owners.get_mut(image)?;
        let previous = slot.replace(current);
        previous.filter(|&owner| owner != current)
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }

    /// Forget ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owners.clear();
        self.image_owners.resize(image_count, None);
    }
}

/// Block on window events until the framebuffer is nonzero.
///
/// Returns `None` if the window closes first.
pub fn wait_for_framebuffer(window: &impl FramebufferSource) -> Option<FramebufferSize> {
    loop {
        if window.is_closed() {
            return None;
        }
        let size = window.framebuffer_size();
        if !size.is_zero() {
            return Some(size);
        }
        window.wait_events();
    }
}

/// Result of one render loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Work was submitted and presented.
    Rendered {
        image: usize,
        variant: FrameVariant,
        /// Present reported a stale swapchain and it was rebuilt.
        recreated: bool,
    },
    /// Acquire found a stale swapchain; it was rebuilt and nothing was
    /// submitted.
    Recreated,
    /// The window closed while waiting for a usable framebuffer.
    WindowClosed,
}

/// Counters kept over the loop's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub uploads: u64,
    pub recreations: u64,
}

/// Drives a [`FrameBackend`] one frame at a time.
pub struct FrameLoop<B, W> {
    backend: B,
    window: W,
    uploads: UploadReceiver,
    cursor: FrameCursor,
    stats: FrameStats,
}

impl<B: FrameBackend, W: FramebufferSource> FrameLoop<B, W> {
    pub fn new(backend: B, window: W, uploads: UploadReceiver) -> Self {
        let cursor = FrameCursor::new(backend.frames_in_flight(), backend.image_count());
        Self {
            backend,
            window,
            uploads,
            cursor,
            stats: FrameStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn cursor(&self) -> &FrameCursor {
        &self.cursor
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Render one frame.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn render_frame(&mut self, camera: &dyn CameraSource) -> Result<FrameOutcome> {
        let frame = self.cursor.current();

        self.backend.wait_for_frame(frame)?;
        self.uploads.retire(frame);

        let image = match self.backend.acquire_image(frame)? {
            Acquire::Image(image) => image,
            Acquire::Stale => {
                return Ok(if self.recreate()? {
                    FrameOutcome::Recreated
                } else {
                    FrameOutcome::WindowClosed
                });
            }
        };

        if let Some(owner) = self.cursor.claim(image) {
            self.backend.wait_for_frame(owner)?;
            self.uploads.retire(owner);
        }

        let variant = self.uploads.take(frame);
        let index = table_index(image, variant, self.backend.image_count());
        self.backend.write_camera(image, &camera.transform())?;

        self.backend.submit(frame, index)?;
        self.stats.frames += 1;
        if variant == FrameVariant::Upload {
            self.stats.uploads += 1;
            tracing::trace!("Octree upload submitted on frame slot {frame}");
        }

        let recreated = match self.backend.present(frame, image)? {
            Present::Done => false,
            Present::Stale => {
                if !self.recreate()? {
                    self.cursor.advance();
                    return Ok(FrameOutcome::WindowClosed);
                }
                true
            }
        };

        self.cursor.advance();

        Ok(FrameOutcome::Rendered {
            image,
            variant,
            recreated,
        })
    }

    /// Rebuild the swapchain once the window has a usable size.
    ///
    /// Returns `false` if the window closed while waiting.
    fn recreate(&mut self) -> Result<bool> {
        let Some(size) = wait_for_framebuffer(&self.window) else {
            return Ok(false);
        };

        tracing::debug!("Recreating swapchain at {}x{}", size.width, size.height);
        self.backend.recreate(size)?;
        self.uploads.retire_all();
        self.cursor.reset_images(self.backend.image_count());
        self.stats.recreations += 1;
        Ok(true)
    }

    /// Render until `running` is cleared or the window closes.
    ///
    /// The device is idle when this returns, including on error.
    pub fn run(&mut self, running: &AtomicBool, camera: &dyn CameraSource) -> Result<FrameStats> {
        let result = self.run_frames(running, camera);

        let idle = self.backend.wait_idle();
        self.uploads.retire_all();

        tracing::info!(
            "Render loop stopped: {} frames, {} uploads, {} swapchain recreations",
            self.stats.frames,
            self.stats.uploads,
            self.stats.recreations
        );

        result?;
        idle?;
        Ok(self.stats)
    }

    fn run_frames(&mut self, running: &AtomicBool, camera: &dyn CameraSource) -> Result<()> {
        while running.load(Ordering::Acquire) {
            if self.render_frame(camera)? == FrameOutcome::WindowClosed {
                running.store(false, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Consume the loop and return the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

/// Error for a stale swapchain state that should have been recovered.
pub(crate) fn missing_generation() -> GpuError {
    GpuError::InvalidState("No swapchain generation".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::{upload_channel, StagingRegion, StagingWriter};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::ptr::NonNull;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Camera(usize),
        Submit(usize, usize),
        Present(usize, usize),
        Recreate(FramebufferSize),
        Idle,
    }

    /// Backend replaying scripted acquire/present results.
    struct ScriptedBackend {
        frames_in_flight: usize,
        image_count: usize,
        next_image: usize,
        acquires: VecDeque<Acquire>,
        presents: VecDeque<Present>,
        calls: Vec<Call>,
        cameras: Vec<CameraTransform>,
        staging: Option<StagingRegion>,
        octree: Vec<u32>,
    }

    impl ScriptedBackend {
        fn new(frames_in_flight: usize, image_count: usize) -> Self {
            Self {
                frames_in_flight,
                image_count,
                next_image: 0,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                calls: Vec::new(),
                cameras: Vec::new(),
                staging: None,
                octree: Vec::new(),
            }
        }

        fn submissions(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Submit(_, index) => Some(*index),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for ScriptedBackend {
        fn frames_in_flight(&self) -> usize {
            self.frames_in_flight
        }

        fn image_count(&self) -> usize {
            self.image_count
        }

        fn wait_for_frame(&mut self, frame: usize) -> Result<()> {
            self.calls.push(Call::Wait(frame));
            Ok(())
        }

        fn acquire_image(&mut self, frame: usize) -> Result<Acquire> {
            self.calls.push(Call::Acquire(frame));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                Acquire::Image(image)
            }))
        }

        fn write_camera(&mut self, image: usize, transform: &CameraTransform) -> Result<()> {
            self.calls.push(Call::Camera(image));
            self.cameras.push(*transform);
            Ok(())
        }

        fn submit(&mut self, frame: usize, command_buffer: usize) -> Result<()> {
            self.calls.push(Call::Submit(frame, command_buffer));
            // The upload variant's copy
            if command_buffer >= self.image_count {
                if let Some(region) = self.staging {
                    self.octree = unsafe { region.as_slice() }.to_vec();
                }
            }
            Ok(())
        }

        fn present(&mut self, frame: usize, image: usize) -> Result<Present> {
            self.calls.push(Call::Present(frame, image));
            Ok(self.presents.pop_front().unwrap_or(Present::Done))
        }

        fn recreate(&mut self, framebuffer: FramebufferSize) -> Result<()> {
            self.calls.push(Call::Recreate(framebuffer));
            self.next_image = 0;
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::Idle);
            Ok(())
        }
    }

    /// Window reporting a scripted sequence of sizes.
    struct ScriptedWindow {
        sizes: RefCell<VecDeque<FramebufferSize>>,
        polls: Cell<usize>,
        waits: Cell<usize>,
        closed: Cell<bool>,
    }

    impl ScriptedWindow {
        fn new(sizes: &[FramebufferSize]) -> Self {
            Self {
                sizes: RefCell::new(sizes.iter().copied().collect()),
                polls: Cell::new(0),
                waits: Cell::new(0),
                closed: Cell::new(false),
            }
        }
    }

    impl FramebufferSource for ScriptedWindow {
        fn framebuffer_size(&self) -> FramebufferSize {
            self.polls.set(self.polls.get() + 1);
            let mut sizes = self.sizes.borrow_mut();
            if sizes.len() > 1 {
                sizes.pop_front().unwrap_or_default()
            } else {
                sizes.front().copied().unwrap_or_default()
            }
        }

        fn wait_events(&self) {
            self.waits.set(self.waits.get() + 1);
        }

        fn is_closed(&self) -> bool {
            self.closed.get()
        }
    }

    fn staging(words: usize) -> (Box<[u32]>, StagingRegion) {
        let mut storage = vec![0u32; words].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let region = unsafe { StagingRegion::new(ptr, words) };
        (storage, region)
    }

    fn frame_loop(
        frames: usize,
        images: usize,
        sizes: &[FramebufferSize],
    ) -> (
        FrameLoop<ScriptedBackend, ScriptedWindow>,
        StagingWriter,
        Box<[u32]>,
    ) {
        let (storage, region) = staging(16);
        let (writer, receiver) = upload_channel(region);
        let mut backend = ScriptedBackend::new(frames, images);
        backend.staging = Some(region);
        let window = ScriptedWindow::new(sizes);
        (FrameLoop::new(backend, window, receiver), writer, storage)
    }

    const SIZE: FramebufferSize = FramebufferSize::new(800, 600);

    #[test]
    fn frame_index_cycles_with_submissions() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        let camera = CameraTransform::default();

        for k in 1..=7 {
            fl.render_frame(&camera).unwrap();
            assert_eq!(fl.backend().submissions().len(), k);
            assert_eq!(fl.cursor().current(), k % 2);
        }
    }

    #[test]
    fn stale_acquire_recreates_without_submit() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        fl.backend_mut().acquires.push_back(Acquire::Stale);

        let outcome = fl.render_frame(&CameraTransform::default()).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated);
        let backend = fl.backend();
        assert_eq!(backend.count(|c| matches!(c, Call::Recreate(_))), 1);
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
        assert_eq!(fl.cursor().current(), 0);
        assert_eq!(fl.stats().recreations, 1);
    }

    #[test]
    fn zero_extent_blocks_until_nonzero() {
        let zero = FramebufferSize::new(0, 0);
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[zero, zero, SIZE]);
        fl.backend_mut().acquires.push_back(Acquire::Stale);

        fl.render_frame(&CameraTransform::default()).unwrap();

        let recreates: Vec<_> = fl
            .backend()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Recreate(_)))
            .cloned()
            .collect();
        assert_eq!(recreates, vec![Call::Recreate(SIZE)]);
        assert_eq!(fl.window.polls.get(), 3);
        assert_eq!(fl.window.waits.get(), 2);
    }

    #[test]
    fn closing_while_minimized_abandons_recreate() {
        let zero = FramebufferSize::new(0, 0);
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[zero]);
        fl.backend_mut().acquires.push_back(Acquire::Stale);
        fl.window.closed.set(true);

        let outcome = fl.render_frame(&CameraTransform::default()).unwrap();

        assert_eq!(outcome, FrameOutcome::WindowClosed);
        assert_eq!(fl.backend().count(|c| matches!(c, Call::Recreate(_))), 0);
    }

    #[test]
    fn stale_present_recreates_and_advances() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        fl.backend_mut().presents.push_back(Present::Stale);

        let outcome = fl.render_frame(&CameraTransform::default()).unwrap();

        assert_eq!(
            outcome,
            FrameOutcome::Rendered {
                image: 0,
                variant: FrameVariant::Resident,
                recreated: true
            }
        );
        assert_eq!(fl.backend().count(|c| matches!(c, Call::Recreate(_))), 1);
        assert_eq!(fl.cursor().current(), 1);
    }

    #[test]
    fn resident_frames_use_image_index() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        fl.backend_mut().acquires.extend([Acquire::Image(2), Acquire::Image(1)]);
        let camera = CameraTransform::default();

        fl.render_frame(&camera).unwrap();
        fl.render_frame(&camera).unwrap();

        assert_eq!(fl.backend().submissions(), vec![2, 1]);
    }

    #[test]
    fn pending_upload_selects_upload_variant_once() {
        let (mut fl, mut writer, _storage) = frame_loop(2, 3, &[SIZE]);
        drop(writer.begin());
        fl.backend_mut().acquires.extend([Acquire::Image(1), Acquire::Image(2)]);
        let camera = CameraTransform::default();

        fl.render_frame(&camera).unwrap();
        fl.render_frame(&camera).unwrap();

        assert_eq!(fl.backend().submissions(), vec![1 + 3, 2]);
        assert_eq!(fl.stats().uploads, 1);
    }

    #[test]
    fn reused_image_waits_for_owner() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        fl.backend_mut().acquires.extend([Acquire::Image(0), Acquire::Image(0)]);
        let camera = CameraTransform::default();

        fl.render_frame(&camera).unwrap();
        fl.backend_mut().calls.clear();
        fl.render_frame(&camera).unwrap();

        // Slot 1 waits on its own fence, then on slot 0 that owns image 0
        assert_eq!(
            fl.backend().calls[..3],
            [Call::Wait(1), Call::Acquire(1), Call::Wait(0)]
        );
    }

    #[test]
    fn camera_is_written_to_acquired_image() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        fl.backend_mut().acquires.push_back(Acquire::Image(2));
        let camera = CameraTransform::new(
            glam::Vec3::new(1.0, 2.0, 3.0),
            glam::Vec3::Z,
            glam::Vec3::Z,
            glam::Vec3::X,
            glam::Vec3::Y,
        );

        fl.render_frame(&camera).unwrap();

        assert!(fl.backend().calls.contains(&Call::Camera(2)));
        assert_eq!(fl.backend().cameras, vec![camera]);
    }

    #[test]
    fn run_stops_on_flag_and_idles() {
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        let running = AtomicBool::new(false);

        let stats = fl.run(&running, &CameraTransform::default()).unwrap();

        assert_eq!(stats.frames, 0);
        assert_eq!(fl.backend().calls, vec![Call::Idle]);
    }

    #[test]
    fn run_exits_when_window_closes() {
        let zero = FramebufferSize::new(0, 0);
        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[zero]);
        fl.backend_mut().acquires.push_back(Acquire::Image(0));
        fl.backend_mut().acquires.push_back(Acquire::Stale);
        fl.window.closed.set(true);
        let running = AtomicBool::new(true);

        let stats = fl.run(&running, &CameraTransform::default()).unwrap();

        assert!(!running.load(Ordering::Acquire));
        assert_eq!(stats.frames, 1);
        assert_eq!(fl.backend().calls.last(), Some(&Call::Idle));
    }

    #[test]
    fn cursor_claims() {
        let mut cursor = FrameCursor::new(2, 3);
        assert_eq!(cursor.claim(0), None);
        assert_eq!(cursor.claim(0), None);
        cursor.advance();
        assert_eq!(cursor.claim(0), Some(0));
        assert_eq!(cursor.owner(0), Some(1));
        assert_eq!(cursor.claim(7), None);

        cursor.reset_images(4);
        assert_eq!(cursor.owner(0), None);
        assert_eq!(cursor.current(), 1);
    }

    #[test]
    fn upload_copies_complete_fill_pattern() {
        const WORDS: usize = 4096;
        let mut storage = vec![0u32; WORDS].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let region = unsafe { StagingRegion::new(ptr, WORDS) };
        let (mut writer, receiver) = upload_channel(region);

        let mut backend = ScriptedBackend::new(2, 3);
        backend.staging = Some(region);
        let mut fl = FrameLoop::new(backend, ScriptedWindow::new(&[SIZE]), receiver);

        let rounds: u32 = 50;
        let mutator = std::thread::spawn(move || {
            for round in 1..=rounds {
                let Some(mut guard) = writer.begin() else {
                    break;
                };
                for (i, word) in guard.iter_mut().enumerate() {
                    *word = round.wrapping_mul(0x9E37_79B9) ^ i as u32;
                    if i % 512 == 0 {
                        std::thread::yield_now();
                    }
                }
            }
        });

        let camera = CameraTransform::default();
        let mut uploads_seen = 0;
        let mut uploads_while_mutating = 0;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
        let mut render = |fl: &mut FrameLoop<ScriptedBackend, ScriptedWindow>, mutating: bool| {
            let before = fl.backend().octree.clone();
            fl.render_frame(&camera).unwrap();
            let after = &fl.backend().octree;
            if *after != before {
                uploads_seen += 1;
                if mutating {
                    uploads_while_mutating += 1;
                }
                let round = after[0];
                assert!(
                    after
                        .iter()
                        .enumerate()
                        .all(|(i, &word)| word == round ^ i as u32),
                    "torn upload observed"
                );
            }
        };

        while !(mutator.is_finished() && !fl.uploads.is_pending()) {
            assert!(std::time::Instant::now() < deadline, "uploads stalled");
            let mutating = !mutator.is_finished();
            render(&mut fl, mutating);
        }
        mutator.join().unwrap();
        render(&mut fl, false);
        render(&mut fl, false);

        let expected: Vec<u32> = (0..WORDS as u32)
            .map(|i| rounds.wrapping_mul(0x9E37_79B9) ^ i)
            .collect();
        assert_eq!(fl.backend().octree, expected);
        // Every round is published once and copied once.
        assert_eq!(uploads_seen, rounds);
        assert!(uploads_while_mutating >= 1);
        drop(storage);
    }

    #[test]
    fn camera_snapshot_is_taken_once_per_frame() {
        use parking_lot::Mutex;

        struct SharedCamera(Arc<Mutex<CameraTransform>>);
        impl CameraSource for SharedCamera {
            fn transform(&self) -> CameraTransform {
                *self.0.lock()
            }
        }

        let shared = Arc::new(Mutex::new(CameraTransform::default()));
        let running = Arc::new(AtomicBool::new(true));
        let mover = {
            let shared = shared.clone();
            let running = running.clone();
            std::thread::spawn(move || {
                let mut x = 0.0f32;
                while running.load(Ordering::Acquire) {
                    x += 1.0;
                    let v = glam::Vec3::splat(x);
                    *shared.lock() = CameraTransform::new(v, v, v, v, v);
                }
            })
        };

        let (mut fl, _writer, _storage) = frame_loop(2, 3, &[SIZE]);
        let camera = SharedCamera(shared);
        for _ in 0..200 {
            fl.render_frame(&camera).unwrap();
        }
        running.store(false, Ordering::Release);
        mover.join().unwrap();

        let cameras = &fl.backend().cameras;
        assert_eq!(cameras.len(), 200);
        for t in cameras {
            let x = t.position[0];
            assert!(t.position[..3].iter().all(|&c| c == x));
            assert!(t.plane_up[..3].iter().all(|&c| c == x));
        }
    }
}
