//! Application runner and thread orchestration.
//!
//! The event loop thread owns the window and the application. Rendering
//! runs on a dedicated thread that owns the renderer and the frame loop,
//! and the octree mutator runs on a third thread that owns the staging
//! writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, error, info};
use voxtrace_core::FramebufferSize;
use voxtrace_gpu::surface::SurfaceContext;
use voxtrace_gpu::{GpuContext, GpuContextBuilder};
use voxtrace_render::{Camera, FrameLoop, FrameStats, StagingWriter, VulkanRenderer};
use voxtrace_shaders::{ShaderCode, ShaderSet};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::{OctreeMutator, SharedCamera, VoxtraceApp};
use crate::config::EngineConfig;
use crate::logging::Logging;
use crate::window::{window_link, WindowEvents, WindowLink};

/// Interval between application updates on the event loop thread.
const UPDATE_INTERVAL: Duration = Duration::from_millis(8);

/// Run a [`VoxtraceApp`] with the given configuration.
///
/// Sets up logging, loads the shaders, creates the window and GPU context,
/// and runs until the window closes or rendering fails.
pub fn run_app<A: VoxtraceApp>(config: EngineConfig) -> anyhow::Result<()> {
    config.validate()?;

    let logging = Logging::init(&config.log_filter);
    let _guard = logging.enter();

    info!("{} starting...", config.title);

    let shaders = ShaderSet::from_dir(&config.shader_dir)
        .load()
        .with_context(|| format!("Loading shaders from {}", config.shader_dir.display()))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        logging: logging.clone(),
        shaders: Some(shaders),
        state: None,
        error: None,
    };

    event_loop.run_app(&mut runner)?;

    if let Some(state) = runner.state.take() {
        if let Err(e) = state.shutdown() {
            runner.error.get_or_insert(e);
        }
    }

    match runner.error {
        Some(e) => Err(e),
        None => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

/// Winit handler owning the application state.
struct AppRunner<A: VoxtraceApp> {
    config: EngineConfig,
    logging: Logging,
    shaders: Option<ShaderCode>,
    state: Option<AppState<A>>,
    error: Option<anyhow::Error>,
}

/// State that exists while the window is open.
struct AppState<A: VoxtraceApp> {
    window: Arc<Window>,
    app: A,
    camera: SharedCamera,
    events: WindowEvents,
    running: Arc<AtomicBool>,
    render_thread: Option<JoinHandle<anyhow::Result<FrameStats>>>,
    last_update: Instant,
}

impl<A: VoxtraceApp> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };
        if state.app.on_event(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.stop(event_loop);
            }
            WindowEvent::Resized(size) => {
                state
                    .camera
                    .update(|camera| camera.set_viewport(size.width, size.height));
                state
                    .events
                    .resized(FramebufferSize::new(size.width, size.height));
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = &mut self.state else {
            return;
        };

        if state.render_finished() {
            self.stop(event_loop);
            return;
        }

        let now = Instant::now();
        let dt = now.duration_since(state.last_update).as_secs_f32();
        state.last_update = now;

        let app = &mut state.app;
        state.camera.update(|camera| app.update(camera, dt));

        event_loop.set_control_flow(ControlFlow::wait_duration(UPDATE_INTERVAL));
    }
}

impl<A: VoxtraceApp> AppRunner<A> {
    fn create_state(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let size = window.inner_size();
        let framebuffer = FramebufferSize::new(size.width, size.height);

        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .diagnostics(self.config.diagnostics)
            .build(&*window)?;
        let gpu = Arc::new(gpu);

        info!("GPU: {}", gpu.capabilities().summary());

        let mut camera = Camera::default();
        camera.set_viewport(size.width, size.height);
        let mut app = A::init(&self.config, &mut camera)?;
        let camera = SharedCamera::new(camera);

        let layout = self.config.octree_layout();
        let mutator = app.mutator(layout);

        let running = Arc::new(AtomicBool::new(true));
        let (events, link) = window_link(framebuffer, running.clone());

        let shaders = self
            .shaders
            .take()
            .context("Shaders were already handed to a renderer")?;

        let job = RenderJob {
            gpu,
            surface,
            config: self.config.clone(),
            shaders,
            framebuffer,
            link,
            camera: camera.clone(),
            running: running.clone(),
            logging: self.logging.clone(),
        };
        let render_thread = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || job.run(mutator))?;

        Ok(AppState {
            window,
            app,
            camera,
            events,
            running,
            render_thread: Some(render_thread),
            last_update: Instant::now(),
        })
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            if let Err(e) = state.shutdown() {
                error!("Renderer stopped with an error: {e:#}");
                self.error.get_or_insert(e);
            }
        }
        event_loop.exit();
    }
}

impl<A: VoxtraceApp> AppState<A> {
    fn render_finished(&self) -> bool {
        self.render_thread
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Stop the render thread and wait for it. The window outlives it.
    fn shutdown(mut self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::Release);

        let Some(handle) = self.render_thread.take() else {
            return Ok(());
        };
        let stats = match handle.join() {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("Render thread panicked"),
        };

        info!(
            "Rendered {} frames, {} octree uploads, {} swapchain recreations",
            stats.frames, stats.uploads, stats.recreations
        );
        debug!("Closing window {:?}", self.window.id());
        Ok(())
    }
}

/// Everything the render thread takes ownership of.
struct RenderJob {
    gpu: Arc<GpuContext>,
    surface: SurfaceContext,
    config: EngineConfig,
    shaders: ShaderCode,
    framebuffer: FramebufferSize,
    link: WindowLink,
    camera: SharedCamera,
    running: Arc<AtomicBool>,
    logging: Logging,
}

impl RenderJob {
    fn run<M: OctreeMutator>(self, mutator: M) -> anyhow::Result<FrameStats> {
        let _guard = self.logging.enter();
        let result = self.render(mutator);
        if let Err(e) = &result {
            error!("Render thread failed: {e:#}");
        }
        result
    }

    fn render<M: OctreeMutator>(self, mutator: M) -> anyhow::Result<FrameStats> {
        let Self {
            gpu,
            surface,
            config,
            shaders,
            framebuffer,
            link,
            camera,
            running,
            logging,
        } = self;

        let created = VulkanRenderer::new(
            gpu,
            surface,
            config.generation(),
            shaders,
            config.octree_layout(),
            framebuffer,
        );
        let (renderer, writer, receiver) = match created {
            Ok(parts) => parts,
            Err(e) => {
                running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        let mutator_thread = {
            let running = running.clone();
            let logging = logging.clone();
            thread::Builder::new()
                .name("octree-mutator".to_string())
                .spawn(move || {
                    let _guard = logging.enter();
                    run_mutator(writer, mutator, &running);
                })?
        };

        let mut frame_loop = FrameLoop::new(renderer, link, receiver);
        let result = frame_loop.run(&running, &camera);
        running.store(false, Ordering::Release);

        // Closes the staging handoff before the buffers are freed
        drop(frame_loop);
        if mutator_thread.join().is_err() {
            error!("Octree mutator panicked");
        }

        Ok(result?)
    }
}

/// Feed the staging buffer until stopped or the handoff closes.
fn run_mutator<M: OctreeMutator>(mut writer: StagingWriter, mut mutator: M, running: &AtomicBool) {
    debug!("Octree mutator started with {} words", writer.capacity());
    let mut writes = 0u64;

    while running.load(Ordering::Acquire) {
        let Some(mut words) = writer.begin() else {
            break;
        };
        let keep_going = mutator.mutate(&mut words);
        drop(words);
        writes += 1;

        if !keep_going {
            break;
        }
        thread::sleep(mutator.interval());
    }

    debug!("Octree mutator stopped after {writes} writes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;
    use voxtrace_render::{upload_channel, FrameVariant, StagingRegion};

    struct Counter {
        limit: u32,
        calls: u32,
    }

    impl OctreeMutator for Counter {
        fn mutate(&mut self, words: &mut [u32]) -> bool {
            self.calls += 1;
            words.fill(self.calls);
            self.calls < self.limit
        }

        fn interval(&self) -> Duration {
            Duration::ZERO
        }
    }

    #[test]
    fn mutator_stops_when_it_returns_false() {
        let mut storage = vec![0u32; 8].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let region = unsafe { StagingRegion::new(ptr, storage.len()) };
        let (writer, receiver) = upload_channel(region);

        let handle = thread::spawn(move || {
            let running = AtomicBool::new(true);
            run_mutator(writer, Counter { limit: 3, calls: 0 }, &running);
        });

        // Each write waits for the previous one to be copied.
        let mut uploads = 0;
        while !handle.is_finished() || receiver.is_pending() {
            if receiver.take(0) == FrameVariant::Upload {
                uploads += 1;
            }
            receiver.retire(0);
            thread::yield_now();
        }
        handle.join().unwrap();

        assert_eq!(uploads, 3);
        assert_eq!(&*storage, &[3; 8]);
    }

    #[test]
    fn mutator_stops_when_handoff_closes() {
        let mut storage = vec![0u32; 4].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let region = unsafe { StagingRegion::new(ptr, storage.len()) };
        let (writer, receiver) = upload_channel(region);
        receiver.closer().close();
        let running = AtomicBool::new(true);

        run_mutator(
            writer,
            Counter {
                limit: u32::MAX,
                calls: 0,
            },
            &running,
        );

        assert_eq!(&*storage, &[0; 4]);
    }

    #[test]
    fn mutator_respects_running_flag() {
        let mut storage = vec![0u32; 4].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let region = unsafe { StagingRegion::new(ptr, storage.len()) };
        let (writer, _receiver) = upload_channel(region);
        let running = AtomicBool::new(false);

        run_mutator(
            writer,
            Counter {
                limit: u32::MAX,
                calls: 0,
            },
            &running,
        );

        assert_eq!(&*storage, &[0; 4]);
    }
}
