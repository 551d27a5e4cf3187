//! Framebuffer size updates from the event loop to the render thread.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voxtrace_core::{FramebufferSize, FramebufferSource};

/// How long a resize wait blocks before rechecking the running flag.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Event loop side: forwards framebuffer sizes.
#[derive(Clone)]
pub struct WindowEvents {
    sizes: Sender<FramebufferSize>,
}

impl WindowEvents {
    pub fn resized(&self, size: FramebufferSize) {
        // The render thread may already be gone during shutdown
        let _ = self.sizes.send(size);
    }
}

/// Render thread side: the latest known framebuffer size.
pub struct WindowLink {
    sizes: Receiver<FramebufferSize>,
    latest: Cell<FramebufferSize>,
    running: Arc<AtomicBool>,
}

/// Connect the event loop to a render thread.
pub fn window_link(initial: FramebufferSize, running: Arc<AtomicBool>) -> (WindowEvents, WindowLink) {
    let (tx, rx) = channel::unbounded();
    (
        WindowEvents { sizes: tx },
        WindowLink {
            sizes: rx,
            latest: Cell::new(initial),
            running,
        },
    )
}

impl WindowLink {
    fn drain(&self) {
        while let Ok(size) = self.sizes.try_recv() {
            self.latest.set(size);
        }
    }
}

impl FramebufferSource for WindowLink {
    fn framebuffer_size(&self) -> FramebufferSize {
        self.drain();
        self.latest.get()
    }

    fn wait_events(&self) {
        match self.sizes.recv_timeout(WAIT_POLL) {
            Ok(size) => {
                self.latest.set(size);
                self.drain();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                self.running.store(false, Ordering::Release);
            }
        }
    }

    fn is_closed(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }
}
