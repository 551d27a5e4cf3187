//! Framebuffer size polling.

/// Framebuffer size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferSize {
    pub width: u32,
    pub height: u32,
}

impl FramebufferSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized framebuffer.
    pub const fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Window-side collaborator polled while handling resizes.
pub trait FramebufferSource {
    /// Current framebuffer size.
    fn framebuffer_size(&self) -> FramebufferSize;

    /// Block until the platform delivers new window events.
    fn wait_events(&self);

    /// Whether the window has been closed. Ends resize waits early.
    fn is_closed(&self) -> bool {
        false
    }
}
