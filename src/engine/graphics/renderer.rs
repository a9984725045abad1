// Boundary with the rasterization back end.
//
// The XR core hands the renderer the native swapchain images once and then one image index
// per frame; the renderer must finish drawing into that image before the index is released.

use crate::engine::{EngineError, EngineResult};

/// Native swapchain image handle (GL texture name, or a Vulkan image widened to u64).
pub type NativeImage = u64;

/// Graphics-context binding the runtime needs to share textures with the application.
/// Carries the EGL display/config/context triple as opaque addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphicsBinding {
    pub display: usize,
    pub config: usize,
    pub context: usize,
}

pub trait Renderer {
    /// Context triple the XR instance binds its session to.
    fn graphics_binding(&self) -> GraphicsBinding;

    /// Called once per swapchain after allocation; `images` is in chain order.
    fn set_swapchain_images(&mut self, width: u32, height: u32, images: &[NativeImage]);

    /// Draw one frame into `images[image_index]`.
    fn render(&mut self, image_index: u32) -> EngineResult<()>;
}

/// Renderer that draws nothing and records which targets it was asked to fill.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    width: u32,
    height: u32,
    images: Vec<NativeImage>,
    frames_rendered: u64,
    last_target: Option<NativeImage>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn last_target(&self) -> Option<NativeImage> {
        self.last_target
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn images(&self) -> &[NativeImage] {
        &self.images
    }
}

impl Renderer for HeadlessRenderer {
    fn graphics_binding(&self) -> GraphicsBinding {
        // No real EGL objects behind this; any non-null triple satisfies the simulated runtime.
        GraphicsBinding {
            display: 1,
            config: 1,
            context: 1,
        }
    }

    fn set_swapchain_images(&mut self, width: u32, height: u32, images: &[NativeImage]) {
        self.width = width;
        self.height = height;
        self.images = images.to_vec();
    }

    fn render(&mut self, image_index: u32) -> EngineResult<()> {
        let target = self
            .images
            .get(image_index as usize)
            .copied()
            .ok_or(EngineError::InvalidHandle("swapchain image"))?;
        self.last_target = Some(target);
        self.frames_rendered += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_targets_image_by_index() {
        let mut r = HeadlessRenderer::new();
        r.set_swapchain_images(64, 32, &[10, 11, 12]);

        r.render(2).unwrap();
        assert_eq!(r.last_target(), Some(12));
        assert_eq!(r.frames_rendered(), 1);
        assert_eq!(r.target_size(), (64, 32));
    }

    #[test]
    fn render_rejects_out_of_range_index() {
        let mut r = HeadlessRenderer::new();
        r.set_swapchain_images(64, 32, &[10]);
        assert!(r.render(1).is_err());
        assert_eq!(r.frames_rendered(), 0);
    }
}
