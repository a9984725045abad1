use crate::engine::graphics::{Extent2Di, NativeImage};
use crate::engine::xr::SessionId;
use crate::engine::xr::runtime::{Duration, RawHandle, XrRuntime};
use crate::engine::{EngineError, EngineResult};

/// GL_SRGB8_ALPHA8.
pub const FORMAT_SRGB8_ALPHA8: i64 = 0x8C43;
/// GL_RGBA8.
pub const FORMAT_RGBA8: i64 = 0x8058;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SwapchainUsage: u64 {
        const COLOR_ATTACHMENT = 0x0000_0001;
        const DEPTH_STENCIL_ATTACHMENT = 0x0000_0002;
        const UNORDERED_ACCESS = 0x0000_0004;
        const TRANSFER_SRC = 0x0000_0008;
        const TRANSFER_DST = 0x0000_0010;
        const SAMPLED = 0x0000_0020;
        const MUTABLE_FORMAT = 0x0000_0040;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub usage: SwapchainUsage,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

impl SwapchainCreateInfo {
    /// Single-sample sRGB color target that can also be sampled.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            usage: SwapchainUsage::SAMPLED | SwapchainUsage::COLOR_ATTACHMENT,
            format: FORMAT_SRGB8_ALPHA8,
            sample_count: 1,
            width,
            height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        }
    }

    pub fn with_format(mut self, format: i64) -> Self {
        self.format = format;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size.max(1);
        self
    }
}

/// A runtime-owned ring of render targets.
///
/// At most one image is acquired at a time: acquire → wait → render → release.
#[derive(Debug)]
pub struct Swapchain {
    session: SessionId,
    raw: RawHandle,
    info: SwapchainCreateInfo,
    images: Vec<NativeImage>,
    acquired: Option<u32>,
    waited: bool,
}

impl Swapchain {
    pub(crate) fn new(
        session: SessionId,
        raw: RawHandle,
        info: SwapchainCreateInfo,
        images: Vec<NativeImage>,
    ) -> Self {
        Self {
            session,
            raw,
            info,
            images,
            acquired: None,
            waited: false,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn create_info(&self) -> &SwapchainCreateInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn format(&self) -> i64 {
        self.info.format
    }

    pub fn array_size(&self) -> u32 {
        self.info.array_size
    }

    pub fn extent(&self) -> Extent2Di {
        Extent2Di {
            width: self.info.width as i32,
            height: self.info.height as i32,
        }
    }

    /// Number of images the runtime allocated.
    pub fn chain_length(&self) -> u32 {
        self.images.len() as u32
    }

    /// Native image handles in chain order.
    pub fn enumerate_images(&self) -> &[NativeImage] {
        &self.images
    }

    pub fn acquired_index(&self) -> Option<u32> {
        self.acquired
    }

    pub(crate) fn acquire(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<u32> {
        if let Some(index) = self.acquired {
            return Err(EngineError::ChainExhausted(index));
        }
        let index = rt
            .acquire_swapchain_image(self.raw)
            .map_err(|e| EngineError::runtime("acquire_swapchain_image", e))?;
        if index >= self.chain_length() {
            self.hand_back(rt, index);
            return Err(EngineError::InvalidHandle("acquired swapchain image"));
        }
        self.acquired = Some(index);
        self.waited = false;
        Ok(index)
    }

    /// Return an image the runtime handed out but the chain cannot track.
    fn hand_back(&self, rt: &mut dyn XrRuntime, index: u32) {
        log::warn!(
            "swapchain: runtime acquired image {index} outside a chain of {}",
            self.chain_length()
        );
        let released = rt
            .wait_swapchain_image(self.raw, Duration::INFINITE)
            .and_then(|()| rt.release_swapchain_image(self.raw));
        if let Err(e) = released {
            log::warn!("swapchain: releasing image {index} failed: {e}");
        }
    }

    pub(crate) fn wait(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<()> {
        if self.acquired.is_none() {
            return Err(EngineError::ImageNotAcquired);
        }
        if self.waited {
            return Ok(());
        }
        rt.wait_swapchain_image(self.raw, Duration::INFINITE)
            .map_err(|e| EngineError::runtime("wait_swapchain_image", e))?;
        self.waited = true;
        Ok(())
    }

    pub(crate) fn release(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<()> {
        if self.acquired.is_none() {
            return Err(EngineError::ImageNotAcquired);
        }
        if !self.waited {
            return Err(EngineError::ImageNotWaited);
        }
        rt.release_swapchain_image(self.raw)
            .map_err(|e| EngineError::runtime("release_swapchain_image", e))?;
        self.acquired = None;
        self.waited = false;
        Ok(())
    }
}
