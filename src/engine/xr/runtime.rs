//! Seam between the XR core and a concrete runtime.
//!
//! Everything that crosses this boundary is a raw `u64` handle or a plain value type, so the
//! core's bookkeeping (arenas, state machine, frame protocol) never depends on a particular
//! runtime binding. `SimRuntime` implements it headlessly; `OpenXrRuntime` (feature `openxr`)
//! forwards to the `openxr` crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::graphics::{Fov, GraphicsBinding, NativeImage, Pose};
use crate::engine::xr::composition::CompositionLayer;
use crate::engine::xr::extensions::ExtensionProperties;
use crate::engine::xr::session::SessionState;
use crate::engine::xr::space::ReferenceSpaceKind;
use crate::engine::xr::swapchain::SwapchainCreateInfo;

/// Opaque runtime object handle. Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawHandle(pub u64);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SystemId(pub u64);

/// Runtime timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(pub i64);

impl Time {
    pub fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 * 1e-9
    }
}

/// Runtime duration in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub i64);

impl Duration {
    pub const INFINITE: Duration = Duration(i64::MAX);

    pub fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u16, minor: u16, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
}

impl Default for ApplicationInfo {
    fn default() -> Self {
        Self {
            application_name: "little-xr".to_string(),
            application_version: 1,
            engine_name: "little-xr".to_string(),
            engine_version: 1,
        }
    }
}

/// Platform handles the loader needs before any instance exists (JavaVM + activity on Android).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderContext {
    pub vm: usize,
    pub context: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceProperties {
    pub runtime_name: String,
    pub runtime_version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFactor {
    HeadMountedDisplay,
    HandheldDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemGraphicsProperties {
    pub max_swapchain_image_width: u32,
    pub max_swapchain_image_height: u32,
    pub max_layer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemTrackingProperties {
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemProperties {
    pub system_id: SystemId,
    pub vendor_id: u32,
    pub system_name: String,
    pub graphics: SystemGraphicsProperties,
    pub tracking: SystemTrackingProperties,
}

/// Supported graphics API version range for the bound context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphicsRequirements {
    pub min_api_version: Version,
    pub max_api_version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewConfigurationType {
    PrimaryMono,
    PrimaryStereo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigurationProperties {
    pub view_configuration_type: ViewConfigurationType,
    pub fov_mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewConfigurationView {
    pub recommended_image_rect_width: u32,
    pub max_image_rect_width: u32,
    pub recommended_image_rect_height: u32,
    pub max_image_rect_height: u32,
    pub recommended_swapchain_sample_count: u32,
    pub max_swapchain_sample_count: u32,
}

/// A located eye view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentBlendMode {
    #[default]
    Opaque,
    Additive,
    AlphaBlend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub predicted_display_time: Time,
    pub predicted_display_period: Duration,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged {
        session: RawHandle,
        state: SessionState,
        time: Time,
    },
    InstanceLossPending {
        loss_time: Time,
    },
    EventsLost {
        count: u32,
    },
    ReferenceSpaceChangePending {
        session: RawHandle,
        kind: ReferenceSpaceKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("form factor unavailable")]
    FormFactorUnavailable,

    #[error("session not running")]
    SessionNotRunning,

    #[error("session lost")]
    SessionLost,

    #[error("call order invalid")]
    CallOrderInvalid,

    #[error("handle invalid")]
    HandleInvalid,

    #[error("{0}")]
    Other(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Operations the core needs from an XR runtime.
///
/// Calls are made from a single frame-producer thread; implementations need not be `Sync`.
pub trait XrRuntime {
    fn name(&self) -> &str;

    fn init_loader(&mut self, ctx: &LoaderContext) -> RuntimeResult<()>;

    fn enumerate_extensions(&self) -> RuntimeResult<Vec<ExtensionProperties>>;

    fn create_instance(
        &mut self,
        app: &ApplicationInfo,
        extensions: &[String],
    ) -> RuntimeResult<RawHandle>;

    fn destroy_instance(&mut self, instance: RawHandle) -> RuntimeResult<()>;

    fn instance_properties(&self, instance: RawHandle) -> RuntimeResult<InstanceProperties>;

    /// `Ok(None)` when no system of the given form factor is attached.
    fn system(&self, instance: RawHandle, form_factor: FormFactor)
        -> RuntimeResult<Option<SystemId>>;

    fn system_properties(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties>;

    fn graphics_requirements(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements>;

    fn enumerate_view_configurations(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<Vec<ViewConfigurationType>>;

    fn view_configuration_properties(
        &self,
        instance: RawHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<ViewConfigurationProperties>;

    fn enumerate_view_configuration_views(
        &self,
        instance: RawHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfigurationView>>;

    fn create_session(
        &mut self,
        instance: RawHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<RawHandle>;

    fn destroy_session(&mut self, session: RawHandle) -> RuntimeResult<()>;

    fn begin_session(&mut self, session: RawHandle, ty: ViewConfigurationType)
        -> RuntimeResult<()>;

    fn end_session(&mut self, session: RawHandle) -> RuntimeResult<()>;

    fn request_exit_session(&mut self, session: RawHandle) -> RuntimeResult<()>;

    /// Next queued event for `instance`, if any.
    fn poll_event(&mut self, instance: RawHandle) -> RuntimeResult<Option<RuntimeEvent>>;

    fn enumerate_reference_spaces(
        &self,
        session: RawHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceKind>>;

    fn create_reference_space(
        &mut self,
        session: RawHandle,
        kind: ReferenceSpaceKind,
        pose: Pose,
    ) -> RuntimeResult<RawHandle>;

    fn destroy_space(&mut self, space: RawHandle) -> RuntimeResult<()>;

    fn locate_views(
        &mut self,
        session: RawHandle,
        ty: ViewConfigurationType,
        time: Time,
        space: RawHandle,
    ) -> RuntimeResult<Vec<View>>;

    fn enumerate_swapchain_formats(&self, session: RawHandle) -> RuntimeResult<Vec<i64>>;

    fn create_swapchain(
        &mut self,
        session: RawHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<RawHandle>;

    fn destroy_swapchain(&mut self, swapchain: RawHandle) -> RuntimeResult<()>;

    fn enumerate_swapchain_images(&self, swapchain: RawHandle)
        -> RuntimeResult<Vec<NativeImage>>;

    fn acquire_swapchain_image(&mut self, swapchain: RawHandle) -> RuntimeResult<u32>;

    fn wait_swapchain_image(&mut self, swapchain: RawHandle, timeout: Duration)
        -> RuntimeResult<()>;

    fn release_swapchain_image(&mut self, swapchain: RawHandle) -> RuntimeResult<()>;

    /// Blocks until the compositor wants the next frame.
    fn wait_frame(&mut self, session: RawHandle) -> RuntimeResult<FrameState>;

    fn begin_frame(&mut self, session: RawHandle) -> RuntimeResult<()>;

    fn end_frame(
        &mut self,
        session: RawHandle,
        display_time: Time,
        blend_mode: EnvironmentBlendMode,
        layers: &[CompositionLayer],
    ) -> RuntimeResult<()>;
}
