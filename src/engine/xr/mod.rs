//! XR session lifecycle: instance → session → spaces/swapchains → per-frame layer submission.
//!
//! `Xr` owns every object in slotmap arenas and hands out keys. Parent/child ownership is
//! enforced on destruction: swapchains and spaces go before their session, the session before
//! its instance.

pub mod composition;
pub mod extensions;
pub mod frame_stats;
pub mod instance;
pub mod layer;
#[cfg(feature = "openxr")]
pub mod openxr_runtime;
pub mod runtime;
pub mod session;
pub mod sim;
pub mod space;
pub mod swapchain;

#[cfg(test)]
mod xr_tests;

use slotmap::{SlotMap, new_key_type};

use crate::engine::graphics::{NativeImage, Pose};
use crate::engine::{EngineError, EngineResult, log_failure};

pub use extensions::{ExtensionProperties, ExtensionRegistry, ExtensionRequest};
pub use frame_stats::FrameStats;
pub use instance::{Instance, StereoViews};
pub use layer::{EyeVisibility, Layer, LayerFlags, LayerKind, LayerType, ProjectionView};
pub use runtime::{
    ApplicationInfo, EnvironmentBlendMode, LoaderContext, RuntimeEvent, Time, View,
    ViewConfigurationType, XrRuntime,
};
pub use session::{FrameTiming, Session, SessionState};
pub use sim::{SimConfig, SimJournal, SimRuntime};
pub use space::{ReferenceSpaceInfo, ReferenceSpaceKind, Space, SpaceKind};
pub use swapchain::{Swapchain, SwapchainCreateInfo, SwapchainUsage};

new_key_type! {
    pub struct InstanceId;
    pub struct SessionId;
    pub struct SpaceId;
    pub struct SwapchainId;
}

/// Owner of all XR objects and the runtime they live in.
pub struct Xr {
    runtime: Box<dyn XrRuntime>,
    loader_initialized: bool,
    instances: SlotMap<InstanceId, Instance>,
    sessions: SlotMap<SessionId, Session>,
    spaces: SlotMap<SpaceId, Space>,
    swapchains: SlotMap<SwapchainId, Swapchain>,
}

impl Xr {
    pub fn new(runtime: impl XrRuntime + 'static) -> Self {
        Self::from_boxed(Box::new(runtime))
    }

    pub fn from_boxed(runtime: Box<dyn XrRuntime>) -> Self {
        Self {
            runtime,
            loader_initialized: false,
            instances: SlotMap::with_key(),
            sessions: SlotMap::with_key(),
            spaces: SlotMap::with_key(),
            swapchains: SlotMap::with_key(),
        }
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    // ---- loader / instance ----

    /// Hand the platform handles to the loader. Must happen exactly once, before any instance.
    pub fn init_loader(&mut self, vm: usize, context: usize) -> EngineResult<()> {
        let result = if self.loader_initialized {
            Err(EngineError::LoaderAlreadyInitialized)
        } else {
            self.runtime
                .init_loader(&LoaderContext { vm, context })
                .map_err(|e| EngineError::RuntimeUnavailable(e.to_string()))
        };
        if result.is_ok() {
            self.loader_initialized = true;
            log::info!("loader initialized for {}", self.runtime.name());
        }
        result.inspect_err(|e| log_failure("init_loader", e))
    }

    pub fn is_loader_initialized(&self) -> bool {
        self.loader_initialized
    }

    /// Allocate an unconfigured instance. Register extensions on it, then `create_instance`.
    pub fn make_instance(&mut self, app_info: ApplicationInfo) -> EngineResult<InstanceId> {
        if !self.loader_initialized {
            let err = EngineError::LoaderNotInitialized;
            log_failure("make_instance", &err);
            return Err(err);
        }
        Ok(self.instances.insert(Instance::new(app_info)))
    }

    pub fn instance(&self, id: InstanceId) -> EngineResult<&Instance> {
        self.instances
            .get(id)
            .ok_or(EngineError::InvalidHandle("instance"))
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> EngineResult<&mut Instance> {
        self.instances
            .get_mut(id)
            .ok_or(EngineError::InvalidHandle("instance"))
    }

    pub fn create_instance(&mut self, id: InstanceId) -> EngineResult<()> {
        let rt = self.runtime.as_mut();
        self.instances
            .get_mut(id)
            .ok_or(EngineError::InvalidHandle("instance"))
            .and_then(|instance| instance.create(rt))
            .inspect_err(|e| log_failure("create_instance", e))
    }

    pub fn set_gfx_binding(
        &mut self,
        id: InstanceId,
        display: usize,
        config: usize,
        context: usize,
    ) -> EngineResult<()> {
        self.instance_mut(id)
            .map(|instance| instance.set_gfx_binding(display, config, context))
            .inspect_err(|e| log_failure("set_gfx_binding", e))
    }

    /// Destroy an instance whose session is already gone. Destroying a stale id is a no-op.
    pub fn destroy_instance(&mut self, id: InstanceId) -> EngineResult<()> {
        self.destroy_instance_inner(id)
            .inspect_err(|e| log_failure("destroy_instance", e))
    }

    fn destroy_instance_inner(&mut self, id: InstanceId) -> EngineResult<()> {
        let Some(instance) = self.instances.get_mut(id) else {
            return Ok(());
        };
        if let Some(session) = instance.session.filter(|s| self.sessions.contains_key(*s)) {
            return Err(EngineError::OwnershipViolation(format!(
                "instance still owns session {session:?}"
            )));
        }
        instance.destroy(self.runtime.as_mut())?;
        self.instances.remove(id);
        Ok(())
    }

    // ---- session ----

    pub fn create_session(&mut self, instance: InstanceId) -> EngineResult<SessionId> {
        self.create_session_inner(instance)
            .inspect_err(|e| log_failure("create_session", e))
    }

    fn create_session_inner(&mut self, instance_id: InstanceId) -> EngineResult<SessionId> {
        let instance = self
            .instances
            .get(instance_id)
            .ok_or(EngineError::InvalidHandle("instance"))?;
        if !instance.is_created() {
            return Err(EngineError::InstanceNotCreated);
        }
        let binding = *instance
            .gfx_binding()
            .ok_or(EngineError::GraphicsBindingMissing)?;
        if instance
            .session
            .is_some_and(|s| self.sessions.contains_key(s))
        {
            return Err(EngineError::SessionAlreadyExists);
        }

        let rt = self.runtime.as_mut();
        let raw = rt
            .create_session(instance.raw(), instance.system(), &binding)
            .map_err(|e| EngineError::runtime("create_session", e))?;
        let reference_spaces = match rt.enumerate_reference_spaces(raw) {
            Ok(kinds) => kinds,
            Err(e) => {
                if let Err(e) = rt.destroy_session(raw) {
                    log::warn!("create_session: releasing partial session failed: {e}");
                }
                return Err(EngineError::runtime("enumerate_reference_spaces", e));
            }
        };

        let session = Session::new(
            instance_id,
            raw,
            reference_spaces,
            instance.max_layer_count(),
        );
        log::info!(
            "session {} created; reference spaces: {:?}",
            session.guid(),
            session.reference_spaces().collect::<Vec<_>>()
        );
        let id = self.sessions.insert(session);
        if let Some(instance) = self.instances.get_mut(instance_id) {
            instance.session = Some(id);
        }
        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> EngineResult<&Session> {
        self.sessions
            .get(id)
            .ok_or(EngineError::InvalidHandle("session"))
    }

    /// The instance that created `session`.
    pub fn session_instance(&self, session: SessionId) -> EngineResult<InstanceId> {
        self.session(session).map(Session::instance)
    }

    pub fn set_blend_mode(
        &mut self,
        session: SessionId,
        mode: EnvironmentBlendMode,
    ) -> EngineResult<()> {
        self.sessions
            .get_mut(session)
            .ok_or(EngineError::InvalidHandle("session"))
            .map(|s| s.set_blend_mode(mode))
            .inspect_err(|e| log_failure("set_blend_mode", e))
    }

    /// Drain the runtime's event queue for `instance`, applying session state changes.
    ///
    /// Returns the state changes in the order they were applied.
    pub fn poll_events(
        &mut self,
        instance: InstanceId,
    ) -> EngineResult<Vec<(SessionId, SessionState)>> {
        self.poll_events_inner(instance)
            .inspect_err(|e| log_failure("poll_events", e))
    }

    fn poll_events_inner(
        &mut self,
        instance_id: InstanceId,
    ) -> EngineResult<Vec<(SessionId, SessionState)>> {
        let instance = self
            .instances
            .get(instance_id)
            .ok_or(EngineError::InvalidHandle("instance"))?;
        if !instance.is_created() {
            return Err(EngineError::InstanceNotCreated);
        }
        let raw_instance = instance.raw();

        let mut changes = Vec::new();
        while let Some(event) = self
            .runtime
            .poll_event(raw_instance)
            .map_err(|e| EngineError::runtime("poll_event", e))?
        {
            match event {
                RuntimeEvent::SessionStateChanged { session, state, .. } => {
                    let found = self
                        .sessions
                        .iter()
                        .find(|(_, s)| s.instance() == instance_id && s.raw() == session)
                        .map(|(id, _)| id);
                    match found {
                        Some(id) => {
                            self.apply_session_state(id, state)?;
                            changes.push((id, state));
                        }
                        None => log::debug!("poll_events: state {state} for unknown session"),
                    }
                }
                RuntimeEvent::InstanceLossPending { loss_time } => {
                    log::warn!(
                        "poll_events: instance loss pending at {:.3}s",
                        loss_time.as_secs_f64()
                    );
                }
                RuntimeEvent::EventsLost { count } => {
                    log::warn!("poll_events: runtime dropped {count} events");
                }
                RuntimeEvent::ReferenceSpaceChangePending { kind, .. } => {
                    log::info!("poll_events: reference space {kind} is about to change");
                }
            }
        }
        Ok(changes)
    }

    fn apply_session_state(&mut self, id: SessionId, state: SessionState) -> EngineResult<()> {
        let rt = self.runtime.as_mut();
        self.sessions
            .get_mut(id)
            .ok_or(EngineError::InvalidHandle("session"))?
            .handle_state_change(rt, state)
    }

    /// Ask the runtime to wind the session down; progress is reported through `poll_events`.
    pub fn request_exit(&mut self, session: SessionId) -> EngineResult<()> {
        let rt = self.runtime.as_mut();
        self.sessions
            .get_mut(session)
            .ok_or(EngineError::InvalidHandle("session"))
            .and_then(|s| s.request_exit(rt))
            .inspect_err(|e| log_failure("request_exit", e))
    }

    /// Rejected while any space or swapchain of the session is still alive.
    pub fn destroy_session(&mut self, id: SessionId) -> EngineResult<()> {
        self.destroy_session_inner(id)
            .inspect_err(|e| log_failure("destroy_session", e))
    }

    fn destroy_session_inner(&mut self, id: SessionId) -> EngineResult<()> {
        let session = self
            .sessions
            .get(id)
            .ok_or(EngineError::InvalidHandle("session"))?;

        let live_spaces = self.spaces.values().filter(|s| s.session() == id).count();
        let live_swapchains = self
            .swapchains
            .values()
            .filter(|s| s.session() == id)
            .count();
        if live_spaces > 0 || live_swapchains > 0 {
            return Err(EngineError::OwnershipViolation(format!(
                "session still owns {live_spaces} space(s) and {live_swapchains} swapchain(s)"
            )));
        }

        self.runtime
            .destroy_session(session.raw())
            .map_err(|e| EngineError::runtime("destroy_session", e))?;
        let instance = session.instance();
        log::info!("session {}: {}", session.guid(), session.stats().summary());
        self.sessions.remove(id);
        if let Some(instance) = self.instances.get_mut(instance) {
            instance.session = None;
        }
        Ok(())
    }

    // ---- spaces ----

    pub fn create_refspace(
        &mut self,
        session: SessionId,
        kind: ReferenceSpaceKind,
        pose: Pose,
    ) -> EngineResult<SpaceId> {
        self.create_space(session, ReferenceSpaceInfo::new(kind).with_pose(pose))
    }

    pub fn create_space(
        &mut self,
        session: SessionId,
        info: ReferenceSpaceInfo,
    ) -> EngineResult<SpaceId> {
        self.create_space_inner(session, info)
            .inspect_err(|e| log_failure("create_refspace", e))
    }

    fn create_space_inner(
        &mut self,
        session_id: SessionId,
        info: ReferenceSpaceInfo,
    ) -> EngineResult<SpaceId> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(EngineError::InvalidHandle("session"))?;
        if !session.supports_reference_space(info.kind) {
            return Err(EngineError::UnsupportedReferenceSpace(info.kind.to_string()));
        }
        let raw = self
            .runtime
            .create_reference_space(session.raw(), info.kind, info.pose_in_reference_space)
            .map_err(|e| EngineError::runtime("create_reference_space", e))?;
        Ok(self
            .spaces
            .insert(Space::new(session_id, raw, SpaceKind::Reference(info))))
    }

    pub fn space(&self, id: SpaceId) -> EngineResult<&Space> {
        self.spaces.get(id).ok_or(EngineError::InvalidHandle("space"))
    }

    pub fn destroy_space(&mut self, id: SpaceId) -> EngineResult<()> {
        let result = match self.spaces.get(id) {
            None => Err(EngineError::InvalidHandle("space")),
            Some(space) => self
                .runtime
                .destroy_space(space.raw())
                .map_err(|e| EngineError::runtime("destroy_space", e)),
        };
        if result.is_ok() {
            self.spaces.remove(id);
        }
        result.inspect_err(|e| log_failure("destroy_space", e))
    }

    /// Locate both eyes in `space` at `time` (normally the frame's predicted display time).
    pub fn locate_views(
        &mut self,
        session: SessionId,
        space: SpaceId,
        time: Time,
    ) -> EngineResult<[View; 2]> {
        self.locate_views_inner(session, space, time)
            .inspect_err(|e| log_failure("locate_views", e))
    }

    fn locate_views_inner(
        &mut self,
        session_id: SessionId,
        space_id: SpaceId,
        time: Time,
    ) -> EngineResult<[View; 2]> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(EngineError::InvalidHandle("session"))?;
        let space = self
            .spaces
            .get(space_id)
            .filter(|s| s.session() == session_id)
            .ok_or(EngineError::InvalidHandle("space"))?;
        let views = self
            .runtime
            .locate_views(
                session.raw(),
                ViewConfigurationType::PrimaryStereo,
                time,
                space.raw(),
            )
            .map_err(|e| EngineError::runtime("locate_views", e))?;
        views.try_into().map_err(|v: Vec<View>| {
            EngineError::runtime(
                "locate_views",
                runtime::RuntimeError::Other(format!("expected 2 views, got {}", v.len())),
            )
        })
    }

    // ---- swapchains ----

    pub fn create_swapchain(
        &mut self,
        session: SessionId,
        info: &SwapchainCreateInfo,
    ) -> EngineResult<SwapchainId> {
        self.create_swapchain_inner(session, info)
            .inspect_err(|e| log_failure("create_swapchain", e))
    }

    fn create_swapchain_inner(
        &mut self,
        session_id: SessionId,
        info: &SwapchainCreateInfo,
    ) -> EngineResult<SwapchainId> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or(EngineError::InvalidHandle("session"))?;

        let rt = self.runtime.as_mut();
        let formats = rt
            .enumerate_swapchain_formats(session.raw())
            .map_err(|e| EngineError::runtime("enumerate_swapchain_formats", e))?;
        if !formats.contains(&info.format) {
            return Err(EngineError::UnsupportedSwapchainFormat(info.format));
        }

        let raw = rt
            .create_swapchain(session.raw(), info)
            .map_err(|e| EngineError::runtime("create_swapchain", e))?;
        let images = match rt.enumerate_swapchain_images(raw) {
            Ok(images) if !images.is_empty() => images,
            other => {
                if let Err(e) = rt.destroy_swapchain(raw) {
                    log::warn!("create_swapchain: releasing partial swapchain failed: {e}");
                }
                let source = other
                    .err()
                    .unwrap_or_else(|| runtime::RuntimeError::Other("empty image chain".into()));
                return Err(EngineError::runtime("enumerate_swapchain_images", source));
            }
        };

        log::info!(
            "swapchain {}x{} format {:#x}: {} images",
            info.width,
            info.height,
            info.format,
            images.len()
        );
        Ok(self
            .swapchains
            .insert(Swapchain::new(session_id, raw, *info, images)))
    }

    pub fn swapchain(&self, id: SwapchainId) -> EngineResult<&Swapchain> {
        self.swapchains
            .get(id)
            .ok_or(EngineError::InvalidHandle("swapchain"))
    }

    /// Native image handles in chain order.
    pub fn enumerate_images(&self, id: SwapchainId) -> EngineResult<&[NativeImage]> {
        self.swapchain(id).map(Swapchain::enumerate_images)
    }

    pub fn acquire_image(&mut self, id: SwapchainId) -> EngineResult<u32> {
        let rt = self.runtime.as_mut();
        self.swapchains
            .get_mut(id)
            .ok_or(EngineError::InvalidHandle("swapchain"))
            .and_then(|sc| sc.acquire(rt))
            .inspect_err(|e| log_failure("acquire_image", e))
    }

    /// Blocks until the acquired image is ready to be written.
    pub fn wait_image(&mut self, id: SwapchainId) -> EngineResult<()> {
        let rt = self.runtime.as_mut();
        self.swapchains
            .get_mut(id)
            .ok_or(EngineError::InvalidHandle("swapchain"))
            .and_then(|sc| sc.wait(rt))
            .inspect_err(|e| log_failure("wait_image", e))
    }

    pub fn acquire_and_wait_image(&mut self, id: SwapchainId) -> EngineResult<u32> {
        let index = self.acquire_image(id)?;
        self.wait_image(id)?;
        Ok(index)
    }

    pub fn release_image(&mut self, id: SwapchainId) -> EngineResult<()> {
        let rt = self.runtime.as_mut();
        self.swapchains
            .get_mut(id)
            .ok_or(EngineError::InvalidHandle("swapchain"))
            .and_then(|sc| sc.release(rt))
            .inspect_err(|e| log_failure("release_image", e))
    }

    pub fn destroy_swapchain(&mut self, id: SwapchainId) -> EngineResult<()> {
        let result = match self.swapchains.get(id) {
            None => Err(EngineError::InvalidHandle("swapchain")),
            Some(sc) => {
                if let Some(index) = sc.acquired_index() {
                    log::warn!("destroy_swapchain: image {index} still acquired");
                }
                self.runtime
                    .destroy_swapchain(sc.raw())
                    .map_err(|e| EngineError::runtime("destroy_swapchain", e))
            }
        };
        if result.is_ok() {
            self.swapchains.remove(id);
        }
        result.inspect_err(|e| log_failure("destroy_swapchain", e))
    }

    // ---- frame ----

    /// Wait for and open the next frame.
    ///
    /// `FrameNotReady` until the session is running in a synchronizable state.
    pub fn begin_frame(&mut self, session: SessionId) -> EngineResult<FrameTiming> {
        let rt = self.runtime.as_mut();
        self.sessions
            .get_mut(session)
            .ok_or(EngineError::InvalidHandle("session"))
            .and_then(|s| s.begin_frame(rt))
            .inspect_err(|e| log_failure("begin_frame", e))
    }

    pub fn add_layer(&mut self, session: SessionId, layer: Layer) -> EngineResult<()> {
        self.sessions
            .get_mut(session)
            .ok_or(EngineError::InvalidHandle("session"))
            .and_then(|s| s.add_layer(layer))
            .inspect_err(|e| log_failure("add_layer", e))
    }

    /// Submit the frame's layers in the order they were added and close the frame.
    pub fn end_frame(&mut self, session: SessionId) -> EngineResult<()> {
        let rt = self.runtime.as_mut();
        self.sessions
            .get_mut(session)
            .ok_or(EngineError::InvalidHandle("session"))
            .and_then(|s| s.end_frame(rt, session, &self.spaces, &self.swapchains))
            .inspect_err(|e| log_failure("end_frame", e))
    }

    pub fn pending_layers(&self, session: SessionId) -> EngineResult<&[Layer]> {
        self.session(session).map(Session::pending_layers)
    }

    pub fn predicted_display_time(&self, session: SessionId) -> EngineResult<Option<Time>> {
        self.session(session).map(Session::predicted_display_time)
    }
}
