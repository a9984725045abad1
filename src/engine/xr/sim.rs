//! Headless, deterministic runtime.
//!
//! Drives the session through the usual state progression without any hardware: Idle and Ready
//! right after session creation, then Synchronized, Visible and Focused after the first three
//! accepted submissions. Every submission lands in a shared `SimJournal` for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::engine::graphics::{Fov, GraphicsBinding, NativeImage, Pose};
use crate::engine::xr::composition::CompositionLayer;
use crate::engine::xr::extensions::ExtensionProperties;
use crate::engine::xr::runtime::{
    ApplicationInfo, Duration, EnvironmentBlendMode, FormFactor, FrameState,
    GraphicsRequirements, InstanceProperties, LoaderContext, RawHandle, RuntimeError,
    RuntimeEvent, RuntimeResult, SystemGraphicsProperties, SystemId, SystemProperties,
    SystemTrackingProperties, Time, Version, View, ViewConfigurationProperties,
    ViewConfigurationType, ViewConfigurationView, XrRuntime,
};
use crate::engine::xr::session::SessionState;
use crate::engine::xr::space::ReferenceSpaceKind;
use crate::engine::xr::swapchain::{FORMAT_RGBA8, FORMAT_SRGB8_ALPHA8, SwapchainCreateInfo};

const SIM_SYSTEM: SystemId = SystemId(1);
const FIRST_IMAGE_HANDLE: NativeImage = 1000;
const HALF_IPD: f32 = 0.032;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub runtime_name: String,
    pub available_extensions: Vec<ExtensionProperties>,
    /// When false no head-mounted system is reported.
    pub has_hmd: bool,
    /// When false only a mono view configuration is offered.
    pub stereo: bool,
    pub chain_length: u32,
    /// Step between successive acquired indices.
    pub acquire_stride: u32,
    pub reference_spaces: Vec<ReferenceSpaceKind>,
    pub swapchain_formats: Vec<i64>,
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_swapchain_size: u32,
    pub max_layer_count: u32,
    pub display_period_ns: i64,
    /// Reject every `end_frame`.
    pub fail_submissions: bool,
    /// Number of `destroy_instance` calls rejected before one succeeds.
    pub rejected_instance_destroys: u32,
    /// Frames the compositor still expects after an exit request before reporting `Stopping`.
    pub frames_before_stopping: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            runtime_name: "little-xr sim".to_string(),
            available_extensions: vec![
                ExtensionProperties::new("XR_KHR_opengl_es_enable", 8),
                ExtensionProperties::new("XR_KHR_android_create_instance", 3),
                ExtensionProperties::new("XR_KHR_composition_layer_cylinder", 4),
                ExtensionProperties::new("XR_KHR_composition_layer_equirect", 3),
                ExtensionProperties::new("XR_KHR_composition_layer_cube", 8),
            ],
            has_hmd: true,
            stereo: true,
            chain_length: 3,
            acquire_stride: 1,
            reference_spaces: vec![
                ReferenceSpaceKind::View,
                ReferenceSpaceKind::Local,
                ReferenceSpaceKind::Stage,
            ],
            swapchain_formats: vec![FORMAT_SRGB8_ALPHA8, FORMAT_RGBA8],
            recommended_width: 1024,
            recommended_height: 1024,
            max_swapchain_size: 4096,
            max_layer_count: 16,
            display_period_ns: 13_888_889,
            fail_submissions: false,
            rejected_instance_destroys: 0,
            frames_before_stopping: 0,
        }
    }
}

/// One `end_frame` call as the simulated compositor saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub session: RawHandle,
    pub display_time: Time,
    pub blend_mode: EnvironmentBlendMode,
    pub layers: Vec<CompositionLayer>,
    pub accepted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimJournal {
    pub loader_inits: u32,
    pub instances_created: u32,
    pub instances_destroyed: u32,
    pub sessions_created: u32,
    pub sessions_destroyed: u32,
    pub sessions_begun: u32,
    pub sessions_ended: u32,
    pub spaces_created: u32,
    pub spaces_destroyed: u32,
    pub swapchains_created: u32,
    pub swapchains_destroyed: u32,
    pub submissions: Vec<Submission>,
}

impl SimJournal {
    pub fn last_submission(&self) -> Option<&Submission> {
        self.submissions.last()
    }

    pub fn accepted_submissions(&self) -> usize {
        self.submissions.iter().filter(|s| s.accepted).count()
    }
}

#[derive(Debug)]
struct SimSession {
    instance: RawHandle,
    running: bool,
    frame_waited: bool,
    in_frame: bool,
    accepted_frames: u64,
    exit_requested: bool,
    frames_until_stopping: Option<u32>,
}

#[derive(Debug)]
struct SimSwapchain {
    session: RawHandle,
    images: Vec<NativeImage>,
    next: u32,
    acquired: Option<u32>,
    waited: bool,
}

pub struct SimRuntime {
    config: SimConfig,
    journal: Arc<Mutex<SimJournal>>,
    next_handle: u64,
    next_image: NativeImage,
    clock: i64,
    instances: Vec<RawHandle>,
    sessions: HashMap<RawHandle, SimSession>,
    spaces: HashMap<RawHandle, RawHandle>,
    swapchains: HashMap<RawHandle, SimSwapchain>,
    events: VecDeque<(RawHandle, RuntimeEvent)>,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimRuntime {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            journal: Arc::new(Mutex::new(SimJournal::default())),
            next_handle: 1,
            next_image: FIRST_IMAGE_HANDLE,
            clock: 0,
            instances: Vec::new(),
            sessions: HashMap::new(),
            spaces: HashMap::new(),
            swapchains: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Shared view of everything this runtime has recorded.
    pub fn journal(&self) -> Arc<Mutex<SimJournal>> {
        Arc::clone(&self.journal)
    }

    fn record(&self) -> MutexGuard<'_, SimJournal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn alloc(&mut self) -> RawHandle {
        let handle = RawHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn push_state(&mut self, session: RawHandle, state: SessionState) {
        let Some(instance) = self.sessions.get(&session).map(|s| s.instance) else {
            return;
        };
        let event = RuntimeEvent::SessionStateChanged {
            session,
            state,
            time: Time(self.clock),
        };
        self.events.push_back((instance, event));
    }

    fn session_mut(&mut self, session: RawHandle) -> RuntimeResult<&mut SimSession> {
        self.sessions
            .get_mut(&session)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn check_instance(&self, instance: RawHandle) -> RuntimeResult<()> {
        if self.instances.contains(&instance) {
            Ok(())
        } else {
            Err(RuntimeError::HandleInvalid)
        }
    }

    fn check_system(&self, instance: RawHandle, system: SystemId) -> RuntimeResult<()> {
        self.check_instance(instance)?;
        if self.config.has_hmd && system == SIM_SYSTEM {
            Ok(())
        } else {
            Err(RuntimeError::HandleInvalid)
        }
    }

    fn layers_resolve(&self, session: RawHandle, layers: &[CompositionLayer]) -> bool {
        layers.iter().all(|layer| {
            self.spaces.get(&layer.space()) == Some(&session)
                && layer
                    .swapchains()
                    .iter()
                    .all(|sc| self.swapchains.get(sc).is_some_and(|s| s.session == session))
        })
    }
}

impl XrRuntime for SimRuntime {
    fn name(&self) -> &str {
        &self.config.runtime_name
    }

    fn init_loader(&mut self, _ctx: &LoaderContext) -> RuntimeResult<()> {
        self.record().loader_inits += 1;
        Ok(())
    }

    fn enumerate_extensions(&self) -> RuntimeResult<Vec<ExtensionProperties>> {
        Ok(self.config.available_extensions.clone())
    }

    fn create_instance(
        &mut self,
        _app: &ApplicationInfo,
        extensions: &[String],
    ) -> RuntimeResult<RawHandle> {
        if let Some(name) = extensions.iter().find(|name| {
            !self
                .config
                .available_extensions
                .iter()
                .any(|e| &e.name == *name)
        }) {
            return Err(RuntimeError::Other(format!("extension not present: {name}")));
        }
        let handle = self.alloc();
        self.instances.push(handle);
        self.record().instances_created += 1;
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: RawHandle) -> RuntimeResult<()> {
        self.check_instance(instance)?;
        if self.config.rejected_instance_destroys > 0 {
            self.config.rejected_instance_destroys -= 1;
            return Err(RuntimeError::Other("instance destruction rejected".into()));
        }
        self.instances.retain(|i| *i != instance);
        self.events.retain(|(i, _)| *i != instance);
        self.record().instances_destroyed += 1;
        Ok(())
    }

    fn instance_properties(&self, instance: RawHandle) -> RuntimeResult<InstanceProperties> {
        self.check_instance(instance)?;
        Ok(InstanceProperties {
            runtime_name: self.config.runtime_name.clone(),
            runtime_version: Version::new(1, 0, 0),
        })
    }

    fn system(
        &self,
        instance: RawHandle,
        form_factor: FormFactor,
    ) -> RuntimeResult<Option<SystemId>> {
        self.check_instance(instance)?;
        if !self.config.has_hmd || form_factor != FormFactor::HeadMountedDisplay {
            return Err(RuntimeError::FormFactorUnavailable);
        }
        Ok(Some(SIM_SYSTEM))
    }

    fn system_properties(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        self.check_system(instance, system)?;
        Ok(SystemProperties {
            system_id: system,
            vendor_id: 0x2833,
            system_name: "Simulated HMD".to_string(),
            graphics: SystemGraphicsProperties {
                max_swapchain_image_width: self.config.max_swapchain_size,
                max_swapchain_image_height: self.config.max_swapchain_size,
                max_layer_count: self.config.max_layer_count,
            },
            tracking: SystemTrackingProperties {
                orientation_tracking: true,
                position_tracking: true,
            },
        })
    }

    fn graphics_requirements(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements> {
        self.check_system(instance, system)?;
        Ok(GraphicsRequirements {
            min_api_version: Version::new(3, 0, 0),
            max_api_version: Version::new(3, 2, 0),
        })
    }

    fn enumerate_view_configurations(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<Vec<ViewConfigurationType>> {
        self.check_system(instance, system)?;
        let mut configs = vec![ViewConfigurationType::PrimaryMono];
        if self.config.stereo {
            configs.insert(0, ViewConfigurationType::PrimaryStereo);
        }
        Ok(configs)
    }

    fn view_configuration_properties(
        &self,
        instance: RawHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<ViewConfigurationProperties> {
        self.check_system(instance, system)?;
        Ok(ViewConfigurationProperties {
            view_configuration_type: ty,
            fov_mutable: true,
        })
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: RawHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfigurationView>> {
        self.check_system(instance, system)?;
        let view = ViewConfigurationView {
            recommended_image_rect_width: self.config.recommended_width,
            max_image_rect_width: self.config.max_swapchain_size,
            recommended_image_rect_height: self.config.recommended_height,
            max_image_rect_height: self.config.max_swapchain_size,
            recommended_swapchain_sample_count: 1,
            max_swapchain_sample_count: 4,
        };
        let count = match ty {
            ViewConfigurationType::PrimaryStereo if self.config.stereo => 2,
            ViewConfigurationType::PrimaryStereo => {
                return Err(RuntimeError::Other(
                    "view configuration unsupported".to_string(),
                ));
            }
            ViewConfigurationType::PrimaryMono => 1,
        };
        Ok(vec![view; count])
    }

    fn create_session(
        &mut self,
        instance: RawHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<RawHandle> {
        self.check_system(instance, system)?;
        if binding.context == 0 {
            return Err(RuntimeError::Other("graphics context is null".to_string()));
        }
        let handle = self.alloc();
        self.sessions.insert(
            handle,
            SimSession {
                instance,
                running: false,
                frame_waited: false,
                in_frame: false,
                accepted_frames: 0,
                exit_requested: false,
                frames_until_stopping: None,
            },
        );
        self.record().sessions_created += 1;
        self.push_state(handle, SessionState::Idle);
        self.push_state(handle, SessionState::Ready);
        Ok(handle)
    }

    fn destroy_session(&mut self, session: RawHandle) -> RuntimeResult<()> {
        self.sessions
            .remove(&session)
            .ok_or(RuntimeError::HandleInvalid)?;
        self.events.retain(|(_, e)| {
            !matches!(e, RuntimeEvent::SessionStateChanged { session: s, .. } if *s == session)
        });
        self.record().sessions_destroyed += 1;
        Ok(())
    }

    fn begin_session(
        &mut self,
        session: RawHandle,
        _ty: ViewConfigurationType,
    ) -> RuntimeResult<()> {
        let s = self.session_mut(session)?;
        if s.running {
            return Err(RuntimeError::CallOrderInvalid);
        }
        s.running = true;
        self.record().sessions_begun += 1;
        Ok(())
    }

    fn end_session(&mut self, session: RawHandle) -> RuntimeResult<()> {
        let s = self.session_mut(session)?;
        if !s.running {
            return Err(RuntimeError::SessionNotRunning);
        }
        s.running = false;
        s.in_frame = false;
        s.frame_waited = false;
        let exiting = s.exit_requested;
        self.record().sessions_ended += 1;
        self.push_state(session, SessionState::Idle);
        if exiting {
            self.push_state(session, SessionState::Exiting);
        }
        Ok(())
    }

    fn request_exit_session(&mut self, session: RawHandle) -> RuntimeResult<()> {
        let delay = self.config.frames_before_stopping;
        let s = self.session_mut(session)?;
        if !s.running {
            return Err(RuntimeError::SessionNotRunning);
        }
        if s.exit_requested {
            return Ok(());
        }
        s.exit_requested = true;
        match delay {
            0 => self.push_state(session, SessionState::Stopping),
            frames => s.frames_until_stopping = Some(frames),
        }
        Ok(())
    }

    fn poll_event(&mut self, instance: RawHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        self.check_instance(instance)?;
        let pos = self.events.iter().position(|(i, _)| *i == instance);
        Ok(pos
            .and_then(|pos| self.events.remove(pos))
            .map(|(_, event)| event))
    }

    fn enumerate_reference_spaces(
        &self,
        session: RawHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceKind>> {
        if !self.sessions.contains_key(&session) {
            return Err(RuntimeError::HandleInvalid);
        }
        Ok(self.config.reference_spaces.clone())
    }

    fn create_reference_space(
        &mut self,
        session: RawHandle,
        kind: ReferenceSpaceKind,
        _pose: Pose,
    ) -> RuntimeResult<RawHandle> {
        if !self.sessions.contains_key(&session) {
            return Err(RuntimeError::HandleInvalid);
        }
        if !self.config.reference_spaces.contains(&kind) {
            return Err(RuntimeError::Other(format!(
                "reference space {kind} unsupported"
            )));
        }
        let handle = self.alloc();
        self.spaces.insert(handle, session);
        self.record().spaces_created += 1;
        Ok(handle)
    }

    fn destroy_space(&mut self, space: RawHandle) -> RuntimeResult<()> {
        self.spaces
            .remove(&space)
            .ok_or(RuntimeError::HandleInvalid)?;
        self.record().spaces_destroyed += 1;
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: RawHandle,
        ty: ViewConfigurationType,
        _time: Time,
        space: RawHandle,
    ) -> RuntimeResult<Vec<View>> {
        if !self.sessions.contains_key(&session) || self.spaces.get(&space) != Some(&session) {
            return Err(RuntimeError::HandleInvalid);
        }
        let fov = Fov::symmetric(std::f32::consts::FRAC_PI_4);
        let views = match ty {
            ViewConfigurationType::PrimaryStereo => vec![
                View {
                    pose: Pose::from_position([-HALF_IPD, 0.0, 0.0]),
                    fov,
                },
                View {
                    pose: Pose::from_position([HALF_IPD, 0.0, 0.0]),
                    fov,
                },
            ],
            ViewConfigurationType::PrimaryMono => vec![View {
                pose: Pose::IDENTITY,
                fov,
            }],
        };
        Ok(views)
    }

    fn enumerate_swapchain_formats(&self, session: RawHandle) -> RuntimeResult<Vec<i64>> {
        if !self.sessions.contains_key(&session) {
            return Err(RuntimeError::HandleInvalid);
        }
        Ok(self.config.swapchain_formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: RawHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<RawHandle> {
        if !self.sessions.contains_key(&session) {
            return Err(RuntimeError::HandleInvalid);
        }
        if !self.config.swapchain_formats.contains(&info.format) {
            return Err(RuntimeError::Other(format!(
                "swapchain format {:#x} unsupported",
                info.format
            )));
        }
        let max = self.config.max_swapchain_size;
        if info.width == 0 || info.height == 0 || info.width > max || info.height > max {
            return Err(RuntimeError::Other(format!(
                "swapchain size {}x{} outside 1..={max}",
                info.width, info.height
            )));
        }

        let handle = self.alloc();
        let first = self.next_image;
        let len = self.config.chain_length.max(1);
        self.next_image += u64::from(len);
        self.swapchains.insert(
            handle,
            SimSwapchain {
                session,
                images: (first..first + u64::from(len)).collect(),
                next: 0,
                acquired: None,
                waited: false,
            },
        );
        self.record().swapchains_created += 1;
        Ok(handle)
    }

    fn destroy_swapchain(&mut self, swapchain: RawHandle) -> RuntimeResult<()> {
        self.swapchains
            .remove(&swapchain)
            .ok_or(RuntimeError::HandleInvalid)?;
        self.record().swapchains_destroyed += 1;
        Ok(())
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: RawHandle,
    ) -> RuntimeResult<Vec<NativeImage>> {
        self.swapchains
            .get(&swapchain)
            .map(|sc| sc.images.clone())
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn acquire_swapchain_image(&mut self, swapchain: RawHandle) -> RuntimeResult<u32> {
        let stride = self.config.acquire_stride.max(1);
        let sc = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(RuntimeError::HandleInvalid)?;
        if sc.acquired.is_some() {
            return Err(RuntimeError::CallOrderInvalid);
        }
        let index = sc.next;
        sc.next = (sc.next + stride) % sc.images.len() as u32;
        sc.acquired = Some(index);
        sc.waited = false;
        Ok(index)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: RawHandle,
        _timeout: Duration,
    ) -> RuntimeResult<()> {
        let sc = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(RuntimeError::HandleInvalid)?;
        if sc.acquired.is_none() {
            return Err(RuntimeError::CallOrderInvalid);
        }
        sc.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&mut self, swapchain: RawHandle) -> RuntimeResult<()> {
        let sc = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or(RuntimeError::HandleInvalid)?;
        if sc.acquired.is_none() || !sc.waited {
            return Err(RuntimeError::CallOrderInvalid);
        }
        sc.acquired = None;
        sc.waited = false;
        Ok(())
    }

    fn wait_frame(&mut self, session: RawHandle) -> RuntimeResult<FrameState> {
        let period = self.config.display_period_ns;
        let s = self.session_mut(session)?;
        if !s.running {
            return Err(RuntimeError::SessionNotRunning);
        }
        s.frame_waited = true;
        self.clock += period;
        Ok(FrameState {
            predicted_display_time: Time(self.clock + period),
            predicted_display_period: Duration(period),
            should_render: true,
        })
    }

    fn begin_frame(&mut self, session: RawHandle) -> RuntimeResult<()> {
        let s = self.session_mut(session)?;
        if !s.running {
            return Err(RuntimeError::SessionNotRunning);
        }
        if !s.frame_waited {
            return Err(RuntimeError::CallOrderInvalid);
        }
        s.frame_waited = false;
        s.in_frame = true;
        Ok(())
    }

    fn end_frame(
        &mut self,
        session: RawHandle,
        display_time: Time,
        blend_mode: EnvironmentBlendMode,
        layers: &[CompositionLayer],
    ) -> RuntimeResult<()> {
        let resolved = self.layers_resolve(session, layers);
        let fail = self.config.fail_submissions;
        let s = self.session_mut(session)?;
        if !s.in_frame {
            return Err(RuntimeError::CallOrderInvalid);
        }
        s.in_frame = false;

        let stopping = match s.frames_until_stopping {
            Some(1) => {
                s.frames_until_stopping = None;
                true
            }
            Some(left) => {
                s.frames_until_stopping = Some(left - 1);
                false
            }
            None => false,
        };
        let accepted = resolved && !fail;
        let next_state = if accepted {
            s.accepted_frames += 1;
            match (s.exit_requested, s.accepted_frames) {
                (false, 1) => Some(SessionState::Synchronized),
                (false, 2) => Some(SessionState::Visible),
                (false, 3) => Some(SessionState::Focused),
                _ => None,
            }
        } else {
            None
        };

        self.record().submissions.push(Submission {
            session,
            display_time,
            blend_mode,
            layers: layers.to_vec(),
            accepted,
        });
        if let Some(state) = next_state {
            self.push_state(session, state);
        }
        if stopping {
            self.push_state(session, SessionState::Stopping);
        }

        if !resolved {
            Err(RuntimeError::HandleInvalid)
        } else if fail {
            Err(RuntimeError::Other("injected submission failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_stride_cycles_out_of_order() {
        let mut rt = SimRuntime::new(SimConfig {
            chain_length: 3,
            acquire_stride: 2,
            ..SimConfig::default()
        });
        let instance = rt
            .create_instance(&ApplicationInfo::default(), &[])
            .unwrap();
        let binding = GraphicsBinding {
            display: 1,
            config: 1,
            context: 1,
        };
        let session = rt.create_session(instance, SIM_SYSTEM, &binding).unwrap();
        let sc = rt
            .create_swapchain(session, &SwapchainCreateInfo::new(64, 64))
            .unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rt.acquire_swapchain_image(sc).unwrap());
            rt.wait_swapchain_image(sc, Duration::INFINITE).unwrap();
            rt.release_swapchain_image(sc).unwrap();
        }
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn session_creation_queues_idle_then_ready() {
        let mut rt = SimRuntime::default();
        let instance = rt
            .create_instance(&ApplicationInfo::default(), &[])
            .unwrap();
        let session = rt
            .create_session(instance, SIM_SYSTEM, &GraphicsBinding::default())
            .unwrap_err();
        assert!(matches!(session, RuntimeError::Other(_)));

        let binding = GraphicsBinding {
            display: 1,
            config: 1,
            context: 1,
        };
        rt.create_session(instance, SIM_SYSTEM, &binding).unwrap();

        let states: Vec<SessionState> = std::iter::from_fn(|| rt.poll_event(instance).unwrap())
            .filter_map(|e| match e {
                RuntimeEvent::SessionStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![SessionState::Idle, SessionState::Ready]);
    }

    #[test]
    fn unknown_extension_rejected_at_instance_creation() {
        let mut rt = SimRuntime::default();
        let err = rt
            .create_instance(&ApplicationInfo::default(), &["XR_nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Other(_)));
        assert_eq!(rt.journal().lock().unwrap().instances_created, 0);
    }
}
