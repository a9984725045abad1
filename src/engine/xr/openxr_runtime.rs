//! `XrRuntime` backed by the system OpenXR loader, using the OpenGL ES graphics binding.
//!
//! Typed `openxr` objects are kept in maps keyed by their raw handle value, which is what the
//! core sees. Dropping an entry destroys the runtime object.

use std::collections::HashMap;

use openxr as xr;

use crate::engine::graphics::{Fov, GraphicsBinding, NativeImage, Pose, Rect2Di};
use crate::engine::xr::composition::{CompositionLayer, CompositionView, SubImage};
use crate::engine::xr::extensions::ExtensionProperties;
use crate::engine::xr::layer::{EyeVisibility, LayerFlags};
use crate::engine::xr::runtime::{
    ApplicationInfo, Duration, EnvironmentBlendMode, FormFactor, FrameState,
    GraphicsRequirements, InstanceProperties, LoaderContext, RawHandle, RuntimeError,
    RuntimeEvent, RuntimeResult, SystemGraphicsProperties, SystemId, SystemProperties,
    SystemTrackingProperties, Time, Version, View, ViewConfigurationProperties,
    ViewConfigurationType, ViewConfigurationView, XrRuntime,
};
use crate::engine::xr::session::SessionState;
use crate::engine::xr::space::ReferenceSpaceKind;
use crate::engine::xr::swapchain::SwapchainCreateInfo;

type Gles = xr::OpenGlEs;

/// The crate does not report extension versions; every present extension is reported as v1.
const REPORTED_EXTENSION_VERSION: u32 = 1;

macro_rules! known_extensions {
    ($($field:ident => $name:literal),* $(,)?) => {
        fn extension_names(set: &xr::ExtensionSet) -> Vec<String> {
            let mut names = Vec::new();
            $(
                if set.$field {
                    names.push($name.to_string());
                }
            )*
            names.extend(set.other.iter().cloned());
            names
        }

        fn extension_set(names: &[String]) -> xr::ExtensionSet {
            let mut set = xr::ExtensionSet::default();
            for name in names {
                match name.as_str() {
                    $($name => set.$field = true,)*
                    other => set.other.push(other.to_string()),
                }
            }
            set
        }
    };
}

known_extensions! {
    khr_opengl_es_enable => "XR_KHR_opengl_es_enable",
    khr_composition_layer_cylinder => "XR_KHR_composition_layer_cylinder",
    khr_composition_layer_equirect => "XR_KHR_composition_layer_equirect",
    khr_composition_layer_cube => "XR_KHR_composition_layer_cube",
    ext_hand_tracking => "XR_EXT_hand_tracking",
    fb_display_refresh_rate => "XR_FB_display_refresh_rate",
}

fn map_err(err: xr::sys::Result) -> RuntimeError {
    match err {
        xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE => RuntimeError::FormFactorUnavailable,
        xr::sys::Result::ERROR_SESSION_NOT_RUNNING => RuntimeError::SessionNotRunning,
        xr::sys::Result::ERROR_SESSION_LOST => RuntimeError::SessionLost,
        xr::sys::Result::ERROR_CALL_ORDER_INVALID => RuntimeError::CallOrderInvalid,
        xr::sys::Result::ERROR_HANDLE_INVALID => RuntimeError::HandleInvalid,
        other => RuntimeError::Other(other.to_string()),
    }
}

fn version(v: xr::Version) -> Version {
    Version::new(v.major(), v.minor(), v.patch())
}

fn view_type(ty: ViewConfigurationType) -> xr::ViewConfigurationType {
    match ty {
        ViewConfigurationType::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
        ViewConfigurationType::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
    }
}

fn from_view_type(ty: xr::ViewConfigurationType) -> Option<ViewConfigurationType> {
    match ty {
        xr::ViewConfigurationType::PRIMARY_MONO => Some(ViewConfigurationType::PrimaryMono),
        xr::ViewConfigurationType::PRIMARY_STEREO => Some(ViewConfigurationType::PrimaryStereo),
        _ => None,
    }
}

fn reference_type(kind: ReferenceSpaceKind) -> xr::ReferenceSpaceType {
    match kind {
        ReferenceSpaceKind::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
        ReferenceSpaceKind::LocalFloor => xr::ReferenceSpaceType::LOCAL_FLOOR_EXT,
    }
}

fn from_reference_type(ty: xr::ReferenceSpaceType) -> Option<ReferenceSpaceKind> {
    match ty {
        xr::ReferenceSpaceType::VIEW => Some(ReferenceSpaceKind::View),
        xr::ReferenceSpaceType::LOCAL => Some(ReferenceSpaceKind::Local),
        xr::ReferenceSpaceType::STAGE => Some(ReferenceSpaceKind::Stage),
        xr::ReferenceSpaceType::LOCAL_FLOOR_EXT => Some(ReferenceSpaceKind::LocalFloor),
        _ => None,
    }
}

fn session_state(state: xr::SessionState) -> Option<SessionState> {
    Some(match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => return None,
    })
}

fn blend_mode(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

fn eye_visibility(eye: EyeVisibility) -> xr::EyeVisibility {
    match eye {
        EyeVisibility::Both => xr::EyeVisibility::BOTH,
        EyeVisibility::Left => xr::EyeVisibility::LEFT,
        EyeVisibility::Right => xr::EyeVisibility::RIGHT,
    }
}

fn layer_flags(flags: LayerFlags) -> xr::CompositionLayerFlags {
    xr::CompositionLayerFlags::from_raw(flags.bits())
}

fn quat(q: [f32; 4]) -> xr::Quaternionf {
    xr::Quaternionf {
        x: q[0],
        y: q[1],
        z: q[2],
        w: q[3],
    }
}

fn to_pose(pose: Pose) -> xr::Posef {
    xr::Posef {
        orientation: quat(pose.orientation),
        position: xr::Vector3f {
            x: pose.position[0],
            y: pose.position[1],
            z: pose.position[2],
        },
    }
}

fn from_pose(pose: xr::Posef) -> Pose {
    let o = pose.orientation;
    let p = pose.position;
    Pose::new([o.x, o.y, o.z, o.w], [p.x, p.y, p.z])
}

fn to_fov(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn from_fov(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn to_rect(rect: Rect2Di) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di {
            x: rect.offset[0],
            y: rect.offset[1],
        },
        extent: xr::Extent2Di {
            width: rect.extent.width,
            height: rect.extent.height,
        },
    }
}

fn space_of(spaces: &HashMap<RawHandle, xr::Space>, raw: RawHandle) -> RuntimeResult<&xr::Space> {
    spaces.get(&raw).ok_or(RuntimeError::HandleInvalid)
}

fn swapchain_of(
    swapchains: &HashMap<RawHandle, xr::Swapchain<Gles>>,
    raw: RawHandle,
) -> RuntimeResult<&xr::Swapchain<Gles>> {
    swapchains.get(&raw).ok_or(RuntimeError::HandleInvalid)
}

fn sub_image<'a>(
    image: &SubImage,
    swapchains: &'a HashMap<RawHandle, xr::Swapchain<Gles>>,
) -> RuntimeResult<xr::SwapchainSubImage<'a, Gles>> {
    Ok(xr::SwapchainSubImage::new()
        .swapchain(swapchain_of(swapchains, image.swapchain)?)
        .image_rect(to_rect(image.image_rect))
        .image_array_index(image.image_array_index))
}

fn projection_view<'a>(
    view: &CompositionView,
    swapchains: &'a HashMap<RawHandle, xr::Swapchain<Gles>>,
) -> RuntimeResult<xr::CompositionLayerProjectionView<'a, Gles>> {
    Ok(xr::CompositionLayerProjectionView::new()
        .pose(to_pose(view.pose))
        .fov(to_fov(view.fov))
        .sub_image(sub_image(&view.sub_image, swapchains)?))
}

struct InstanceEntry {
    instance: xr::Instance,
    events: xr::EventDataBuffer,
}

struct SessionEntry {
    session: xr::Session<Gles>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<Gles>,
}

/// Composition layers borrowing the spaces and swapchains they reference.
enum Built<'a> {
    Projection(xr::CompositionLayerProjection<'a, Gles>),
    Quad(xr::CompositionLayerQuad<'a, Gles>),
    Cylinder(xr::CompositionLayerCylinderKHR<'a, Gles>),
    Equirect(xr::CompositionLayerEquirectKHR<'a, Gles>),
    Cube(xr::CompositionLayerCubeKHR<'a, Gles>),
}

impl<'a> Built<'a> {
    fn base(&self) -> &xr::CompositionLayerBase<'a, Gles> {
        match self {
            Built::Projection(l) => l,
            Built::Quad(l) => l,
            Built::Cylinder(l) => l,
            Built::Equirect(l) => l,
            Built::Cube(l) => l,
        }
    }
}

#[derive(Default)]
pub struct OpenXrRuntime {
    entry: Option<xr::Entry>,
    instances: HashMap<RawHandle, InstanceEntry>,
    sessions: HashMap<RawHandle, SessionEntry>,
    spaces: HashMap<RawHandle, xr::Space>,
    swapchains: HashMap<RawHandle, xr::Swapchain<Gles>>,
}

impl OpenXrRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self) -> RuntimeResult<&xr::Entry> {
        self.entry
            .as_ref()
            .ok_or_else(|| RuntimeError::Unavailable("loader not initialized".to_string()))
    }

    fn instance(&self, raw: RawHandle) -> RuntimeResult<&xr::Instance> {
        self.instances
            .get(&raw)
            .map(|e| &e.instance)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn session(&self, raw: RawHandle) -> RuntimeResult<&SessionEntry> {
        self.sessions.get(&raw).ok_or(RuntimeError::HandleInvalid)
    }

    fn session_mut(&mut self, raw: RawHandle) -> RuntimeResult<&mut SessionEntry> {
        self.sessions
            .get_mut(&raw)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn swapchain_mut(&mut self, raw: RawHandle) -> RuntimeResult<&mut xr::Swapchain<Gles>> {
        self.swapchains
            .get_mut(&raw)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn system_id(system: SystemId) -> xr::SystemId {
        xr::SystemId::from_raw(system.0)
    }
}

fn convert_event(event: xr::Event<'_>) -> Option<RuntimeEvent> {
    match event {
        xr::Event::SessionStateChanged(e) => {
            session_state(e.state()).map(|state| RuntimeEvent::SessionStateChanged {
                session: RawHandle(e.session().into_raw()),
                state,
                time: Time(e.time().as_nanos()),
            })
        }
        xr::Event::InstanceLossPending(e) => Some(RuntimeEvent::InstanceLossPending {
            loss_time: Time(e.loss_time().as_nanos()),
        }),
        xr::Event::EventsLost(e) => Some(RuntimeEvent::EventsLost {
            count: e.lost_event_count(),
        }),
        xr::Event::ReferenceSpaceChangePending(e) => from_reference_type(e.reference_space_type())
            .map(|kind| RuntimeEvent::ReferenceSpaceChangePending {
                session: RawHandle(e.session().into_raw()),
                kind,
            }),
        _ => None,
    }
}

impl XrRuntime for OpenXrRuntime {
    fn name(&self) -> &str {
        "openxr"
    }

    fn init_loader(&mut self, _ctx: &LoaderContext) -> RuntimeResult<()> {
        // SAFETY: the loader library is trusted to be a conformant OpenXR loader.
        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        // The Android loader reads the VM and activity from ndk-context.
        #[cfg(target_os = "android")]
        entry.initialize_android_loader().map_err(map_err)?;
        self.entry = Some(entry);
        Ok(())
    }

    fn enumerate_extensions(&self) -> RuntimeResult<Vec<ExtensionProperties>> {
        let set = self.entry()?.enumerate_extensions().map_err(map_err)?;
        Ok(extension_names(&set)
            .into_iter()
            .map(|name| ExtensionProperties::new(name, REPORTED_EXTENSION_VERSION))
            .collect())
    }

    fn create_instance(
        &mut self,
        app: &ApplicationInfo,
        extensions: &[String],
    ) -> RuntimeResult<RawHandle> {
        let info = xr::ApplicationInfo {
            application_name: &app.application_name,
            application_version: app.application_version,
            engine_name: &app.engine_name,
            engine_version: app.engine_version,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = self
            .entry()?
            .create_instance(&info, &extension_set(extensions), &[])
            .map_err(map_err)?;
        let raw = RawHandle(instance.as_raw().into_raw());
        self.instances.insert(
            raw,
            InstanceEntry {
                instance,
                events: xr::EventDataBuffer::new(),
            },
        );
        Ok(raw)
    }

    fn destroy_instance(&mut self, instance: RawHandle) -> RuntimeResult<()> {
        self.instances
            .remove(&instance)
            .map(drop)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn instance_properties(&self, instance: RawHandle) -> RuntimeResult<InstanceProperties> {
        let props = self.instance(instance)?.properties().map_err(map_err)?;
        Ok(InstanceProperties {
            runtime_name: props.runtime_name,
            runtime_version: version(props.runtime_version),
        })
    }

    fn system(
        &self,
        instance: RawHandle,
        form_factor: FormFactor,
    ) -> RuntimeResult<Option<SystemId>> {
        let ff = match form_factor {
            FormFactor::HeadMountedDisplay => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
            FormFactor::HandheldDisplay => xr::FormFactor::HANDHELD_DISPLAY,
        };
        match self.instance(instance)?.system(ff) {
            Ok(system) => Ok(Some(SystemId(system.into_raw()))),
            Err(xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE) => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    fn system_properties(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<SystemProperties> {
        let props = self
            .instance(instance)?
            .system_properties(Self::system_id(system))
            .map_err(map_err)?;
        Ok(SystemProperties {
            system_id: system,
            vendor_id: props.vendor_id,
            system_name: props.system_name,
            graphics: SystemGraphicsProperties {
                max_swapchain_image_width: props.graphics_properties.max_swapchain_image_width,
                max_swapchain_image_height: props.graphics_properties.max_swapchain_image_height,
                max_layer_count: props.graphics_properties.max_layer_count,
            },
            tracking: SystemTrackingProperties {
                orientation_tracking: props.tracking_properties.orientation_tracking,
                position_tracking: props.tracking_properties.position_tracking,
            },
        })
    }

    fn graphics_requirements(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<GraphicsRequirements> {
        let req = self
            .instance(instance)?
            .graphics_requirements::<Gles>(Self::system_id(system))
            .map_err(map_err)?;
        Ok(GraphicsRequirements {
            min_api_version: version(req.min_api_version_supported),
            max_api_version: version(req.max_api_version_supported),
        })
    }

    fn enumerate_view_configurations(
        &self,
        instance: RawHandle,
        system: SystemId,
    ) -> RuntimeResult<Vec<ViewConfigurationType>> {
        let types = self
            .instance(instance)?
            .enumerate_view_configurations(Self::system_id(system))
            .map_err(map_err)?;
        Ok(types.into_iter().filter_map(from_view_type).collect())
    }

    fn view_configuration_properties(
        &self,
        instance: RawHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<ViewConfigurationProperties> {
        let props = self
            .instance(instance)?
            .view_configuration_properties(Self::system_id(system), view_type(ty))
            .map_err(map_err)?;
        Ok(ViewConfigurationProperties {
            view_configuration_type: ty,
            fov_mutable: props.fov_mutable,
        })
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: RawHandle,
        system: SystemId,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<Vec<ViewConfigurationView>> {
        let views = self
            .instance(instance)?
            .enumerate_view_configuration_views(Self::system_id(system), view_type(ty))
            .map_err(map_err)?;
        Ok(views
            .into_iter()
            .map(|v| ViewConfigurationView {
                recommended_image_rect_width: v.recommended_image_rect_width,
                max_image_rect_width: v.max_image_rect_width,
                recommended_image_rect_height: v.recommended_image_rect_height,
                max_image_rect_height: v.max_image_rect_height,
                recommended_swapchain_sample_count: v.recommended_swapchain_sample_count,
                max_swapchain_sample_count: v.max_swapchain_sample_count,
            })
            .collect())
    }

    fn create_session(
        &mut self,
        instance: RawHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RuntimeResult<RawHandle> {
        let info = xr::opengles::SessionCreateInfo::Android {
            display: binding.display as _,
            config: binding.config as _,
            context: binding.context as _,
        };
        // SAFETY: the binding names a live EGL display/config/context owned by the renderer.
        let (session, waiter, stream) = unsafe {
            self.instance(instance)?
                .create_session::<Gles>(Self::system_id(system), &info)
                .map_err(map_err)?
        };
        let raw = RawHandle(session.as_raw().into_raw());
        self.sessions.insert(
            raw,
            SessionEntry {
                session,
                waiter,
                stream,
            },
        );
        Ok(raw)
    }

    fn destroy_session(&mut self, session: RawHandle) -> RuntimeResult<()> {
        self.sessions
            .remove(&session)
            .map(drop)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn begin_session(
        &mut self,
        session: RawHandle,
        ty: ViewConfigurationType,
    ) -> RuntimeResult<()> {
        self.session(session)?
            .session
            .begin(view_type(ty))
            .map(drop)
            .map_err(map_err)
    }

    fn end_session(&mut self, session: RawHandle) -> RuntimeResult<()> {
        self.session(session)?
            .session
            .end()
            .map(drop)
            .map_err(map_err)
    }

    fn request_exit_session(&mut self, session: RawHandle) -> RuntimeResult<()> {
        self.session(session)?
            .session
            .request_exit()
            .map_err(map_err)
    }

    fn poll_event(&mut self, instance: RawHandle) -> RuntimeResult<Option<RuntimeEvent>> {
        let entry = self
            .instances
            .get_mut(&instance)
            .ok_or(RuntimeError::HandleInvalid)?;
        loop {
            match entry.instance.poll_event(&mut entry.events).map_err(map_err)? {
                None => return Ok(None),
                Some(event) => {
                    if let Some(event) = convert_event(event) {
                        return Ok(Some(event));
                    }
                }
            }
        }
    }

    fn enumerate_reference_spaces(
        &self,
        session: RawHandle,
    ) -> RuntimeResult<Vec<ReferenceSpaceKind>> {
        let types = self
            .session(session)?
            .session
            .enumerate_reference_spaces()
            .map_err(map_err)?;
        Ok(types.into_iter().filter_map(from_reference_type).collect())
    }

    fn create_reference_space(
        &mut self,
        session: RawHandle,
        kind: ReferenceSpaceKind,
        pose: Pose,
    ) -> RuntimeResult<RawHandle> {
        let space = self
            .session(session)?
            .session
            .create_reference_space(reference_type(kind), to_pose(pose))
            .map_err(map_err)?;
        let raw = RawHandle(space.as_raw().into_raw());
        self.spaces.insert(raw, space);
        Ok(raw)
    }

    fn destroy_space(&mut self, space: RawHandle) -> RuntimeResult<()> {
        self.spaces
            .remove(&space)
            .map(drop)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn locate_views(
        &mut self,
        session: RawHandle,
        ty: ViewConfigurationType,
        time: Time,
        space: RawHandle,
    ) -> RuntimeResult<Vec<View>> {
        let space = self.spaces.get(&space).ok_or(RuntimeError::HandleInvalid)?;
        let (_flags, views) = self
            .session(session)?
            .session
            .locate_views(view_type(ty), xr::Time::from_nanos(time.0), space)
            .map_err(map_err)?;
        Ok(views
            .into_iter()
            .map(|v| View {
                pose: from_pose(v.pose),
                fov: from_fov(v.fov),
            })
            .collect())
    }

    fn enumerate_swapchain_formats(&self, session: RawHandle) -> RuntimeResult<Vec<i64>> {
        let formats = self
            .session(session)?
            .session
            .enumerate_swapchain_formats()
            .map_err(map_err)?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn create_swapchain(
        &mut self,
        session: RawHandle,
        info: &SwapchainCreateInfo,
    ) -> RuntimeResult<RawHandle> {
        let format = u32::try_from(info.format)
            .map_err(|_| RuntimeError::Other(format!("format {:#x} out of range", info.format)))?;
        let create_info = xr::SwapchainCreateInfo::<Gles> {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::from_raw(info.usage.bits()),
            format,
            sample_count: info.sample_count,
            width: info.width,
            height: info.height,
            face_count: info.face_count,
            array_size: info.array_size,
            mip_count: info.mip_count,
        };
        let swapchain = self
            .session(session)?
            .session
            .create_swapchain(&create_info)
            .map_err(map_err)?;
        let raw = RawHandle(swapchain.as_raw().into_raw());
        self.swapchains.insert(raw, swapchain);
        Ok(raw)
    }

    fn destroy_swapchain(&mut self, swapchain: RawHandle) -> RuntimeResult<()> {
        self.swapchains
            .remove(&swapchain)
            .map(drop)
            .ok_or(RuntimeError::HandleInvalid)
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: RawHandle,
    ) -> RuntimeResult<Vec<NativeImage>> {
        let images = self
            .swapchains
            .get(&swapchain)
            .ok_or(RuntimeError::HandleInvalid)?
            .enumerate_images()
            .map_err(map_err)?;
        Ok(images.into_iter().map(NativeImage::from).collect())
    }

    fn acquire_swapchain_image(&mut self, swapchain: RawHandle) -> RuntimeResult<u32> {
        self.swapchain_mut(swapchain)?
            .acquire_image()
            .map_err(map_err)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: RawHandle,
        timeout: Duration,
    ) -> RuntimeResult<()> {
        self.swapchain_mut(swapchain)?
            .wait_image(xr::Duration::from_nanos(timeout.0))
            .map_err(map_err)
    }

    fn release_swapchain_image(&mut self, swapchain: RawHandle) -> RuntimeResult<()> {
        self.swapchain_mut(swapchain)?
            .release_image()
            .map_err(map_err)
    }

    fn wait_frame(&mut self, session: RawHandle) -> RuntimeResult<FrameState> {
        let state = self.session_mut(session)?.waiter.wait().map_err(map_err)?;
        Ok(FrameState {
            predicted_display_time: Time(state.predicted_display_time.as_nanos()),
            predicted_display_period: Duration(state.predicted_display_period.as_nanos()),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, session: RawHandle) -> RuntimeResult<()> {
        self.session_mut(session)?
            .stream
            .begin()
            .map_err(map_err)
    }

    fn end_frame(
        &mut self,
        session: RawHandle,
        display_time: Time,
        mode: EnvironmentBlendMode,
        layers: &[CompositionLayer],
    ) -> RuntimeResult<()> {
        let Self {
            sessions,
            spaces,
            swapchains,
            ..
        } = self;
        let entry = sessions
            .get_mut(&session)
            .ok_or(RuntimeError::HandleInvalid)?;
        let (spaces, swapchains) = (&*spaces, &*swapchains);

        // Projection views must outlive the layers that point at them.
        let mut projection_views = Vec::new();
        for layer in layers {
            if let CompositionLayer::Projection { views, .. } = layer {
                projection_views.push([
                    projection_view(&views[0], swapchains)?,
                    projection_view(&views[1], swapchains)?,
                ]);
            }
        }

        let mut projections = projection_views.iter();
        let mut built = Vec::with_capacity(layers.len());
        for layer in layers {
            let layer = match layer {
                CompositionLayer::Projection { flags, space, .. } => {
                    let views = projections.next().ok_or(RuntimeError::CallOrderInvalid)?;
                    Built::Projection(
                        xr::CompositionLayerProjection::new()
                            .layer_flags(layer_flags(*flags))
                            .space(space_of(spaces, *space)?)
                            .views(views),
                    )
                }
                CompositionLayer::Quad {
                    flags,
                    space,
                    eye_visibility: eye,
                    sub_image: image,
                    pose,
                    size,
                } => Built::Quad(
                    xr::CompositionLayerQuad::new()
                        .layer_flags(layer_flags(*flags))
                        .space(space_of(spaces, *space)?)
                        .eye_visibility(eye_visibility(*eye))
                        .sub_image(sub_image(image, swapchains)?)
                        .pose(to_pose(*pose))
                        .size(xr::Extent2Df {
                            width: size.width,
                            height: size.height,
                        }),
                ),
                CompositionLayer::Cylinder {
                    flags,
                    space,
                    eye_visibility: eye,
                    sub_image: image,
                    pose,
                    radius,
                    central_angle,
                    aspect_ratio,
                } => Built::Cylinder(
                    xr::CompositionLayerCylinderKHR::new()
                        .layer_flags(layer_flags(*flags))
                        .space(space_of(spaces, *space)?)
                        .eye_visibility(eye_visibility(*eye))
                        .sub_image(sub_image(image, swapchains)?)
                        .pose(to_pose(*pose))
                        .radius(*radius)
                        .central_angle(*central_angle)
                        .aspect_ratio(*aspect_ratio),
                ),
                CompositionLayer::Equirect {
                    flags,
                    space,
                    eye_visibility: eye,
                    sub_image: image,
                    pose,
                    radius,
                    scale,
                    bias,
                } => Built::Equirect(
                    xr::CompositionLayerEquirectKHR::new()
                        .layer_flags(layer_flags(*flags))
                        .space(space_of(spaces, *space)?)
                        .eye_visibility(eye_visibility(*eye))
                        .sub_image(sub_image(image, swapchains)?)
                        .pose(to_pose(*pose))
                        .radius(*radius)
                        .scale(xr::Vector2f {
                            x: scale[0],
                            y: scale[1],
                        })
                        .bias(xr::Vector2f {
                            x: bias[0],
                            y: bias[1],
                        }),
                ),
                CompositionLayer::Cube {
                    flags,
                    space,
                    eye_visibility: eye,
                    swapchain,
                    image_array_index,
                    orientation,
                } => Built::Cube(
                    xr::CompositionLayerCubeKHR::new()
                        .layer_flags(layer_flags(*flags))
                        .space(space_of(spaces, *space)?)
                        .eye_visibility(eye_visibility(*eye))
                        .swapchain(swapchain_of(swapchains, *swapchain)?)
                        .image_array_index(*image_array_index)
                        .orientation(quat(*orientation)),
                ),
            };
            built.push(layer);
        }

        let bases: Vec<&xr::CompositionLayerBase<'_, Gles>> =
            built.iter().map(Built::base).collect();
        entry
            .stream
            .end(
                xr::Time::from_nanos(display_time.0),
                blend_mode(mode),
                &bases,
            )
            .map_err(map_err)
    }
}
