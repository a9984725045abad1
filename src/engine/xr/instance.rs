use crate::engine::graphics::GraphicsBinding;
use crate::engine::xr::SessionId;
use crate::engine::xr::extensions::{ExtensionProperties, ExtensionRegistry};
use crate::engine::xr::runtime::{
    ApplicationInfo, FormFactor, GraphicsRequirements, InstanceProperties, RawHandle,
    RuntimeError, SystemId, SystemProperties, ViewConfigurationType, ViewConfigurationView,
    XrRuntime,
};
use crate::engine::{EngineError, EngineResult};

/// The two-eye view configuration cached at instance creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoViews {
    pub views: [ViewConfigurationView; 2],
    pub fov_mutable: bool,
}

/// Connection to the XR runtime.
///
/// Built unconfigured by `Xr::make_instance`; extensions are registered on it, then
/// `Xr::create_instance` negotiates them and discovers the head-mounted system.
#[derive(Debug)]
pub struct Instance {
    app_info: ApplicationInfo,
    extensions: ExtensionRegistry,
    raw: RawHandle,
    destroyed: bool,
    properties: InstanceProperties,
    system: SystemId,
    system_properties: SystemProperties,
    graphics_requirements: Option<GraphicsRequirements>,
    stereo: StereoViews,
    gfx_binding: Option<GraphicsBinding>,
    pub(crate) session: Option<SessionId>,
}

impl Instance {
    pub fn new(app_info: ApplicationInfo) -> Self {
        Self {
            app_info,
            extensions: ExtensionRegistry::new(),
            raw: RawHandle::NULL,
            destroyed: false,
            properties: InstanceProperties::default(),
            system: SystemId::default(),
            system_properties: SystemProperties::default(),
            graphics_requirements: None,
            stereo: StereoViews::default(),
            gfx_binding: None,
            session: None,
        }
    }

    pub fn app_info(&self) -> &ApplicationInfo {
        &self.app_info
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }

    pub fn add_required_extension(&mut self, name: impl Into<String>, version: u32) {
        self.extensions.add_required(name, version);
    }

    pub fn add_desired_extension(&mut self, name: impl Into<String>, version: u32) {
        self.extensions.add_desired(name, version);
    }

    pub fn available_extensions(&self) -> &[ExtensionProperties] {
        self.extensions.available()
    }

    pub fn enabled_extensions(&self) -> &[ExtensionProperties] {
        self.extensions.enabled()
    }

    pub fn is_created(&self) -> bool {
        !self.raw.is_null() && !self.destroyed
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn properties(&self) -> &InstanceProperties {
        &self.properties
    }

    pub fn system(&self) -> SystemId {
        self.system
    }

    pub fn system_properties(&self) -> &SystemProperties {
        &self.system_properties
    }

    pub fn max_layer_count(&self) -> u32 {
        self.system_properties.graphics.max_layer_count
    }

    pub fn graphics_requirements(&self) -> Option<&GraphicsRequirements> {
        self.graphics_requirements.as_ref()
    }

    pub fn stereo_views(&self) -> &StereoViews {
        &self.stereo
    }

    /// Per-eye view configuration; `eye` is clamped to 0..=1.
    pub fn view_config_view(&self, eye: usize) -> &ViewConfigurationView {
        &self.stereo.views[eye.min(1)]
    }

    pub fn fov_mutable(&self) -> bool {
        self.stereo.fov_mutable
    }

    pub fn gfx_binding(&self) -> Option<&GraphicsBinding> {
        self.gfx_binding.as_ref()
    }

    pub fn set_gfx_binding(&mut self, display: usize, config: usize, context: usize) {
        self.gfx_binding = Some(GraphicsBinding {
            display,
            config,
            context,
        });
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Negotiate extensions, connect to the runtime and cache the system description.
    ///
    /// On failure after the runtime instance exists, that instance is destroyed again.
    pub(crate) fn create(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<()> {
        if self.is_created() {
            return Ok(());
        }

        let available = rt
            .enumerate_extensions()
            .map_err(|e| EngineError::RuntimeUnavailable(e.to_string()))?;
        let names = self.extensions.negotiate(available)?;

        let raw = rt
            .create_instance(&self.app_info, &names)
            .map_err(|e| EngineError::RuntimeUnavailable(e.to_string()))?;
        if raw.is_null() {
            return Err(EngineError::RuntimeUnavailable(
                "runtime returned a null instance".to_string(),
            ));
        }

        if let Err(err) = self.discover(rt, raw) {
            if let Err(e) = rt.destroy_instance(raw) {
                log::warn!("create_instance: releasing partial instance failed: {e}");
            }
            return Err(err);
        }

        self.raw = raw;
        self.destroyed = false;
        log::info!(
            "instance: {} {} on {} ({} extensions enabled)",
            self.app_info.application_name,
            self.properties.runtime_version,
            self.properties.runtime_name,
            self.extensions.enabled().len()
        );
        Ok(())
    }

    fn discover(&mut self, rt: &mut dyn XrRuntime, raw: RawHandle) -> EngineResult<()> {
        self.properties = rt
            .instance_properties(raw)
            .map_err(|e| EngineError::runtime("instance_properties", e))?;

        self.system = match rt.system(raw, FormFactor::HeadMountedDisplay) {
            Ok(Some(system)) => system,
            Ok(None) | Err(RuntimeError::FormFactorUnavailable) => {
                return Err(EngineError::NoSystemFound);
            }
            Err(e) => return Err(EngineError::runtime("get_system", e)),
        };

        self.system_properties = rt
            .system_properties(raw, self.system)
            .map_err(|e| EngineError::runtime("system_properties", e))?;
        log::info!(
            "system: {} (vendor {:#x}) max swapchain {}x{}, {} layers",
            self.system_properties.system_name,
            self.system_properties.vendor_id,
            self.system_properties.graphics.max_swapchain_image_width,
            self.system_properties.graphics.max_swapchain_image_height,
            self.system_properties.graphics.max_layer_count
        );

        self.graphics_requirements = match rt.graphics_requirements(raw, self.system) {
            Ok(req) => Some(req),
            Err(e) => {
                log::warn!("graphics_requirements: {e}");
                None
            }
        };

        let configs = rt
            .enumerate_view_configurations(raw, self.system)
            .map_err(|e| EngineError::runtime("enumerate_view_configurations", e))?;
        if !configs.contains(&ViewConfigurationType::PrimaryStereo) {
            return Err(EngineError::NoStereoViewConfiguration);
        }

        let props = rt
            .view_configuration_properties(raw, self.system, ViewConfigurationType::PrimaryStereo)
            .map_err(|e| EngineError::runtime("view_configuration_properties", e))?;
        let views = rt
            .enumerate_view_configuration_views(
                raw,
                self.system,
                ViewConfigurationType::PrimaryStereo,
            )
            .map_err(|e| EngineError::runtime("enumerate_view_configuration_views", e))?;
        let views: [ViewConfigurationView; 2] = views
            .try_into()
            .map_err(|_| EngineError::NoStereoViewConfiguration)?;

        self.stereo = StereoViews {
            views,
            fov_mutable: props.fov_mutable,
        };
        Ok(())
    }

    /// Idempotent.
    pub(crate) fn destroy(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<()> {
        if !self.is_created() {
            return Ok(());
        }
        rt.destroy_instance(self.raw)
            .map_err(|e| EngineError::runtime("destroy_instance", e))?;
        self.destroyed = true;
        Ok(())
    }
}
