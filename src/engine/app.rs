//! The application side of an XR session: one instance, one session, a local space and a
//! single swapchain the renderer draws into, presented as a quad spinning in front of the viewer.

use crate::engine::config::{Backend, XrConfig};
use crate::engine::graphics::{Pose, Renderer};
use crate::engine::xr::runtime::{LoaderContext, XrRuntime};
use crate::engine::xr::sim::SimRuntime;
use crate::engine::xr::{
    FrameStats, FrameTiming, InstanceId, Layer, ReferenceSpaceInfo, SessionId, SessionState,
    SpaceId, SwapchainCreateInfo, SwapchainId, Xr,
};
use crate::engine::{EngineError, EngineResult};

const WAITING_LOG_INTERVAL: u64 = 60;
/// Distance of the quad from the viewer, along -Z.
const QUAD_DISTANCE: f32 = 1.0;

/// Build the runtime selected by `config.backend`.
pub fn runtime_for(config: &XrConfig) -> EngineResult<Box<dyn XrRuntime>> {
    match config.backend {
        Backend::Sim => Ok(Box::new(SimRuntime::new(config.sim.clone()))),
        #[cfg(feature = "openxr")]
        Backend::Openxr => Ok(Box::new(
            crate::engine::xr::openxr_runtime::OpenXrRuntime::new(),
        )),
        #[cfg(not(feature = "openxr"))]
        Backend::Openxr => Err(EngineError::RuntimeUnavailable(
            "built without the `openxr` feature".to_string(),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Session not yet running; nothing was submitted.
    NotReady,
    Submitted,
}

pub struct XrApp<R: Renderer> {
    xr: Xr,
    renderer: R,
    instance: InstanceId,
    session: SessionId,
    local: SpaceId,
    swapchain: SwapchainId,
    not_ready_ticks: u64,
}

impl<R: Renderer> XrApp<R> {
    pub fn new(
        runtime: Box<dyn XrRuntime>,
        mut renderer: R,
        loader: LoaderContext,
        config: &XrConfig,
    ) -> EngineResult<Self> {
        let mut xr = Xr::from_boxed(runtime);
        xr.init_loader(loader.vm, loader.context)?;

        let instance = xr.make_instance(config.application_info())?;
        {
            let inst = xr.instance_mut(instance)?;
            for ext in &config.required_extensions {
                inst.add_required_extension(ext.name.clone(), ext.version);
            }
            for ext in &config.desired_extensions {
                inst.add_desired_extension(ext.name.clone(), ext.version);
            }
        }
        xr.create_instance(instance)?;

        let binding = renderer.graphics_binding();
        xr.set_gfx_binding(instance, binding.display, binding.config, binding.context)?;

        let session = xr.create_session(instance)?;
        xr.set_blend_mode(session, config.blend_mode)?;
        let local = xr.create_space(session, ReferenceSpaceInfo::new(config.reference_space))?;

        let [width, height] = config.swapchain_size.unwrap_or_else(|| {
            let view = xr.instance(instance).map(|i| *i.view_config_view(0));
            view.map(|v| {
                [
                    v.recommended_image_rect_width,
                    v.recommended_image_rect_height,
                ]
            })
            .unwrap_or([0, 0])
        });
        let info = SwapchainCreateInfo::new(width, height)
            .with_format(config.swapchain_format)
            .with_array_size(config.swapchain_array_size);
        let swapchain = xr.create_swapchain(session, &info)?;
        renderer.set_swapchain_images(width, height, xr.enumerate_images(swapchain)?);

        Ok(Self {
            xr,
            renderer,
            instance,
            session,
            local,
            swapchain,
            not_ready_ticks: 0,
        })
    }

    pub fn xr(&self) -> &Xr {
        &self.xr
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.xr.session(self.session).ok().map(|s| s.state())
    }

    pub fn is_exiting(&self) -> bool {
        self.session_state() == Some(SessionState::Exiting)
    }

    pub fn is_running(&self) -> bool {
        self.xr
            .session(self.session)
            .is_ok_and(|s| s.is_running())
    }

    pub fn stats(&self) -> FrameStats {
        self.xr
            .session(self.session)
            .map(|s| *s.stats())
            .unwrap_or_default()
    }

    pub fn poll_events(&mut self) -> EngineResult<Vec<SessionState>> {
        Ok(self
            .xr
            .poll_events(self.instance)?
            .into_iter()
            .map(|(_, state)| state)
            .collect())
    }

    pub fn request_exit(&mut self) -> EngineResult<()> {
        self.xr.request_exit(self.session)
    }

    /// Run one frame: render into the next swapchain image and present it as a quad.
    ///
    /// The frame is always ended once begun, even if rendering fails.
    pub fn frame(&mut self) -> EngineResult<FrameOutcome> {
        let timing = match self.xr.begin_frame(self.session) {
            Ok(timing) => timing,
            Err(EngineError::FrameNotReady) => {
                self.not_ready_ticks += 1;
                if self.not_ready_ticks % WAITING_LOG_INTERVAL == 0 {
                    log::info!(
                        "waiting for session to become synchronized ({} ticks)",
                        self.not_ready_ticks
                    );
                }
                return Ok(FrameOutcome::NotReady);
            }
            Err(e) => return Err(e),
        };

        let drawn = if timing.should_render {
            self.draw(timing)
        } else {
            Ok(())
        };
        let submitted = self.xr.end_frame(self.session);
        drawn?;
        submitted.map(|()| FrameOutcome::Submitted)
    }

    fn draw(&mut self, timing: FrameTiming) -> EngineResult<()> {
        let index = self.xr.acquire_and_wait_image(self.swapchain)?;
        let rendered = self.renderer.render(index);
        let released = self.xr.release_image(self.swapchain);
        rendered?;
        released?;

        let t = timing.predicted_display_time.as_secs_f64() as f32;
        let quad = Layer::quad(1.0, 1.0)
            .with_pose(Pose::from_axis_angle(
                [0.0, 0.0, 1.0],
                t,
                [0.0, 0.0, -QUAD_DISTANCE],
            ))
            .with_swapchain(self.swapchain)
            .with_space(self.local);
        self.xr.add_layer(self.session, quad)
    }

    /// Release everything in ownership order: swapchain, space, session, instance.
    pub fn shutdown(mut self) -> EngineResult<()> {
        log::info!("shutting down: {}", self.stats().summary());
        self.xr.destroy_swapchain(self.swapchain)?;
        self.xr.destroy_space(self.local)?;
        self.xr.destroy_session(self.session)?;
        self.xr.destroy_instance(self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graphics::HeadlessRenderer;
    use crate::engine::xr::composition::CompositionLayer;
    use crate::engine::xr::sim::{SimConfig, SimJournal};
    use std::sync::{Arc, Mutex};

    fn app_with(sim: SimConfig) -> (XrApp<HeadlessRenderer>, Arc<Mutex<SimJournal>>) {
        let rt = SimRuntime::new(sim);
        let journal = rt.journal();
        let app = XrApp::new(
            Box::new(rt),
            HeadlessRenderer::new(),
            LoaderContext::default(),
            &XrConfig::default(),
        )
        .unwrap();
        (app, journal)
    }

    #[test]
    fn renderer_receives_swapchain_images() {
        let (app, _) = app_with(SimConfig {
            recommended_width: 800,
            recommended_height: 600,
            chain_length: 2,
            ..SimConfig::default()
        });
        assert_eq!(app.renderer().target_size(), (800, 600));
        assert_eq!(app.renderer().images().len(), 2);
    }

    #[test]
    fn frame_waits_then_submits_spinning_quad() {
        let (mut app, journal) = app_with(SimConfig::default());

        assert_eq!(app.frame().unwrap(), FrameOutcome::NotReady);
        app.poll_events().unwrap();
        assert_eq!(app.frame().unwrap(), FrameOutcome::Submitted);
        assert_eq!(app.renderer().frames_rendered(), 1);

        let journal = journal.lock().unwrap();
        let submission = journal.last_submission().unwrap();
        match &submission.layers[0] {
            CompositionLayer::Quad { pose, .. } => {
                assert_eq!(pose.position, [0.0, 0.0, -QUAD_DISTANCE]);
            }
            other => panic!("expected a quad, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_releases_everything() {
        let (mut app, journal) = app_with(SimConfig::default());
        app.poll_events().unwrap();
        app.frame().unwrap();
        app.shutdown().unwrap();

        let journal = journal.lock().unwrap();
        assert_eq!(journal.swapchains_destroyed, 1);
        assert_eq!(journal.spaces_destroyed, 1);
        assert_eq!(journal.sessions_destroyed, 1);
        assert_eq!(journal.instances_destroyed, 1);
    }

    #[test]
    fn openxr_backend_needs_feature() {
        let config = XrConfig {
            backend: Backend::Openxr,
            ..XrConfig::default()
        };
        if cfg!(not(feature = "openxr")) {
            assert!(matches!(
                runtime_for(&config),
                Err(EngineError::RuntimeUnavailable(_))
            ));
        }
    }
}
