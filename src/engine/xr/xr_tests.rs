use std::sync::{Arc, Mutex};

use crate::engine::EngineError;
use crate::engine::graphics::Pose;
use crate::engine::xr::composition::CompositionLayer;
use crate::engine::xr::sim::{SimConfig, SimJournal, SimRuntime};
use crate::engine::xr::swapchain::FORMAT_RGBA8;
use crate::engine::xr::{
    ApplicationInfo, EnvironmentBlendMode, InstanceId, Layer, ProjectionView,
    ReferenceSpaceKind, SessionId, SessionState, SpaceId, Swapchain, SwapchainCreateInfo,
    SwapchainId, Xr,
};

struct Rig {
    xr: Xr,
    journal: Arc<Mutex<SimJournal>>,
    instance: InstanceId,
    session: SessionId,
}

fn instance_with(config: SimConfig) -> (Xr, Arc<Mutex<SimJournal>>, InstanceId) {
    let sim = SimRuntime::new(config);
    let journal = sim.journal();
    let mut xr = Xr::new(sim);
    xr.init_loader(0, 0).unwrap();
    let instance = xr.make_instance(ApplicationInfo::default()).unwrap();
    xr.instance_mut(instance)
        .unwrap()
        .add_required_extension("XR_KHR_opengl_es_enable", 1);
    xr.create_instance(instance).unwrap();
    xr.set_gfx_binding(instance, 1, 1, 1).unwrap();
    (xr, journal, instance)
}

fn rig_with(config: SimConfig) -> Rig {
    let (mut xr, journal, instance) = instance_with(config);
    let session = xr.create_session(instance).unwrap();
    Rig {
        xr,
        journal,
        instance,
        session,
    }
}

fn rig() -> Rig {
    rig_with(SimConfig::default())
}

impl Rig {
    fn poll(&mut self) -> Vec<SessionState> {
        self.xr
            .poll_events(self.instance)
            .unwrap()
            .into_iter()
            .map(|(_, state)| state)
            .collect()
    }

    fn local_space(&mut self) -> SpaceId {
        self.xr
            .create_refspace(self.session, ReferenceSpaceKind::Local, Pose::IDENTITY)
            .unwrap()
    }

    fn swapchain(&mut self, size: u32) -> SwapchainId {
        self.xr
            .create_swapchain(self.session, &SwapchainCreateInfo::new(size, size))
            .unwrap()
    }

    fn submissions(&self) -> usize {
        self.journal.lock().unwrap().submissions.len()
    }
}

#[test]
fn swapchain_reports_chain_length_and_images() {
    let mut r = rig();
    let sc = r.swapchain(1024);

    let swapchain = r.xr.swapchain(sc).unwrap();
    assert!(swapchain.chain_length() >= 1);
    assert_eq!(
        r.xr.enumerate_images(sc).unwrap().len(),
        swapchain.chain_length() as usize
    );
    assert_eq!((swapchain.width(), swapchain.height()), (1024, 1024));
}

#[test]
fn double_acquire_rejected_until_release() {
    let mut r = rig();
    let sc = r.swapchain(256);

    let first = r.xr.acquire_image(sc).unwrap();
    assert!(matches!(
        r.xr.acquire_image(sc),
        Err(EngineError::ChainExhausted(i)) if i == first
    ));

    r.xr.wait_image(sc).unwrap();
    r.xr.release_image(sc).unwrap();
    assert!(r.xr.acquire_image(sc).is_ok());
}

#[test]
fn release_requires_wait() {
    let mut r = rig();
    let sc = r.swapchain(256);

    assert!(matches!(
        r.xr.release_image(sc),
        Err(EngineError::ImageNotAcquired)
    ));
    r.xr.acquire_image(sc).unwrap();
    assert!(matches!(
        r.xr.release_image(sc),
        Err(EngineError::ImageNotWaited)
    ));
    r.xr.wait_image(sc).unwrap();
    r.xr.release_image(sc).unwrap();

    let index = r.xr.acquire_and_wait_image(sc).unwrap();
    assert_eq!(r.xr.swapchain(sc).unwrap().acquired_index(), Some(index));
    r.xr.release_image(sc).unwrap();
}

#[test]
fn fresh_session_is_not_ready() {
    let mut r = rig();

    let err = r.xr.begin_frame(r.session).unwrap_err();
    assert!(matches!(err, EngineError::FrameNotReady));
    assert!(err.is_transient());
    assert_eq!(r.xr.session(r.session).unwrap().state(), SessionState::Idle);
}

#[test]
fn poll_events_begins_session_on_ready() {
    let mut r = rig();

    assert_eq!(r.poll(), vec![SessionState::Idle, SessionState::Ready]);
    let session = r.xr.session(r.session).unwrap();
    assert!(session.is_running());
    assert_eq!(r.journal.lock().unwrap().sessions_begun, 1);

    let timing = r.xr.begin_frame(r.session).unwrap();
    assert_eq!(timing.frame_index, 0);
    assert_eq!(
        r.xr.predicted_display_time(r.session).unwrap(),
        Some(timing.predicted_display_time)
    );
}

#[test]
fn quad_is_submitted_and_list_cleared() {
    let mut r = rig();
    let space = r.local_space();
    let sc = r.swapchain(1024);
    r.poll();

    r.xr.begin_frame(r.session).unwrap();
    let quad = Layer::quad(1.0, 1.0)
        .with_space(space)
        .with_pose(Pose::IDENTITY)
        .with_swapchain(sc);
    r.xr.add_layer(r.session, quad).unwrap();
    assert_eq!(r.xr.pending_layers(r.session).unwrap().len(), 1);

    r.xr.end_frame(r.session).unwrap();
    assert!(r.xr.pending_layers(r.session).unwrap().is_empty());

    let journal = r.journal.lock().unwrap();
    let submission = journal.last_submission().unwrap();
    assert!(submission.accepted);
    assert_eq!(submission.layers.len(), 1);
    match &submission.layers[0] {
        CompositionLayer::Quad {
            size, sub_image, ..
        } => {
            assert_eq!((size.width, size.height), (1.0, 1.0));
            assert_eq!(sub_image.image_rect.extent.width, 1024);
        }
        other => panic!("expected a quad, got {other:?}"),
    }
}

#[test]
fn failed_submission_still_closes_frame() {
    let mut r = rig_with(SimConfig {
        fail_submissions: true,
        ..SimConfig::default()
    });
    let space = r.local_space();
    let sc = r.swapchain(64);
    r.poll();

    r.xr.begin_frame(r.session).unwrap();
    r.xr.add_layer(
        r.session,
        Layer::quad(1.0, 1.0).with_space(space).with_swapchain(sc),
    )
    .unwrap();

    let err = r.xr.end_frame(r.session).unwrap_err();
    assert!(matches!(err, EngineError::SubmissionFailed(_)));
    assert!(r.xr.pending_layers(r.session).unwrap().is_empty());
    assert!(!r.xr.session(r.session).unwrap().in_frame());
    assert_eq!(r.xr.session(r.session).unwrap().stats().failed, 1);

    // Not retried: the next frame opens normally.
    assert!(r.xr.begin_frame(r.session).is_ok());
}

#[test]
fn layers_submitted_in_caller_order() {
    let mut r = rig();
    let space = r.local_space();
    let left = r.swapchain(512);
    let right = r.swapchain(512);
    r.poll();

    let timing = r.xr.begin_frame(r.session).unwrap();
    let views = r
        .xr
        .locate_views(r.session, space, timing.predicted_display_time)
        .unwrap();
    let projection = Layer::projection(views.map(|v| ProjectionView {
        pose: v.pose,
        fov: v.fov,
    }))
    .with_space(space)
    .with_stereo_swapchains(left, right);

    r.xr.add_layer(r.session, projection).unwrap();
    r.xr.add_layer(
        r.session,
        Layer::quad(0.5, 0.5).with_space(space).with_swapchain(left),
    )
    .unwrap();
    r.xr.end_frame(r.session).unwrap();

    let journal = r.journal.lock().unwrap();
    let layers = &journal.last_submission().unwrap().layers;
    assert!(matches!(layers[0], CompositionLayer::Projection { .. }));
    assert!(matches!(layers[1], CompositionLayer::Quad { .. }));
}

#[test]
fn projection_with_one_array_swapchain_uses_a_slice_per_eye() {
    let mut r = rig();
    let space = r.local_space();
    let sc = r
        .xr
        .create_swapchain(
            r.session,
            &SwapchainCreateInfo::new(512, 512).with_array_size(2),
        )
        .unwrap();
    r.poll();

    r.xr.begin_frame(r.session).unwrap();
    r.xr.add_layer(
        r.session,
        Layer::projection(Default::default())
            .with_space(space)
            .with_swapchain(sc),
    )
    .unwrap();
    r.xr.end_frame(r.session).unwrap();

    let journal = r.journal.lock().unwrap();
    match &journal.last_submission().unwrap().layers[0] {
        CompositionLayer::Projection { views, .. } => {
            assert_eq!(views[0].sub_image.swapchain, views[1].sub_image.swapchain);
            assert_eq!(views[0].sub_image.image_array_index, 0);
            assert_eq!(views[1].sub_image.image_array_index, 1);
        }
        other => panic!("expected a projection, got {other:?}"),
    }
}

#[test]
fn layer_with_stale_space_fails_submission() {
    let mut r = rig();
    let space = r.local_space();
    let sc = r.swapchain(64);
    r.poll();
    r.xr.destroy_space(space).unwrap();

    r.xr.begin_frame(r.session).unwrap();
    r.xr.add_layer(
        r.session,
        Layer::quad(1.0, 1.0).with_space(space).with_swapchain(sc),
    )
    .unwrap();
    assert!(matches!(
        r.xr.end_frame(r.session),
        Err(EngineError::SubmissionFailed(_))
    ));

    // The runtime frame was still closed with an empty submission.
    let journal = r.journal.lock().unwrap();
    assert!(journal.last_submission().unwrap().layers.is_empty());
}

#[test]
fn too_many_layers_rejected() {
    let mut r = rig_with(SimConfig {
        max_layer_count: 1,
        ..SimConfig::default()
    });
    let space = r.local_space();
    let sc = r.swapchain(64);
    r.poll();

    r.xr.begin_frame(r.session).unwrap();
    for _ in 0..2 {
        r.xr.add_layer(
            r.session,
            Layer::quad(1.0, 1.0).with_space(space).with_swapchain(sc),
        )
        .unwrap();
    }
    let err = r.xr.end_frame(r.session).unwrap_err();
    assert!(matches!(err, EngineError::TooManyLayers { layers: 2, max: 1 }));
    assert!(r.xr.pending_layers(r.session).unwrap().is_empty());
}

#[test]
fn add_layer_outside_frame_is_usage_error() {
    let mut r = rig();
    assert!(matches!(
        r.xr.add_layer(r.session, Layer::quad(1.0, 1.0)),
        Err(EngineError::FrameNotBegun)
    ));
    assert!(matches!(
        r.xr.end_frame(r.session),
        Err(EngineError::FrameNotBegun)
    ));
    assert_eq!(r.submissions(), 0);
}

#[test]
fn state_progresses_with_submitted_frames() {
    let mut r = rig();
    r.poll();

    let mut seen = Vec::new();
    for _ in 0..3 {
        r.xr.begin_frame(r.session).unwrap();
        r.xr.end_frame(r.session).unwrap();
        seen.extend(r.poll());
    }
    assert_eq!(
        seen,
        vec![
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused
        ]
    );
}

#[test]
fn exit_request_ends_session_and_exiting_absorbs() {
    let mut r = rig();
    r.poll();

    r.xr.request_exit(r.session).unwrap();
    assert_eq!(
        r.poll(),
        vec![
            SessionState::Stopping,
            SessionState::Idle,
            SessionState::Exiting
        ]
    );
    let session = r.xr.session(r.session).unwrap();
    assert!(session.is_exiting());
    assert!(!session.is_running());
    assert_eq!(r.journal.lock().unwrap().sessions_ended, 1);

    assert!(matches!(
        r.xr.begin_frame(r.session),
        Err(EngineError::SessionExiting)
    ));
}

#[test]
fn destroy_session_with_live_swapchain_rejected() {
    let mut r = rig();
    let sc = r.swapchain(128);

    assert!(matches!(
        r.xr.destroy_session(r.session),
        Err(EngineError::OwnershipViolation(_))
    ));

    r.xr.destroy_swapchain(sc).unwrap();
    r.xr.destroy_session(r.session).unwrap();
    assert!(r.xr.session(r.session).is_err());
}

#[test]
fn teardown_follows_ownership_order() {
    let mut r = rig();
    let space = r.local_space();
    let sc = r.swapchain(128);

    assert!(matches!(
        r.xr.destroy_instance(r.instance),
        Err(EngineError::OwnershipViolation(_))
    ));
    assert!(matches!(
        r.xr.destroy_session(r.session),
        Err(EngineError::OwnershipViolation(_))
    ));

    r.xr.destroy_swapchain(sc).unwrap();
    r.xr.destroy_space(space).unwrap();
    r.xr.destroy_session(r.session).unwrap();
    r.xr.destroy_instance(r.instance).unwrap();
    // Stale id: nothing left to release.
    r.xr.destroy_instance(r.instance).unwrap();

    let journal = r.journal.lock().unwrap();
    assert_eq!(journal.instances_destroyed, 1);
    assert_eq!(journal.sessions_destroyed, 1);
    assert_eq!(journal.spaces_destroyed, 1);
    assert_eq!(journal.swapchains_destroyed, 1);
}

#[test]
fn loader_initialized_exactly_once() {
    let mut xr = Xr::new(SimRuntime::default());
    assert!(matches!(
        xr.make_instance(ApplicationInfo::default()),
        Err(EngineError::LoaderNotInitialized)
    ));

    xr.init_loader(0, 0).unwrap();
    assert!(matches!(
        xr.init_loader(0, 0),
        Err(EngineError::LoaderAlreadyInitialized)
    ));
    assert!(xr.make_instance(ApplicationInfo::default()).is_ok());
}

#[test]
fn unsupported_reference_space_rejected() {
    let mut r = rig_with(SimConfig {
        reference_spaces: vec![ReferenceSpaceKind::View, ReferenceSpaceKind::Local],
        ..SimConfig::default()
    });

    assert!(matches!(
        r.xr
            .create_refspace(r.session, ReferenceSpaceKind::Stage, Pose::IDENTITY),
        Err(EngineError::UnsupportedReferenceSpace(kind)) if kind == "stage"
    ));
    assert!(
        r.xr
            .create_refspace(r.session, ReferenceSpaceKind::View, Pose::IDENTITY)
            .is_ok()
    );
}

#[test]
fn session_requires_graphics_binding() {
    let sim = SimRuntime::default();
    let mut xr = Xr::new(sim);
    xr.init_loader(0, 0).unwrap();
    let instance = xr.make_instance(ApplicationInfo::default()).unwrap();

    assert!(matches!(
        xr.create_session(instance),
        Err(EngineError::InstanceNotCreated)
    ));
    xr.create_instance(instance).unwrap();
    assert!(matches!(
        xr.create_session(instance),
        Err(EngineError::GraphicsBindingMissing)
    ));

    xr.set_gfx_binding(instance, 1, 1, 1).unwrap();
    let session = xr.create_session(instance).unwrap();
    assert_eq!(xr.session_instance(session).unwrap(), instance);
    assert!(matches!(
        xr.create_session(instance),
        Err(EngineError::SessionAlreadyExists)
    ));
}

#[test]
fn missing_required_extension_fails_instance_creation() {
    let mut xr = Xr::new(SimRuntime::default());
    xr.init_loader(0, 0).unwrap();
    let instance = xr.make_instance(ApplicationInfo::default()).unwrap();
    {
        let inst = xr.instance_mut(instance).unwrap();
        inst.add_required_extension("XR_KHR_vulkan_enable2", 1);
        inst.add_desired_extension("XR_KHR_composition_layer_cylinder", 1);
    }

    assert!(matches!(
        xr.create_instance(instance),
        Err(EngineError::MissingRequiredCapability(_))
    ));
    let inst = xr.instance(instance).unwrap();
    assert!(!inst.is_created());
    assert!(inst.enabled_extensions().is_empty());
}

#[test]
fn no_hmd_means_no_system() {
    let sim = SimRuntime::new(SimConfig {
        has_hmd: false,
        ..SimConfig::default()
    });
    let journal = sim.journal();
    let mut xr = Xr::new(sim);
    xr.init_loader(0, 0).unwrap();
    let instance = xr.make_instance(ApplicationInfo::default()).unwrap();

    assert!(matches!(
        xr.create_instance(instance),
        Err(EngineError::NoSystemFound)
    ));
    // The runtime instance allocated along the way was released.
    let journal = journal.lock().unwrap();
    assert_eq!(journal.instances_created, 1);
    assert_eq!(journal.instances_destroyed, 1);
}

#[test]
fn mono_only_system_rejected() {
    let mut xr = Xr::new(SimRuntime::new(SimConfig {
        stereo: false,
        ..SimConfig::default()
    }));
    xr.init_loader(0, 0).unwrap();
    let instance = xr.make_instance(ApplicationInfo::default()).unwrap();
    assert!(matches!(
        xr.create_instance(instance),
        Err(EngineError::NoStereoViewConfiguration)
    ));
}

#[test]
fn instance_caches_system_description() {
    let (xr, _journal, instance) = instance_with(SimConfig {
        recommended_width: 1440,
        recommended_height: 1584,
        ..SimConfig::default()
    });
    let inst = xr.instance(instance).unwrap();

    assert_eq!(inst.view_config_view(0).recommended_image_rect_width, 1440);
    assert_eq!(inst.view_config_view(1).recommended_image_rect_height, 1584);
    // Out-of-range eye clamps to the right eye.
    assert_eq!(inst.view_config_view(7), inst.view_config_view(1));
    assert!(inst.fov_mutable());
    assert_eq!(inst.max_layer_count(), 16);
    assert!(inst.graphics_requirements().is_some());
    assert!(inst.extensions().is_enabled("XR_KHR_opengl_es_enable"));
}

#[test]
fn swapchain_format_must_be_advertised() {
    let mut r = rig_with(SimConfig {
        swapchain_formats: vec![FORMAT_RGBA8],
        ..SimConfig::default()
    });

    let srgb = SwapchainCreateInfo::new(256, 256);
    assert!(matches!(
        r.xr.create_swapchain(r.session, &srgb),
        Err(EngineError::UnsupportedSwapchainFormat(f)) if f == srgb.format
    ));
    assert_eq!(r.journal.lock().unwrap().swapchains_created, 0);

    let sc = r
        .xr
        .create_swapchain(r.session, &srgb.with_format(FORMAT_RGBA8))
        .unwrap();
    assert_eq!(r.xr.swapchain(sc).unwrap().format(), FORMAT_RGBA8);
    assert_eq!(r.journal.lock().unwrap().swapchains_created, 1);
}

#[test]
fn every_layer_variant_in_one_submission() {
    let mut r = rig();
    let space = r.local_space();
    let sc = r.swapchain(256);
    r.poll();

    let turned = Pose::from_axis_angle([0.0, 1.0, 0.0], std::f32::consts::FRAC_PI_2, [0.0; 3]);
    r.xr.begin_frame(r.session).unwrap();
    for layer in [
        Layer::cube().with_pose(turned),
        Layer::cylinder(2.0, 1.5, 1.0),
        Layer::equirect(10.0),
        Layer::quad(1.0, 1.0),
        Layer::projection(Default::default()),
    ] {
        r.xr.add_layer(r.session, layer.with_space(space).with_swapchain(sc))
            .unwrap();
    }
    r.xr.end_frame(r.session).unwrap();

    let journal = r.journal.lock().unwrap();
    let submission = journal.last_submission().unwrap();
    assert!(submission.accepted);
    match submission.layers.as_slice() {
        [
            CompositionLayer::Cube { orientation, .. },
            CompositionLayer::Cylinder {
                radius,
                central_angle,
                ..
            },
            CompositionLayer::Equirect {
                radius: sphere,
                scale,
                bias,
                ..
            },
            CompositionLayer::Quad { .. },
            CompositionLayer::Projection { .. },
        ] => {
            assert_eq!(*orientation, turned.orientation);
            assert_eq!((*radius, *central_angle), (2.0, 1.5));
            assert_eq!(*sphere, 10.0);
            assert_eq!((*scale, *bias), ([1.0, 1.0], [0.0, 0.0]));
        }
        other => panic!("unexpected layer list {other:?}"),
    }
}

#[test]
fn out_of_range_image_is_handed_back() {
    let mut r = rig();
    let sc = r.swapchain(64);
    let (raw, info) = {
        let swapchain = r.xr.swapchain(sc).unwrap();
        (swapchain.raw(), *swapchain.create_info())
    };
    // The runtime keeps three images; track only the first.
    let first = r.xr.enumerate_images(sc).unwrap()[0];
    r.xr.swapchains[sc] = Swapchain::new(r.session, raw, info, vec![first]);

    assert_eq!(r.xr.acquire_and_wait_image(sc).unwrap(), 0);
    r.xr.release_image(sc).unwrap();

    assert!(matches!(
        r.xr.acquire_image(sc),
        Err(EngineError::InvalidHandle(_))
    ));
    assert_eq!(r.xr.swapchain(sc).unwrap().acquired_index(), None);
    // Nothing is left acquired on the runtime side.
    assert_eq!(r.xr.runtime.acquire_swapchain_image(raw), Ok(2));
}

#[test]
fn rejected_instance_destroy_keeps_the_instance() {
    let (mut xr, journal, instance) = instance_with(SimConfig {
        rejected_instance_destroys: 1,
        ..SimConfig::default()
    });

    assert!(matches!(
        xr.destroy_instance(instance),
        Err(EngineError::Runtime {
            op: "destroy_instance",
            ..
        })
    ));
    assert!(xr.instance(instance).unwrap().is_created());
    assert_eq!(journal.lock().unwrap().instances_destroyed, 0);

    xr.destroy_instance(instance).unwrap();
    assert!(xr.instance(instance).is_err());
    assert_eq!(journal.lock().unwrap().instances_destroyed, 1);
}

#[test]
fn blend_mode_reaches_the_compositor() {
    let mut r = rig();
    r.poll();

    r.xr.set_blend_mode(r.session, EnvironmentBlendMode::Additive)
        .unwrap();
    r.xr.begin_frame(r.session).unwrap();
    r.xr.end_frame(r.session).unwrap();
    assert_eq!(
        r.journal.lock().unwrap().last_submission().unwrap().blend_mode,
        EnvironmentBlendMode::Additive
    );

    r.xr.destroy_session(r.session).unwrap();
    assert!(matches!(
        r.xr.set_blend_mode(r.session, EnvironmentBlendMode::Opaque),
        Err(EngineError::InvalidHandle("session"))
    ));
}
