//! Serialization of per-frame `Layer`s into the flat submission list handed to the runtime.
//!
//! Handles are resolved to raw runtime handles here, so the runtime side only ever sees
//! plain values in caller order.

use slotmap::SlotMap;

use crate::engine::graphics::{Extent2Df, Fov, Pose, Rect2Di};
use crate::engine::xr::layer::{EyeVisibility, Layer, LayerFlags, LayerKind};
use crate::engine::xr::runtime::RawHandle;
use crate::engine::xr::space::Space;
use crate::engine::xr::swapchain::Swapchain;
use crate::engine::xr::{SessionId, SpaceId, SwapchainId};
use crate::engine::{EngineError, EngineResult};

/// Region of one swapchain image a layer samples from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubImage {
    pub swapchain: RawHandle,
    pub image_rect: Rect2Di,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionView {
    pub pose: Pose,
    pub fov: Fov,
    pub sub_image: SubImage,
}

/// Wire form of a composition layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositionLayer {
    Projection {
        flags: LayerFlags,
        space: RawHandle,
        views: [CompositionView; 2],
    },
    Quad {
        flags: LayerFlags,
        space: RawHandle,
        eye_visibility: EyeVisibility,
        sub_image: SubImage,
        pose: Pose,
        size: Extent2Df,
    },
    Cylinder {
        flags: LayerFlags,
        space: RawHandle,
        eye_visibility: EyeVisibility,
        sub_image: SubImage,
        pose: Pose,
        radius: f32,
        central_angle: f32,
        aspect_ratio: f32,
    },
    Equirect {
        flags: LayerFlags,
        space: RawHandle,
        eye_visibility: EyeVisibility,
        sub_image: SubImage,
        pose: Pose,
        radius: f32,
        scale: [f32; 2],
        bias: [f32; 2],
    },
    Cube {
        flags: LayerFlags,
        space: RawHandle,
        eye_visibility: EyeVisibility,
        swapchain: RawHandle,
        image_array_index: u32,
        orientation: [f32; 4],
    },
}

impl CompositionLayer {
    pub fn space(&self) -> RawHandle {
        match self {
            CompositionLayer::Projection { space, .. }
            | CompositionLayer::Quad { space, .. }
            | CompositionLayer::Cylinder { space, .. }
            | CompositionLayer::Equirect { space, .. }
            | CompositionLayer::Cube { space, .. } => *space,
        }
    }

    /// Every swapchain this layer samples.
    pub fn swapchains(&self) -> Vec<RawHandle> {
        match self {
            CompositionLayer::Projection { views, .. } => {
                views.iter().map(|v| v.sub_image.swapchain).collect()
            }
            CompositionLayer::Quad { sub_image, .. }
            | CompositionLayer::Cylinder { sub_image, .. }
            | CompositionLayer::Equirect { sub_image, .. } => vec![sub_image.swapchain],
            CompositionLayer::Cube { swapchain, .. } => vec![*swapchain],
        }
    }
}

/// Serialize `layers` in order. Every space and swapchain must be alive and owned by `session`.
pub(crate) fn encode_layers(
    layers: &[Layer],
    session: SessionId,
    spaces: &SlotMap<SpaceId, Space>,
    swapchains: &SlotMap<SwapchainId, Swapchain>,
) -> EngineResult<Vec<CompositionLayer>> {
    layers
        .iter()
        .map(|layer| encode_layer(layer, session, spaces, swapchains))
        .collect()
}

fn encode_layer(
    layer: &Layer,
    session: SessionId,
    spaces: &SlotMap<SpaceId, Space>,
    swapchains: &SlotMap<SwapchainId, Swapchain>,
) -> EngineResult<CompositionLayer> {
    let space = layer
        .space
        .and_then(|id| spaces.get(id))
        .filter(|s| s.session() == session)
        .ok_or(EngineError::InvalidHandle("layer space"))?
        .raw();

    let primary = resolve_swapchain(layer.swapchains[0], session, swapchains)?;
    let flags = layer.flags;
    let eye_visibility = layer.eye_visibility;
    let pose = layer.pose;

    let out = match &layer.kind {
        LayerKind::Projection { views } => {
            // Without a second swapchain both eyes share the first: one array slice per eye
            // when it has them, otherwise the same image.
            let (right, right_index) = match layer.swapchains[1] {
                Some(id) => (resolve_swapchain(Some(id), session, swapchains)?, 0),
                None if primary.array_size() >= 2 => (primary, 1),
                None => (primary, 0),
            };
            CompositionLayer::Projection {
                flags,
                space,
                views: [
                    CompositionView {
                        pose: views[0].pose,
                        fov: views[0].fov,
                        sub_image: full_image(primary, 0),
                    },
                    CompositionView {
                        pose: views[1].pose,
                        fov: views[1].fov,
                        sub_image: full_image(right, right_index),
                    },
                ],
            }
        }
        LayerKind::Quad { width, height } => CompositionLayer::Quad {
            flags,
            space,
            eye_visibility,
            sub_image: full_image(primary, 0),
            pose,
            size: Extent2Df {
                width: *width,
                height: *height,
            },
        },
        LayerKind::Cylinder {
            radius,
            central_angle,
            aspect_ratio,
        } => CompositionLayer::Cylinder {
            flags,
            space,
            eye_visibility,
            sub_image: full_image(primary, 0),
            pose,
            radius: *radius,
            central_angle: *central_angle,
            aspect_ratio: *aspect_ratio,
        },
        LayerKind::Equirect {
            radius,
            scale,
            bias,
        } => CompositionLayer::Equirect {
            flags,
            space,
            eye_visibility,
            sub_image: full_image(primary, 0),
            pose,
            radius: *radius,
            scale: *scale,
            bias: *bias,
        },
        LayerKind::Cube => CompositionLayer::Cube {
            flags,
            space,
            eye_visibility,
            swapchain: primary.raw(),
            image_array_index: 0,
            orientation: pose.orientation,
        },
    };
    Ok(out)
}

fn resolve_swapchain(
    id: Option<SwapchainId>,
    session: SessionId,
    swapchains: &SlotMap<SwapchainId, Swapchain>,
) -> EngineResult<&Swapchain> {
    id.and_then(|id| swapchains.get(id))
        .filter(|sc| sc.session() == session)
        .ok_or(EngineError::InvalidHandle("layer swapchain"))
}

fn full_image(swapchain: &Swapchain, image_array_index: u32) -> SubImage {
    SubImage {
        swapchain: swapchain.raw(),
        image_rect: Rect2Di::from_extent(swapchain.extent()),
        image_array_index,
    }
}
