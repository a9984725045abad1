//! Per-frame composition layer descriptions.
//!
//! A `Layer` names the space and swapchain(s) it draws from by handle only; it never keeps
//! them alive. Layers are built fresh each frame, handed to `Xr::add_layer`, and consumed by
//! the next `Xr::end_frame`.

use crate::engine::graphics::{Fov, Pose};
use crate::engine::xr::{SpaceId, SwapchainId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    Projection,
    Quad,
    Cylinder,
    Equirect,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EyeVisibility {
    #[default]
    Both,
    Left,
    Right,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LayerFlags: u64 {
        const CORRECT_CHROMATIC_ABERRATION = 0x0000_0001;
        const BLEND_TEXTURE_SOURCE_ALPHA = 0x0000_0002;
        const UNPREMULTIPLIED_ALPHA = 0x0000_0004;
    }
}

/// One eye of a projection layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
}

/// Variant-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Projection {
        views: [ProjectionView; 2],
    },
    /// Flat rectangle, size in meters.
    Quad {
        width: f32,
        height: f32,
    },
    Cylinder {
        radius: f32,
        central_angle: f32,
        aspect_ratio: f32,
    },
    Equirect {
        radius: f32,
        scale: [f32; 2],
        bias: [f32; 2],
    },
    /// Cube map; orientation is taken from the layer pose.
    Cube,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub kind: LayerKind,
    pub space: Option<SpaceId>,
    pub pose: Pose,
    /// Slot 1 is only used by stereo projection layers.
    pub swapchains: [Option<SwapchainId>; 2],
    pub eye_visibility: EyeVisibility,
    pub flags: LayerFlags,
}

impl Layer {
    pub fn new(kind: LayerKind) -> Self {
        Self {
            kind,
            space: None,
            pose: Pose::IDENTITY,
            swapchains: [None, None],
            eye_visibility: EyeVisibility::Both,
            flags: LayerFlags::empty(),
        }
    }

    pub fn projection(views: [ProjectionView; 2]) -> Self {
        Self::new(LayerKind::Projection { views })
    }

    pub fn quad(width: f32, height: f32) -> Self {
        Self::new(LayerKind::Quad { width, height })
    }

    pub fn cylinder(radius: f32, central_angle: f32, aspect_ratio: f32) -> Self {
        Self::new(LayerKind::Cylinder {
            radius,
            central_angle,
            aspect_ratio,
        })
    }

    pub fn equirect(radius: f32) -> Self {
        Self::new(LayerKind::Equirect {
            radius,
            scale: [1.0, 1.0],
            bias: [0.0, 0.0],
        })
    }

    pub fn cube() -> Self {
        Self::new(LayerKind::Cube)
    }

    pub fn layer_type(&self) -> LayerType {
        match self.kind {
            LayerKind::Projection { .. } => LayerType::Projection,
            LayerKind::Quad { .. } => LayerType::Quad,
            LayerKind::Cylinder { .. } => LayerType::Cylinder,
            LayerKind::Equirect { .. } => LayerType::Equirect,
            LayerKind::Cube => LayerType::Cube,
        }
    }

    /// How many swapchain slots this variant reads.
    pub fn swapchain_slots(&self) -> usize {
        match self.kind {
            LayerKind::Projection { .. } => 2,
            _ => 1,
        }
    }

    /// Out-of-range slots are ignored.
    pub fn set_swapchain(&mut self, swapchain: SwapchainId, index: usize) {
        if index >= self.swapchain_slots() {
            log::warn!(
                "set_swapchain: slot {index} out of range for {:?} layer",
                self.layer_type()
            );
            return;
        }
        self.swapchains[index] = Some(swapchain);
    }

    pub fn set_space(&mut self, space: SpaceId) {
        self.space = Some(space);
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    /// Quad layers only; other variants ignore it.
    pub fn set_size(&mut self, width_meters: f32, height_meters: f32) {
        match &mut self.kind {
            LayerKind::Quad { width, height } => {
                *width = width_meters;
                *height = height_meters;
            }
            _ => log::warn!("set_size: {:?} layer has no size", self.layer_type()),
        }
    }

    pub fn with_swapchain(mut self, swapchain: SwapchainId) -> Self {
        self.set_swapchain(swapchain, 0);
        self
    }

    pub fn with_stereo_swapchains(mut self, left: SwapchainId, right: SwapchainId) -> Self {
        self.set_swapchain(left, 0);
        self.set_swapchain(right, 1);
        self
    }

    pub fn with_space(mut self, space: SpaceId) -> Self {
        self.set_space(space);
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.set_pose(pose);
        self
    }

    pub fn with_eye_visibility(mut self, eye_visibility: EyeVisibility) -> Self {
        self.eye_visibility = eye_visibility;
        self
    }

    pub fn with_flags(mut self, flags: LayerFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn quad_uses_one_slot_projection_two() {
        assert_eq!(Layer::quad(1.0, 1.0).swapchain_slots(), 1);
        assert_eq!(Layer::projection(Default::default()).swapchain_slots(), 2);
    }

    #[test]
    fn out_of_range_swapchain_slot_is_ignored() {
        let mut arena: SlotMap<SwapchainId, ()> = SlotMap::with_key();
        let sc = arena.insert(());

        let mut quad = Layer::quad(1.0, 1.0);
        quad.set_swapchain(sc, 1);
        assert_eq!(quad.swapchains, [None, None]);

        quad.set_swapchain(sc, 0);
        assert_eq!(quad.swapchains, [Some(sc), None]);
    }

    #[test]
    fn set_size_only_touches_quads() {
        let mut quad = Layer::quad(1.0, 1.0);
        quad.set_size(2.0, 0.5);
        assert_eq!(
            quad.kind,
            LayerKind::Quad {
                width: 2.0,
                height: 0.5
            }
        );

        let mut cyl = Layer::cylinder(1.0, 1.0, 1.0);
        cyl.set_size(2.0, 0.5);
        assert_eq!(cyl.layer_type(), LayerType::Cylinder);
    }
}
