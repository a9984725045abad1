//! Plain value types shared by the XR core and the renderer boundary.

/// Rigid transform: rotation quaternion (xyzw) followed by a translation in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub orientation: [f32; 4],
    pub position: [f32; 3],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        orientation: [0.0, 0.0, 0.0, 1.0], // identity quat
        position: [0.0; 3],
    };

    pub fn new(orientation: [f32; 4], position: [f32; 3]) -> Self {
        Self { orientation, position }
    }

    pub fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Rotation of `angle` radians about `axis`, placed at `position`.
    pub fn from_axis_angle(axis: [f32; 3], angle: f32, position: [f32; 3]) -> Self {
        Self {
            orientation: quat_from_axis_angle(axis, angle),
            position,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Unit quaternion (xyzw) for a rotation of `angle` radians about `axis`.
/// A zero-length axis yields the identity.
pub fn quat_from_axis_angle(axis: [f32; 3], angle: f32) -> [f32; 4] {
    let len = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
    if len <= f32::EPSILON {
        return Pose::IDENTITY.orientation;
    }
    let (s, c) = (angle * 0.5).sin_cos();
    let k = s / len;
    [axis[0] * k, axis[1] * k, axis[2] * k, c]
}

/// Field of view as four half-angles in radians (left/down are negative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(half_angle: f32) -> Self {
        Self {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }
}

impl Default for Fov {
    fn default() -> Self {
        Self::symmetric(std::f32::consts::FRAC_PI_4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2Di {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2Di {
    pub offset: [i32; 2],
    pub extent: Extent2Di,
}

impl Rect2Di {
    pub fn from_extent(extent: Extent2Di) -> Self {
        Self {
            offset: [0, 0],
            extent,
        }
    }
}

/// Physical size in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extent2Df {
    pub width: f32,
    pub height: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_axis_is_identity() {
        assert_eq!(quat_from_axis_angle([0.0; 3], 1.0), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn half_turn_about_z() {
        let q = quat_from_axis_angle([0.0, 0.0, 2.0], std::f32::consts::PI);
        assert!((q[2] - 1.0).abs() < 1e-6);
        assert!(q[3].abs() < 1e-6);
        assert!(q[0].abs() < 1e-6 && q[1].abs() < 1e-6);
    }
}
