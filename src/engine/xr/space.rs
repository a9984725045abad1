use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::graphics::Pose;
use crate::engine::xr::SessionId;
use crate::engine::xr::runtime::RawHandle;

/// Runtime-defined reference frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpaceKind {
    /// Head-locked.
    View,
    /// Seated: origin at the head position when tracking started.
    Local,
    /// Standing: origin on the floor at the center of the play area.
    Stage,
    /// Local origin dropped to floor height.
    LocalFloor,
}

impl ReferenceSpaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Local => "local",
            Self::Stage => "stage",
            Self::LocalFloor => "local_floor",
        }
    }
}

impl fmt::Display for ReferenceSpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation parameters of a reference space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSpaceInfo {
    pub kind: ReferenceSpaceKind,
    /// Offset of the new space's origin inside the reference frame.
    pub pose_in_reference_space: Pose,
}

impl ReferenceSpaceInfo {
    pub fn new(kind: ReferenceSpaceKind) -> Self {
        Self {
            kind,
            pose_in_reference_space: Pose::IDENTITY,
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose_in_reference_space = pose;
        self
    }
}

impl Default for ReferenceSpaceInfo {
    fn default() -> Self {
        Self::new(ReferenceSpaceKind::Local)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpaceKind {
    Reference(ReferenceSpaceInfo),
    Action,
    SpatialAnchor,
}

/// A positional frame owned by the session that created it.
#[derive(Debug)]
pub struct Space {
    session: SessionId,
    raw: RawHandle,
    kind: SpaceKind,
}

impl Space {
    pub(crate) fn new(session: SessionId, raw: RawHandle, kind: SpaceKind) -> Self {
        Self { session, raw, kind }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> &SpaceKind {
        &self.kind
    }

    /// Reference kind, if this is a reference space.
    pub fn reference_kind(&self) -> Option<ReferenceSpaceKind> {
        match self.kind {
            SpaceKind::Reference(info) => Some(info.kind),
            _ => None,
        }
    }
}
