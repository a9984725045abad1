//! Session lifecycle and the per-frame protocol.
//!
//! State changes arrive from the runtime's event queue (`Xr::poll_events`); the session only
//! reacts to them. A frame is `begin_frame` → any number of `add_layer` → `end_frame`, and
//! `end_frame` always closes the frame and empties the layer list, even when submission fails.

use std::collections::BTreeSet;
use std::fmt;

use slotmap::SlotMap;
use uuid::Uuid;

use crate::engine::xr::composition;
use crate::engine::xr::frame_stats::FrameStats;
use crate::engine::xr::layer::Layer;
use crate::engine::xr::runtime::{
    Duration, EnvironmentBlendMode, RawHandle, RuntimeError, Time, ViewConfigurationType,
    XrRuntime,
};
use crate::engine::xr::space::{ReferenceSpaceKind, Space};
use crate::engine::xr::swapchain::Swapchain;
use crate::engine::xr::{InstanceId, SessionId, SpaceId, SwapchainId};
use crate::engine::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    /// Terminal: no further transitions are accepted.
    Exiting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Synchronized => "synchronized",
            Self::Visible => "visible",
            Self::Focused => "focused",
            Self::Stopping => "stopping",
            Self::LossPending => "loss_pending",
            Self::Exiting => "exiting",
        }
    }

    /// States in which the frame loop may run.
    pub fn is_frame_synchronizable(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Synchronized | Self::Visible | Self::Focused
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token returned by a successful `begin_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub predicted_display_time: Time,
    pub predicted_display_period: Duration,
    /// False when the compositor will not show this frame; submit no layers.
    pub should_render: bool,
    pub frame_index: u64,
}

#[derive(Debug)]
pub struct Session {
    guid: Uuid,
    instance: InstanceId,
    raw: RawHandle,
    state: SessionState,
    running: bool,
    reference_spaces: BTreeSet<ReferenceSpaceKind>,
    max_layer_count: u32,
    frame: Option<FrameTiming>,
    in_frame: bool,
    next_frame_index: u64,
    layers: Vec<Layer>,
    blend_mode: EnvironmentBlendMode,
    stats: FrameStats,
}

impl Session {
    pub(crate) fn new(
        instance: InstanceId,
        raw: RawHandle,
        reference_spaces: impl IntoIterator<Item = ReferenceSpaceKind>,
        max_layer_count: u32,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            instance,
            raw,
            state: SessionState::Idle,
            running: false,
            reference_spaces: reference_spaces.into_iter().collect(),
            max_layer_count,
            frame: None,
            in_frame: false,
            next_frame_index: 0,
            layers: Vec::new(),
            blend_mode: EnvironmentBlendMode::Opaque,
            stats: FrameStats::default(),
        }
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_exiting(&self) -> bool {
        self.state == SessionState::Exiting
    }

    /// Reference spaces enumerated when the session was created.
    pub fn reference_spaces(&self) -> impl Iterator<Item = ReferenceSpaceKind> + '_ {
        self.reference_spaces.iter().copied()
    }

    pub fn supports_reference_space(&self, kind: ReferenceSpaceKind) -> bool {
        self.reference_spaces.contains(&kind)
    }

    pub fn max_layer_count(&self) -> u32 {
        self.max_layer_count
    }

    pub fn blend_mode(&self) -> EnvironmentBlendMode {
        self.blend_mode
    }

    pub fn set_blend_mode(&mut self, mode: EnvironmentBlendMode) {
        self.blend_mode = mode;
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Timing of the most recently begun frame.
    pub fn frame_timing(&self) -> Option<FrameTiming> {
        self.frame
    }

    pub fn predicted_display_time(&self) -> Option<Time> {
        self.frame.map(|f| f.predicted_display_time)
    }

    /// Layers added since the current frame began.
    pub fn pending_layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Apply a runtime-reported state change.
    ///
    /// Reaching `Ready` begins the session; reaching `Stopping` ends it.
    pub(crate) fn handle_state_change(
        &mut self,
        rt: &mut dyn XrRuntime,
        next: SessionState,
    ) -> EngineResult<()> {
        if self.state == SessionState::Exiting {
            log::debug!("session {}: ignoring {next} after exiting", self.guid);
            return Ok(());
        }

        log::info!("session {}: {} -> {next}", self.guid, self.state);
        self.state = next;

        match next {
            SessionState::Ready if !self.running => {
                rt.begin_session(self.raw, ViewConfigurationType::PrimaryStereo)
                    .map_err(|e| EngineError::runtime("begin_session", e))?;
                self.running = true;
            }
            SessionState::Stopping if self.running => {
                rt.end_session(self.raw)
                    .map_err(|e| EngineError::runtime("end_session", e))?;
                self.running = false;
            }
            SessionState::Exiting | SessionState::LossPending => {
                self.running = false;
                if self.in_frame {
                    log::warn!("session {}: dropping open frame on {next}", self.guid);
                    self.in_frame = false;
                    self.layers.clear();
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn begin_frame(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<FrameTiming> {
        if self.in_frame {
            return Err(EngineError::FrameAlreadyBegun);
        }
        if matches!(self.state, SessionState::Exiting | SessionState::LossPending) {
            return Err(EngineError::SessionExiting);
        }
        if !self.running || !self.state.is_frame_synchronizable() {
            self.stats.record_not_ready();
            return Err(EngineError::FrameNotReady);
        }

        let state = rt
            .wait_frame(self.raw)
            .map_err(|e| self.frame_error("wait_frame", e))?;
        rt.begin_frame(self.raw)
            .map_err(|e| self.frame_error("begin_frame", e))?;

        let timing = FrameTiming {
            predicted_display_time: state.predicted_display_time,
            predicted_display_period: state.predicted_display_period,
            should_render: state.should_render,
            frame_index: self.next_frame_index,
        };
        self.next_frame_index += 1;
        self.frame = Some(timing);
        self.in_frame = true;
        self.layers.clear();
        self.stats.record_begun(timing.predicted_display_period);
        Ok(timing)
    }

    fn frame_error(&mut self, op: &'static str, err: RuntimeError) -> EngineError {
        match err {
            RuntimeError::SessionNotRunning => {
                self.stats.record_not_ready();
                EngineError::FrameNotReady
            }
            RuntimeError::SessionLost => EngineError::SessionExiting,
            other => EngineError::runtime(op, other),
        }
    }

    pub(crate) fn add_layer(&mut self, layer: Layer) -> EngineResult<()> {
        if !self.in_frame {
            return Err(EngineError::FrameNotBegun);
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Submit every pending layer in order and close the frame.
    ///
    /// The frame is closed and the list cleared on every path. When the layers cannot be
    /// encoded, or exceed the compositor limit, an empty submission still ends the runtime frame.
    pub(crate) fn end_frame(
        &mut self,
        rt: &mut dyn XrRuntime,
        id: SessionId,
        spaces: &SlotMap<SpaceId, Space>,
        swapchains: &SlotMap<SwapchainId, Swapchain>,
    ) -> EngineResult<()> {
        if !self.in_frame {
            return Err(EngineError::FrameNotBegun);
        }
        let layers = std::mem::take(&mut self.layers);
        self.in_frame = false;

        let display_time = self
            .frame
            .map(|f| f.predicted_display_time)
            .unwrap_or_default();

        let encoded = composition::encode_layers(&layers, id, spaces, swapchains)
            .map_err(|e| EngineError::SubmissionFailed(e.to_string()))
            .and_then(|list| {
                if self.max_layer_count > 0 && list.len() > self.max_layer_count as usize {
                    Err(EngineError::TooManyLayers {
                        layers: list.len(),
                        max: self.max_layer_count,
                    })
                } else {
                    Ok(list)
                }
            });

        match encoded {
            Ok(list) => match rt.end_frame(self.raw, display_time, self.blend_mode, &list) {
                Ok(()) => {
                    self.stats.record_submitted(list.len());
                    Ok(())
                }
                Err(e) => {
                    self.stats.record_failed();
                    Err(EngineError::SubmissionFailed(e.to_string()))
                }
            },
            Err(err) => {
                self.stats.record_failed();
                if let Err(e) = rt.end_frame(self.raw, display_time, self.blend_mode, &[]) {
                    log::warn!("end_frame: closing frame without layers failed: {e}");
                }
                Err(err)
            }
        }
    }

    pub(crate) fn request_exit(&mut self, rt: &mut dyn XrRuntime) -> EngineResult<()> {
        if !self.running {
            return Err(EngineError::runtime(
                "request_exit_session",
                RuntimeError::SessionNotRunning,
            ));
        }
        rt.request_exit_session(self.raw)
            .map_err(|e| EngineError::runtime("request_exit_session", e))
    }
}
