use crate::engine::app::{FrameOutcome, XrApp};
use crate::engine::graphics::Renderer;
use crate::engine::EngineResult;

/// Ticks allowed per requested frame before the loop gives up on the session.
const TICK_BUDGET_PER_FRAME: u64 = 4;
const TICK_BUDGET_SLACK: u64 = 600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub ticks: u64,
    pub submitted: u64,
    /// Frames run after the exit request while waiting for `Stopping`.
    pub drained: u64,
    pub dropped: u64,
    pub exited: bool,
}

/// Drives the app: poll events, run a frame, repeat until `frames` are submitted and the
/// session has wound down.
///
/// Once `frames` are in, exit is requested and the frame loop keeps running until the
/// runtime reports `Stopping`.
pub struct AnimationLoop<'a, R: Renderer> {
    app: &'a mut XrApp<R>,
    frames: u64,
}

impl<'a, R: Renderer> AnimationLoop<'a, R> {
    pub fn new(app: &'a mut XrApp<R>, frames: u64) -> Self {
        Self { app, frames }
    }

    pub fn start(&mut self) -> EngineResult<LoopReport> {
        let mut report = LoopReport::default();
        if self.frames == 0 {
            return Ok(report);
        }

        let budget = self.frames * TICK_BUDGET_PER_FRAME + TICK_BUDGET_SLACK;
        let mut exit_requested = false;

        while report.ticks < budget {
            report.ticks += 1;
            self.app.poll_events()?;
            if self.app.is_exiting() {
                report.exited = true;
                break;
            }

            if exit_requested && !self.app.is_running() {
                continue;
            }
            if !exit_requested && report.submitted >= self.frames {
                self.app.request_exit()?;
                exit_requested = true;
            }

            match self.app.frame() {
                Ok(FrameOutcome::Submitted) if exit_requested => report.drained += 1,
                Ok(FrameOutcome::Submitted) => report.submitted += 1,
                Ok(FrameOutcome::NotReady) => {}
                Err(e) if e.is_transient() => report.dropped += 1,
                Err(e) => return Err(e),
            }
        }

        if !report.exited {
            log::warn!(
                "animation loop stopped after {} ticks without the session exiting",
                report.ticks
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::XrConfig;
    use crate::engine::graphics::HeadlessRenderer;
    use crate::engine::xr::runtime::LoaderContext;
    use crate::engine::xr::sim::{SimConfig, SimRuntime};

    fn app(sim: SimConfig) -> XrApp<HeadlessRenderer> {
        XrApp::new(
            Box::new(SimRuntime::new(sim)),
            HeadlessRenderer::new(),
            LoaderContext::default(),
            &XrConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn runs_requested_frames_then_exits() {
        let mut app = app(SimConfig::default());
        let report = AnimationLoop::new(&mut app, 10).start().unwrap();

        assert_eq!(report.submitted, 10);
        assert_eq!(report.dropped, 0);
        assert!(report.exited);
        assert_eq!(app.stats().submitted, report.submitted + report.drained);
        app.shutdown().unwrap();
    }

    #[test]
    fn frames_keep_running_until_stopping() {
        let mut app = app(SimConfig {
            frames_before_stopping: 4,
            ..SimConfig::default()
        });
        let report = AnimationLoop::new(&mut app, 5).start().unwrap();

        assert_eq!(report.submitted, 5);
        assert_eq!(report.drained, 4);
        assert!(report.exited);
        assert_eq!(app.stats().submitted, 9);
    }

    #[test]
    fn failed_submissions_are_tolerated() {
        let mut app = app(SimConfig {
            fail_submissions: true,
            ..SimConfig::default()
        });
        let report = AnimationLoop::new(&mut app, 3).start().unwrap();

        assert_eq!(report.submitted, 0);
        assert!(report.dropped > 0);
        assert!(!report.exited);
    }
}
