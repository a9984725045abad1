pub mod animation_loop;
pub mod app;
pub mod cli;
pub mod config;
pub mod graphics;
pub mod xr;

pub use animation_loop::AnimationLoop;
pub use app::XrApp;

use crate::engine::xr::runtime::RuntimeError;

/// Engine-level error type.
///
/// `FrameNotReady`, `SubmissionFailed` and `TooManyLayers` are per-frame conditions the
/// frame loop tolerates; everything else is surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("required capabilities not supported by the runtime: {}", .0.join(", "))]
    MissingRequiredCapability(Vec<String>),

    #[error("XR runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("no head-mounted display system found")]
    NoSystemFound,

    #[error("system exposes no two-view stereo configuration")]
    NoStereoViewConfiguration,

    #[error("graphics binding must be set before creating a session")]
    GraphicsBindingMissing,

    #[error("reference space {0} was not advertised by the session")]
    UnsupportedReferenceSpace(String),

    #[error("session is not ready for a frame yet")]
    FrameNotReady,

    #[error("frame submission failed: {0}")]
    SubmissionFailed(String),

    #[error("{layers} layers exceed the compositor limit of {max}")]
    TooManyLayers { layers: usize, max: u32 },

    #[error("swapchain image {0} is still acquired; release it before acquiring again")]
    ChainExhausted(u32),

    #[error("swapchain format {0:#x} is not supported by the session")]
    UnsupportedSwapchainFormat(i64),

    #[error("loader has not been initialized")]
    LoaderNotInitialized,

    #[error("loader already initialized")]
    LoaderAlreadyInitialized,

    #[error("instance has not been created")]
    InstanceNotCreated,

    #[error("instance already owns a live session")]
    SessionAlreadyExists,

    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),

    #[error("ownership order violated: {0}")]
    OwnershipViolation(String),

    #[error("no frame in progress")]
    FrameNotBegun,

    #[error("frame already in progress")]
    FrameAlreadyBegun,

    #[error("no swapchain image acquired")]
    ImageNotAcquired,

    #[error("swapchain image was not waited on before release")]
    ImageNotWaited,

    #[error("session is exiting")]
    SessionExiting,

    #[error("runtime call {op} failed: {source}")]
    Runtime {
        op: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// True for per-frame conditions the caller is expected to shrug off and retry next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::FrameNotReady
                | EngineError::SubmissionFailed(_)
                | EngineError::TooManyLayers { .. }
        )
    }

    pub(crate) fn runtime(op: &'static str, source: RuntimeError) -> Self {
        EngineError::Runtime { op, source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Log a failure with the name of the operation that produced it.
pub(crate) fn log_failure(op: &str, err: &EngineError) {
    match err {
        EngineError::FrameNotReady => log::debug!("{op}: {err}"),
        e if e.is_transient() => log::warn!("{op}: {err}"),
        _ => log::error!("{op}: {err}"),
    }
}
