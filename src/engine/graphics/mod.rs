pub mod primitives;
pub mod renderer;

pub use primitives::{Extent2Df, Extent2Di, Fov, Pose, Rect2Di};
pub use renderer::{GraphicsBinding, HeadlessRenderer, NativeImage, Renderer};
