pub mod engine;
pub mod utils;
