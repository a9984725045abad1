//! Command-line interface for little-xr.

use std::path::PathBuf;

use clap::Parser;

use crate::engine::EngineResult;
use crate::engine::config::{Backend, XrConfig};

#[derive(Parser, Debug)]
#[command(name = "little-xr")]
#[command(about = "Drive an XR session through its lifecycle and frame loop")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Frames to submit before requesting exit
    #[arg(short, long)]
    pub frames: Option<u64>,

    /// Runtime backend
    #[arg(short, long, value_enum)]
    pub backend: Option<Backend>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub dump_config: bool,
}

impl Cli {
    /// Config file (or defaults), then environment, then flags.
    pub fn resolve_config(&self) -> EngineResult<XrConfig> {
        let mut config = match &self.config {
            Some(path) => XrConfig::load(path)?,
            None => XrConfig::default(),
        };
        config.apply_env();
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["little-xr", "--frames", "5", "--backend", "sim"]).unwrap();
        assert_eq!(cli.frames, Some(5));
        assert_eq!(cli.backend, Some(Backend::Sim));
        assert!(!cli.dump_config);
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(Cli::try_parse_from(["little-xr", "--backend", "vulkan"]).is_err());
    }
}
