//! Run configuration: a JSON file, then environment overrides, then command-line flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::xr::runtime::{ApplicationInfo, EnvironmentBlendMode};
use crate::engine::xr::sim::SimConfig;
use crate::engine::xr::space::ReferenceSpaceKind;
use crate::engine::xr::swapchain::FORMAT_SRGB8_ALPHA8;
use crate::engine::xr::ExtensionProperties;
use crate::engine::{EngineError, EngineResult};

pub const FRAMES_ENV: &str = "LITTLE_XR_FRAMES";
pub const BACKEND_ENV: &str = "LITTLE_XR_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Built-in headless runtime.
    #[default]
    Sim,
    /// System OpenXR loader (requires the `openxr` feature).
    Openxr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrConfig {
    pub application_name: String,
    pub application_version: u32,
    pub required_extensions: Vec<ExtensionProperties>,
    pub desired_extensions: Vec<ExtensionProperties>,
    pub reference_space: ReferenceSpaceKind,
    pub swapchain_format: i64,
    /// Overrides the first eye's recommended size.
    pub swapchain_size: Option<[u32; 2]>,
    pub swapchain_array_size: u32,
    pub blend_mode: EnvironmentBlendMode,
    /// Frames to submit before requesting exit.
    pub frames: u64,
    pub backend: Backend,
    pub sim: SimConfig,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            application_name: "little-xr".to_string(),
            application_version: 1,
            required_extensions: vec![ExtensionProperties::new("XR_KHR_opengl_es_enable", 1)],
            desired_extensions: Vec::new(),
            reference_space: ReferenceSpaceKind::Local,
            swapchain_format: FORMAT_SRGB8_ALPHA8,
            swapchain_size: None,
            swapchain_array_size: 1,
            blend_mode: EnvironmentBlendMode::Opaque,
            frames: 300,
            backend: Backend::Sim,
            sim: SimConfig::default(),
        }
    }
}

impl XrConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json_pretty(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Apply `LITTLE_XR_FRAMES` / `LITTLE_XR_BACKEND` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(FRAMES_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(frames) => self.frames = frames,
                Err(e) => log::warn!("{FRAMES_ENV}={raw:?} ignored: {e}"),
            }
        }
        if let Some(raw) = lookup(BACKEND_ENV) {
            match <Backend as clap::ValueEnum>::from_str(raw.trim(), true) {
                Ok(backend) => self.backend = backend,
                Err(e) => log::warn!("{BACKEND_ENV}={raw:?} ignored: {e}"),
            }
        }
    }

    pub fn application_info(&self) -> ApplicationInfo {
        ApplicationInfo {
            application_name: self.application_name.clone(),
            application_version: self.application_version,
            ..ApplicationInfo::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = XrConfig::from_json(
            r#"{ "frames": 12, "reference_space": "stage", "sim": { "chain_length": 2 } }"#,
        )
        .unwrap();

        assert_eq!(cfg.frames, 12);
        assert_eq!(cfg.reference_space, ReferenceSpaceKind::Stage);
        assert_eq!(cfg.sim.chain_length, 2);
        assert_eq!(cfg.sim.max_layer_count, SimConfig::default().max_layer_count);
        assert_eq!(cfg.application_name, "little-xr");
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let mut cfg = XrConfig::default();
        cfg.apply_overrides(|key| match key {
            FRAMES_ENV => Some("42".to_string()),
            BACKEND_ENV => Some("OpenXR".to_string()),
            _ => None,
        });
        assert_eq!(cfg.frames, 42);
        assert_eq!(cfg.backend, Backend::Openxr);

        cfg.apply_overrides(|key| (key == FRAMES_ENV).then(|| "lots".to_string()));
        assert_eq!(cfg.frames, 42);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = XrConfig::load(Path::new("/nonexistent/little-xr.json")).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
