use serde::{Deserialize, Serialize};

/// An extension as reported by the runtime (or as requested, where `version` is the minimum).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionProperties {
    pub name: String,
    pub version: u32,
}

impl ExtensionProperties {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// True if `available` offers this extension at `self.version` or newer.
    pub fn satisfied_by(&self, available: &[ExtensionProperties]) -> bool {
        available
            .iter()
            .any(|a| a.name == self.name && a.version >= self.version)
    }
}

/// Requested extension: name plus minimum acceptable version.
pub type ExtensionRequest = ExtensionProperties;

/// Tracks required/desired/available/enabled extension sets and negotiates between them.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    required: Vec<ExtensionRequest>,
    desired: Vec<ExtensionRequest>,
    available: Vec<ExtensionProperties>,
    enabled: Vec<ExtensionProperties>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_required(&mut self, name: impl Into<String>, version: u32) {
        self.required.push(ExtensionRequest::new(name, version));
    }

    pub fn add_desired(&mut self, name: impl Into<String>, version: u32) {
        self.desired.push(ExtensionRequest::new(name, version));
    }

    /// Enable every required extension plus whichever desired ones `available` supports.
    ///
    /// Fails without enabling anything if a required extension is missing or too old.
    /// On success returns the names to hand to instance creation, required entries first.
    pub fn negotiate(
        &mut self,
        available: Vec<ExtensionProperties>,
    ) -> crate::engine::EngineResult<Vec<String>> {
        self.available = available;
        self.enabled.clear();

        let missing: Vec<&ExtensionRequest> = self
            .required
            .iter()
            .filter(|req| !req.satisfied_by(&self.available))
            .collect();

        if !missing.is_empty() {
            for req in &missing {
                log::error!(
                    "negotiate: required extension not supported: {} (v{})",
                    req.name,
                    req.version
                );
            }
            return Err(crate::engine::EngineError::MissingRequiredCapability(
                missing.iter().map(|r| r.name.clone()).collect(),
            ));
        }

        let mut enabled: Vec<ExtensionProperties> = Vec::new();
        for req in &self.required {
            if !enabled.iter().any(|e| e.name == req.name) {
                enabled.push(req.clone());
            }
        }
        for des in &self.desired {
            if enabled.iter().any(|e| e.name == des.name) {
                continue;
            }
            if des.satisfied_by(&self.available) {
                enabled.push(des.clone());
            } else {
                log::info!(
                    "negotiate: desired extension not supported: {} (v{})",
                    des.name,
                    des.version
                );
            }
        }

        self.enabled = enabled;
        Ok(self.enabled_names())
    }

    pub fn required(&self) -> &[ExtensionRequest] {
        &self.required
    }

    pub fn desired(&self) -> &[ExtensionRequest] {
        &self.desired
    }

    pub fn available(&self) -> &[ExtensionProperties] {
        &self.available
    }

    pub fn enabled(&self) -> &[ExtensionProperties] {
        &self.enabled
    }

    pub fn enabled_names(&self) -> Vec<String> {
        self.enabled.iter().map(|e| e.name.clone()).collect()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    fn avail(list: &[(&str, u32)]) -> Vec<ExtensionProperties> {
        list.iter()
            .map(|(n, v)| ExtensionProperties::new(*n, *v))
            .collect()
    }

    #[test]
    fn missing_required_fails_and_enables_nothing() {
        let mut reg = ExtensionRegistry::new();
        reg.add_required("XR_KHR_opengl_es_enable", 1);
        reg.add_required("XR_KHR_not_there", 1);
        reg.add_desired("XR_EXT_hand_tracking", 1);
        reg.add_desired("XR_FB_display_refresh_rate", 1);

        let err = reg
            .negotiate(avail(&[
                ("XR_KHR_opengl_es_enable", 8),
                ("XR_EXT_hand_tracking", 4),
                ("XR_FB_display_refresh_rate", 1),
            ]))
            .unwrap_err();

        match err {
            EngineError::MissingRequiredCapability(names) => {
                assert_eq!(names, vec!["XR_KHR_not_there".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(reg.enabled().is_empty());
    }

    #[test]
    fn required_version_too_old_is_missing() {
        let mut reg = ExtensionRegistry::new();
        reg.add_required("XR_KHR_opengl_es_enable", 9);

        assert!(reg.negotiate(avail(&[("XR_KHR_opengl_es_enable", 8)])).is_err());
        assert!(reg.enabled().is_empty());
    }

    #[test]
    fn required_come_before_desired() {
        let mut reg = ExtensionRegistry::new();
        reg.add_desired("XR_EXT_hand_tracking", 1);
        reg.add_required("XR_KHR_opengl_es_enable", 1);
        reg.add_desired("XR_FB_missing", 1);
        reg.add_required("XR_KHR_android_create_instance", 1);

        let names = reg
            .negotiate(avail(&[
                ("XR_EXT_hand_tracking", 2),
                ("XR_KHR_android_create_instance", 3),
                ("XR_KHR_opengl_es_enable", 1),
            ]))
            .unwrap();

        assert_eq!(
            names,
            vec![
                "XR_KHR_opengl_es_enable".to_string(),
                "XR_KHR_android_create_instance".to_string(),
                "XR_EXT_hand_tracking".to_string(),
            ]
        );
        for req in reg.required() {
            assert!(reg.is_enabled(&req.name));
        }
        assert!(!reg.is_enabled("XR_FB_missing"));
    }

    #[test]
    fn duplicate_names_enabled_once() {
        let mut reg = ExtensionRegistry::new();
        reg.add_required("XR_KHR_opengl_es_enable", 1);
        reg.add_desired("XR_KHR_opengl_es_enable", 1);

        let names = reg.negotiate(avail(&[("XR_KHR_opengl_es_enable", 1)])).unwrap();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn renegotiation_resets_enabled() {
        let mut reg = ExtensionRegistry::new();
        reg.add_required("XR_KHR_opengl_es_enable", 1);
        reg.negotiate(avail(&[("XR_KHR_opengl_es_enable", 1)])).unwrap();
        assert_eq!(reg.enabled().len(), 1);

        assert!(reg.negotiate(Vec::new()).is_err());
        assert!(reg.enabled().is_empty());
        assert!(reg.available().is_empty());
    }
}
