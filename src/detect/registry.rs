use std::collections::BTreeMap;

use crate::error::{LookoutError, Result};

use super::backend::{Detector, DetectorSettings};
use super::backends::{ColorKeyBackend, MotionBackend};

type Factory = Box<dyn Fn(&DetectorSettings) -> Result<Box<dyn Detector>> + Send + Sync>;

/// Named detector engines.
///
/// The daemon loads exactly one engine at startup by name.
pub struct DetectorRegistry {
    factories: BTreeMap<String, Factory>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every engine compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |_| Ok(Box::new(ColorKeyBackend::new())));
        registry.register("motion", |_| Ok(Box::new(MotionBackend::new())));
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |settings| {
            Ok(Box::new(super::backends::TractBackend::load(settings)?))
        });
        registry
    }

    /// Register a factory. A later registration under the same name wins.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DetectorSettings) -> Result<Box<dyn Detector>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered engine names, sorted.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build and warm up the named engine.
    pub fn load(&self, name: &str, settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            LookoutError::Config(format!(
                "detector '{}' not available (built-in: {})",
                name,
                self.list().join(", ")
            ))
        })?;
        let mut detector = factory(settings)?;
        detector.warm_up()?;
        log::info!(
            "detector '{}' loaded ({} labels)",
            detector.name(),
            detector.palette().len()
        );
        Ok(detector)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
