use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use tpugen_core::{BackendError, ChipFamily};

use crate::{
    backend::{Backend, LifecycleState},
    config::BackendConfig,
};

pub type SharedBackend = Arc<Mutex<Backend>>;

/// One initialized backend per chip family, owned by the compilation context.
///
/// Backends are created on first request and then handed out for the rest of
/// the registry's life. A backend torn down in the meantime is initialized
/// again before it is handed out.
#[derive(Debug)]
pub struct BackendRegistry {
    config: BackendConfig,
    backends: BTreeMap<ChipFamily, SharedBackend>,
}

impl BackendRegistry {
    pub fn new(config: BackendConfig) -> BackendRegistry {
        BackendRegistry { config, backends: BTreeMap::new() }
    }

    /// Registry configured from `backend_config.json` and the environment.
    pub fn from_env() -> BackendRegistry {
        BackendRegistry::new(BackendConfig::load())
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Initialized backend of the family named `chip`.
    pub fn instance(&mut self, chip: &str) -> Result<SharedBackend, BackendError> {
        self.family_instance(ChipFamily::from_chip_name(chip)?)
    }

    pub fn family_instance(&mut self, family: ChipFamily) -> Result<SharedBackend, BackendError> {
        if let Some(backend) = self.backends.get(&family) {
            let mut guard = backend.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.state() == LifecycleState::TornDown {
                log::debug!("reinitializing torn down {family} backend");
                guard.init()?;
            }
            drop(guard);
            return Ok(backend.clone());
        }
        let mut backend = Backend::new(family, self.config.clone());
        backend.init()?;
        let backend = Arc::new(Mutex::new(backend));
        self.backends.insert(family, backend.clone());
        Ok(backend)
    }

    /// Like [`BackendRegistry::instance`], with every error treated as fatal.
    ///
    /// # Panics
    /// When the chip is unsupported or its runtime fails to bind or initialize.
    pub fn require(&mut self, chip: &str) -> SharedBackend {
        match self.instance(chip) {
            Ok(backend) => backend,
            Err(e) => {
                log::error!("{e}");
                panic!("no backend for chip {chip:?}: {e}");
            }
        }
    }

    /// Already created backend of `family`.
    pub fn get(&self, family: ChipFamily) -> Option<SharedBackend> {
        self.backends.get(&family).cloned()
    }

    /// Tears down every backend. They stay registered and the next request
    /// initializes them again.
    pub fn deinit_all(&mut self) {
        for backend in self.backends.values() {
            backend.lock().unwrap_or_else(PoisonError::into_inner).deinit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::serial;
    use tpugen_core::ErrorStatus;

    fn registry() -> BackendRegistry {
        BackendRegistry::new(BackendConfig {
            cmodel_gmem_size: Some(1 << 16),
            cmd_buffer_words: Some(256),
            ..BackendConfig::dummy()
        })
    }

    #[test]
    fn one_instance_per_family() {
        let _guard = serial();
        let mut registry = registry();
        let a = registry.instance("BM1684X").unwrap();
        let b = registry.instance("bm1684x").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.instance("BM1684").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.lock().unwrap().family(), ChipFamily::BM1684);
        assert_eq!(a.lock().unwrap().state(), LifecycleState::Initialized);
    }

    #[test]
    fn unknown_chip() {
        let _guard = serial();
        let mut registry = registry();
        let err = registry.instance("CV183X").unwrap_err();
        assert_eq!(err.status, ErrorStatus::UnsupportedChip);
        assert!(registry.get(ChipFamily::BM1684).is_none());
    }

    #[test]
    #[should_panic(expected = "no backend for chip")]
    fn required_unknown_chip() {
        let _guard = serial();
        registry().require("BM1686");
    }

    #[test]
    fn deinit_all_keeps_instances() {
        let _guard = serial();
        let mut registry = registry();
        let backend = registry.instance("BM1684").unwrap();
        registry.deinit_all();
        assert_eq!(backend.lock().unwrap().state(), LifecycleState::TornDown);
        let again = registry.instance("BM1684").unwrap();
        assert!(Arc::ptr_eq(&backend, &again));
        let mut again = again.lock().unwrap();
        assert_eq!(again.state(), LifecycleState::Initialized);
        again.before_codegen().unwrap();
        assert!(again.channels().is_ok());
    }
}
