use std::{path::Path, sync::Arc};

use libloading::Library;
use tpugen_core::{BackendError, ChipFamily, ErrorStatus};

use crate::{config::BackendConfig, dummy, ffi::RuntimeFns};

/// A bound cmodel runtime: its entry points and the library keeping them valid.
#[derive(Debug, Clone)]
pub struct Runtime {
    // Just to keep the entry points loaded
    #[allow(unused)]
    lib: Option<Arc<Library>>,
    fns: RuntimeFns,
}

impl Runtime {
    /// Binds the runtime of `family`, or its dummy runtime if the config
    /// asks for it.
    pub fn bind(family: ChipFamily, config: &BackendConfig) -> Result<Runtime, BackendError> {
        let lib_name = family.constants().lib_name;
        if config.dummy.enabled {
            log::debug!("binding dummy runtime in place of {lib_name}");
            return Ok(Runtime::dummy(family));
        }
        Runtime::search(lib_name, config)
    }

    /// Binds the first loadable `lib_name` among the configured candidates.
    pub fn search(lib_name: &str, config: &BackendConfig) -> Result<Runtime, BackendError> {
        let candidates = config.lib_candidates(lib_name);
        let lib = candidates.iter().find_map(|path| {
            unsafe { Library::new(path) }
                .map_err(|e| log::trace!("failed to load {path:?}, {e}"))
                .ok()
        });
        let Some(lib) = lib else {
            return Err(BackendError::new(
                ErrorStatus::DyLibNotFound,
                format!("{lib_name} not found, searched {candidates:?}"),
            ));
        };
        log::debug!("loaded {lib_name}");
        Runtime::from_library(lib)
    }

    /// Binds the runtime at exactly `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Runtime, BackendError> {
        let path = path.as_ref();
        let lib = unsafe { Library::new(path) }
            .map_err(|e| BackendError::new(ErrorStatus::DyLibNotFound, format!("{path:?}: {e}")))?;
        Runtime::from_library(lib)
    }

    /// Resolves every entry point, partially bound libraries are rejected.
    pub fn from_library(lib: Library) -> Result<Runtime, BackendError> {
        let fns = unsafe { RuntimeFns::load(&lib) }?;
        Ok(Runtime { lib: Some(Arc::new(lib)), fns })
    }

    /// In-process runtime of `family`, independent of the other families.
    pub fn dummy(family: ChipFamily) -> Runtime {
        Runtime { lib: None, fns: dummy::runtime_fns(family) }
    }

    pub fn is_dummy(&self) -> bool {
        self.lib.is_none()
    }

    pub fn fns(&self) -> &RuntimeFns {
        &self.fns
    }
}
