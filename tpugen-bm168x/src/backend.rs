//! Lifecycle of one chip family backend.
//!
//! ```text
//! Unbound -> Bound -> Initialized -> CodegenReady (once per region) -> TornDown
//! ```
//!
//! A torn down backend keeps its runtime bound and may be initialized again.

use std::ptr::NonNull;

use tpugen_core::{BackendError, ChipConstants, ChipFamily, ErrorStatus, IrValue};

use crate::{
    channel::{Channel, Channels},
    config::BackendConfig,
    memory::AddressTranslator,
    runtime::Runtime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unbound,
    Bound,
    Initialized,
    CodegenReady,
    TornDown,
}

/// Simulator node all backends run on
const NODE_IDX: i32 = 0;

#[derive(Debug)]
pub struct Backend {
    family: ChipFamily,
    constants: ChipConstants,
    config: BackendConfig,
    runtime: Option<Runtime>,
    channels: Option<Channels>,
    state: LifecycleState,
    really_issue_command: bool,
}

impl Backend {
    pub fn new(family: ChipFamily, config: BackendConfig) -> Backend {
        let mut constants = family.constants();
        if let Some(size) = config.cmodel_gmem_size {
            constants.cmodel_gmem_size = size;
        }
        Backend {
            family,
            constants,
            config,
            runtime: None,
            channels: None,
            state: LifecycleState::Unbound,
            really_issue_command: false,
        }
    }

    /// Backend bound to an already loaded runtime.
    pub fn with_runtime(family: ChipFamily, config: BackendConfig, runtime: Runtime) -> Backend {
        let mut backend = Backend::new(family, config);
        backend.runtime = Some(runtime);
        backend.state = LifecycleState::Bound;
        backend
    }

    pub fn family(&self) -> ChipFamily {
        self.family
    }

    pub fn constants(&self) -> &ChipConstants {
        &self.constants
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_ref()
    }

    fn is_initialized(&self) -> bool {
        matches!(self.state, LifecycleState::Initialized | LifecycleState::CodegenReady)
    }

    fn invalid_state(&self, op: &str) -> BackendError {
        BackendError::new(ErrorStatus::InvalidState, format!("{op} on {} backend in state {:?}", self.family, self.state))
    }

    /// Loads the family's runtime, unless already bound.
    pub fn bind(&mut self) -> Result<(), BackendError> {
        if self.runtime.is_some() {
            return Ok(());
        }
        let runtime = Runtime::bind(self.family, &self.config)?;
        log::debug!("{} backend bound", self.family);
        self.runtime = Some(runtime);
        self.state = LifecycleState::Bound;
        Ok(())
    }

    /// Starts the simulator, creates the channels and sets the default
    /// policy: commands stored, atomic mode off.
    pub fn init(&mut self) -> Result<(), BackendError> {
        if self.is_initialized() {
            return Err(self.invalid_state("init"));
        }
        self.bind()?;
        let Some(runtime) = &self.runtime else {
            return Err(self.invalid_state("init"));
        };
        let fns = *runtime.fns();
        let status = unsafe { (fns.cmodel_init)(NODE_IDX, self.constants.cmodel_gmem_size) };
        if status != 0 {
            return Err(BackendError::new(
                ErrorStatus::Initialization,
                format!("cmodel_init of {} failed with {status}", self.family),
            ));
        }
        let channels = match Channels::new(fns, self.config.cmd_buffer_words()) {
            Ok(channels) => channels,
            Err(e) => {
                unsafe { (fns.cmodel_deinit)(NODE_IDX) };
                return Err(e);
            }
        };
        unsafe {
            (fns.allow_store_cmd)();
            (fns.forbid_atomic_cmodel)();
            (fns.sg_set_profile_dump)(self.config.profile());
        }
        self.channels = Some(channels);
        self.really_issue_command = true;
        self.state = LifecycleState::Initialized;
        log::debug!("{} backend initialized, {:#x} bytes of global memory", self.family, self.constants.cmodel_gmem_size);
        Ok(())
    }

    /// Destroys the command id nodes and stops the simulator. Does nothing on
    /// a backend that was never initialized.
    pub fn deinit(&mut self) {
        if !self.is_initialized() {
            return;
        }
        drop(self.channels.take());
        if let Some(runtime) = &self.runtime {
            unsafe { (runtime.fns().cmodel_deinit)(NODE_IDX) };
        }
        self.state = LifecycleState::TornDown;
        log::debug!("{} backend torn down", self.family);
    }

    /// Prepares the channels for a new compiled region. Calling it again
    /// without codegen in between leaves the same state.
    pub fn before_codegen(&mut self) -> Result<(), BackendError> {
        if !self.is_initialized() {
            return Err(self.invalid_state("before_codegen"));
        }
        if let Some(channels) = &mut self.channels {
            channels.reset();
        }
        self.state = LifecycleState::CodegenReady;
        Ok(())
    }

    /// Dumps runtime statistics of the region, and flops statistics if
    /// `flops` is non zero. Fails if a sync divide was left unmatched.
    pub fn after_codegen(&mut self, flops: i64) -> Result<(), BackendError> {
        if self.state != LifecycleState::CodegenReady {
            return Err(self.invalid_state("after_codegen"));
        }
        let (Some(runtime), Some(channels)) = (&self.runtime, &self.channels) else {
            return Err(self.invalid_state("after_codegen"));
        };
        let cmdid_node = channels.raw_node(Channel::CmdId);
        unsafe {
            (runtime.fns().sg_stas_dump)(cmdid_node);
            if flops != 0 {
                (runtime.fns().sg_flops_dump)(flops, cmdid_node);
            }
        }
        channels.check_synced()
    }

    /// Switches between issuing commands and dry runs. A dry run neither
    /// stores commands nor touches simulated device state.
    pub fn set_command_issue_flag(&mut self, value: bool) -> Result<(), BackendError> {
        let Some(runtime) = &self.runtime else {
            return Err(self.invalid_state("set_command_issue_flag"));
        };
        let fns = runtime.fns();
        unsafe {
            if value {
                (fns.allow_store_cmd)();
                (fns.use_atomic_cmodel)();
                (fns.allow_atomic_cmodel_assert)();
            } else {
                (fns.forbid_store_cmd)();
                (fns.forbid_atomic_cmodel)();
                (fns.forbid_atomic_cmodel_assert)();
            }
        }
        self.really_issue_command = value;
        log::debug!("{} backend command issue {value}", self.family);
        Ok(())
    }

    pub fn command_issue_flag(&self) -> bool {
        self.really_issue_command
    }

    /// Instruction channels of the current region.
    pub fn channels(&mut self) -> Result<&mut Channels, BackendError> {
        if self.state != LifecycleState::CodegenReady {
            return Err(self.invalid_state("channels"));
        }
        self.channels.as_mut().ok_or_else(|| BackendError::new(ErrorStatus::InvalidState, "channels missing"))
    }

    /// # Panics
    /// When the backend is not initialized or the runtime has no global memory.
    pub fn translator(&self) -> AddressTranslator<'_> {
        assert!(self.is_initialized(), "address translation on {} backend in state {:?}", self.family, self.state);
        let runtime = self.runtime.as_ref().expect("initialized backend has a runtime");
        let base = unsafe { (runtime.fns().get_global_memaddr)(NODE_IDX) };
        let base = NonNull::new(base.cast::<u8>()).expect("runtime returned no global memory");
        AddressTranslator::new(base, self.constants.gmem_start, self.constants.cmodel_gmem_size)
    }

    /// Local memory bytes of a slice of `v`, see [`ChipConstants::tensor_lmem_bytes`].
    pub fn tensor_lmem_bytes<V: IrValue>(&self, v: &V, slice_n: i64, slice_h: i64, eu_align: bool) -> Result<i64, BackendError> {
        self.constants.tensor_lmem_bytes(v, slice_n, slice_h, eu_align)
    }

    /// Local memory bytes of the weight `v`, see [`ChipConstants::weight_lmem_bytes`].
    pub fn weight_lmem_bytes<V: IrValue>(&self, v: &V, eu_align: bool) -> Result<i64, BackendError> {
        self.constants.weight_lmem_bytes(v, eu_align)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.deinit();
    }
}
