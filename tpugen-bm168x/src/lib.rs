//! # tpugen-bm168x
//!
//! Runtime half of the BM168x code generation backend. Binds the chip
//! family's cmodel runtime, drives its lifecycle around every compiled region,
//! manages the data movement and compute instruction channels and translates
//! global memory addresses for host copies.
//!
//! ```no_run
//! use tpugen_bm168x::BackendRegistry;
//!
//! let mut registry = BackendRegistry::from_env();
//! let backend = registry.require("BM1684X");
//! let mut backend = backend.lock().unwrap();
//! backend.before_codegen().unwrap();
//! // per operator codegen
//! backend.after_codegen(0).unwrap();
//! ```

pub mod backend;
pub mod channel;
pub mod config;
pub mod dummy;
pub mod ffi;
pub mod memory;
pub mod registry;
pub mod runtime;

pub use backend::{Backend, LifecycleState};
pub use channel::{BroadcastMove, Channel, ChannelSnapshot, Channels, CompactMove, MoveDirection, StrideMove};
pub use config::{BackendConfig, DummyConfig};
pub use memory::{AddressTranslator, DeviceMem, Element};
pub use registry::{BackendRegistry, SharedBackend};
pub use runtime::Runtime;
pub use tpugen_core::{BackendError, ChipFamily, ErrorStatus};
