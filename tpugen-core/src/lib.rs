//! # tpugen-core
//!
//! Chip independent part of the BM168x code generation backend.
//! Tensor descriptors built from IR values, element type mapping, chip family
//! constant tables and the local memory layout calculus shared by every
//! operator codegen.
//!
#![forbid(unsafe_code)]
#![forbid(rustdoc::broken_intra_doc_links)]

/// See [ChipFamily](chip::ChipFamily)
pub mod chip;
/// See [DType](dtype::DType)
pub mod dtype;
/// See [BackendError](error::BackendError)
pub mod error;
/// See [IrValue](ir::IrValue)
pub mod ir;
/// See [Stride4D](layout::Stride4D)
pub mod layout;
/// See [Shape](shape::Shape)
pub mod shape;
/// See [TensorSpec](spec::TensorSpec)
pub mod spec;

pub use chip::{ChipConstants, ChipFamily};
pub use dtype::{DType, GdmaFormat, Signedness, StorageType};
pub use error::{BackendError, ErrorStatus};
pub use ir::{IrOperation, IrValue};
pub use layout::{align_up, ceiling_func, global_stride, Stride4D};
pub use shape::{Shape, MAX_SHAPE_DIMS};
pub use spec::{get_input_spec, get_output_spec, value_to_spec, RawTensorSpec, TensorSpec};
