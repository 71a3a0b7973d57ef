use crate::{
    dtype::DType,
    error::BackendError,
    ir::{IrOperation, IrValue},
    shape::{Shape, MAX_SHAPE_DIMS},
};

/// Address, element type and shape of one operand, built fresh for every
/// operator codegen call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorSpec {
    /// Global device address, or region local offset for grouped values
    pub addr: u64,
    pub dtype: DType,
    shape: Shape,
}

/// Layout of `tensor_spec_t` as the runtimes take it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTensorSpec {
    pub addr: u64,
    pub dtype: i32,
    pub dims: i32,
    pub shape: [i32; MAX_SHAPE_DIMS],
}

impl TensorSpec {
    pub fn new(addr: u64, dtype: DType, shape: Shape) -> Self {
        Self { addr, dtype, shape }
    }

    /// Descriptor of a single IR value.
    pub fn from_value<V: IrValue>(v: &V) -> Result<TensorSpec, BackendError> {
        let addr = v.group_out_addr().unwrap_or_else(|| v.address());
        let dtype = DType::from_storage(v.storage_type())?;
        let shape = Shape::from_ir(v.shape())?;
        Ok(TensorSpec { addr, dtype, shape })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> usize {
        self.shape.rank()
    }

    /// Replaces the extents, keeping the element count.
    ///
    /// # Panics
    /// When `new_shape` has a different element count or more than
    /// [`MAX_SHAPE_DIMS`] dims.
    pub fn fix_shape(&mut self, new_shape: &[i32]) {
        assert!(
            new_shape.len() <= MAX_SHAPE_DIMS,
            "reshape to {} dims, descriptors hold at most {MAX_SHAPE_DIMS}",
            new_shape.len()
        );
        let new_num: i64 = new_shape.iter().map(|&d| i64::from(d)).product();
        let old_num = self.shape.numel();
        assert_eq!(
            new_num, old_num,
            "reshape {:?} -> {new_shape:?} changes element count",
            self.shape.as_slice()
        );
        self.shape = Shape(new_shape.into());
    }

    pub fn to_raw(&self) -> RawTensorSpec {
        let mut shape = [0; MAX_SHAPE_DIMS];
        shape[..self.shape.rank()].copy_from_slice(self.shape.as_slice());
        RawTensorSpec {
            addr: self.addr,
            dtype: self.dtype as i32,
            dims: self.shape.rank() as i32,
            shape,
        }
    }
}

/// Shorthand for [`TensorSpec::from_value`].
pub fn value_to_spec<V: IrValue>(v: &V) -> Result<TensorSpec, BackendError> {
    TensorSpec::from_value(v)
}

/// Descriptors of all present operands of `op`, in operand order.
pub fn get_input_spec<O: IrOperation>(op: &O) -> Result<Vec<TensorSpec>, BackendError> {
    op.operands().iter().flatten().map(TensorSpec::from_value).collect()
}

/// Descriptors of all results of `op`.
pub fn get_output_spec<O: IrOperation>(op: &O) -> Result<Vec<TensorSpec>, BackendError> {
    op.results().iter().map(TensorSpec::from_value).collect()
}
