//! Boundary with the IR layer.
//!
//! The backend never walks IR itself, operator lowering hands it values and
//! operations through these traits.

use crate::dtype::StorageType;

/// A tensor valued SSA value.
pub trait IrValue {
    /// Storage type of the elements.
    fn storage_type(&self) -> StorageType;

    /// Dimension extents, outermost first.
    fn shape(&self) -> &[i64];

    /// Global device address assigned by the allocator.
    fn address(&self) -> u64;

    /// Region local offset of the value when its defining operation sits inside
    /// a local memory group, `None` for values that live in global memory.
    fn group_out_addr(&self) -> Option<u64>;
}

/// An operation with tensor operands and results.
pub trait IrOperation {
    type Value: IrValue;

    /// Operands in order. Absent optional operands are `None`.
    fn operands(&self) -> &[Option<Self::Value>];

    fn results(&self) -> &[Self::Value];
}
