//! Byte footprints and strides of tensors in global and local memory.
//!
//! Local memory is split into one partition per lane (NPU). The channel axis
//! is spread round robin over lanes, so every lane holds `ceil(c / npu_num)`
//! channels, and every channel row of `h * w` elements may be padded up to a
//! whole execution unit. The runtimes encode these exact strides into their
//! instructions, footprints must match them byte for byte.

use crate::{
    chip::ChipConstants,
    dtype::DType,
    error::BackendError,
    ir::IrValue,
    shape::nchw,
};

/// Strides of the 4 canonical axes, in elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Stride4D {
    pub n: i64,
    pub c: i64,
    pub h: i64,
    pub w: i64,
}

#[must_use]
pub const fn ceiling_func(x: i64, y: i64) -> i64 {
    (x + y - 1) / y
}

#[must_use]
pub const fn align_up(x: i64, a: i64) -> i64 {
    ceiling_func(x, a) * a
}

/// Row major strides of an unpadded tensor in global memory.
#[must_use]
pub const fn global_stride(n: i64, c: i64, h: i64, w: i64) -> Stride4D {
    let _ = n;
    Stride4D { n: c * h * w, c: h * w, h: w, w: 1 }
}

impl ChipConstants {
    /// Strides of a tensor in local memory, as seen from one lane.
    #[must_use]
    pub const fn local_stride(&self, n: i64, c: i64, h: i64, w: i64, fmt_bytes: i64, eu_align: bool) -> Stride4D {
        let _ = n;
        let c_stride = if eu_align { align_up(h * w, self.eu_num(fmt_bytes)) } else { h * w };
        Stride4D { n: ceiling_func(c, self.npu_num) * c_stride, c: c_stride, h: w, w: 1 }
    }

    /// Bytes one lane must reserve for an (n, c, h, w) tensor.
    ///
    /// With `is_4n` the batch axis is left unaligned, otherwise it is padded to
    /// [`ChipConstants::n_align`].
    #[must_use]
    pub const fn lmem_bytes(&self, n: i64, c: i64, h: i64, w: i64, dtype: DType, eu_align: bool, is_4n: bool) -> i64 {
        let dbytes = dtype.byte_size();
        let c_per_npu = ceiling_func(c, self.npu_num);
        let n_align = if is_4n { 1 } else { self.n_align(dbytes) };
        let n_aligned = align_up(n, n_align);
        let eu_aligned = if eu_align { align_up(h * w, self.eu_num(dbytes)) * dbytes } else { h * w * dbytes };
        n_aligned * c_per_npu * eu_aligned
    }

    /// Local memory footprint of a slice of an activation.
    ///
    /// Batch and height come from the slice, channel and width from the value.
    /// Families with legacy 4N packing leave the batch axis unaligned.
    pub fn tensor_lmem_bytes<V: IrValue>(&self, v: &V, slice_n: i64, slice_h: i64, eu_align: bool) -> Result<i64, BackendError> {
        let (_, c, _, w) = nchw(v.shape());
        let dtype = DType::from_storage(v.storage_type())?;
        Ok(self.lmem_bytes(slice_n, c, slice_h, w, dtype, eu_align, self.legacy_4n))
    }

    /// Local memory footprint of a whole weight, never sliced.
    pub fn weight_lmem_bytes<V: IrValue>(&self, v: &V, eu_align: bool) -> Result<i64, BackendError> {
        let (n, c, h, w) = nchw(v.shape());
        let dtype = DType::from_storage(v.storage_type())?;
        Ok(self.lmem_bytes(n, c, h, w, dtype, eu_align, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chip::ChipFamily,
        dtype::{Signedness, StorageType},
    };

    struct Value(StorageType, Vec<i64>);

    impl IrValue for Value {
        fn storage_type(&self) -> StorageType {
            self.0
        }

        fn shape(&self) -> &[i64] {
            &self.1
        }

        fn address(&self) -> u64 {
            0x1_0000_0000
        }

        fn group_out_addr(&self) -> Option<u64> {
            None
        }
    }

    fn lanes_64_eu_16() -> ChipConstants {
        ChipConstants { npu_num: 64, eu_bytes: 16, n_align_bytes: 1, legacy_4n: false, ..ChipFamily::BM1684X.constants() }
    }

    #[test]
    fn global_strides() {
        assert_eq!(global_stride(2, 3, 4, 5), Stride4D { n: 60, c: 20, h: 5, w: 1 });
    }

    #[test]
    fn channel_split_over_lanes() {
        let c = lanes_64_eu_16();
        assert_eq!(c.lmem_bytes(1, 130, 4, 4, DType::I8, true, false), 48);
        assert_eq!(c.lmem_bytes(1, 130, 4, 4, DType::I8, false, false), 48);
        assert_eq!(c.lmem_bytes(1, 64, 4, 4, DType::I8, true, false), 16);
    }

    #[test]
    fn eu_alignment_pads_rows() {
        let c = ChipFamily::BM1684X.constants();
        // 3x3 f32 row is 36 bytes, padded to one 64 byte execution unit
        assert_eq!(c.lmem_bytes(1, 64, 3, 3, DType::F32, true, false), 64);
        assert_eq!(c.lmem_bytes(1, 64, 3, 3, DType::F32, false, false), 36);
    }

    #[test]
    fn legacy_packing_leaves_batch_unaligned() {
        let c = ChipFamily::BM1684.constants();
        // int8 batch granule is 4 without packing
        assert_eq!(c.lmem_bytes(1, 64, 1, 128, DType::I8, true, false), 4 * 128);
        assert_eq!(c.lmem_bytes(1, 64, 1, 128, DType::I8, true, true), 128);
    }

    #[test]
    fn local_strides() {
        let c = ChipFamily::BM1684X.constants();
        let s = c.local_stride(1, 130, 3, 3, 4, true);
        assert_eq!(s, Stride4D { n: 3 * 16, c: 16, h: 3, w: 1 });
        let s = c.local_stride(1, 130, 3, 3, 4, false);
        assert_eq!(s, Stride4D { n: 27, c: 9, h: 3, w: 1 });
    }

    #[test]
    fn tensor_footprint_follows_family_packing() {
        let w = Value(StorageType::F32, vec![4, 64, 8, 8]);
        let bm1684 = ChipFamily::BM1684.constants();
        let bm1684x = ChipFamily::BM1684X.constants();
        // f32 batch granule is 1 on both, so packing makes no difference here
        assert_eq!(bm1684.tensor_lmem_bytes(&w, 2, 4, true).unwrap(), 2 * 32 * 4);
        assert_eq!(bm1684x.tensor_lmem_bytes(&w, 2, 4, true).unwrap(), 2 * 32 * 4);
        assert_eq!(bm1684x.weight_lmem_bytes(&w, false).unwrap(), 4 * 64 * 4);
    }

    #[test]
    fn int8_slices_differ_between_families() {
        let v = Value(StorageType::Int { width: 8, signedness: Signedness::Signed }, vec![4, 64, 8, 8]);
        let bm1684 = ChipFamily::BM1684.constants();
        let bm1684x = ChipFamily::BM1684X.constants();
        // one 64 byte row per lane, padded to a 128 byte execution unit on BM1684
        assert_eq!(bm1684.tensor_lmem_bytes(&v, 1, 8, true).unwrap(), 128);
        assert_eq!(bm1684.tensor_lmem_bytes(&v, 3, 8, true).unwrap(), 3 * 128);
        // without legacy packing the batch would round up to 4
        assert_eq!(bm1684.lmem_bytes(3, 64, 8, 8, DType::I8, true, false), 4 * 128);
        assert_eq!(bm1684x.tensor_lmem_bytes(&v, 1, 8, true).unwrap(), 64);
        assert_eq!(bm1684x.tensor_lmem_bytes(&v, 3, 8, true).unwrap(), 3 * 64);
        // weights are never packed
        assert_eq!(bm1684.weight_lmem_bytes(&v, true).unwrap(), 4 * 128);
    }
}
