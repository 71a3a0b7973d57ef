use core::fmt::Display;

use crate::error::{BackendError, ErrorStatus};

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChipFamily {
    BM1684,
    BM1684X,
}

/// Constants of one chip family. Fixed once a backend is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipConstants {
    /// Number of lanes (NPUs) the channel axis is spread over
    pub npu_num: i64,
    /// Bytes one execution unit processes, alignment unit of a lane
    pub eu_bytes: i64,
    /// Batch alignment in bytes, batch granule is this divided by byte width
    pub n_align_bytes: i64,
    /// Activations pack 4 batches per lane word, batch axis stays unaligned
    pub legacy_4n: bool,
    /// Device address of the start of global memory
    pub gmem_start: u64,
    /// Global memory size handed to the simulator
    pub cmodel_gmem_size: u64,
    /// File name of the cmodel runtime
    pub lib_name: &'static str,
}

const BM1684: ChipConstants = ChipConstants {
    npu_num: 64,
    eu_bytes: 128,
    n_align_bytes: 4,
    legacy_4n: true,
    gmem_start: 0x1_0000_0000,
    cmodel_gmem_size: 0x1_0000_0000,
    lib_name: "libcmodel_1684.so",
};

const BM1684X: ChipConstants = ChipConstants {
    npu_num: 64,
    eu_bytes: 64,
    n_align_bytes: 1,
    legacy_4n: false,
    gmem_start: 0x1_0000_0000,
    cmodel_gmem_size: 0x1_0000_0000,
    lib_name: "libcmodel_1684x.so",
};

impl ChipFamily {
    pub const ALL: [ChipFamily; 2] = [ChipFamily::BM1684, ChipFamily::BM1684X];

    /// Chip identifiers are matched case insensitively.
    pub fn from_chip_name(chip: &str) -> Result<ChipFamily, BackendError> {
        ChipFamily::ALL
            .into_iter()
            .find(|family| family.name().eq_ignore_ascii_case(chip))
            .ok_or_else(|| BackendError::new(ErrorStatus::UnsupportedChip, format!("unsupported chip {chip:?}")))
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ChipFamily::BM1684 => "BM1684",
            ChipFamily::BM1684X => "BM1684X",
        }
    }

    pub const fn constants(&self) -> ChipConstants {
        match self {
            ChipFamily::BM1684 => BM1684,
            ChipFamily::BM1684X => BM1684X,
        }
    }
}

impl Display for ChipFamily {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl ChipConstants {
    /// Elements of `dtype_bytes` width in one execution unit.
    pub const fn eu_num(&self, dtype_bytes: i64) -> i64 {
        self.eu_bytes / dtype_bytes
    }

    /// Batch granule for elements of `dtype_bytes` width, at least 1.
    pub const fn n_align(&self, dtype_bytes: i64) -> i64 {
        let n = self.n_align_bytes / dtype_bytes;
        if n > 1 {
            n
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_names() {
        assert_eq!(ChipFamily::from_chip_name("BM1684").unwrap(), ChipFamily::BM1684);
        assert_eq!(ChipFamily::from_chip_name("bm1684x").unwrap(), ChipFamily::BM1684X);
        let err = ChipFamily::from_chip_name("CV183X").unwrap_err();
        assert_eq!(err.status, ErrorStatus::UnsupportedChip);
    }

    #[test]
    fn bm1684_granules() {
        let c = ChipFamily::BM1684.constants();
        assert_eq!(c.eu_num(4), 32);
        assert_eq!(c.eu_num(1), 128);
        assert_eq!(c.n_align(1), 4);
        assert_eq!(c.n_align(2), 2);
        assert_eq!(c.n_align(4), 1);
    }

    #[test]
    fn bm1684x_granules() {
        let c = ChipFamily::BM1684X.constants();
        assert_eq!(c.eu_num(4), 16);
        assert_eq!(c.eu_num(1), 64);
        assert_eq!(c.n_align(1), 1);
        assert!(!c.legacy_4n);
    }
}
