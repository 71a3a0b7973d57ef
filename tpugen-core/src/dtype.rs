use core::fmt::Display;

use crate::error::{BackendError, ErrorStatus};

/// Signedness of an integer storage type as the IR reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
    Signless,
}

/// Storage type of an IR value.
///
/// This is everything the backend needs to know about the IR type system,
/// quantized types are expected to be reduced to their storage type by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Int { width: u32, signedness: Signedness },
    F16,
    BF16,
    F32,
    F64,
}

impl StorageType {
    pub const fn bit_width(&self) -> u32 {
        match self {
            Self::Int { width, .. } => *width,
            Self::F16 | Self::BF16 => 16,
            Self::F32 => 32,
            Self::F64 => 64,
        }
    }
}

/// Element type understood by the BM168x runtimes.
///
/// Discriminants follow the runtime's `DATA_TYPE_T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum DType {
    F32 = 0,
    F16 = 1,
    I8 = 2,
    U8 = 3,
    I16 = 4,
    U16 = 5,
    I32 = 6,
    U32 = 7,
    BF16 = 8,
}

/// Value format used by the data movement (GDMA) channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum GdmaFormat {
    Int8 = 0,
    Float32 = 2,
    Int16 = 3,
}

impl Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            DType::F32 => "F32",
            DType::F16 => "F16",
            DType::BF16 => "BF16",
            DType::I8 => "I8",
            DType::U8 => "U8",
            DType::I16 => "I16",
            DType::U16 => "U16",
            DType::I32 => "I32",
            DType::U32 => "U32",
        })
    }
}

impl DType {
    /// Resolves the hardware element type of an IR storage type.
    ///
    /// Signless integers are treated as signed.
    pub fn from_storage(ty: StorageType) -> Result<DType, BackendError> {
        let dtype = match ty {
            StorageType::Int { width, signedness: Signedness::Unsigned } => match width {
                8 => Some(DType::U8),
                16 => Some(DType::U16),
                32 => Some(DType::U32),
                _ => None,
            },
            StorageType::Int { width, .. } => match width {
                8 => Some(DType::I8),
                16 => Some(DType::I16),
                32 => Some(DType::I32),
                _ => None,
            },
            StorageType::F32 => Some(DType::F32),
            StorageType::BF16 => Some(DType::BF16),
            StorageType::F16 => Some(DType::F16),
            StorageType::F64 => None,
        };
        dtype.ok_or_else(|| {
            BackendError::new(ErrorStatus::UnsupportedDType, format!("unsupported storage type {ty:?}"))
        })
    }

    pub const fn byte_size(&self) -> i64 {
        match self {
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F16 | DType::BF16 | DType::I16 | DType::U16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    pub const fn bits(&self) -> u32 {
        self.byte_size() as u32 * 8
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }

    pub const fn is_signed(&self) -> bool {
        !matches!(self, DType::U8 | DType::U16 | DType::U32)
    }

    /// Format the data movement channel uses to carry this type.
    /// Only the width matters, so all 16 bit types share one format.
    pub const fn gdma_format(&self) -> GdmaFormat {
        match self {
            DType::I8 | DType::U8 => GdmaFormat::Int8,
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 => GdmaFormat::Int16,
            DType::F32 | DType::I32 | DType::U32 => GdmaFormat::Float32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(width: u32, signedness: Signedness) -> StorageType {
        StorageType::Int { width, signedness }
    }

    #[test]
    fn integer_mapping() {
        assert_eq!(DType::from_storage(int(8, Signedness::Signless)).unwrap(), DType::I8);
        assert_eq!(DType::from_storage(int(8, Signedness::Signed)).unwrap(), DType::I8);
        assert_eq!(DType::from_storage(int(8, Signedness::Unsigned)).unwrap(), DType::U8);
        assert_eq!(DType::from_storage(int(16, Signedness::Unsigned)).unwrap(), DType::U16);
        assert_eq!(DType::from_storage(int(32, Signedness::Signed)).unwrap(), DType::I32);
        assert_eq!(DType::from_storage(int(32, Signedness::Unsigned)).unwrap(), DType::U32);
    }

    #[test]
    fn float_mapping() {
        assert_eq!(DType::from_storage(StorageType::F32).unwrap(), DType::F32);
        assert_eq!(DType::from_storage(StorageType::F16).unwrap(), DType::F16);
        assert_eq!(DType::from_storage(StorageType::BF16).unwrap(), DType::BF16);
    }

    #[test]
    fn unsupported_types() {
        for ty in [int(64, Signedness::Signless), int(4, Signedness::Unsigned), int(1, Signedness::Signless), StorageType::F64] {
            let err = DType::from_storage(ty).unwrap_err();
            assert_eq!(err.status, ErrorStatus::UnsupportedDType);
        }
    }

    #[test]
    fn gdma_format_follows_width() {
        assert_eq!(DType::U8.gdma_format(), GdmaFormat::Int8);
        assert_eq!(DType::BF16.gdma_format(), GdmaFormat::Int16);
        assert_eq!(DType::U16.gdma_format(), GdmaFormat::Int16);
        assert_eq!(DType::I32.gdma_format(), GdmaFormat::Float32);
        assert_eq!(DType::F32.gdma_format(), GdmaFormat::Float32);
    }

    #[test]
    fn byte_size_matches_storage_width() {
        for ty in [StorageType::F16, StorageType::BF16, StorageType::F32, int(8, Signedness::Unsigned), int(16, Signedness::Signed)] {
            let dtype = DType::from_storage(ty).unwrap();
            assert_eq!(dtype.bits(), ty.bit_width());
        }
    }
}
