//! Host view of simulated global memory.

use std::{marker::PhantomData, mem::size_of_val, ptr::NonNull};

use half::{bf16, f16};
use tpugen_core::{BackendError, DType, ErrorStatus, IrValue};

use crate::backend::Backend;

/// A region of global memory handed out by the device allocator.
///
/// `offset` is relative to the start of global memory, never a host pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMem {
    pub offset: u64,
    pub size: u64,
}

mod sealed {
    pub trait Sealed {}
}

/// Host element types that can be copied to and from global memory.
pub trait Element: sealed::Sealed + Copy + Default + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($t:ty => $dtype:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    f16 => F16,
    bf16 => BF16,
    f32 => F32,
}

fn as_bytes<T: Element>(data: &[T]) -> &[u8] {
    // Element types are plain integers and floats without padding
    unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), size_of_val(data)) }
}

fn as_bytes_mut<T: Element>(data: &mut [T]) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), size_of_val(data)) }
}

/// Translates global memory addresses into host pointers of an initialized
/// backend. Borrowing the backend keeps it from being torn down meanwhile.
///
/// Every translation is bounds checked against the simulator's memory size,
/// an out of range address is a codegen bug and panics.
#[derive(Debug)]
pub struct AddressTranslator<'a> {
    base: NonNull<u8>,
    gmem_start: u64,
    gmem_size: u64,
    _backend: PhantomData<&'a Backend>,
}

fn value_numel<V: IrValue>(v: &V) -> Result<usize, BackendError> {
    let shape = v.shape();
    shape
        .iter()
        .try_fold(1i64, |acc, &d| acc.checked_mul(d))
        .and_then(|numel| usize::try_from(numel).ok())
        .ok_or_else(|| BackendError::new(ErrorStatus::ShapeOverflow, format!("value of shape {shape:?}")))
}

impl<'a> AddressTranslator<'a> {
    pub(crate) fn new(base: NonNull<u8>, gmem_start: u64, gmem_size: u64) -> AddressTranslator<'a> {
        AddressTranslator { base, gmem_start, gmem_size, _backend: PhantomData }
    }

    fn host_ptr(&self, offset: u64, bytes: usize) -> *mut u8 {
        let end = offset.checked_add(bytes as u64);
        assert!(
            end.is_some_and(|end| end <= self.gmem_size),
            "global memory access of {bytes} bytes at offset {offset:#x} is outside of {:#x} bytes",
            self.gmem_size
        );
        // In bounds of the runtime's arena, checked above
        unsafe { self.base.as_ptr().add(offset as usize) }
    }

    fn offset_of(&self, addr: u64) -> u64 {
        assert!(
            addr >= self.gmem_start,
            "address {addr:#x} is below global memory start {:#x}",
            self.gmem_start
        );
        addr - self.gmem_start
    }

    /// Host pointer of a global memory address.
    pub fn gmem_addr(&self, addr: u64) -> *mut u8 {
        self.host_ptr(self.offset_of(addr), 0)
    }

    /// Host pointer of the start of `mem`.
    pub fn mem_addr(&self, mem: &DeviceMem) -> *mut u8 {
        self.host_ptr(mem.offset, mem.size as usize)
    }

    /// Fills the whole of `dst` with `src`.
    ///
    /// # Panics
    /// When `src` is not exactly `dst.size` bytes long.
    pub fn memcpy_s2d(&self, dst: &DeviceMem, src: &[u8]) {
        assert_eq!(src.len() as u64, dst.size, "host buffer does not match device region size");
        let ptr = self.host_ptr(dst.offset, src.len());
        unsafe { ptr.copy_from_nonoverlapping(src.as_ptr(), src.len()) };
    }

    /// Copies the whole of `src` into `dst`.
    ///
    /// # Panics
    /// When `dst` is not exactly `src.size` bytes long.
    pub fn memcpy_d2s(&self, dst: &mut [u8], src: &DeviceMem) {
        assert_eq!(dst.len() as u64, src.size, "host buffer does not match device region size");
        let ptr = self.host_ptr(src.offset, dst.len());
        unsafe { ptr.copy_to_nonoverlapping(dst.as_mut_ptr(), dst.len()) };
    }

    fn value_region<V: IrValue>(&self, v: &V) -> Result<(u64, usize), BackendError> {
        let dtype = DType::from_storage(v.storage_type())?;
        let numel = value_numel(v)?;
        let bytes = numel
            .checked_mul(dtype.byte_size() as usize)
            .ok_or_else(|| BackendError::new(ErrorStatus::ShapeOverflow, format!("value of {numel} elements")))?;
        Ok((self.offset_of(v.address()), bytes))
    }

    /// Writes the whole content of `v` at its global address.
    pub fn value_s2d<V: IrValue>(&self, v: &V, src: &[u8]) -> Result<(), BackendError> {
        let (offset, bytes) = self.value_region(v)?;
        assert_eq!(src.len(), bytes, "host buffer does not match value size");
        let ptr = self.host_ptr(offset, bytes);
        unsafe { ptr.copy_from_nonoverlapping(src.as_ptr(), bytes) };
        Ok(())
    }

    /// Reads the whole content of `v` from its global address.
    pub fn value_d2s<V: IrValue>(&self, v: &V, dst: &mut [u8]) -> Result<(), BackendError> {
        let (offset, bytes) = self.value_region(v)?;
        assert_eq!(dst.len(), bytes, "host buffer does not match value size");
        let ptr = self.host_ptr(offset, bytes);
        unsafe { ptr.copy_to_nonoverlapping(dst.as_mut_ptr(), bytes) };
        Ok(())
    }

    /// Writes typed host data at a global address.
    pub fn store<T: Element>(&self, addr: u64, src: &[T]) {
        let src = as_bytes(src);
        let ptr = self.host_ptr(self.offset_of(addr), src.len());
        unsafe { ptr.copy_from_nonoverlapping(src.as_ptr(), src.len()) };
    }

    /// Reads typed host data from a global address.
    pub fn load<T: Element>(&self, addr: u64, dst: &mut [T]) {
        let dst = as_bytes_mut(dst);
        let ptr = self.host_ptr(self.offset_of(addr), dst.len());
        unsafe { ptr.copy_to_nonoverlapping(dst.as_mut_ptr(), dst.len()) };
    }

    /// Reads the content of `v` as elements of `T`, which must be its element type.
    pub fn read_value<T: Element, V: IrValue>(&self, v: &V) -> Result<Vec<T>, BackendError> {
        let dtype = DType::from_storage(v.storage_type())?;
        if dtype != T::DTYPE {
            return Err(BackendError::new(
                ErrorStatus::UnsupportedDType,
                format!("value holds {dtype}, read as {}", T::DTYPE),
            ));
        }
        let mut data = vec![T::default(); value_numel(v)?];
        self.load(v.address(), &mut data);
        Ok(data)
    }
}
