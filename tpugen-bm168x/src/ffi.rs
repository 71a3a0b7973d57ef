//! Entry points of the cmodel runtimes.
//!
//! Every chip family ships its own shared library exporting the same set of
//! C symbols. They are resolved once at bind time into [`RuntimeFns`], a
//! missing symbol fails the whole binding.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_longlong, c_ulonglong, c_void};

use libloading::Library;
use tpugen_core::{BackendError, ErrorStatus};

/// Opaque `CMD_ID_NODE *` owned by the runtime.
pub type CmdIdNode = *mut c_void;

/// Fixed capacity array the runtime appends to.
///
/// Shared with the runtime through `set_cmd_buffer_ptr` and `set_total_id_ptr`.
/// The runtime writes at most `capacity` elements starting at `data` and keeps
/// `len` current.
#[repr(C)]
#[derive(Debug)]
pub struct RawBuffer<T> {
    pub data: *mut T,
    pub len: usize,
    pub capacity: usize,
}

pub type cmodel_init = unsafe extern "C" fn(c_int, c_ulonglong) -> c_int;
pub type cmodel_deinit = unsafe extern "C" fn(c_int);
pub type create_cmd_id_node = unsafe extern "C" fn() -> CmdIdNode;
pub type destroy_cmd_id_node = unsafe extern "C" fn(CmdIdNode);
pub type set_cmd_id_cycle = unsafe extern "C" fn(CmdIdNode, c_longlong);
pub type get_cmd_id_cycle = unsafe extern "C" fn(CmdIdNode) -> c_longlong;
pub type reset_cmd_id = unsafe extern "C" fn(CmdIdNode);
pub type policy_switch = unsafe extern "C" fn();
pub type get_global_memaddr = unsafe extern "C" fn(c_int) -> *mut c_void;
pub type set_cmd_buffer_ptr = unsafe extern "C" fn(*mut c_void, *mut c_void);
pub type set_cmd_id_prefix = unsafe extern "C" fn(CmdIdNode, *const c_char);
pub type tensor_stride_move_gen_cmd = unsafe extern "C" fn(
    c_int,       // local_mem_start_addr
    c_int,       // local_mem_idx
    c_ulonglong, // sys_mem_start_addr
    c_int,       // src_N
    c_int,       // src_C
    c_int,       // src_H
    c_int,       // src_W
    u32,         // src_N_stride
    u32,         // src_C_stride
    u32,         // src_H_stride
    u32,         // src_W_stride
    u32,         // dst_N_stride
    u32,         // dst_C_stride
    u32,         // dst_H_stride
    u32,         // dst_W_stride
    c_int,       // src_format
    c_int,       // direction
    c_int,       // transpose
    CmdIdNode,
);
pub type tensor_compact_move_gen_cmd = unsafe extern "C" fn(
    c_int,       // local_mem_start_addr
    c_int,       // local_mem_idx
    c_ulonglong, // sys_mem_start_addr
    c_int,       // src_N
    c_int,       // src_C
    c_int,       // src_H
    c_int,       // src_W
    c_int,       // src_format
    c_int,       // direction
    c_int,       // transpose
    CmdIdNode,
);
pub type tensor_broadcast_move_gen_cmd = unsafe extern "C" fn(
    c_ulonglong, // src_addr
    c_int,       // src_local_idx
    c_int,       // dst_lmem_start_addr
    c_int,       // dst_local_idx
    c_int,       // src_N
    c_int,       // src_H
    c_int,       // src_W
    c_int,       // dst_C
    u32,         // src_N_stride
    u32,         // src_H_stride
    u32,         // dst_N_stride
    u32,         // dst_H_stride
    c_int,       // data_format
    c_int,       // stride_enable
    c_int,       // direction
    CmdIdNode,
);
pub type set_total_id_ptr = unsafe extern "C" fn(
    *mut u32,   // gdma_total_id
    *mut u32,   // bdc_total_id
    CmdIdNode,  // cmdid_node
    *mut c_void, // gdma_group_id
    *mut c_void, // bdc_group_id
    *mut c_int, // cmdid_groupnum
);
pub type sg_set_profile_dump = unsafe extern "C" fn(bool);
pub type sg_stas_dump = unsafe extern "C" fn(CmdIdNode);
pub type sg_flops_dump = unsafe extern "C" fn(c_longlong, CmdIdNode);
pub type cmd_id_divide = unsafe extern "C" fn(CmdIdNode, CmdIdNode, CmdIdNode);
pub type cmd_id_merge = unsafe extern "C" fn(CmdIdNode, CmdIdNode, CmdIdNode);

/// Resolved entry points of one runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeFns {
    pub cmodel_init: cmodel_init,
    pub cmodel_deinit: cmodel_deinit,
    pub create_cmd_id_node: create_cmd_id_node,
    pub destroy_cmd_id_node: destroy_cmd_id_node,
    pub set_cmd_id_cycle: set_cmd_id_cycle,
    pub get_cmd_id_cycle: get_cmd_id_cycle,
    pub reset_cmd_id: reset_cmd_id,
    pub allow_store_cmd: policy_switch,
    pub forbid_store_cmd: policy_switch,
    pub use_atomic_cmodel: policy_switch,
    pub forbid_atomic_cmodel: policy_switch,
    pub get_global_memaddr: get_global_memaddr,
    pub set_cmd_buffer_ptr: set_cmd_buffer_ptr,
    pub set_cmd_id_prefix: set_cmd_id_prefix,
    pub allow_atomic_cmodel_assert: policy_switch,
    pub forbid_atomic_cmodel_assert: policy_switch,
    pub tensor_stride_move_gen_cmd: tensor_stride_move_gen_cmd,
    pub tensor_compact_move_gen_cmd: tensor_compact_move_gen_cmd,
    pub tensor_broadcast_move_gen_cmd: tensor_broadcast_move_gen_cmd,
    pub set_total_id_ptr: set_total_id_ptr,
    pub sg_set_profile_dump: sg_set_profile_dump,
    pub sg_stas_dump: sg_stas_dump,
    pub sg_flops_dump: sg_flops_dump,
    pub cmd_id_divide: cmd_id_divide,
    pub cmd_id_merge: cmd_id_merge,
}

impl RuntimeFns {
    /// Resolves every entry point from `lib`.
    ///
    /// # Safety
    /// `lib` must export these symbols with the signatures declared above,
    /// and must outlive the returned table.
    pub unsafe fn load(lib: &Library) -> Result<RuntimeFns, BackendError> {
        Ok(RuntimeFns {
            cmodel_init: load_symbol(lib, b"cmodel_init\0")?,
            cmodel_deinit: load_symbol(lib, b"cmodel_deinit\0")?,
            create_cmd_id_node: load_symbol(lib, b"create_cmd_id_node\0")?,
            destroy_cmd_id_node: load_symbol(lib, b"destroy_cmd_id_node\0")?,
            set_cmd_id_cycle: load_symbol(lib, b"set_cmd_id_cycle\0")?,
            get_cmd_id_cycle: load_symbol(lib, b"get_cmd_id_cycle\0")?,
            reset_cmd_id: load_symbol(lib, b"reset_cmd_id\0")?,
            allow_store_cmd: load_symbol(lib, b"allow_store_cmd\0")?,
            forbid_store_cmd: load_symbol(lib, b"forbid_store_cmd\0")?,
            use_atomic_cmodel: load_symbol(lib, b"use_atomic_cmodel\0")?,
            forbid_atomic_cmodel: load_symbol(lib, b"forbid_atomic_cmodel\0")?,
            get_global_memaddr: load_symbol(lib, b"get_global_memaddr\0")?,
            set_cmd_buffer_ptr: load_symbol(lib, b"set_cmd_buffer_ptr\0")?,
            set_cmd_id_prefix: load_symbol(lib, b"set_cmd_id_prefix\0")?,
            allow_atomic_cmodel_assert: load_symbol(lib, b"allow_atomic_cmodel_assert\0")?,
            forbid_atomic_cmodel_assert: load_symbol(lib, b"forbid_atomic_cmodel_assert\0")?,
            tensor_stride_move_gen_cmd: load_symbol(lib, b"tensor_stride_move_gen_cmd\0")?,
            tensor_compact_move_gen_cmd: load_symbol(lib, b"tensor_compact_move_gen_cmd\0")?,
            tensor_broadcast_move_gen_cmd: load_symbol(lib, b"tensor_broadcast_move_gen_cmd\0")?,
            set_total_id_ptr: load_symbol(lib, b"set_total_id_ptr\0")?,
            sg_set_profile_dump: load_symbol(lib, b"sg_set_profile_dump\0")?,
            sg_stas_dump: load_symbol(lib, b"sg_stas_dump\0")?,
            sg_flops_dump: load_symbol(lib, b"sg_flops_dump\0")?,
            cmd_id_divide: load_symbol(lib, b"cmd_id_divide\0")?,
            cmd_id_merge: load_symbol(lib, b"cmd_id_merge\0")?,
        })
    }
}

unsafe fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, BackendError> {
    let symbol = lib.get::<T>(name).map_err(|err| {
        let name = String::from_utf8_lossy(&name[..name.len() - 1]);
        BackendError::new(ErrorStatus::SymbolNotFound, format!("can't find symbol {name}: {err}"))
    })?;
    Ok(*symbol)
}
