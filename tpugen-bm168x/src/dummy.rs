//! In-process stand-in for the cmodel runtimes.
//!
//! Implements the whole entry point contract in Rust so that a backend can be
//! driven without a vendor library, for dry runs and tests. Global memory is a
//! zeroed host arena, command id nodes are plain counters and the move
//! primitives append a few descriptive words per command to the registered
//! data movement buffer. Like the real runtimes, all state is process wide,
//! with one independent instance per chip family the way every family loads
//! its own library.

use std::{
    collections::BTreeMap,
    ffi::{c_char, c_int, c_longlong, c_ulonglong, c_void, CStr},
    ptr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tpugen_core::ChipFamily;

use crate::ffi::{CmdIdNode, RawBuffer, RuntimeFns};

const OP_STRIDE_MOVE: u32 = 1;
const OP_COMPACT_MOVE: u32 = 2;
const OP_BROADCAST_MOVE: u32 = 3;

#[derive(Debug, Default)]
struct DummyNode {
    gdma_cmd_id: u32,
    bd_cmd_id: u32,
    cycle: i64,
    prefix: String,
}

#[derive(Debug)]
struct Arena {
    memory: Box<[u8]>,
    users: usize,
}

#[derive(Debug)]
struct DummyState {
    arenas: BTreeMap<c_int, Arena>,
    store_cmd: bool,
    atomic: bool,
    atomic_assert: bool,
    profile_dump: bool,
    gdma_buffer: *mut RawBuffer<u32>,
    bdc_buffer: *mut RawBuffer<u32>,
    gdma_total_id: *mut u32,
    bdc_total_id: *mut u32,
    gdma_group_id: *mut RawBuffer<u32>,
    bdc_group_id: *mut RawBuffer<u32>,
    stas_dumps: usize,
    flops: i64,
}

// Pointers are only dereferenced while the lock is held
unsafe impl Send for DummyState {}

const INITIAL: DummyState = DummyState {
    arenas: BTreeMap::new(),
    store_cmd: true,
    atomic: false,
    atomic_assert: false,
    profile_dump: false,
    gdma_buffer: ptr::null_mut(),
    bdc_buffer: ptr::null_mut(),
    gdma_total_id: ptr::null_mut(),
    bdc_total_id: ptr::null_mut(),
    gdma_group_id: ptr::null_mut(),
    bdc_group_id: ptr::null_mut(),
    stas_dumps: 0,
    flops: 0,
};

static STATES: [Mutex<DummyState>; 2] = [Mutex::new(INITIAL), Mutex::new(INITIAL)];

const fn slot(family: ChipFamily) -> usize {
    match family {
        ChipFamily::BM1684 => 0,
        ChipFamily::BM1684X => 1,
    }
}

fn state_at(slot: usize) -> MutexGuard<'static, DummyState> {
    STATES[slot].lock().unwrap_or_else(PoisonError::into_inner)
}

fn state<const S: usize>() -> MutexGuard<'static, DummyState> {
    state_at(S)
}

/// Policy flags and counters of the dummy runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyStats {
    pub store_cmd: bool,
    pub atomic: bool,
    pub atomic_assert: bool,
    pub profile_dump: bool,
    /// Number of `sg_stas_dump` calls
    pub stas_dumps: usize,
    /// Sum of all flops passed to `sg_flops_dump`
    pub flops: i64,
}

pub fn stats(family: ChipFamily) -> DummyStats {
    let state = state_at(slot(family));
    DummyStats {
        store_cmd: state.store_cmd,
        atomic: state.atomic,
        atomic_assert: state.atomic_assert,
        profile_dump: state.profile_dump,
        stas_dumps: state.stas_dumps,
        flops: state.flops,
    }
}

/// Entry point table of the dummy instance of `family`.
pub fn runtime_fns(family: ChipFamily) -> RuntimeFns {
    match family {
        ChipFamily::BM1684 => fns::<{ slot(ChipFamily::BM1684) }>(),
        ChipFamily::BM1684X => fns::<{ slot(ChipFamily::BM1684X) }>(),
    }
}

fn fns<const S: usize>() -> RuntimeFns {
    RuntimeFns {
        cmodel_init: cmodel_init::<S>,
        cmodel_deinit: cmodel_deinit::<S>,
        create_cmd_id_node,
        destroy_cmd_id_node,
        set_cmd_id_cycle,
        get_cmd_id_cycle,
        reset_cmd_id,
        allow_store_cmd: allow_store_cmd::<S>,
        forbid_store_cmd: forbid_store_cmd::<S>,
        use_atomic_cmodel: use_atomic_cmodel::<S>,
        forbid_atomic_cmodel: forbid_atomic_cmodel::<S>,
        get_global_memaddr: get_global_memaddr::<S>,
        set_cmd_buffer_ptr: set_cmd_buffer_ptr::<S>,
        set_cmd_id_prefix,
        allow_atomic_cmodel_assert: allow_atomic_cmodel_assert::<S>,
        forbid_atomic_cmodel_assert: forbid_atomic_cmodel_assert::<S>,
        tensor_stride_move_gen_cmd: tensor_stride_move_gen_cmd::<S>,
        tensor_compact_move_gen_cmd: tensor_compact_move_gen_cmd::<S>,
        tensor_broadcast_move_gen_cmd: tensor_broadcast_move_gen_cmd::<S>,
        set_total_id_ptr: set_total_id_ptr::<S>,
        sg_set_profile_dump: sg_set_profile_dump::<S>,
        sg_stas_dump: sg_stas_dump::<S>,
        sg_flops_dump: sg_flops_dump::<S>,
        cmd_id_divide,
        cmd_id_merge,
    }
}

unsafe fn node<'a>(node: CmdIdNode) -> &'a mut DummyNode {
    &mut *node.cast::<DummyNode>()
}

unsafe fn push(buffer: *mut RawBuffer<u32>, words: &[u32]) -> bool {
    let Some(buffer) = buffer.as_mut() else {
        log::warn!("dummy runtime: no command buffer registered, dropping command");
        return false;
    };
    if buffer.len + words.len() > buffer.capacity {
        log::warn!("dummy runtime: command buffer full, dropping command");
        return false;
    }
    ptr::copy_nonoverlapping(words.as_ptr(), buffer.data.add(buffer.len), words.len());
    buffer.len += words.len();
    true
}

unsafe fn bump_group(group_ids: *mut RawBuffer<u32>) {
    if let Some(group_ids) = group_ids.as_mut() {
        if group_ids.len > 0 {
            *group_ids.data.add(group_ids.len - 1) += 1;
        }
    }
}

// Every data movement command ends up here
unsafe fn gen_gdma<const S: usize>(pid_node: CmdIdNode, words: &[u32]) {
    let state = state::<S>();
    let node = node(pid_node);
    node.gdma_cmd_id += 1;
    node.cycle += 1;
    if let Some(total) = state.gdma_total_id.as_mut() {
        *total += 1;
    }
    bump_group(state.gdma_group_id);
    if state.store_cmd {
        push(state.gdma_buffer, words);
    }
}

unsafe extern "C" fn cmodel_init<const S: usize>(node_idx: c_int, gmem_size: c_ulonglong) -> c_int {
    let Ok(bytes) = usize::try_from(gmem_size) else {
        return -1;
    };
    let mut state = state::<S>();
    let arena = state
        .arenas
        .entry(node_idx)
        .or_insert_with(|| Arena { memory: vec![0; bytes].into_boxed_slice(), users: 0 });
    // A shared node can't grow under its current users
    if arena.memory.len() < bytes {
        log::warn!("dummy runtime: node {node_idx} holds {} bytes, {bytes} requested", arena.memory.len());
        return -1;
    }
    arena.users += 1;
    log::debug!("dummy runtime: node {node_idx} initialized with {} bytes", arena.memory.len());
    0
}

unsafe extern "C" fn cmodel_deinit<const S: usize>(node_idx: c_int) {
    let mut state = state::<S>();
    if let Some(arena) = state.arenas.get_mut(&node_idx) {
        arena.users -= 1;
        if arena.users == 0 {
            state.arenas.remove(&node_idx);
        }
    }
}

unsafe extern "C" fn create_cmd_id_node() -> CmdIdNode {
    Box::into_raw(Box::<DummyNode>::default()).cast()
}

unsafe extern "C" fn destroy_cmd_id_node(pid_node: CmdIdNode) {
    if !pid_node.is_null() {
        drop(Box::from_raw(pid_node.cast::<DummyNode>()));
    }
}

unsafe extern "C" fn set_cmd_id_cycle(pid_node: CmdIdNode, cycle: c_longlong) {
    node(pid_node).cycle = cycle;
}

unsafe extern "C" fn get_cmd_id_cycle(pid_node: CmdIdNode) -> c_longlong {
    node(pid_node).cycle
}

unsafe extern "C" fn reset_cmd_id(pid_node: CmdIdNode) {
    let node = node(pid_node);
    node.gdma_cmd_id = 0;
    node.bd_cmd_id = 0;
    node.cycle = 0;
}

unsafe extern "C" fn allow_store_cmd<const S: usize>() {
    state::<S>().store_cmd = true;
}

unsafe extern "C" fn forbid_store_cmd<const S: usize>() {
    state::<S>().store_cmd = false;
}

unsafe extern "C" fn use_atomic_cmodel<const S: usize>() {
    state::<S>().atomic = true;
}

unsafe extern "C" fn forbid_atomic_cmodel<const S: usize>() {
    state::<S>().atomic = false;
}

unsafe extern "C" fn allow_atomic_cmodel_assert<const S: usize>() {
    state::<S>().atomic_assert = true;
}

unsafe extern "C" fn forbid_atomic_cmodel_assert<const S: usize>() {
    state::<S>().atomic_assert = false;
}

unsafe extern "C" fn get_global_memaddr<const S: usize>(node_idx: c_int) -> *mut c_void {
    state::<S>()
        .arenas
        .get_mut(&node_idx)
        .map_or(ptr::null_mut(), |arena| arena.memory.as_mut_ptr().cast())
}

unsafe extern "C" fn set_cmd_buffer_ptr<const S: usize>(gdma_buffer: *mut c_void, bdc_buffer: *mut c_void) {
    let mut state = state::<S>();
    state.gdma_buffer = gdma_buffer.cast();
    state.bdc_buffer = bdc_buffer.cast();
}

unsafe extern "C" fn set_cmd_id_prefix(pid_node: CmdIdNode, name_prefix: *const c_char) {
    if !name_prefix.is_null() {
        node(pid_node).prefix = CStr::from_ptr(name_prefix).to_string_lossy().into_owned();
    }
}

unsafe extern "C" fn tensor_stride_move_gen_cmd<const S: usize>(
    local_mem_start_addr: c_int,
    local_mem_idx: c_int,
    sys_mem_start_addr: c_ulonglong,
    src_n: c_int,
    src_c: c_int,
    src_h: c_int,
    src_w: c_int,
    src_n_stride: u32,
    src_c_stride: u32,
    src_h_stride: u32,
    src_w_stride: u32,
    dst_n_stride: u32,
    dst_c_stride: u32,
    dst_h_stride: u32,
    dst_w_stride: u32,
    src_format: c_int,
    direction: c_int,
    transpose: c_int,
    pid_node: CmdIdNode,
) {
    gen_gdma::<S>(
        pid_node,
        &[
            OP_STRIDE_MOVE,
            local_mem_start_addr as u32,
            local_mem_idx as u32,
            sys_mem_start_addr as u32,
            (sys_mem_start_addr >> 32) as u32,
            src_n as u32,
            src_c as u32,
            src_h as u32,
            src_w as u32,
            src_n_stride,
            src_c_stride,
            src_h_stride,
            src_w_stride,
            dst_n_stride,
            dst_c_stride,
            dst_h_stride,
            dst_w_stride,
            src_format as u32,
            direction as u32,
            transpose as u32,
        ],
    );
}

unsafe extern "C" fn tensor_compact_move_gen_cmd<const S: usize>(
    local_mem_start_addr: c_int,
    local_mem_idx: c_int,
    sys_mem_start_addr: c_ulonglong,
    src_n: c_int,
    src_c: c_int,
    src_h: c_int,
    src_w: c_int,
    src_format: c_int,
    direction: c_int,
    transpose: c_int,
    pid_node: CmdIdNode,
) {
    gen_gdma::<S>(
        pid_node,
        &[
            OP_COMPACT_MOVE,
            local_mem_start_addr as u32,
            local_mem_idx as u32,
            sys_mem_start_addr as u32,
            (sys_mem_start_addr >> 32) as u32,
            src_n as u32,
            src_c as u32,
            src_h as u32,
            src_w as u32,
            src_format as u32,
            direction as u32,
            transpose as u32,
        ],
    );
}

unsafe extern "C" fn tensor_broadcast_move_gen_cmd<const S: usize>(
    src_addr: c_ulonglong,
    src_local_idx: c_int,
    dst_lmem_start_addr: c_int,
    dst_local_idx: c_int,
    src_n: c_int,
    src_h: c_int,
    src_w: c_int,
    dst_c: c_int,
    src_n_stride: u32,
    src_h_stride: u32,
    dst_n_stride: u32,
    dst_h_stride: u32,
    data_format: c_int,
    stride_enable: c_int,
    direction: c_int,
    pid_node: CmdIdNode,
) {
    gen_gdma::<S>(
        pid_node,
        &[
            OP_BROADCAST_MOVE,
            src_addr as u32,
            (src_addr >> 32) as u32,
            src_local_idx as u32,
            dst_lmem_start_addr as u32,
            dst_local_idx as u32,
            src_n as u32,
            src_h as u32,
            src_w as u32,
            dst_c as u32,
            src_n_stride,
            src_h_stride,
            dst_n_stride,
            dst_h_stride,
            data_format as u32,
            stride_enable as u32,
            direction as u32,
        ],
    );
}

unsafe extern "C" fn set_total_id_ptr<const S: usize>(
    gdma_total_id: *mut u32,
    bdc_total_id: *mut u32,
    cmdid_node: CmdIdNode,
    gdma_group_id: *mut c_void,
    bdc_group_id: *mut c_void,
    cmdid_groupnum: *mut c_int,
) {
    let _ = cmdid_node;
    let _ = cmdid_groupnum;
    let mut state = state::<S>();
    state.gdma_total_id = gdma_total_id;
    state.bdc_total_id = bdc_total_id;
    state.gdma_group_id = gdma_group_id.cast();
    state.bdc_group_id = bdc_group_id.cast();
}

unsafe extern "C" fn sg_set_profile_dump<const S: usize>(enable: bool) {
    state::<S>().profile_dump = enable;
}

unsafe extern "C" fn sg_stas_dump<const S: usize>(pid_node: CmdIdNode) {
    let node = node(pid_node);
    log::debug!(
        "dummy runtime: {}gdma id {}, bdc id {}, cycle {}",
        node.prefix,
        node.gdma_cmd_id,
        node.bd_cmd_id,
        node.cycle
    );
    let mut state = state::<S>();
    let words = |buffer: *mut RawBuffer<u32>| buffer.as_ref().map_or(0, |b| b.len);
    let groups = |group_ids: *mut RawBuffer<u32>| group_ids.as_ref().map_or(0, |b| b.len);
    let total = |id: *mut u32| id.as_ref().copied().unwrap_or(0);
    log::debug!(
        "dummy runtime: stored {} gdma and {} bdc words in {} and {} groups, {} and {} commands total",
        words(state.gdma_buffer),
        words(state.bdc_buffer),
        groups(state.gdma_group_id),
        groups(state.bdc_group_id),
        total(state.gdma_total_id),
        total(state.bdc_total_id)
    );
    state.stas_dumps += 1;
}

unsafe extern "C" fn sg_flops_dump<const S: usize>(flops: c_longlong, pid_node: CmdIdNode) {
    let cycle = node(pid_node).cycle;
    log::debug!("dummy runtime: {flops} flops in {cycle} cycles");
    state::<S>().flops += flops;
}

unsafe extern "C" fn cmd_id_divide(p_cmd_src: CmdIdNode, p_cmd_dst0: CmdIdNode, p_cmd_dst1: CmdIdNode) {
    let src = node(p_cmd_src);
    let (gdma, bd, cycle) = (src.gdma_cmd_id, src.bd_cmd_id, src.cycle);
    for dst in [p_cmd_dst0, p_cmd_dst1] {
        let dst = node(dst);
        dst.gdma_cmd_id = gdma;
        dst.bd_cmd_id = bd;
        dst.cycle = cycle;
    }
}

unsafe extern "C" fn cmd_id_merge(p_cmd_dst: CmdIdNode, p_cmd_src0: CmdIdNode, p_cmd_src1: CmdIdNode) {
    let (src0, src1) = (node(p_cmd_src0), node(p_cmd_src1));
    let gdma = src0.gdma_cmd_id.max(src1.gdma_cmd_id);
    let bd = src0.bd_cmd_id.max(src1.bd_cmd_id);
    let cycle = src0.cycle.max(src1.cycle);
    let dst = node(p_cmd_dst);
    dst.gdma_cmd_id = gdma;
    dst.bd_cmd_id = bd;
    dst.cycle = cycle;
}

/// Command id and cycle count of a dummy command id node.
///
/// # Safety
/// `pid_node` must come from the dummy runtime and still be alive.
pub unsafe fn node_ids(pid_node: CmdIdNode) -> (u32, u32, i64) {
    let node = node(pid_node);
    (node.gdma_cmd_id, node.bd_cmd_id, node.cycle)
}
