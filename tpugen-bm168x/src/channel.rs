//! Data movement (GDMA) and compute (BDC) instruction channels.
//!
//! Each channel owns a command id node and a command buffer. Buffers, group id
//! lists and total id counters live in one heap block whose address is handed
//! to the runtime at init, the runtime appends to them while instructions are
//! generated. This side only clears them between regions and reads them back.

use std::{
    ffi::{c_int, c_void, CStr},
    ptr::{self, NonNull},
};

use tpugen_core::{BackendError, ErrorStatus, GdmaFormat, Stride4D};

use crate::ffi::{CmdIdNode, RawBuffer, RuntimeFns};

/// Capacity of each group id list
pub const GROUP_ID_CAPACITY: usize = 0x1_0000;

/// One of the three command id nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Data movement
    Gdma,
    /// Compute
    Bdc,
    /// Coordination node used for cross channel sync
    CmdId,
}

/// Direction of a data movement, S is global (system) memory, L local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MoveDirection {
    S2L = 0,
    L2S = 1,
    S2S = 2,
    L2L = 3,
}

/// A strided move between global and local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideMove {
    pub local_addr: i32,
    pub local_idx: i32,
    pub sys_addr: u64,
    /// (n, c, h, w) of the source
    pub shape: [i32; 4],
    pub src_stride: Stride4D,
    pub dst_stride: Stride4D,
    pub format: GdmaFormat,
    pub direction: MoveDirection,
    pub transpose: bool,
}

/// A move of a densely packed tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactMove {
    pub local_addr: i32,
    pub local_idx: i32,
    pub sys_addr: u64,
    /// (n, c, h, w) of the source
    pub shape: [i32; 4],
    pub format: GdmaFormat,
    pub direction: MoveDirection,
    pub transpose: bool,
}

/// A move replicating one channel over `dst_c` lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMove {
    pub src_addr: u64,
    pub src_local_idx: i32,
    pub dst_local_addr: i32,
    pub dst_local_idx: i32,
    /// (n, h, w) of the source
    pub src_shape: [i32; 3],
    pub dst_c: i32,
    /// (n, h) strides, only used with `stride_enable`
    pub src_stride: [u32; 2],
    pub dst_stride: [u32; 2],
    pub format: GdmaFormat,
    pub stride_enable: bool,
    pub direction: MoveDirection,
}

#[derive(Debug)]
struct Bookkeeping {
    gdma_buffer: RawBuffer<u32>,
    bdc_buffer: RawBuffer<u32>,
    gdma_group_id: RawBuffer<u32>,
    bdc_group_id: RawBuffer<u32>,
    gdma_total_id: u32,
    bdc_total_id: u32,
    cmdid_groupnum: c_int,
}

fn alloc_buffer(capacity: usize) -> RawBuffer<u32> {
    let data = Box::into_raw(vec![0u32; capacity].into_boxed_slice()).cast::<u32>();
    RawBuffer { data, len: 0, capacity }
}

unsafe fn free_buffer(buffer: &RawBuffer<u32>) {
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buffer.data, buffer.capacity)));
}

unsafe fn buffer_contents(buffer: &RawBuffer<u32>) -> Vec<u32> {
    std::slice::from_raw_parts(buffer.data, buffer.len.min(buffer.capacity)).to_vec()
}

unsafe fn reset_group_ids(group_ids: &mut RawBuffer<u32>) {
    *group_ids.data = 0;
    group_ids.len = 1;
}

/// State of both channels at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub gdma_words: Vec<u32>,
    pub bdc_words: Vec<u32>,
    pub gdma_group_ids: Vec<u32>,
    pub bdc_group_ids: Vec<u32>,
    pub gdma_total_id: u32,
    pub bdc_total_id: u32,
    pub groupnum: i32,
    pub cycles: [i64; 3],
    pub open_divides: usize,
}

/// Both instruction channels of one initialized backend.
#[derive(Debug)]
pub struct Channels {
    fns: RuntimeFns,
    gdma_node: CmdIdNode,
    bdc_node: CmdIdNode,
    cmdid_node: CmdIdNode,
    book: NonNull<Bookkeeping>,
    open_divides: usize,
}

// Nodes and bookkeeping are only touched through &mut self or while the owning
// backend is locked
unsafe impl Send for Channels {}

impl Channels {
    /// Creates the three command id nodes and registers bookkeeping with the
    /// runtime. The runtime must be initialized.
    pub(crate) fn new(fns: RuntimeFns, cmd_buffer_words: usize) -> Result<Channels, BackendError> {
        let cmdid_node = unsafe { (fns.create_cmd_id_node)() };
        let bdc_node = unsafe { (fns.create_cmd_id_node)() };
        let gdma_node = unsafe { (fns.create_cmd_id_node)() };
        if cmdid_node.is_null() || bdc_node.is_null() || gdma_node.is_null() {
            for node in [gdma_node, bdc_node, cmdid_node] {
                if !node.is_null() {
                    unsafe { (fns.destroy_cmd_id_node)(node) };
                }
            }
            return Err(BackendError::new(ErrorStatus::Initialization, "runtime failed to create command id nodes"));
        }
        let book = Box::new(Bookkeeping {
            gdma_buffer: alloc_buffer(cmd_buffer_words),
            bdc_buffer: alloc_buffer(cmd_buffer_words),
            gdma_group_id: alloc_buffer(GROUP_ID_CAPACITY),
            bdc_group_id: alloc_buffer(GROUP_ID_CAPACITY),
            gdma_total_id: 0,
            bdc_total_id: 0,
            cmdid_groupnum: 1,
        });
        let raw = Box::into_raw(book);
        unsafe {
            reset_group_ids(&mut (*raw).gdma_group_id);
            reset_group_ids(&mut (*raw).bdc_group_id);
            (fns.set_cmd_buffer_ptr)(
                ptr::addr_of_mut!((*raw).gdma_buffer).cast::<c_void>(),
                ptr::addr_of_mut!((*raw).bdc_buffer).cast::<c_void>(),
            );
            (fns.set_total_id_ptr)(
                ptr::addr_of_mut!((*raw).gdma_total_id),
                ptr::addr_of_mut!((*raw).bdc_total_id),
                cmdid_node,
                ptr::addr_of_mut!((*raw).gdma_group_id).cast::<c_void>(),
                ptr::addr_of_mut!((*raw).bdc_group_id).cast::<c_void>(),
                ptr::addr_of_mut!((*raw).cmdid_groupnum),
            );
        }
        log::debug!("created command id nodes, buffers of {cmd_buffer_words} words");
        Ok(Channels {
            fns,
            gdma_node,
            bdc_node,
            cmdid_node,
            // Box::into_raw is never null
            book: unsafe { NonNull::new_unchecked(raw) },
            open_divides: 0,
        })
    }

    fn node(&self, channel: Channel) -> CmdIdNode {
        match channel {
            Channel::Gdma => self.gdma_node,
            Channel::Bdc => self.bdc_node,
            Channel::CmdId => self.cmdid_node,
        }
    }

    /// Starts a new region: ids reset, buffers emptied, one group per channel.
    pub fn reset(&mut self) {
        unsafe {
            (self.fns.reset_cmd_id)(self.cmdid_node);
            (self.fns.reset_cmd_id)(self.bdc_node);
            (self.fns.reset_cmd_id)(self.gdma_node);
            let book = self.book.as_mut();
            reset_group_ids(&mut book.gdma_group_id);
            reset_group_ids(&mut book.bdc_group_id);
            book.gdma_buffer.len = 0;
            book.bdc_buffer.len = 0;
            book.cmdid_groupnum = 1;
        }
        self.open_divides = 0;
        log::trace!("channels reset");
    }

    /// Splits the coordination node's next id across both channels.
    pub fn divide_sync_id(&mut self) {
        unsafe { (self.fns.cmd_id_divide)(self.cmdid_node, self.bdc_node, self.gdma_node) };
        self.open_divides += 1;
        log::trace!("divide sync id, {} open", self.open_divides);
    }

    /// Joins both channels back into the coordination node.
    pub fn merge_sync_id(&mut self) -> Result<(), BackendError> {
        if self.open_divides == 0 {
            return Err(BackendError::new(ErrorStatus::ChannelDesync, "merge_sync_id without a matching divide_sync_id"));
        }
        unsafe { (self.fns.cmd_id_merge)(self.cmdid_node, self.bdc_node, self.gdma_node) };
        self.open_divides -= 1;
        log::trace!("merge sync id, {} open", self.open_divides);
        Ok(())
    }

    pub fn open_divides(&self) -> usize {
        self.open_divides
    }

    /// Fails if the region left a divide unmatched.
    pub fn check_synced(&self) -> Result<(), BackendError> {
        match self.open_divides {
            0 => Ok(()),
            n => Err(BackendError::new(ErrorStatus::ChannelDesync, format!("{n} divide_sync_id left unmatched"))),
        }
    }

    pub fn set_cycle(&mut self, channel: Channel, cycle: i64) {
        unsafe { (self.fns.set_cmd_id_cycle)(self.node(channel), cycle) };
    }

    pub fn cycle(&self, channel: Channel) -> i64 {
        unsafe { (self.fns.get_cmd_id_cycle)(self.node(channel)) }
    }

    /// Name prefix the runtime puts in front of its dumps for this channel.
    pub fn set_prefix(&mut self, channel: Channel, prefix: &CStr) {
        unsafe { (self.fns.set_cmd_id_prefix)(self.node(channel), prefix.as_ptr()) };
    }

    /// Runtime handle of a command id node, for vendor calls not wrapped here.
    pub fn raw_node(&self, channel: Channel) -> CmdIdNode {
        self.node(channel)
    }

    pub fn tensor_stride_move(&mut self, mv: &StrideMove) -> Result<(), BackendError> {
        let [n, c, h, w] = mv.shape;
        let src = stride_u32(mv.src_stride)?;
        let dst = stride_u32(mv.dst_stride)?;
        unsafe {
            (self.fns.tensor_stride_move_gen_cmd)(
                mv.local_addr,
                mv.local_idx,
                mv.sys_addr,
                n,
                c,
                h,
                w,
                src[0],
                src[1],
                src[2],
                src[3],
                dst[0],
                dst[1],
                dst[2],
                dst[3],
                mv.format as c_int,
                mv.direction as c_int,
                c_int::from(mv.transpose),
                self.gdma_node,
            );
        }
        Ok(())
    }

    pub fn tensor_compact_move(&mut self, mv: &CompactMove) {
        let [n, c, h, w] = mv.shape;
        unsafe {
            (self.fns.tensor_compact_move_gen_cmd)(
                mv.local_addr,
                mv.local_idx,
                mv.sys_addr,
                n,
                c,
                h,
                w,
                mv.format as c_int,
                mv.direction as c_int,
                c_int::from(mv.transpose),
                self.gdma_node,
            );
        }
    }

    pub fn tensor_broadcast_move(&mut self, mv: &BroadcastMove) {
        let [n, h, w] = mv.src_shape;
        unsafe {
            (self.fns.tensor_broadcast_move_gen_cmd)(
                mv.src_addr,
                mv.src_local_idx,
                mv.dst_local_addr,
                mv.dst_local_idx,
                n,
                h,
                w,
                mv.dst_c,
                mv.src_stride[0],
                mv.src_stride[1],
                mv.dst_stride[0],
                mv.dst_stride[1],
                mv.format as c_int,
                c_int::from(mv.stride_enable),
                mv.direction as c_int,
                self.gdma_node,
            );
        }
    }

    /// Bytes of encoded data movement commands in this region.
    pub fn gdma_bytes(&self) -> usize {
        unsafe { self.book.as_ref().gdma_buffer.len * 4 }
    }

    /// Bytes of encoded compute commands in this region.
    pub fn bdc_bytes(&self) -> usize {
        unsafe { self.book.as_ref().bdc_buffer.len * 4 }
    }

    pub fn gdma_words(&self) -> Vec<u32> {
        unsafe { buffer_contents(&self.book.as_ref().gdma_buffer) }
    }

    pub fn bdc_words(&self) -> Vec<u32> {
        unsafe { buffer_contents(&self.book.as_ref().bdc_buffer) }
    }

    /// Commands issued on each channel since init, (gdma, bdc).
    pub fn total_ids(&self) -> (u32, u32) {
        let book = unsafe { self.book.as_ref() };
        (book.gdma_total_id, book.bdc_total_id)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let book = unsafe { self.book.as_ref() };
        unsafe {
            ChannelSnapshot {
                gdma_words: buffer_contents(&book.gdma_buffer),
                bdc_words: buffer_contents(&book.bdc_buffer),
                gdma_group_ids: buffer_contents(&book.gdma_group_id),
                bdc_group_ids: buffer_contents(&book.bdc_group_id),
                gdma_total_id: book.gdma_total_id,
                bdc_total_id: book.bdc_total_id,
                groupnum: book.cmdid_groupnum,
                cycles: [self.cycle(Channel::Gdma), self.cycle(Channel::Bdc), self.cycle(Channel::CmdId)],
                open_divides: self.open_divides,
            }
        }
    }
}

fn stride_u32(stride: Stride4D) -> Result<[u32; 4], BackendError> {
    let cast = |s: i64| {
        u32::try_from(s).map_err(|_| BackendError::new(ErrorStatus::ShapeOverflow, format!("stride {s} does not fit a move command")))
    };
    Ok([cast(stride.n)?, cast(stride.c)?, cast(stride.h)?, cast(stride.w)?])
}

impl Drop for Channels {
    fn drop(&mut self) {
        unsafe {
            // Compute and data movement nodes depend on the coordination node
            (self.fns.destroy_cmd_id_node)(self.gdma_node);
            (self.fns.destroy_cmd_id_node)(self.bdc_node);
            (self.fns.destroy_cmd_id_node)(self.cmdid_node);
            // Bookkeeping is freed below, the runtime must not keep writing to it
            (self.fns.set_cmd_buffer_ptr)(ptr::null_mut(), ptr::null_mut());
            (self.fns.set_total_id_ptr)(
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            let book = Box::from_raw(self.book.as_ptr());
            free_buffer(&book.gdma_buffer);
            free_buffer(&book.bdc_buffer);
            free_buffer(&book.gdma_group_id);
            free_buffer(&book.bdc_group_id);
        }
        log::debug!("destroyed command id nodes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpugen_core::ChipFamily;

    use crate::{dummy, test_util::serial};

    const WORDS: usize = 1024;

    fn channels() -> Channels {
        let fns = dummy::runtime_fns(ChipFamily::BM1684X);
        unsafe {
            (fns.cmodel_init)(0, 1 << 12);
            (fns.allow_store_cmd)();
        }
        let mut channels = Channels::new(fns, WORDS).unwrap();
        channels.reset();
        channels
    }

    fn finish(channels: Channels) {
        let fns = channels.fns;
        drop(channels);
        unsafe { (fns.cmodel_deinit)(0) };
    }

    fn compact(sys_addr: u64) -> CompactMove {
        CompactMove {
            local_addr: 0,
            local_idx: 0,
            sys_addr,
            shape: [1, 64, 4, 4],
            format: GdmaFormat::Float32,
            direction: MoveDirection::S2L,
            transpose: false,
        }
    }

    #[test]
    fn fresh_region_has_one_group() {
        let _guard = serial();
        let channels = channels();
        let snapshot = channels.snapshot();
        assert_eq!(snapshot.gdma_group_ids, [0]);
        assert_eq!(snapshot.bdc_group_ids, [0]);
        assert_eq!(snapshot.groupnum, 1);
        assert!(snapshot.gdma_words.is_empty());
        finish(channels);
    }

    #[test]
    fn moves_land_on_gdma_channel() {
        let _guard = serial();
        let mut channels = channels();
        channels.tensor_compact_move(&compact(0x1_0000_0000));
        channels.tensor_broadcast_move(&BroadcastMove {
            src_addr: 0x1_0000_0040,
            src_local_idx: 0,
            dst_local_addr: 0x100,
            dst_local_idx: 0,
            src_shape: [1, 1, 16],
            dst_c: 64,
            src_stride: [0, 0],
            dst_stride: [0, 0],
            format: GdmaFormat::Int8,
            stride_enable: false,
            direction: MoveDirection::S2L,
        });
        assert!(channels.gdma_bytes() > 0);
        assert_eq!(channels.bdc_bytes(), 0);
        let snapshot = channels.snapshot();
        assert_eq!(snapshot.gdma_group_ids, [2]);
        assert_eq!(snapshot.cycles[0], 2);
        finish(channels);
    }

    #[test]
    fn stride_move_rejects_oversized_stride() {
        let _guard = serial();
        let mut channels = channels();
        let mv = StrideMove {
            local_addr: 0,
            local_idx: 0,
            sys_addr: 0,
            shape: [1, 1, 1, 1],
            src_stride: Stride4D { n: 1 << 40, c: 1, h: 1, w: 1 },
            dst_stride: Stride4D { n: 1, c: 1, h: 1, w: 1 },
            format: GdmaFormat::Float32,
            direction: MoveDirection::L2S,
            transpose: false,
        };
        let err = channels.tensor_stride_move(&mv).unwrap_err();
        assert_eq!(err.status, ErrorStatus::ShapeOverflow);
        assert_eq!(channels.gdma_bytes(), 0);
        finish(channels);
    }

    #[test]
    fn sync_pairs() {
        let _guard = serial();
        let mut channels = channels();
        assert_eq!(channels.merge_sync_id().unwrap_err().status, ErrorStatus::ChannelDesync);
        channels.divide_sync_id();
        channels.divide_sync_id();
        assert_eq!(channels.check_synced().unwrap_err().status, ErrorStatus::ChannelDesync);
        channels.merge_sync_id().unwrap();
        channels.merge_sync_id().unwrap();
        channels.check_synced().unwrap();
        finish(channels);
    }

    #[test]
    fn merge_joins_channel_ids() {
        let _guard = serial();
        let mut channels = channels();
        channels.divide_sync_id();
        channels.tensor_compact_move(&compact(0x1_0000_0000));
        channels.tensor_compact_move(&compact(0x1_0000_1000));
        channels.merge_sync_id().unwrap();
        let (gdma, _, _) = unsafe { dummy::node_ids(channels.raw_node(Channel::CmdId)) };
        assert_eq!(gdma, 2);
        finish(channels);
    }

    #[test]
    fn cycles_and_prefix() {
        let _guard = serial();
        let mut channels = channels();
        channels.set_cycle(Channel::Bdc, 42);
        assert_eq!(channels.cycle(Channel::Bdc), 42);
        assert_eq!(channels.cycle(Channel::Gdma), 0);
        channels.set_prefix(Channel::CmdId, c"layer0_");
        channels.reset();
        assert_eq!(channels.cycle(Channel::Bdc), 0);
        finish(channels);
    }
}
