use std::sync::{Mutex, MutexGuard, PoisonError};

use tpugen_bm168x::{
    BackendConfig, BackendError, BackendRegistry, Channel, CompactMove, ErrorStatus, MoveDirection, StrideMove,
};
use tpugen_core::{global_stride, ChipFamily, GdmaFormat};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn registry() -> BackendRegistry {
    BackendRegistry::new(BackendConfig {
        cmodel_gmem_size: Some(1 << 20),
        cmd_buffer_words: Some(4096),
        ..BackendConfig::dummy()
    })
}

fn load(sys_addr: u64) -> CompactMove {
    CompactMove {
        local_addr: 0,
        local_idx: 0,
        sys_addr,
        shape: [1, 64, 8, 8],
        format: GdmaFormat::Float32,
        direction: MoveDirection::S2L,
        transpose: false,
    }
}

#[test]
fn before_codegen_is_idempotent() -> Result<(), BackendError> {
    let _guard = serial();
    let mut registry = registry();
    let backend = registry.instance("BM1684X")?;
    let mut backend = backend.lock().unwrap();
    backend.before_codegen()?;
    backend.channels()?.tensor_compact_move(&load(0x1_0000_0000));
    backend.before_codegen()?;
    let once = backend.channels()?.snapshot();
    backend.before_codegen()?;
    let twice = backend.channels()?.snapshot();
    assert_eq!(once, twice);
    assert!(once.gdma_words.is_empty());
    assert_eq!(once.gdma_group_ids, [0]);
    assert_eq!(once.cycles, [0, 0, 0]);
    Ok(())
}

#[test]
fn region_with_bracketed_transfer() -> Result<(), BackendError> {
    let _guard = serial();
    let mut registry = registry();
    let backend = registry.instance("BM1684")?;
    let mut backend = backend.lock().unwrap();
    backend.before_codegen()?;
    let constants = backend.constants().clone();
    let channels = backend.channels()?;
    channels.divide_sync_id();
    channels.tensor_stride_move(&StrideMove {
        local_addr: 0x200,
        local_idx: 0,
        sys_addr: 0x1_0000_0000,
        shape: [1, 130, 4, 4],
        src_stride: global_stride(1, 130, 4, 4),
        dst_stride: constants.local_stride(1, 130, 4, 4, 4, true),
        format: GdmaFormat::Float32,
        direction: MoveDirection::S2L,
        transpose: false,
    })?;
    channels.merge_sync_id()?;
    assert_eq!(channels.open_divides(), 0);
    assert!(channels.gdma_bytes() > 0);
    let (gdma_total, bdc_total) = channels.total_ids();
    assert!(gdma_total >= 1);
    assert_eq!(bdc_total, 0);
    backend.after_codegen(1 << 20)?;
    Ok(())
}

#[test]
fn unmatched_divide_is_reported() -> Result<(), BackendError> {
    let _guard = serial();
    let mut registry = registry();
    let backend = registry.family_instance(ChipFamily::BM1684X)?;
    let mut backend = backend.lock().unwrap();
    backend.before_codegen()?;
    backend.channels()?.divide_sync_id();
    let err = backend.after_codegen(0).unwrap_err();
    assert_eq!(err.status, ErrorStatus::ChannelDesync);
    // next region starts clean
    backend.before_codegen()?;
    backend.after_codegen(0)?;
    Ok(())
}

#[test]
fn dry_run_stores_nothing() -> Result<(), BackendError> {
    let _guard = serial();
    let mut registry = registry();
    let backend = registry.instance("BM1684X")?;
    let mut backend = backend.lock().unwrap();
    backend.before_codegen()?;
    backend.set_command_issue_flag(false)?;
    backend.channels()?.tensor_compact_move(&load(0x1_0000_0000));
    let channels = backend.channels()?;
    assert_eq!(channels.gdma_bytes(), 0);
    assert_eq!(channels.cycle(Channel::Gdma), 1);
    backend.set_command_issue_flag(true)?;
    backend.channels()?.tensor_compact_move(&load(0x1_0000_0000));
    assert!(backend.channels()?.gdma_bytes() > 0);
    backend.after_codegen(0)?;
    Ok(())
}

#[test]
fn channels_need_open_region() -> Result<(), BackendError> {
    let _guard = serial();
    let mut registry = registry();
    let backend = registry.instance("BM1684X")?;
    let mut backend = backend.lock().unwrap();
    assert_eq!(backend.channels().unwrap_err().status, ErrorStatus::InvalidState);
    backend.deinit();
    assert_eq!(backend.before_codegen().unwrap_err().status, ErrorStatus::InvalidState);
    Ok(())
}

#[test]
fn families_keep_their_own_commands() -> Result<(), BackendError> {
    let _guard = serial();
    let mut registry = registry();
    let bm1684 = registry.instance("BM1684")?;
    let bm1684x = registry.instance("BM1684X")?;
    let mut bm1684 = bm1684.lock().unwrap();
    let mut bm1684x = bm1684x.lock().unwrap();
    bm1684.before_codegen()?;
    bm1684x.before_codegen()?;

    bm1684.channels()?.tensor_compact_move(&load(0x1_0000_0000));
    let stored = bm1684.channels()?.gdma_bytes();
    assert!(stored > 0);
    assert_eq!(bm1684x.channels()?.gdma_bytes(), 0);
    let (gdma_total, _) = bm1684.channels()?.total_ids();

    // the other family going away leaves this one registered
    bm1684x.deinit();
    bm1684.channels()?.tensor_compact_move(&load(0x1_0000_0000));
    let channels = bm1684.channels()?;
    assert_eq!(channels.gdma_bytes(), 2 * stored);
    assert_eq!(channels.total_ids().0, gdma_total + 1);
    bm1684.after_codegen(0)?;
    Ok(())
}
