//! Tests for the device context state machine
//!
//! Covers init/shutdown transitions and the gating of every buffer,
//! copy, and execute operation on the ready state.

use eva_npu::{NpuContext, NpuError, SoftNpu};

fn context(capacity: u64) -> NpuContext {
    NpuContext::new(Box::new(SoftNpu::with_capacity(capacity)))
}

#[test]
fn operations_fail_before_init() {
    let ctx = context(1024);

    assert!(matches!(
        ctx.alloc(16).unwrap_err(),
        NpuError::NotInitialized
    ));
    assert!(matches!(
        ctx.execute(b"blob", &[], &[]).unwrap_err(),
        NpuError::NotInitialized
    ));
    assert!(matches!(
        ctx.device_name().unwrap_err(),
        NpuError::NotInitialized
    ));
    assert!(matches!(
        ctx.lookup(0x1000).unwrap_err(),
        NpuError::NotInitialized
    ));
}

#[test]
fn copies_fail_before_init() {
    let ctx = context(1024);
    ctx.init().unwrap();
    let buf = ctx.alloc(16).unwrap();
    ctx.shutdown().unwrap();

    let err = ctx.copy_to_device(&buf, &[1, 2, 3]).unwrap_err();
    assert!(matches!(err, NpuError::NotInitialized));

    let mut out = [0u8; 3];
    let err = ctx.copy_from_device(&buf, &mut out).unwrap_err();
    assert!(matches!(err, NpuError::NotInitialized));
}

#[test]
fn double_init_fails() {
    let ctx = context(1024);
    ctx.init().unwrap();

    let err = ctx.init().unwrap_err();
    assert!(matches!(err, NpuError::AlreadyInitialized));

    // The first init remains in effect.
    assert!(ctx.is_ready());
    assert_eq!(ctx.total_memory(), 1024);
}

#[test]
fn shutdown_while_uninitialized_is_noop() {
    let ctx = context(1024);
    ctx.shutdown().unwrap();
    assert!(!ctx.is_ready());

    // A no-op shutdown must not poison a later init.
    ctx.init().unwrap();
    assert!(ctx.is_ready());
}

#[test]
fn init_after_shutdown_starts_fresh() {
    let ctx = context(1024);
    ctx.init().unwrap();
    let _buf = ctx.alloc(256).unwrap();
    assert_eq!(ctx.available_memory(), 768);

    ctx.shutdown().unwrap();
    ctx.init().unwrap();

    assert_eq!(ctx.available_memory(), 1024);
    assert_eq!(ctx.outstanding_allocations(), 0);
}

#[test]
fn shutdown_invalidates_outstanding_handles() {
    let ctx = context(1024);
    ctx.init().unwrap();
    let buf = ctx.alloc(64).unwrap();

    ctx.shutdown().unwrap();
    ctx.init().unwrap();

    // The old handle is stale across the shutdown boundary.
    let err = ctx.free(buf).unwrap_err();
    assert!(matches!(err, NpuError::InvalidHandle(_)));
}

#[test]
fn memory_queries_return_zero_when_not_ready() {
    let ctx = context(1024);
    assert_eq!(ctx.total_memory(), 0);
    assert_eq!(ctx.available_memory(), 0);

    ctx.init().unwrap();
    assert_eq!(ctx.total_memory(), 1024);
    assert_eq!(ctx.available_memory(), 1024);

    ctx.shutdown().unwrap();
    assert_eq!(ctx.total_memory(), 0);
    assert_eq!(ctx.available_memory(), 0);
}

#[test]
fn device_name_reported_when_ready() {
    let ctx = context(1024);
    ctx.init().unwrap();
    let name = ctx.device_name().unwrap();
    assert!(!name.is_empty());
}

#[test]
fn independent_contexts_do_not_share_state() {
    let a = context(1024);
    let b = context(2048);

    a.init().unwrap();
    assert!(!b.is_ready());
    assert_eq!(b.total_memory(), 0);

    b.init().unwrap();
    let buf = a.alloc(128).unwrap();
    assert_eq!(a.available_memory(), 896);
    assert_eq!(b.available_memory(), 2048);

    // A handle from one context is unknown to the other.
    let err = b.free(buf).unwrap_err();
    assert!(matches!(err, NpuError::InvalidHandle(_)));
}
