//! Tests for device memory accounting
//!
//! The available-memory counter must be debited by exactly the allocation
//! size on success, credited back on free, and left untouched by failed
//! allocations.

use eva_npu::{NpuContext, NpuError, SoftNpu};
use proptest::prelude::*;

fn ready_context(capacity: u64) -> NpuContext {
    let ctx = NpuContext::new(Box::new(SoftNpu::with_capacity(capacity)));
    ctx.init().unwrap();
    ctx
}

#[test]
fn alloc_debits_available_memory() {
    let ctx = ready_context(4096);
    let _buf = ctx.alloc(1024).unwrap();
    assert_eq!(ctx.available_memory(), 3072);
    assert_eq!(ctx.total_memory(), 4096);
}

#[test]
fn alloc_then_free_restores_available_memory() {
    let ctx = ready_context(4096);
    let before = ctx.available_memory();

    let buf = ctx.alloc(1536).unwrap();
    assert_eq!(ctx.available_memory(), before - 1536);

    ctx.free(buf).unwrap();
    assert_eq!(ctx.available_memory(), before);
}

#[test]
fn oversized_alloc_fails_without_moving_counter() {
    let ctx = ready_context(1024);
    let before = ctx.available_memory();

    let err = ctx.alloc(2048).unwrap_err();
    assert!(matches!(
        err,
        NpuError::ResourceExhausted {
            requested: 2048,
            available: 1024
        }
    ));
    assert_eq!(ctx.available_memory(), before);
}

#[test]
fn exhaustion_accounts_for_prior_allocations() {
    let ctx = ready_context(1024);
    let _a = ctx.alloc(512).unwrap();
    let _b = ctx.alloc(512).unwrap();

    let err = ctx.alloc(1).unwrap_err();
    assert!(matches!(
        err,
        NpuError::ResourceExhausted {
            requested: 1,
            available: 0
        }
    ));
}

#[test]
fn zero_size_alloc_is_rejected() {
    let ctx = ready_context(1024);
    let err = ctx.alloc(0).unwrap_err();
    assert!(matches!(err, NpuError::SizeMismatch(_)));
    assert_eq!(ctx.available_memory(), 1024);
}

#[test]
fn double_free_is_detected_and_benign() {
    let ctx = ready_context(1024);
    let buf = ctx.alloc(64).unwrap();

    ctx.free(buf).unwrap();
    assert_eq!(ctx.available_memory(), 1024);

    // The second free fails without crediting the counter twice.
    let err = ctx.free(buf).unwrap_err();
    assert!(matches!(err, NpuError::InvalidHandle(_)));
    assert_eq!(ctx.available_memory(), 1024);
}

#[test]
fn full_capacity_alloc_succeeds() {
    let ctx = ready_context(4096);
    let buf = ctx.alloc(4096).unwrap();
    assert_eq!(ctx.available_memory(), 0);
    ctx.free(buf).unwrap();
    assert_eq!(ctx.available_memory(), 4096);
}

proptest! {
    #[test]
    fn accounting_round_trip(sizes in proptest::collection::vec(1usize..16 * 1024, 0..16)) {
        let capacity = 1024 * 1024;
        let ctx = ready_context(capacity);

        let mut buffers = Vec::new();
        let mut claimed = 0u64;
        for size in sizes {
            match ctx.alloc(size) {
                Ok(buf) => {
                    claimed += size as u64;
                    buffers.push(buf);
                }
                Err(NpuError::ResourceExhausted { .. }) => {}
                Err(e) => prop_assert!(false, "unexpected alloc error: {}", e),
            }
            prop_assert_eq!(ctx.available_memory(), capacity - claimed);
        }

        for buf in buffers {
            ctx.free(buf).unwrap();
        }
        prop_assert_eq!(ctx.available_memory(), capacity);
        prop_assert_eq!(ctx.outstanding_allocations(), 0);
    }
}
