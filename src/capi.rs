//! C-callable driver surface
//!
//! The `eva_npu_*` entry points mirror `include/eva_npu.h` (regenerated by
//! cbindgen at build time) and gate a process-wide [`NpuContext`] behind a
//! mutex. Every fallible call returns a status code from
//! [`crate::error::status`]; pointer-returning calls use null as the
//! failure sentinel.
//!
//! The global context is created on `eva_npu_init` and torn down on
//! `eva_npu_shutdown`; repeated init without an intervening shutdown is an
//! error. Device pointers returned by `eva_npu_alloc` are validated
//! against the context's allocation registry on every use, so stale or
//! foreign pointers fail with an invalid-handle status instead of
//! corrupting memory.

// The extern fns below take raw pointers from C and dereference them after
// registry validation; they cannot be marked unsafe without breaking the
// declared C ABI surface.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

use std::ffi::{c_char, c_void, CString};
use std::ptr;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::driver::{NpuContext, SoftNpu};
use crate::error::status;

/// Environment variable overriding the reference device capacity in bytes.
const MEMORY_BYTES_ENV: &str = "EVA_NPU_MEMORY_BYTES";

struct GlobalDriver {
    ctx: NpuContext,
    // Owned copy of the device name; the pointer handed to C stays valid
    // until shutdown drops this struct.
    device_name: CString,
}

static DRIVER: Lazy<Mutex<Option<GlobalDriver>>> = Lazy::new(|| Mutex::new(None));

fn backend_from_env() -> SoftNpu {
    match std::env::var(MEMORY_BYTES_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        Some(bytes) if bytes > 0 => SoftNpu::with_capacity(bytes),
        _ => SoftNpu::new(),
    }
}

/// Initialize the NPU device.
///
/// Returns 0 on success, `ALREADY_INITIALIZED` when called twice without an
/// intervening shutdown, or the probe failure code when the device cannot
/// be opened.
#[no_mangle]
pub extern "C" fn eva_npu_init() -> i32 {
    crate::logging::init_logging_default();

    let Ok(mut guard) = DRIVER.lock() else {
        return status::INTERNAL;
    };
    if guard.is_some() {
        return status::ALREADY_INITIALIZED;
    }

    let ctx = NpuContext::new(Box::new(backend_from_env()));
    if let Err(e) = ctx.init() {
        tracing::error!(error = %e, "eva_npu_init failed");
        return e.status();
    }

    let name = ctx.device_name().unwrap_or_default();
    let device_name = CString::new(name).unwrap_or_default();

    *guard = Some(GlobalDriver { ctx, device_name });
    status::SUCCESS
}

/// Shut down the NPU device and invalidate all outstanding device pointers.
///
/// Shutdown before init is a no-op by contract.
#[no_mangle]
pub extern "C" fn eva_npu_shutdown() {
    if let Ok(mut guard) = DRIVER.lock() {
        if let Some(driver) = guard.take() {
            if let Err(e) = driver.ctx.shutdown() {
                tracing::warn!(error = %e, "eva_npu_shutdown failed");
            }
        }
    }
}

/// Allocate `size` bytes of device memory.
///
/// Returns null when `size` is zero, the device is not initialized, or the
/// device lacks `size` contiguous bytes of free memory.
#[no_mangle]
pub extern "C" fn eva_npu_alloc(size: usize) -> *mut c_void {
    let Ok(guard) = DRIVER.lock() else {
        return ptr::null_mut();
    };
    let Some(driver) = guard.as_ref() else {
        return ptr::null_mut();
    };

    match driver.ctx.alloc(size) {
        Ok(buffer) => buffer.addr() as *mut c_void,
        Err(e) => {
            tracing::debug!(size, error = %e, "eva_npu_alloc failed");
            ptr::null_mut()
        }
    }
}

/// Free a device pointer previously returned by `eva_npu_alloc`.
///
/// Freeing null is a no-op. An unrecognized pointer (including a double
/// free) is logged and ignored; it never crashes the host process.
#[no_mangle]
pub extern "C" fn eva_npu_free(ptr_: *mut c_void) {
    if ptr_.is_null() {
        return;
    }

    let Ok(guard) = DRIVER.lock() else {
        return;
    };
    let Some(driver) = guard.as_ref() else {
        return;
    };

    match driver.ctx.lookup(ptr_ as u64) {
        Ok(buffer) => {
            if let Err(e) = driver.ctx.free(buffer) {
                tracing::warn!(addr = ptr_ as u64, error = %e, "eva_npu_free failed");
            }
        }
        Err(e) => {
            tracing::warn!(addr = ptr_ as u64, error = %e, "eva_npu_free: unrecognized device pointer");
        }
    }
}

/// Copy `size` bytes from host memory to a device buffer.
///
/// `dst` must be a currently allocated device pointer with capacity at
/// least `size`; `src` must reference at least `size` readable host bytes.
/// Either the full `size` bytes transfer or the call fails without
/// observable partial mutation of the destination.
#[no_mangle]
pub extern "C" fn eva_npu_memcpy_to_device(
    dst: *mut c_void,
    src: *const c_void,
    size: usize,
) -> i32 {
    if dst.is_null() || src.is_null() {
        return status::INVALID_HANDLE;
    }

    let Ok(guard) = DRIVER.lock() else {
        return status::INTERNAL;
    };
    let Some(driver) = guard.as_ref() else {
        return status::NOT_INITIALIZED;
    };

    let buffer = match driver.ctx.lookup(dst as u64) {
        Ok(b) => b,
        Err(e) => return e.status(),
    };

    // SAFETY: the caller guarantees `src` references at least `size`
    // readable bytes, per the C contract.
    let data = unsafe { std::slice::from_raw_parts(src as *const u8, size) };

    match driver.ctx.copy_to_device(&buffer, data) {
        Ok(()) => status::SUCCESS,
        Err(e) => e.status(),
    }
}

/// Copy `size` bytes from a device buffer to host memory.
///
/// `src` must be a currently allocated device pointer with capacity at
/// least `size`; `dst` must reference at least `size` writable host bytes.
#[no_mangle]
pub extern "C" fn eva_npu_memcpy_from_device(
    dst: *mut c_void,
    src: *const c_void,
    size: usize,
) -> i32 {
    if dst.is_null() || src.is_null() {
        return status::INVALID_HANDLE;
    }

    let Ok(guard) = DRIVER.lock() else {
        return status::INTERNAL;
    };
    let Some(driver) = guard.as_ref() else {
        return status::NOT_INITIALIZED;
    };

    let buffer = match driver.ctx.lookup(src as u64) {
        Ok(b) => b,
        Err(e) => return e.status(),
    };

    // SAFETY: the caller guarantees `dst` references at least `size`
    // writable bytes, per the C contract.
    let out = unsafe { std::slice::from_raw_parts_mut(dst as *mut u8, size) };

    match driver.ctx.copy_from_device(&buffer, out) {
        Ok(()) => status::SUCCESS,
        Err(e) => e.status(),
    }
}

/// Execute an opaque blob against input and output device buffers.
///
/// `inputs`/`outputs` are arrays of device pointers of length
/// `num_inputs`/`num_outputs`. A null array with a non-zero count is a
/// size-mismatch error, never best-effort truncation. Handle validation
/// happens before the backend runs, so a validation failure leaves every
/// buffer's contents unchanged; after a backend failure, output contents
/// are unspecified.
#[no_mangle]
pub extern "C" fn eva_npu_execute(
    blob: *const c_void,
    blob_size: usize,
    inputs: *const *const c_void,
    outputs: *mut *mut c_void,
    num_inputs: usize,
    num_outputs: usize,
) -> i32 {
    if blob.is_null() {
        return status::INVALID_HANDLE;
    }
    if (inputs.is_null() && num_inputs > 0) || (outputs.is_null() && num_outputs > 0) {
        return status::SIZE_MISMATCH;
    }

    let Ok(guard) = DRIVER.lock() else {
        return status::INTERNAL;
    };
    let Some(driver) = guard.as_ref() else {
        return status::NOT_INITIALIZED;
    };

    // SAFETY: the caller guarantees `blob` references `blob_size` readable
    // bytes and that the handle arrays match their declared counts.
    let blob_bytes = unsafe { std::slice::from_raw_parts(blob as *const u8, blob_size) };
    let input_ptrs: &[*const c_void] = if num_inputs == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(inputs, num_inputs) }
    };
    let output_ptrs: &[*mut c_void] = if num_outputs == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(outputs, num_outputs) }
    };

    let mut input_buffers = Vec::with_capacity(num_inputs);
    for &p in input_ptrs {
        if p.is_null() {
            return status::INVALID_HANDLE;
        }
        match driver.ctx.lookup(p as u64) {
            Ok(b) => input_buffers.push(b),
            Err(e) => return e.status(),
        }
    }

    let mut output_buffers = Vec::with_capacity(num_outputs);
    for &p in output_ptrs {
        if p.is_null() {
            return status::INVALID_HANDLE;
        }
        match driver.ctx.lookup(p as u64) {
            Ok(b) => output_buffers.push(b),
            Err(e) => return e.status(),
        }
    }

    match driver
        .ctx
        .execute(blob_bytes, &input_buffers, &output_buffers)
    {
        Ok(()) => status::SUCCESS,
        Err(e) => {
            tracing::debug!(blob_size, num_inputs, num_outputs, error = %e, "eva_npu_execute failed");
            e.status()
        }
    }
}

/// Total device memory in bytes, or 0 when the device is not initialized.
#[no_mangle]
pub extern "C" fn eva_npu_get_total_memory() -> u64 {
    match DRIVER.lock() {
        Ok(guard) => guard.as_ref().map(|d| d.ctx.total_memory()).unwrap_or(0),
        Err(_) => 0,
    }
}

/// Available device memory in bytes, or 0 when the device is not initialized.
#[no_mangle]
pub extern "C" fn eva_npu_get_available_memory() -> u64 {
    match DRIVER.lock() {
        Ok(guard) => guard.as_ref().map(|d| d.ctx.available_memory()).unwrap_or(0),
        Err(_) => 0,
    }
}

/// Stable, driver-owned, null-terminated device name.
///
/// The caller must not free or mutate the string. The pointer stays valid
/// for the lifetime of the ready state; before init (and after shutdown)
/// an empty string is returned.
#[no_mangle]
pub extern "C" fn eva_npu_get_device_name() -> *const c_char {
    static EMPTY: &[u8] = b"\0";

    match DRIVER.lock() {
        Ok(guard) => match guard.as_ref() {
            Some(driver) => driver.device_name.as_ptr(),
            None => EMPTY.as_ptr() as *const c_char,
        },
        Err(_) => EMPTY.as_ptr() as *const c_char,
    }
}
