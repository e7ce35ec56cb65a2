//! Device context: lifecycle, memory accounting, copy and execute gating
//!
//! [`NpuContext`] is the driver's state machine:
//!
//! ```text
//! Uninitialized --init success--> Ready --shutdown--> Uninitialized
//! ```
//!
//! Every buffer, copy, and execute operation is defined only in `Ready`
//! and fails with a not-initialized error otherwise. The context is an
//! explicit object rather than hidden global state, so independent
//! contexts (e.g., with different backends) can coexist in one process
//! for testing; the process-wide singleton lives in the C surface.
//!
//! All state is guarded by one internal mutex: concurrent callers are
//! safe but serialized. Every call is blocking; the context never
//! retains a buffer reference beyond the duration of a single call.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::driver::backend::{DeviceInfo, NpuBackend, Region};
use crate::driver::buffer::DeviceBuffer;
use crate::error::{NpuError, NpuResult};

/// State held only while the device is ready.
struct ReadyState {
    info: DeviceInfo,
    /// Bytes not currently claimed by an allocation
    available: u64,
    /// Device address -> allocation size
    allocations: HashMap<u64, usize>,
}

/// Synchronous device context over an [`NpuBackend`].
pub struct NpuContext {
    backend: Box<dyn NpuBackend>,
    state: Mutex<Option<ReadyState>>,
}

impl NpuContext {
    /// Create a context in the uninitialized state.
    ///
    /// No device interaction happens until [`NpuContext::init`].
    pub fn new(backend: Box<dyn NpuBackend>) -> Self {
        NpuContext {
            backend,
            state: Mutex::new(None),
        }
    }

    /// Transition from uninitialized to ready.
    ///
    /// Probes the backend for device identity and capacity. Fails with
    /// `AlreadyInitialized` when called twice without an intervening
    /// shutdown, and propagates the backend error when the device cannot
    /// be opened.
    pub fn init(&self) -> NpuResult<()> {
        let mut state = self.state.lock()?;
        if state.is_some() {
            return Err(NpuError::AlreadyInitialized);
        }

        let info = self.backend.probe()?;
        tracing::info!(
            device = %info.name,
            total_bytes = info.total_memory,
            "NPU device initialized"
        );

        *state = Some(ReadyState {
            available: info.total_memory,
            info,
            allocations: HashMap::new(),
        });
        Ok(())
    }

    /// Transition from ready back to uninitialized.
    ///
    /// Releases every outstanding allocation and the device itself. All
    /// previously returned handles become stale. Calling shutdown while
    /// uninitialized is a no-op.
    pub fn shutdown(&self) -> NpuResult<()> {
        let mut state = self.state.lock()?;
        let Some(ready) = state.take() else {
            return Ok(());
        };

        let leaked = ready.allocations.len();
        for (addr, _) in ready.allocations {
            if let Err(e) = self.backend.free(addr) {
                tracing::warn!(addr, error = %e, "failed to free allocation during shutdown");
            }
        }
        self.backend.release();

        if leaked > 0 {
            tracing::debug!(leaked, "shutdown released allocations still outstanding");
        }
        tracing::info!("NPU device shut down");
        Ok(())
    }

    /// Check whether the context is in the ready state.
    pub fn is_ready(&self) -> bool {
        self.state.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Allocate `size` bytes of device memory.
    ///
    /// `size` must be greater than zero. Fails with `ResourceExhausted`
    /// when the device lacks `size` bytes of free memory; the
    /// available-memory counter is debited only on success.
    pub fn alloc(&self, size: usize) -> NpuResult<DeviceBuffer> {
        if size == 0 {
            return Err(NpuError::SizeMismatch(
                "allocation size must be greater than zero".to_string(),
            ));
        }

        let mut state = self.state.lock()?;
        let ready = state.as_mut().ok_or(NpuError::NotInitialized)?;

        if size as u64 > ready.available {
            return Err(NpuError::ResourceExhausted {
                requested: size as u64,
                available: ready.available,
            });
        }

        let addr = self.backend.alloc(size)?;
        ready.available -= size as u64;
        ready.allocations.insert(addr, size);

        tracing::trace!(addr, size, available = ready.available, "device buffer allocated");
        Ok(DeviceBuffer::new(addr, size))
    }

    /// Free a previously allocated buffer.
    ///
    /// Credits the available-memory counter by the allocation size. A
    /// stale or unknown handle (including a double free) fails with
    /// `InvalidHandle` without touching device memory.
    pub fn free(&self, buffer: DeviceBuffer) -> NpuResult<()> {
        let mut state = self.state.lock()?;
        let ready = state.as_mut().ok_or(NpuError::NotInitialized)?;

        let size = ready.allocations.remove(&buffer.addr()).ok_or_else(|| {
            NpuError::InvalidHandle(format!(
                "no allocation at device address {:#x}",
                buffer.addr()
            ))
        })?;
        ready.available += size as u64;

        tracing::trace!(
            addr = buffer.addr(),
            size,
            available = ready.available,
            "device buffer freed"
        );
        self.backend.free(buffer.addr())
    }

    /// Copy host bytes into a device buffer.
    ///
    /// The destination must be currently allocated with capacity at least
    /// `data.len()`. The transfer is atomic from the caller's view: either
    /// all bytes land or the call fails before the backend is touched.
    /// Zero-length copies succeed trivially.
    pub fn copy_to_device(&self, dst: &DeviceBuffer, data: &[u8]) -> NpuResult<()> {
        let state = self.state.lock()?;
        let ready = state.as_ref().ok_or(NpuError::NotInitialized)?;

        let capacity = Self::resolve(ready, dst)?;
        if data.len() > capacity {
            return Err(NpuError::SizeMismatch(format!(
                "copy of {} bytes exceeds destination capacity {}",
                data.len(),
                capacity
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        self.backend.write(dst.addr(), data)
    }

    /// Copy device bytes into a host buffer.
    ///
    /// The source must be currently allocated with capacity at least
    /// `out.len()`. Zero-length copies succeed trivially.
    pub fn copy_from_device(&self, src: &DeviceBuffer, out: &mut [u8]) -> NpuResult<()> {
        let state = self.state.lock()?;
        let ready = state.as_ref().ok_or(NpuError::NotInitialized)?;

        let capacity = Self::resolve(ready, src)?;
        if out.len() > capacity {
            return Err(NpuError::SizeMismatch(format!(
                "copy of {} bytes exceeds source capacity {}",
                out.len(),
                capacity
            )));
        }
        if out.is_empty() {
            return Ok(());
        }

        self.backend.read(src.addr(), out)
    }

    /// Execute an opaque blob against input and output buffers.
    ///
    /// Every handle is validated against the allocation registry before
    /// the backend sees the blob, so a validation failure leaves all
    /// buffer contents untouched. The blob itself is not interpreted
    /// here; malformed blobs are rejected by the backend. On backend
    /// failure, output contents are unspecified.
    pub fn execute(
        &self,
        blob: &[u8],
        inputs: &[DeviceBuffer],
        outputs: &[DeviceBuffer],
    ) -> NpuResult<()> {
        let state = self.state.lock()?;
        let ready = state.as_ref().ok_or(NpuError::NotInitialized)?;

        let mut input_regions = Vec::with_capacity(inputs.len());
        for buffer in inputs {
            let len = Self::resolve(ready, buffer)?;
            input_regions.push(Region {
                addr: buffer.addr(),
                len,
            });
        }

        let mut output_regions = Vec::with_capacity(outputs.len());
        for buffer in outputs {
            let len = Self::resolve(ready, buffer)?;
            output_regions.push(Region {
                addr: buffer.addr(),
                len,
            });
        }

        self.backend.execute(blob, &input_regions, &output_regions)
    }

    /// Total device memory in bytes.
    ///
    /// Returns 0 unless the context is ready (documented edge case).
    pub fn total_memory(&self) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|r| r.info.total_memory))
            .unwrap_or(0)
    }

    /// Device memory currently available for allocation, in bytes.
    ///
    /// Returns 0 unless the context is ready (documented edge case).
    pub fn available_memory(&self) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|r| r.available))
            .unwrap_or(0)
    }

    /// Device name reported by the backend probe.
    pub fn device_name(&self) -> NpuResult<String> {
        let state = self.state.lock()?;
        let ready = state.as_ref().ok_or(NpuError::NotInitialized)?;
        Ok(ready.info.name.clone())
    }

    /// Resolve a raw device address back to its registered buffer handle.
    ///
    /// Used by the C surface, which traffics in raw device pointers.
    pub fn lookup(&self, addr: u64) -> NpuResult<DeviceBuffer> {
        let state = self.state.lock()?;
        let ready = state.as_ref().ok_or(NpuError::NotInitialized)?;

        let size = ready.allocations.get(&addr).copied().ok_or_else(|| {
            NpuError::InvalidHandle(format!("no allocation at device address {:#x}", addr))
        })?;
        Ok(DeviceBuffer::new(addr, size))
    }

    /// Number of allocations currently outstanding.
    pub fn outstanding_allocations(&self) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|r| r.allocations.len()))
            .unwrap_or(0)
    }

    fn resolve(ready: &ReadyState, buffer: &DeviceBuffer) -> NpuResult<usize> {
        let size = ready.allocations.get(&buffer.addr()).copied().ok_or_else(|| {
            NpuError::InvalidHandle(format!(
                "no allocation at device address {:#x}",
                buffer.addr()
            ))
        })?;

        // A registered address with a different size means the handle is
        // stale and the address was reused by a later allocation.
        if size != buffer.size() {
            return Err(NpuError::InvalidHandle(format!(
                "stale handle for device address {:#x}: handle size {} != allocation size {}",
                buffer.addr(),
                buffer.size(),
                size
            )));
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::soft::SoftNpu;

    fn ready_context(capacity: u64) -> NpuContext {
        let ctx = NpuContext::new(Box::new(SoftNpu::with_capacity(capacity)));
        ctx.init().unwrap();
        ctx
    }

    #[test]
    fn test_lookup_round_trips_handle() {
        let ctx = ready_context(1024);
        let buf = ctx.alloc(64).unwrap();

        let found = ctx.lookup(buf.addr()).unwrap();
        assert_eq!(found, buf);
    }

    #[test]
    fn test_lookup_unknown_address_fails() {
        let ctx = ready_context(1024);
        let err = ctx.lookup(0xdead_beef).unwrap_err();
        assert!(matches!(err, NpuError::InvalidHandle(_)));
    }

    #[test]
    fn test_is_ready_tracks_lifecycle() {
        let ctx = NpuContext::new(Box::new(SoftNpu::with_capacity(1024)));
        assert!(!ctx.is_ready());
        ctx.init().unwrap();
        assert!(ctx.is_ready());
        ctx.shutdown().unwrap();
        assert!(!ctx.is_ready());
    }

    #[test]
    fn test_outstanding_allocations_counts() {
        let ctx = ready_context(1024);
        assert_eq!(ctx.outstanding_allocations(), 0);
        let a = ctx.alloc(16).unwrap();
        let _b = ctx.alloc(16).unwrap();
        assert_eq!(ctx.outstanding_allocations(), 2);
        ctx.free(a).unwrap();
        assert_eq!(ctx.outstanding_allocations(), 1);
    }
}
