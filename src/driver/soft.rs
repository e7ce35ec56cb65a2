//! In-process reference backend
//!
//! `SoftNpu` stands in for real NPU hardware: device memory is host memory
//! and execution is a deterministic loopback. It exists so the full driver
//! contract is exercisable on machines without an accelerator, mirroring
//! the development path of the original driver.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::driver::backend::{DeviceInfo, NpuBackend, Region};
use crate::error::{NpuError, NpuResult};

/// Default device capacity: 4 GiB
pub const SOFT_NPU_DEFAULT_CAPACITY: u64 = 4 * 1024 * 1024 * 1024;

/// Host-memory reference backend.
///
/// Device addresses are the stable host addresses of boxed allocations, so
/// the C surface can hand them out as real pointers. Execution fills each
/// output region by cycling the bytes of the input region at the same index
/// modulo the input count (zero-fill when there are no inputs), which makes
/// blob execution observable in tests without interpreting the blob.
pub struct SoftNpu {
    name: String,
    capacity: u64,
    // Device address -> backing storage. Boxed so addresses stay stable
    // while the map rehashes.
    regions: Mutex<HashMap<u64, Box<[u8]>>>,
}

impl SoftNpu {
    /// Create a reference backend with the default 4 GiB capacity.
    pub fn new() -> Self {
        Self::with_capacity(SOFT_NPU_DEFAULT_CAPACITY)
    }

    /// Create a reference backend with an explicit capacity in bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        SoftNpu {
            name: "EVA SoftNPU".to_string(),
            capacity,
            regions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SoftNpu {
    fn default() -> Self {
        Self::new()
    }
}

impl NpuBackend for SoftNpu {
    fn probe(&self) -> NpuResult<DeviceInfo> {
        Ok(DeviceInfo {
            name: self.name.clone(),
            total_memory: self.capacity,
        })
    }

    fn release(&self) {
        if let Ok(mut regions) = self.regions.lock() {
            regions.clear();
        }
    }

    fn alloc(&self, size: usize) -> NpuResult<u64> {
        let storage = vec![0u8; size].into_boxed_slice();
        let addr = storage.as_ptr() as u64;

        let mut regions = self.regions.lock()?;
        regions.insert(addr, storage);

        tracing::trace!(addr, size, "soft backend allocated region");
        Ok(addr)
    }

    fn free(&self, addr: u64) -> NpuResult<()> {
        let mut regions = self.regions.lock()?;
        match regions.remove(&addr) {
            Some(_) => Ok(()),
            None => Err(NpuError::InvalidHandle(format!(
                "no region at device address {:#x}",
                addr
            ))),
        }
    }

    fn write(&self, addr: u64, data: &[u8]) -> NpuResult<()> {
        let mut regions = self.regions.lock()?;
        let region = regions.get_mut(&addr).ok_or_else(|| {
            NpuError::InvalidHandle(format!("no region at device address {:#x}", addr))
        })?;

        if data.len() > region.len() {
            return Err(NpuError::SizeMismatch(format!(
                "write of {} bytes exceeds region capacity {}",
                data.len(),
                region.len()
            )));
        }

        region[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, addr: u64, out: &mut [u8]) -> NpuResult<()> {
        let regions = self.regions.lock()?;
        let region = regions.get(&addr).ok_or_else(|| {
            NpuError::InvalidHandle(format!("no region at device address {:#x}", addr))
        })?;

        if out.len() > region.len() {
            return Err(NpuError::SizeMismatch(format!(
                "read of {} bytes exceeds region capacity {}",
                out.len(),
                region.len()
            )));
        }

        out.copy_from_slice(&region[..out.len()]);
        Ok(())
    }

    fn execute(&self, blob: &[u8], inputs: &[Region], outputs: &[Region]) -> NpuResult<()> {
        if blob.is_empty() {
            return Err(NpuError::Backend(
                "malformed execution blob: empty".to_string(),
            ));
        }

        let mut regions = self.regions.lock()?;

        // Snapshot input bytes first so an output may alias an input.
        let mut input_bytes: Vec<Vec<u8>> = Vec::with_capacity(inputs.len());
        for input in inputs {
            let region = regions.get(&input.addr).ok_or_else(|| {
                NpuError::InvalidHandle(format!(
                    "execute input references unknown device address {:#x}",
                    input.addr
                ))
            })?;
            input_bytes.push(region[..input.len.min(region.len())].to_vec());
        }

        for (idx, output) in outputs.iter().enumerate() {
            let region = regions.get_mut(&output.addr).ok_or_else(|| {
                NpuError::InvalidHandle(format!(
                    "execute output references unknown device address {:#x}",
                    output.addr
                ))
            })?;
            let len = output.len.min(region.len());

            if input_bytes.is_empty() {
                region[..len].fill(0);
            } else {
                let src = &input_bytes[idx % input_bytes.len()];
                if src.is_empty() {
                    region[..len].fill(0);
                } else {
                    for (i, byte) in region[..len].iter_mut().enumerate() {
                        *byte = src[i % src.len()];
                    }
                }
            }
        }

        tracing::debug!(
            blob_bytes = blob.len(),
            num_inputs = inputs.len(),
            num_outputs = outputs.len(),
            "soft backend executed blob"
        );
        Ok(())
    }
}
