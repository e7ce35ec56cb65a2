//! EVA NPU Driver
//!
//! A synchronous host-to-accelerator execution driver for the EVA NPU:
//! device lifecycle (init/shutdown), device memory management
//! (alloc/free), host/device transfer, opaque-blob execution, and device
//! introspection (name, total/available memory).
//!
//! The safe Rust surface is [`NpuContext`] over a pluggable
//! [`NpuBackend`]; the original C-callable `eva_npu_*` surface lives in
//! [`capi`] and gates one process-wide context. [`SoftNpu`] is the
//! in-process reference backend used when no hardware is present.

pub mod capi;
pub mod driver;
pub mod error;
pub mod logging;

pub use driver::{DeviceBuffer, DeviceInfo, NpuBackend, NpuContext, Region, SoftNpu};
pub use error::{NpuError, NpuResult};
pub use logging::init_logging_default;
