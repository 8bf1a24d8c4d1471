//! Compute device identity and per-backend memory probing.
//!
//! Each backend gets its own [`MemoryProbe`] implementation selected
//! at construction time ([`probe_for`]), rather than branching on the
//! device inline. Probes answer fresh on every call: free device
//! memory changes between requests and must not be cached here.

use sysinfo::System;

use crate::error::{Error, Result};

/// A compute device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// CUDA GPU with a device index.
    Cuda(usize),
    /// Apple unified-memory accelerator.
    Mps,
}

impl Device {
    /// Parse a device selector: `cpu`, `cuda`, `cuda:N` or `mps`
    /// (case-insensitive). Anything else is an unsupported identity.
    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(0)),
            "mps" => Ok(Self::Mps),
            other => match other.strip_prefix("cuda:") {
                Some(index) => index
                    .parse()
                    .map(Self::Cuda)
                    .map_err(|_| Error::UnsupportedDevice(s.to_string())),
                None => Err(Error::UnsupportedDevice(s.to_string())),
            },
        }
    }

    /// Auto-detect by preference order CUDA → MPS → CPU. A backend
    /// counts as present when its memory probe answers.
    pub fn auto() -> Self {
        for candidate in [Self::Cuda(0), Self::Mps] {
            if let Ok(probe) = probe_for(candidate) {
                if probe.available_bytes().is_ok() {
                    return candidate;
                }
            }
        }
        Self::Cpu
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
            Self::Mps => write!(f, "mps"),
        }
    }
}

/// Free-memory query for one backend. Must be answered fresh per call.
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&self) -> Result<u64>;
}

/// Available system memory, via sysinfo.
pub struct CpuMemoryProbe;

impl MemoryProbe for CpuMemoryProbe {
    fn available_bytes(&self) -> Result<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        Ok(sys.available_memory())
    }
}

/// Operator-supplied fixed budget. Also the escape hatch for backends
/// without a portable free-memory query, and the probe used in tests.
pub struct FixedMemoryProbe(pub u64);

impl MemoryProbe for FixedMemoryProbe {
    fn available_bytes(&self) -> Result<u64> {
        Ok(self.0)
    }
}

/// Free bytes on one CUDA device, via the driver's `cuMemGetInfo`.
#[cfg(feature = "cuda")]
pub struct CudaMemoryProbe {
    index: usize,
}

#[cfg(feature = "cuda")]
impl CudaMemoryProbe {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

#[cfg(feature = "cuda")]
impl MemoryProbe for CudaMemoryProbe {
    fn available_bytes(&self) -> Result<u64> {
        // Binding the device makes its primary context current, which
        // mem_get_info reports on.
        let _device = cudarc::driver::CudaDevice::new(self.index)
            .map_err(|e| Error::DeviceUnavailable(format!("cuda:{}: {e}", self.index)))?;
        let (free, _total) = cudarc::driver::result::mem_get_info()
            .map_err(|e| Error::DeviceUnavailable(format!("cuda:{}: {e}", self.index)))?;
        Ok(free as u64)
    }
}

/// The MPS recommended working-set ceiling has no portable query
/// outside the Metal runtime; operators configure an explicit budget
/// ([`FixedMemoryProbe`]) instead.
pub struct MpsMemoryProbe;

impl MemoryProbe for MpsMemoryProbe {
    fn available_bytes(&self) -> Result<u64> {
        Err(Error::DeviceUnavailable(
            "no portable query for the MPS recommended working set; \
             configure an explicit memory budget"
                .to_string(),
        ))
    }
}

/// Select the probe implementation for a device.
pub fn probe_for(device: Device) -> Result<Box<dyn MemoryProbe>> {
    match device {
        Device::Cpu => Ok(Box::new(CpuMemoryProbe)),
        #[cfg(feature = "cuda")]
        Device::Cuda(index) => Ok(Box::new(CudaMemoryProbe::new(index))),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda(index) => Err(Error::DeviceUnavailable(format!(
            "cuda:{index}: built without the `cuda` feature"
        ))),
        Device::Mps => Ok(Box::new(MpsMemoryProbe)),
    }
}
