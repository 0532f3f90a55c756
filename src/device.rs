use crate::error::{Result, SfsError};

// ===== DEVICE ENUM =====

/// Compute device for tensor operations
///
/// Only the CPU path executes today. `Accelerator` is the placement marker
/// behind the `use_accelerator` config toggle; requesting it fails at
/// startup, before any batch is touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Accelerator,
}

impl Device {
    pub fn name(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Accelerator => "Accelerator",
        }
    }

    /// Resolve the device for a run.
    ///
    /// # Errors
    /// `AcceleratorUnavailable` when an accelerator is requested; no backend
    /// is compiled in, and the failure must surface before training starts.
    pub fn for_run(use_accelerator: bool) -> Result<Device> {
        if use_accelerator {
            Err(SfsError::AcceleratorUnavailable)
        } else {
            Ok(Device::Cpu)
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
