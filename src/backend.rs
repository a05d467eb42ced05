//! Backend abstraction - NdArray (CPU) by default, CUDA behind the `cuda` feature
//!
//! Device placement is decided once, when a model is built. `use_gpu` picks
//! between [`TrainingBackend`] (CUDA when compiled in) and
//! [`CpuTrainingBackend`]. Asking for an accelerator that is not there is a
//! construction-time error, never a silent CPU fallback.

use burn::backend::Autodiff;

use crate::utils::error::{MddError, Result};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (when compiled in) or NdArray
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// CPU backend, always available
pub type CpuBackend = burn_ndarray::NdArray;

/// CPU autodiff backend
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    <DefaultBackend as burn::tensor::backend::Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}

/// Name of the backend a run with the given `use_gpu` setting trains on
pub fn backend_name_for(use_gpu: bool) -> &'static str {
    if use_gpu {
        backend_name()
    } else {
        "NdArray (CPU)"
    }
}

/// Fail when an accelerator is requested but cannot be used.
pub fn ensure_accelerator(use_gpu: bool) -> Result<()> {
    if !use_gpu {
        return Ok(());
    }

    if !cfg!(feature = "cuda") {
        return Err(MddError::Device(
            "accelerator requested but the crate was built without the `cuda` feature".to_string(),
        ));
    }

    if !has_nvidia_gpu() {
        return Err(MddError::Device(
            "accelerator requested but no NVIDIA device was detected".to_string(),
        ));
    }

    Ok(())
}

/// Check for an NVIDIA GPU (CUDA)
fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || std::process::Command::new("nvidia-smi")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("nvidia-smi.exe")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_run_needs_no_accelerator() {
        assert!(ensure_accelerator(false).is_ok());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_accelerator_without_cuda_feature_is_device_error() {
        let err = ensure_accelerator(true).unwrap_err();
        assert!(matches!(err, MddError::Device(_)));
    }

    #[test]
    fn test_backend_name() {
        assert!(!backend_name().is_empty());
    }

    #[test]
    fn test_cpu_runs_report_the_cpu_backend() {
        assert_eq!(backend_name_for(false), "NdArray (CPU)");
        assert_eq!(backend_name_for(true), backend_name());
    }
}
