use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;
use papersmith_core::error::BackendError;
use tracing::info;

use crate::kind::BackendKind;

/// Pick the compute device for a local backend. `local-accelerated` never
/// degrades to the CPU.
pub fn select_device(kind: BackendKind) -> Result<Device, BackendError> {
    match kind {
        BackendKind::LocalAccelerated => {
            if cuda_is_available() {
                if let Ok(dev) = Device::new_cuda(0) {
                    info!("Device: CUDA");
                    return Ok(dev);
                }
            }
            if metal_is_available() {
                if let Ok(dev) = Device::new_metal(0) {
                    info!("Device: Metal (MPS)");
                    return Ok(dev);
                }
            }
            Err(BackendError::unavailable(
                kind.as_str(),
                "no Metal or CUDA device available; rebuild with the `metal` or `cuda` feature or use local-cpu",
            ))
        }
        _ => {
            info!("Device: CPU");
            Ok(Device::Cpu)
        }
    }
}
