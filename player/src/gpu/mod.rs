/// GPU presentation backends using wgpu
///
/// Both backends upload each decoded frame into a BGRA texture and read the
/// result back into the session's memory-mapped surface:
/// - `immediate`: texel copy from the frame texture, no shader stage
/// - `modern`: full-screen scaling pass into a surface-sized render target
///
/// Architecture:
/// - `context`: device acquisition sized for the target surface
/// - `texture`: frame textures, render targets and staging readback
/// - `pipeline_builder`: render pipeline creation
pub mod context;
mod immediate;
mod modern;
pub mod pipeline_builder;
pub mod texture;

pub use context::GpuContext;
pub use immediate::ImmediatePresenter;
pub use modern::ModernPresenter;

use crate::error::{PlayoutError, Result};

/// GPU rendering capabilities
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub adapter_name: String,
    pub backend: String,
    pub max_texture_size: u32,
}

impl GpuCapabilities {
    pub fn log_info(&self) {
        log::info!("GPU Capabilities:");
        log::info!("  Adapter: {}", self.adapter_name);
        log::info!("  Backend: {}", self.backend);
        log::info!(
            "  Max Texture Size: {}x{}",
            self.max_texture_size,
            self.max_texture_size
        );
    }

    /// Whether a texture of the given size fits the device limits
    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_size && height <= self.max_texture_size
    }
}

/// Reject frames the device cannot upload
fn check_frame_size(capabilities: &GpuCapabilities, width: u32, height: u32) -> Result<()> {
    if !capabilities.fits(width, height) {
        return Err(PlayoutError::Render(format!(
            "Frame {}x{} exceeds GPU texture limit {}",
            width, height, capabilities.max_texture_size
        )));
    }
    Ok(())
}

/// Flatten a GPU-layer failure into a playout render error
fn render_error(err: anyhow::Error) -> PlayoutError {
    PlayoutError::Render(format!("{:#}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(max: u32) -> GpuCapabilities {
        GpuCapabilities {
            adapter_name: "test".into(),
            backend: "Vulkan".into(),
            max_texture_size: max,
        }
    }

    #[test]
    fn test_size_limits() {
        let caps = caps(2048);
        assert!(check_frame_size(&caps, 1920, 1080).is_ok());
        assert!(matches!(
            check_frame_size(&caps, 640, 4096),
            Err(PlayoutError::Render(_))
        ));
    }
}
