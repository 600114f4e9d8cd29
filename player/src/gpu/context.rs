//! Device acquisition for one presentation surface
//!
//! The device is opened for a known surface size: the texture dimension
//! limit is raised to cover the surface when the adapter allows it, so both
//! presenters can keep a full-surface render target or staging copy.

use anyhow::Context as _;

use super::GpuCapabilities;
use crate::error::{PlayoutError, Result};

/// Device and queue opened for a surface of a fixed size
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    capabilities: GpuCapabilities,
}

impl GpuContext {
    /// Open a device able to hold a `width`x`height` surface in one texture.
    ///
    /// A surface larger than the adapter's texture limit is a configuration
    /// error; any other failure to reach a device is reported the same way
    /// since the session cannot present without it.
    pub async fn for_surface(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")
            .map_err(init_error)?;

        let adapter_info = adapter.get_info();
        let texture_limit = surface_texture_limit(
            width,
            height,
            adapter.limits().max_texture_dimension_2d,
        )?;

        let mut required_limits = wgpu::Limits::default();
        required_limits.max_texture_dimension_2d = texture_limit;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Playout Device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                ..Default::default()
            })
            .await
            .context("Failed to open GPU device")
            .map_err(init_error)?;

        let capabilities = GpuCapabilities {
            adapter_name: adapter_info.name,
            backend: format!("{:?}", adapter_info.backend),
            max_texture_size: device.limits().max_texture_dimension_2d,
        };
        log::debug!(
            "Opened {} for {}x{} surface",
            capabilities.adapter_name,
            width,
            height
        );

        Ok(Self {
            device,
            queue,
            capabilities,
        })
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.capabilities.adapter_name)
            .field("backend", &self.capabilities.backend)
            .finish()
    }
}

fn init_error(err: anyhow::Error) -> PlayoutError {
    PlayoutError::Configuration(format!("GPU initialization failed: {:#}", err))
}

/// Texture dimension limit to request for a surface: the wgpu default, raised
/// to the surface's larger side when needed, never past the adapter's limit
fn surface_texture_limit(width: u32, height: u32, adapter_max: u32) -> Result<u32> {
    let needed = width.max(height);
    if needed > adapter_max {
        return Err(PlayoutError::Configuration(format!(
            "Surface {}x{} exceeds GPU texture limit {}",
            width, height, adapter_max
        )));
    }
    Ok(needed.max(wgpu::Limits::default().max_texture_dimension_2d.min(adapter_max)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_surface_keeps_default_limit() {
        let default = wgpu::Limits::default().max_texture_dimension_2d;
        assert_eq!(surface_texture_limit(1280, 720, 16384).unwrap(), default);
    }

    #[test]
    fn test_large_surface_raises_limit() {
        assert_eq!(surface_texture_limit(15360, 8640, 16384).unwrap(), 15360);
    }

    #[test]
    fn test_surface_beyond_adapter_rejected() {
        assert!(matches!(
            surface_texture_limit(4096, 1080, 2048),
            Err(PlayoutError::Configuration(_))
        ));
    }
}
