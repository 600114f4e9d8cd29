//! Presentation port
//!
//! A presenter paints one decoded frame into the session's target surface.
//! It has no buffering and no timing logic; the playout scheduler decides
//! when to call [`Presenter::draw`]. The backend is chosen at session start
//! and fixed for the session's lifetime:
//!
//! - `raster`: CPU copy, scaled with `fast_image_resize` when sizes differ
//! - `gpu-immediate`: texture upload and texel copy-back (`gpu` feature)
//! - `gpu-modern`: texture upload and shader scaling pass (`gpu` feature)

mod raster;

pub use raster::RasterPresenter;

use common::RendererBackend;

use crate::error::{PlayoutError, Result};
use crate::frame::DecodedFrame;
use crate::surface::Surface;

/// Sink that paints decoded frames
pub trait Presenter: Send {
    fn backend(&self) -> RendererBackend;

    /// Paint one frame synchronously
    fn draw(&mut self, frame: &DecodedFrame) -> Result<()>;
}

/// Build the presenter for `backend`, painting into `surface`
pub async fn create_presenter(
    backend: RendererBackend,
    surface: Surface,
) -> Result<Box<dyn Presenter>> {
    log::info!(
        "Creating {} presenter for {}x{} surface",
        backend,
        surface.width(),
        surface.height()
    );

    match backend {
        RendererBackend::Raster => Ok(Box::new(RasterPresenter::new(surface))),

        #[cfg(feature = "gpu")]
        RendererBackend::GpuImmediate => {
            let context = gpu_context(&surface).await?;
            Ok(Box::new(crate::gpu::ImmediatePresenter::new(context, surface)?))
        }

        #[cfg(feature = "gpu")]
        RendererBackend::GpuModern => {
            let context = gpu_context(&surface).await?;
            Ok(Box::new(crate::gpu::ModernPresenter::new(context, surface)?))
        }

        #[cfg(not(feature = "gpu"))]
        RendererBackend::GpuImmediate | RendererBackend::GpuModern => {
            drop(surface);
            Err(PlayoutError::Configuration(format!(
                "{} renderer not compiled in (build with --features gpu)",
                backend
            )))
        }
    }
}

/// GPU initialization failure is fatal to the session
#[cfg(feature = "gpu")]
async fn gpu_context(surface: &Surface) -> Result<crate::gpu::GpuContext> {
    let context = crate::gpu::GpuContext::for_surface(surface.width(), surface.height()).await?;
    context.capabilities().log_info();
    Ok(context)
}

/// Check that a frame's payload matches its declared size
pub(crate) fn validate_frame(frame: &DecodedFrame) -> Result<()> {
    let expected = frame.width() as usize * frame.height() as usize * 4;
    if frame.width() == 0 || frame.height() == 0 || frame.data().len() != expected {
        return Err(PlayoutError::Render(format!(
            "Invalid frame {}x{}: expected {} bytes of BGRA, got {}",
            frame.width(),
            frame.height(),
            expected,
            frame.data().len()
        )));
    }
    Ok(())
}
