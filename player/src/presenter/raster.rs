use common::RendererBackend;
use fast_image_resize as fr;

use super::{Presenter, validate_frame};
use crate::error::{PlayoutError, Result};
use crate::frame::DecodedFrame;
use crate::surface::Surface;

/// CPU presenter: copies frames into the surface, scaling when the frame
/// size differs from the surface size
pub struct RasterPresenter {
    surface: Surface,
    resizer: fr::Resizer,
    options: fr::ResizeOptions,
}

impl RasterPresenter {
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            resizer: fr::Resizer::new(),
            options: fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    fn scale_into_surface(&mut self, frame: &DecodedFrame) -> Result<()> {
        let src = fr::images::ImageRef::new(
            frame.width(),
            frame.height(),
            frame.data(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| PlayoutError::Render(format!("Invalid source frame: {}", e)))?;

        let (width, height) = (self.surface.width(), self.surface.height());
        let mut dst = fr::images::Image::from_slice_u8(
            width,
            height,
            self.surface.pixels_mut(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| PlayoutError::Render(format!("Invalid surface: {}", e)))?;

        self.resizer
            .resize(&src, &mut dst, &self.options)
            .map_err(|e| PlayoutError::Render(format!("Failed to scale frame: {}", e)))
    }
}

impl Presenter for RasterPresenter {
    fn backend(&self) -> RendererBackend {
        RendererBackend::Raster
    }

    fn draw(&mut self, frame: &DecodedFrame) -> Result<()> {
        validate_frame(frame)?;

        if frame.width() == self.surface.width() && frame.height() == self.surface.height() {
            self.surface.write_frame(frame.data())?;
        } else {
            log::trace!(
                "Scaling frame {}x{} -> {}x{}",
                frame.width(),
                frame.height(),
                self.surface.width(),
                self.surface.height()
            );
            self.scale_into_surface(frame)?;
        }

        self.surface.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, bgra: [u8; 4]) -> DecodedFrame {
        let data = bgra.repeat((width * height) as usize);
        DecodedFrame::new(data, 0, width, height)
    }

    #[test]
    fn test_same_size_copy() {
        let surface = Surface::anonymous(4, 4).unwrap();
        let mut presenter = RasterPresenter::new(surface);

        presenter.draw(&solid_frame(4, 4, [10, 20, 30, 255])).unwrap();
        assert!(
            presenter
                .surface()
                .pixels()
                .chunks_exact(4)
                .all(|px| px == [10, 20, 30, 255])
        );
    }

    #[test]
    fn test_scaled_draw_fills_surface() {
        let surface = Surface::anonymous(8, 6).unwrap();
        let mut presenter = RasterPresenter::new(surface);

        presenter.draw(&solid_frame(2, 2, [0, 128, 255, 255])).unwrap();
        assert!(
            presenter
                .surface()
                .pixels()
                .chunks_exact(4)
                .all(|px| px == [0, 128, 255, 255])
        );
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let surface = Surface::anonymous(2, 2).unwrap();
        let mut presenter = RasterPresenter::new(surface);

        let frame = DecodedFrame::new(vec![0; 10], 0, 2, 2);
        assert!(matches!(presenter.draw(&frame), Err(PlayoutError::Render(_))));
    }
}
