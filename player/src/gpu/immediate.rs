//! Texel-copy presenter: upload, copy back, no shader stage

use common::RendererBackend;

use super::texture::{GpuTexture, StagingReadback};
use super::{GpuCapabilities, GpuContext, check_frame_size, render_error};
use crate::error::Result;
use crate::frame::DecodedFrame;
use crate::presenter::{Presenter, validate_frame};
use crate::surface::Surface;

pub struct ImmediatePresenter {
    context: GpuContext,
    capabilities: GpuCapabilities,
    surface: Surface,
    staging: StagingReadback,
    frame_texture: Option<GpuTexture>,
}

impl ImmediatePresenter {
    pub fn new(context: GpuContext, surface: Surface) -> Result<Self> {
        let capabilities = context.capabilities().clone();

        let staging = StagingReadback::new(&context.device, surface.width(), surface.height());

        Ok(Self {
            context,
            capabilities,
            surface,
            staging,
            frame_texture: None,
        })
    }
}

impl Presenter for ImmediatePresenter {
    fn backend(&self) -> RendererBackend {
        RendererBackend::GpuImmediate
    }

    fn draw(&mut self, frame: &DecodedFrame) -> Result<()> {
        validate_frame(frame)?;
        check_frame_size(&self.capabilities, frame.width(), frame.height())?;

        let (width, height) = (frame.width(), frame.height());
        let (texture, created) = GpuTexture::reuse_or_create(
            &mut self.frame_texture,
            &self.context.device,
            width,
            height,
        );

        // Only the overlapping region is copied; clear what a smaller frame
        // would leave stale
        if created && (width != self.surface.width() || height != self.surface.height()) {
            log::warn!(
                "Frame {}x{} does not match surface {}x{}, copying overlapping region",
                width,
                height,
                self.surface.width(),
                self.surface.height()
            );
            self.surface.fill_color(0, 0, 0, 255);
        }

        texture
            .write(&self.context.queue, frame.data())
            .map_err(render_error)?;

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Immediate Copy Encoder"),
                });
        self.staging
            .copy_from(&mut encoder, &texture.texture, width, height);
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let stride = self.surface.stride();
        self.staging
            .read_into(
                &self.context.device,
                width,
                height,
                self.surface.pixels_mut(),
                stride,
            )
            .map_err(render_error)?;

        self.surface.flush()
    }
}
