//! Shader presenter: samples the frame into a surface-sized render target

use common::RendererBackend;

use super::pipeline_builder::{PipelineBuilder, bind_group_entries, create_pipeline_layout};
use super::texture::{GpuTexture, StagingReadback};
use super::{GpuCapabilities, GpuContext, check_frame_size, render_error};
use crate::error::Result;
use crate::frame::DecodedFrame;
use crate::presenter::{Presenter, validate_frame};
use crate::surface::Surface;

pub struct ModernPresenter {
    context: GpuContext,
    capabilities: GpuCapabilities,
    surface: Surface,
    scale_pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    target: GpuTexture,
    staging: StagingReadback,
    frame_texture: Option<GpuTexture>,
    /// Bind group of the current frame texture
    bind_group: Option<wgpu::BindGroup>,
}

impl ModernPresenter {
    pub fn new(context: GpuContext, surface: Surface) -> Result<Self> {
        let capabilities = context.capabilities().clone();

        let texture_bind_group_layout =
            context
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Frame Texture Bind Group Layout"),
                    entries: &[
                        bind_group_entries::texture(0),
                        bind_group_entries::sampler(1),
                    ],
                });

        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let pipeline_layout = create_pipeline_layout(
            &context.device,
            "Scale Pipeline Layout",
            &[&texture_bind_group_layout],
        );

        let scale_pipeline =
            PipelineBuilder::new(&context.device, include_str!("shaders/scale.wgsl"))
                .with_label("Scale Pipeline")
                .with_layout(&pipeline_layout)
                .build();

        let target = GpuTexture::render_target(&context.device, surface.width(), surface.height());
        let staging = StagingReadback::new(&context.device, surface.width(), surface.height());

        Ok(Self {
            context,
            capabilities,
            surface,
            scale_pipeline,
            texture_bind_group_layout,
            sampler,
            target,
            staging,
            frame_texture: None,
            bind_group: None,
        })
    }
}

impl Presenter for ModernPresenter {
    fn backend(&self) -> RendererBackend {
        RendererBackend::GpuModern
    }

    fn draw(&mut self, frame: &DecodedFrame) -> Result<()> {
        validate_frame(frame)?;
        check_frame_size(&self.capabilities, frame.width(), frame.height())?;

        let (texture, created) = GpuTexture::reuse_or_create(
            &mut self.frame_texture,
            &self.context.device,
            frame.width(),
            frame.height(),
        );

        if created || self.bind_group.is_none() {
            self.bind_group = Some(self.context.device.create_bind_group(
                &wgpu::BindGroupDescriptor {
                    label: Some("Frame Texture Bind Group"),
                    layout: &self.texture_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&texture.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                },
            ));
        }

        texture
            .write(&self.context.queue, frame.data())
            .map_err(render_error)?;

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Scale Pass Encoder"),
                });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scale Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_pipeline(&self.scale_pipeline);
            render_pass.set_bind_group(0, self.bind_group.as_ref(), &[]);
            render_pass.draw(0..3, 0..1); // Full-screen triangle
        }

        let (width, height) = (self.surface.width(), self.surface.height());
        self.staging
            .copy_from(&mut encoder, &self.target.texture, width, height);
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
