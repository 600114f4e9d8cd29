use anyhow::{Context, Result};

/// Texel format shared by frames, render targets and the surface
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

/// Row pitch of a texture-to-buffer copy, padded to the copy alignment
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// A BGRA8 GPU texture and its default view
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl GpuTexture {
    /// Texture receiving uploaded frames
    pub fn frame_texture(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::create(
            device,
            "Frame Texture (BGRA)",
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        )
    }

    /// Surface-sized render target for the scaling pass
    pub fn render_target(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::create(
            device,
            "Surface Render Target",
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        )
    }

    fn create(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
        }
    }

    /// Upload packed BGRA8 pixels covering the whole texture
    pub fn write(&self, queue: &wgpu::Queue, data: &[u8]) -> Result<()> {
        let expected_size = (self.width * self.height * 4) as usize;
        if data.len() != expected_size {
            anyhow::bail!(
                "Invalid texture data size: expected {} bytes ({}x{} BGRA), got {} bytes",
                expected_size,
                self.width,
                self.height,
                data.len()
            );
        }

        queue.write_texture(
            self.texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            extent(self.width, self.height),
        );
        Ok(())
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Frame texture held in `slot`, replaced when the frame size changes.
    /// The flag is set when a new texture was created.
    pub fn reuse_or_create<'a>(
        slot: &'a mut Option<GpuTexture>,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (&'a GpuTexture, bool) {
        if !slot.as_ref().is_some_and(|texture| texture.matches(width, height)) {
            *slot = None;
        }
        let created = slot.is_none();
        if created {
            log::info!("Creating {}x{} frame texture", width, height);
        }

        let texture = slot.get_or_insert_with(|| Self::frame_texture(device, width, height));
        (texture, created)
    }
}

/// Staging buffer for reading textures back into the surface
pub struct StagingReadback {
    buffer: wgpu::Buffer,
    padded_bytes_per_row: u32,
    width: u32,
    height: u32,
}

impl StagingReadback {
    /// Staging buffer large enough for a `width`x`height` region
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let padded_bytes_per_row = padded_bytes_per_row(width);
        let buffer_size = (padded_bytes_per_row * height) as wgpu::BufferAddress;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Staging Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            padded_bytes_per_row,
            width,
            height,
        }
    }

    /// Record a copy of the top-left `width`x`height` region of `texture`
    pub fn copy_from(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) {
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            extent(width.min(self.width), height.min(self.height)),
        );
    }

    /// Wait for submitted copies and write the top-left `width`x`height`
    /// region into `dst`, a packed BGRA8 image with `dst_stride` bytes per row
    pub fn read_into(
        &self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        dst: &mut [u8],
        dst_stride: usize,
    ) -> Result<()> {
        let width = width.min(self.width);
        let height = height.min(self.height);

        let buffer_slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .context("Failed to wait for GPU copy")?;

        rx.recv()
            .context("Failed to receive buffer mapping result")?
            .context("Failed to map GPU buffer")?;

        let data = buffer_slice.get_mapped_range();
        let row_bytes = width as usize * 4;

        for row in 0..height as usize {
            let src_offset = row * self.padded_bytes_per_row as usize;
            let dst_offset = row * dst_stride;
            dst[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&data[src_offset..src_offset + row_bytes]);
        }

        drop(data);
        self.buffer.unmap();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1280), 5120);
        assert_eq!(padded_bytes_per_row(1), 256);
    }
}
