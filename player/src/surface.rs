use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{PlayoutError, Result};

/// Size and location of the surface presenters paint into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    /// File to map. `None` maps an anonymous temporary file.
    pub path: Option<PathBuf>,
}

/// Memory-mapped BGRA8 pixel surface.
///
/// When backed by a named file, other processes can map the same file to
/// display what the presenter paints.
pub struct Surface {
    mmap: memmap2::MmapMut,
    width: u32,
    height: u32,
    path: Option<PathBuf>,
}

impl Surface {
    pub fn create(spec: &SurfaceSpec) -> Result<Self> {
        match spec.path {
            Some(ref path) => Self::open(path, spec.width, spec.height),
            None => Self::anonymous(spec.width, spec.height),
        }
    }

    /// Surface backed by an unnamed temporary file
    pub fn anonymous(width: u32, height: u32) -> Result<Self> {
        let size = Self::byte_size(width, height)?;

        let file = tempfile::tempfile()?;
        file.set_len(size)?;

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        Ok(Self {
            mmap,
            width,
            height,
            path: None,
        })
    }

    /// Surface backed by a named file, created or resized as needed
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self> {
        let size = Self::byte_size(width, height)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size)?;

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };
        log::info!(
            "Mapped {}x{} surface at {}",
            width,
            height,
            path.display()
        );

        Ok(Self {
            mmap,
            width,
            height,
            path: Some(path.to_path_buf()),
        })
    }

    fn byte_size(width: u32, height: u32) -> Result<u64> {
        if width == 0 || height == 0 {
            return Err(PlayoutError::Configuration(format!(
                "Invalid surface size {}x{}",
                width, height
            )));
        }
        Ok(width as u64 * height as u64 * 4)
    }

    pub fn fill_color(&mut self, r: u8, g: u8, b: u8, a: u8) {
        let color = [b, g, r, a];

        for chunk in self.mmap.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Replace the surface contents with a full frame of BGRA8 pixels
    pub fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() != self.mmap.len() {
            return Err(PlayoutError::Render(format!(
                "Frame data size mismatch: expected {}, got {}",
                self.mmap.len(),
                data.len()
            )));
        }

        self.mmap.copy_from_slice(data);
        Ok(())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.mmap
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Schedule write-back of a file-backed surface
    pub fn flush(&self) -> Result<()> {
        if self.path.is_some() {
            self.mmap.flush_async()?;
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Parse a hex color string (e.g., "#FF5733" or "FF5733") to RGBA
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8, u8)> {
    let color = color.trim_start_matches('#');

    if color.len() != 6 && color.len() != 8 {
        return None;
    }

    let r = u8::from_str_radix(&color[0..2], 16).ok()?;
    let g = u8::from_str_radix(&color[2..4], 16).ok()?;
    let b = u8::from_str_radix(&color[4..6], 16).ok()?;
    let a = if color.len() == 8 {
        u8::from_str_radix(&color[6..8], 16).ok()?
    } else {
        255
    };

    Some((r, g, b, a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_surface() {
        let mut surface = Surface::anonymous(4, 2).unwrap();
        assert_eq!(surface.pixels().len(), 32);
        assert_eq!(surface.stride(), 16);

        surface.fill_color(255, 0, 0, 255);
        assert_eq!(&surface.pixels()[0..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            Surface::anonymous(0, 10),
            Err(PlayoutError::Configuration(_))
        ));
    }

    #[test]
    fn test_write_frame_size_checked() {
        let mut surface = Surface::anonymous(2, 2).unwrap();
        assert!(surface.write_frame(&[1u8; 16]).is_ok());
        assert_eq!(surface.pixels(), &[1u8; 16]);
        assert!(matches!(
            surface.write_frame(&[0u8; 15]),
            Err(PlayoutError::Render(_))
        ));
    }

    #[test]
    fn test_file_backed_surface_visible_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.bgra");

        let mut surface = Surface::create(&SurfaceSpec {
            width: 2,
            height: 1,
            path: Some(path.clone()),
        })
        .unwrap();
        surface.write_frame(&[9u8; 8]).unwrap();
        surface.flush().unwrap();
        drop(surface);

        assert_eq!(std::fs::read(&path).unwrap(), vec![9u8; 8]);
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF5733"), Some((255, 87, 51, 255)));
        assert_eq!(parse_hex_color("FF5733"), Some((255, 87, 51, 255)));
        assert_eq!(parse_hex_color("#FF573380"), Some((255, 87, 51, 128)));
        assert_eq!(parse_hex_color("invalid"), None);
    }
}
