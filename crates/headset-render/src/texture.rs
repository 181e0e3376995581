//! 2D textures and the RGBA images that fill them.

use std::path::Path;

use crate::device::{check_image_size, GpuDevice, TextureId};
use crate::error::RenderResult;

/// Decoded RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl TextureImage {
    /// Wraps raw RGBA8 pixels, checking that the length matches the size.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> RenderResult<Self> {
        check_image_size(width, height, &rgba)?;
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// A single pixel of `color`.
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: color.to_vec(),
        }
    }

    /// A `size x size` checkerboard with `cells` squares per side.
    pub fn checkerboard(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let mut rgba = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let color = if (x / cell + y / cell) % 2 == 0 { a } else { b };
                rgba.extend_from_slice(&color);
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }

    /// Decodes an image file (any format the `image` crate reads).
    pub fn from_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let img = image::open(path.as_ref())?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            rgba: img.into_raw(),
        })
    }

    /// Decodes an in-memory encoded image.
    pub fn from_memory(bytes: &[u8]) -> RenderResult<Self> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            rgba: img.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.rgba
    }
}

/// A 2D texture sampled by the fragment stage.
///
/// Must be bound to a texture unit before each draw that samples it.
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    unit: Option<u32>,
    size: Option<(u32, u32)>,
    released: bool,
}

impl Texture {
    /// Allocates an empty texture.
    pub fn create(device: &mut dyn GpuDevice) -> RenderResult<Self> {
        let id = device.create_texture()?;
        Ok(Self {
            id,
            unit: None,
            size: None,
            released: false,
        })
    }

    /// Allocates a texture holding `image`. Nothing stays allocated on failure.
    pub fn from_image(device: &mut dyn GpuDevice, image: &TextureImage) -> RenderResult<Self> {
        let mut texture = Self::create(device)?;
        if let Err(e) = texture.load_from_image(device, image) {
            if let Err(release_err) = texture.release(device) {
                log::warn!("failed to release texture after error: {release_err}");
            }
            return Err(e);
        }
        Ok(texture)
    }

    /// Replaces the contents with `image`.
    pub fn load_from_image(
        &mut self,
        device: &mut dyn GpuDevice,
        image: &TextureImage,
    ) -> RenderResult<()> {
        device.upload_texture(self.id, image.width, image.height, &image.rgba)?;
        self.size = Some((image.width, image.height));
        Ok(())
    }

    /// Decodes `path` and replaces the contents with it.
    pub fn load_from_file(
        &mut self,
        device: &mut dyn GpuDevice,
        path: impl AsRef<Path>,
    ) -> RenderResult<()> {
        let image = TextureImage::from_file(path)?;
        self.load_from_image(device, &image)
    }

    /// Binds the texture to `unit`.
    pub fn bind(&mut self, device: &mut dyn GpuDevice, unit: u32) -> RenderResult<()> {
        device.bind_texture(unit, self.id)?;
        self.unit = Some(unit);
        Ok(())
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Unit of the last successful bind.
    pub fn unit(&self) -> Option<u32> {
        self.unit
    }

    /// `(width, height)` of the current contents.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn release(mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        self.released = true;
        log::debug!("releasing texture {}", self.id.0);
        device.delete_texture(self.id)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("texture {} dropped without release", self.id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::recording::RecordingDevice;

    #[test]
    fn test_image_size_validated() {
        assert!(TextureImage::new(2, 1, vec![0; 8]).is_ok());
        assert!(matches!(
            TextureImage::new(2, 2, vec![0; 8]),
            Err(RenderError::ImageSize { .. })
        ));
    }

    #[test]
    fn test_checkerboard_alternates() {
        let white = [255, 255, 255, 255];
        let grey = [128, 128, 128, 255];
        let img = TextureImage::checkerboard(4, 2, white, grey);
        assert_eq!(img.width(), 4);
        assert_eq!(&img.pixels()[0..4], &white);
        // Pixel (2, 0) is in the second cell.
        assert_eq!(&img.pixels()[8..12], &grey);
    }

    #[test]
    fn test_from_memory_png() {
        let mut png = std::io::Cursor::new(Vec::new());
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let img = TextureImage::from_memory(png.get_ref()).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
        assert_eq!(&img.pixels()[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(TextureImage::from_file("/nonexistent/hand.png").is_err());
    }

    #[test]
    fn test_bind_remembers_unit() {
        let mut device = RecordingDevice::new();
        let mut texture = Texture::from_image(&mut device, &TextureImage::solid([1, 2, 3, 4])).unwrap();
        assert_eq!(texture.dimensions(), Some((1, 1)));
        texture.bind(&mut device, 3).unwrap();
        assert_eq!(texture.unit(), Some(3));
        assert_eq!(device.bound_texture(3), Some(texture.id()));
        texture.release(&mut device).unwrap();
    }
}
