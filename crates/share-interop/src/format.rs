//! Pixel formats, texture descriptors and shared handles.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Texel layouts the bridge can stage. Discriminants are DXGI format codes,
/// which is how the sharing protocol records a sender's format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u32)]
pub enum PixelFormat {
    Rgba8Unorm = 28,
    Bgra8Unorm = 87,
    Bgrx8Unorm = 88,
}

impl PixelFormat {
    /// Decode a DXGI format code. Codes the bridge cannot stage yield `None`;
    /// callers that only compare formats should keep the raw code instead.
    pub fn from_dxgi(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }

    pub fn dxgi(self) -> u32 {
        self as u32
    }

    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Byte offsets of the red, green, blue and alpha channels within a texel.
    /// BGRX has no alpha channel; its fourth byte is padding.
    pub(crate) const fn channel_offsets(self) -> [usize; 4] {
        match self {
            Self::Rgba8Unorm => [0, 1, 2, 3],
            Self::Bgra8Unorm | Self::Bgrx8Unorm => [2, 1, 0, 3],
        }
    }

    pub const fn has_alpha(self) -> bool {
        !matches!(self, Self::Bgrx8Unorm)
    }
}

/// Size and format of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Tightly packed row length in bytes.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for TextureDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.format)
    }
}

/// Opaque cross-process handle of a shared texture.
///
/// Only meaningful while the process that created the texture keeps it
/// alive. Holders never own the resource behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedHandle(pub u64);

impl fmt::Display for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dxgi_codes_decode() {
        assert_eq!(PixelFormat::from_dxgi(87), Some(PixelFormat::Bgra8Unorm));
        assert_eq!(PixelFormat::from_dxgi(88), Some(PixelFormat::Bgrx8Unorm));
        assert_eq!(PixelFormat::from_dxgi(28), Some(PixelFormat::Rgba8Unorm));
        assert_eq!(PixelFormat::from_dxgi(29), None);
        assert_eq!(PixelFormat::Bgra8Unorm.dxgi(), 87);
    }

    #[test]
    fn row_bytes_is_tightly_packed() {
        let desc = TextureDesc::new(800, 600, PixelFormat::Bgra8Unorm);
        assert_eq!(desc.row_bytes(), 3200);
        assert!(!desc.is_empty());
        assert!(TextureDesc::new(0, 600, PixelFormat::Bgra8Unorm).is_empty());
    }
}
