//! Raw video frames from the host's output path.

/// Pixel layouts the host can deliver on its raw video path. The output asks
/// the host for [`VideoFormat::Bgra`]; the others appear when a host ignores
/// the conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Bgra,
    Bgrx,
    Rgba,
    /// Planar or otherwise unsupported layout.
    Other,
}

/// One CPU-side video frame, borrowed from the host for the duration of the
/// callback.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    /// Bytes per row, which may exceed `width * 4`.
    pub linesize: usize,
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
}

impl<'a> RawFrame<'a> {
    pub fn new(data: &'a [u8], linesize: usize, width: u32, height: u32) -> Self {
        Self {
            data,
            linesize,
            width,
            height,
            format: VideoFormat::Bgra,
        }
    }

    pub fn with_format(mut self, format: VideoFormat) -> Self {
        self.format = format;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}
