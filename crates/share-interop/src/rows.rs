//! Pitch-aware row copies between CPU buffers.

/// Copy `height` rows from `src` to `dst`, where each buffer has its own
/// row pitch.
///
/// Each row copies `min(src_linesize, dst_linesize)` bytes. Rows that would
/// fall outside either buffer are not touched, so a short buffer truncates
/// the copy instead of overrunning. Returns the number of bytes copied.
pub fn copy_rows(
    src: &[u8],
    src_linesize: usize,
    dst: &mut [u8],
    dst_linesize: usize,
    height: usize,
) -> usize {
    copy_row_prefix(
        src,
        src_linesize,
        dst,
        dst_linesize,
        src_linesize.min(dst_linesize),
        height,
    )
}

/// Like [`copy_rows`], but copies at most `row_bytes` of each row. Use it when
/// a pitch includes padding that must not reach the other buffer.
pub fn copy_row_prefix(
    src: &[u8],
    src_linesize: usize,
    dst: &mut [u8],
    dst_linesize: usize,
    row_bytes: usize,
    height: usize,
) -> usize {
    let row = row_bytes.min(src_linesize).min(dst_linesize);
    if row == 0 {
        return 0;
    }

    // Fast path: identical unpadded pitch, one contiguous copy.
    if src_linesize == dst_linesize && row == src_linesize {
        let len = (row * height).min(src.len()).min(dst.len());
        let len = len - len % row;
        dst[..len].copy_from_slice(&src[..len]);
        return len;
    }

    let mut copied = 0;
    for y in 0..height {
        let s = y * src_linesize;
        let d = y * dst_linesize;
        if s + row > src.len() || d + row > dst.len() {
            break;
        }
        dst[d..d + row].copy_from_slice(&src[s..s + row]);
        copied += row;
    }
    copied
}
