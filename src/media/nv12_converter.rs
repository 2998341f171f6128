// SPDX-License-Identifier: GPL-3.0-only

//! NV12 to RGBA conversion for preview images
//!
//! Fixed-point BT.601 limited-range coefficients scaled by 128:
//! R = 1.164(Y-16) + 1.402V, G = 1.164(Y-16) - 0.344U - 0.714V,
//! B = 1.164(Y-16) + 1.772U.

use crate::backends::camera::types::RawFrame;
use image::RgbaImage;

/// Convert an NV12 frame honouring its plane strides
pub fn convert_nv12_to_rgba(frame: &RawFrame) -> Result<RgbaImage, String> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let y_stride = frame.stride_y as usize;
    let uv_stride = frame.stride_uv as usize;
    let uv_offset = frame.offset_uv;
    let data: &[u8] = &frame.data;

    if width == 0 || height == 0 {
        return Err("Empty frame".to_string());
    }
    // chroma is read in pairs, so odd widths still need a full UV pair
    let uv_row_bytes = width.div_ceil(2) * 2;
    let y_needed = (height - 1) * y_stride + width;
    let uv_needed = uv_offset + (height.div_ceil(2) - 1) * uv_stride + uv_row_bytes;
    if y_stride < width || uv_stride < uv_row_bytes || y_needed > uv_offset || uv_needed > data.len()
    {
        return Err(format!(
            "NV12 buffer of {} bytes too small for {}x{} (strides {}/{}, uv offset {})",
            data.len(),
            width,
            height,
            y_stride,
            uv_stride,
            uv_offset
        ));
    }

    let y_plane = &data[..uv_offset];
    let uv_plane = &data[uv_offset..];
    let mut rgba_data = vec![0u8; width * height * 4];

    // Process two rows at a time for better cache locality
    for y_idx in (0..height).step_by(2) {
        let uv_row = y_idx / 2;
        process_row(
            y_plane,
            uv_plane,
            &mut rgba_data,
            y_idx,
            uv_row,
            width,
            y_stride,
            uv_stride,
        );
        if y_idx + 1 < height {
            process_row(
                y_plane,
                uv_plane,
                &mut rgba_data,
                y_idx + 1,
                uv_row,
                width,
                y_stride,
                uv_stride,
            );
        }
    }

    RgbaImage::from_raw(width as u32, height as u32, rgba_data)
        .ok_or_else(|| "Failed to create RGBA image from buffer".to_string())
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn process_row(
    y_plane: &[u8],
    uv_plane: &[u8],
    rgba_data: &mut [u8],
    y_idx: usize,
    uv_row: usize,
    width: usize,
    y_stride: usize,
    uv_stride: usize,
) {
    let y_row_start = y_idx * y_stride;
    let uv_row_start = uv_row * uv_stride;
    let out_row_start = y_idx * width * 4;

    for x_idx in (0..width).step_by(2) {
        let y_offset = y_row_start + x_idx;
        let uv_offset = uv_row_start + x_idx;

        // One UV pair covers two pixels
        let u = uv_plane[uv_offset] as i32 - 128;
        let v = uv_plane[uv_offset + 1] as i32 - 128;

        let r_v = (179 * v) >> 7;
        let g_u = (44 * u) >> 7;
        let g_v = (91 * v) >> 7;
        let b_u = (227 * u) >> 7;

        for dx in 0..2 {
            if x_idx + dx >= width {
                break;
            }
            let luma = ((y_plane[y_offset + dx] as i32 - 16) * 149) >> 7;
            let out = out_row_start + (x_idx + dx) * 4;
            rgba_data[out] = (luma + r_v).clamp(0, 255) as u8;
            rgba_data[out + 1] = (luma - g_u - g_v).clamp(0, 255) as u8;
            rgba_data[out + 2] = (luma + b_u).clamp(0, 255) as u8;
            rgba_data[out + 3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn nv12(width: u32, height: u32, y: u8, u: u8, v: u8) -> RawFrame {
        let y_size = (width * height) as usize;
        let uv_size = y_size / 2;
        let mut data = vec![y; y_size];
        data.extend(std::iter::repeat_n([u, v], uv_size / 2).flatten());
        RawFrame::nv12_packed(width, height, Duration::ZERO, Arc::from(data))
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        let image = convert_nv12_to_rgba(&nv12(16, 16, 128, 128, 128)).unwrap();
        let pixel = image.get_pixel(5, 5);
        assert_eq!(pixel[0], pixel[1]);
        assert_eq!(pixel[1], pixel[2]);
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn test_black_and_white_levels() {
        let black = convert_nv12_to_rgba(&nv12(4, 4, 16, 128, 128)).unwrap();
        assert_eq!(black.get_pixel(0, 0).0, [0, 0, 0, 255]);

        let white = convert_nv12_to_rgba(&nv12(4, 4, 255, 128, 128)).unwrap();
        assert_eq!(white.get_pixel(3, 3).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_strided_frame() {
        let (width, height, stride) = (4u32, 2u32, 8u32);
        let mut data = vec![16u8; (stride * height) as usize];
        data.extend(std::iter::repeat_n(128u8, stride as usize));
        let frame = RawFrame {
            width,
            height,
            stride_y: stride,
            stride_uv: stride,
            offset_uv: (stride * height) as usize,
            pts: Duration::ZERO,
            data: crate::backends::camera::types::FrameData::Copied(Arc::from(data)),
        };
        let image = convert_nv12_to_rgba(&frame).unwrap();
        assert_eq!(image.dimensions(), (4, 2));
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let frame = RawFrame::nv12_packed(16, 16, Duration::ZERO, Arc::from(vec![0u8; 10]));
        assert!(convert_nv12_to_rgba(&frame).is_err());
    }
}
