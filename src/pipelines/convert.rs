// SPDX-License-Identifier: GPL-3.0-only

//! YUV 4:2:0 to RGB conversion for extracted frames

use crate::backends::camera::orientation::ImageRotation;
use crate::backends::camera::types::ExtractedFrame;
use image::RgbImage;
use image::imageops;
use std::fmt;

/// Conversion errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// A plane holds fewer bytes than its stride and the frame size require
    PlaneTooShort {
        plane: &'static str,
        needed: usize,
        actual: usize,
    },
    /// A row stride is smaller than the row width
    InvalidStride { plane: &'static str, stride: u32 },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::PlaneTooShort {
                plane,
                needed,
                actual,
            } => write!(f, "{} plane too short: {} < {} bytes", plane, actual, needed),
            ConvertError::InvalidStride { plane, stride } => {
                write!(f, "{} plane stride {} smaller than row", plane, stride)
            }
        }
    }
}

impl std::error::Error for ConvertError {}

fn check_plane(
    plane: &'static str,
    data: &[u8],
    stride: u32,
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    if stride < width {
        return Err(ConvertError::InvalidStride { plane, stride });
    }
    // The last row does not need its padding
    let needed = stride as usize * height.saturating_sub(1) as usize + width as usize;
    if data.len() < needed {
        return Err(ConvertError::PlaneTooShort {
            plane,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Convert a frame to RGB without rotating it
///
/// Uses BT.601 full-range coefficients. Chroma samples are one byte apart
/// within a row and cover 2x2 luma pixels.
pub fn yuv420_to_rgb(frame: &ExtractedFrame) -> Result<RgbImage, ConvertError> {
    let (width, height) = (frame.width, frame.height);
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));

    check_plane("Y", &frame.plane_y, frame.stride_y, width, height)?;
    check_plane("U", &frame.plane_u, frame.stride_u, chroma_width, chroma_height)?;
    check_plane("V", &frame.plane_v, frame.stride_v, chroma_width, chroma_height)?;

    let mut rgb = RgbImage::new(width, height);

    for row in 0..height {
        let y_row = row as usize * frame.stride_y as usize;
        let u_row = (row / 2) as usize * frame.stride_u as usize;
        let v_row = (row / 2) as usize * frame.stride_v as usize;

        for col in 0..width {
            let y = frame.plane_y[y_row + col as usize] as f32;
            let u = frame.plane_u[u_row + (col / 2) as usize] as f32 - 128.0;
            let v = frame.plane_v[v_row + (col / 2) as usize] as f32 - 128.0;

            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

            rgb.put_pixel(col, row, image::Rgb([r, g, b]));
        }
    }

    Ok(rgb)
}

/// Convert a frame to an upright RGB image
///
/// The frame's rotation is snapped to the nearest quarter turn and applied
/// clockwise.
pub fn to_rgb_image(frame: &ExtractedFrame) -> Result<RgbImage, ConvertError> {
    let rgb = yuv420_to_rgb(frame)?;

    Ok(match ImageRotation::nearest(frame.rotation_degrees as i32) {
        ImageRotation::Deg0 => rgb,
        ImageRotation::Deg90 => imageops::rotate90(&rgb),
        ImageRotation::Deg180 => imageops::rotate180(&rgb),
        ImageRotation::Deg270 => imageops::rotate270(&rgb),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, rotation_degrees: u32) -> ExtractedFrame {
        let stride_y = width + 3;
        let stride_c = width.div_ceil(2) + 1;
        ExtractedFrame {
            plane_y: vec![200; (stride_y * height) as usize],
            stride_y,
            plane_u: vec![128; (stride_c * height.div_ceil(2)) as usize],
            stride_u: stride_c,
            plane_v: vec![128; (stride_c * height.div_ceil(2)) as usize],
            stride_v: stride_c,
            rotation_degrees,
            width,
            height,
        }
    }

    #[test]
    fn test_neutral_chroma_is_grey() {
        let rgb = yuv420_to_rgb(&frame(4, 2, 0)).unwrap();
        for pixel in rgb.pixels() {
            assert_eq!(pixel.0, [200, 200, 200]);
        }
    }

    #[test]
    fn test_red_chroma() {
        let mut f = frame(2, 2, 0);
        f.plane_y = vec![76; f.plane_y.len()];
        f.plane_u = vec![85; f.plane_u.len()];
        f.plane_v = vec![255; f.plane_v.len()];

        let pixel = yuv420_to_rgb(&f).unwrap().get_pixel(0, 0).0;
        assert!(pixel[0] > 240, "{:?}", pixel);
        assert!(pixel[1] < 20, "{:?}", pixel);
        assert!(pixel[2] < 20, "{:?}", pixel);
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        assert_eq!(to_rgb_image(&frame(8, 4, 90)).unwrap().dimensions(), (4, 8));
        assert_eq!(to_rgb_image(&frame(8, 4, 180)).unwrap().dimensions(), (8, 4));
        assert_eq!(to_rgb_image(&frame(8, 4, 270)).unwrap().dimensions(), (4, 8));
    }

    #[test]
    fn test_rotation_moves_pixels_clockwise() {
        let mut f = frame(2, 2, 90);
        // Mark the top-left luma sample
        f.plane_y[0] = 0;

        let rgb = to_rgb_image(&f).unwrap();
        // After a clockwise quarter turn top-left lands top-right
        assert_eq!(rgb.get_pixel(1, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_short_plane_rejected() {
        let mut f = frame(4, 4, 0);
        f.plane_v.truncate(2);
        assert!(matches!(
            yuv420_to_rgb(&f),
            Err(ConvertError::PlaneTooShort { plane: "V", .. })
        ));
    }

    #[test]
    fn test_stride_smaller_than_width_rejected() {
        let mut f = frame(4, 2, 0);
        f.stride_y = 2;
        assert_eq!(
            yuv420_to_rgb(&f),
            Err(ConvertError::InvalidStride {
                plane: "Y",
                stride: 2
            })
        );
    }
}
