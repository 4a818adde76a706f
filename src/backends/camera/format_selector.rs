// SPDX-License-Identifier: GPL-3.0-only

//! Output stream format selection
//!
//! The pipeline only needs preview-sized frames, so the smallest advertised
//! width wins: every frame is copied out of the camera buffer, and a smaller
//! frame keeps that copy cheap.

use super::types::{ImageFormat, StreamConfiguration, StreamFormat};
use tracing::debug;

/// Format selection errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    /// The device reports no output size for the required format
    NoCompatibleFormat { pixel_format: ImageFormat },
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::NoCompatibleFormat { pixel_format } => {
                write!(f, "No output size available for {}", pixel_format)
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// Select the configuration with the smallest width for `required`
///
/// Ties keep the first entry in device-reported order. Degenerate entries
/// (zero width or height) are never selected.
pub fn select_stream_format(
    configurations: &[StreamConfiguration],
    required: ImageFormat,
) -> Result<StreamFormat, FormatError> {
    let mut selected: Option<&StreamConfiguration> = None;

    for config in configurations
        .iter()
        .filter(|c| c.format == required && c.width > 0 && c.height > 0)
    {
        // Strict comparison keeps the earliest of equal widths
        if selected.is_none_or(|s| config.width < s.width) {
            selected = Some(config);
        }
    }

    let config = selected.ok_or(FormatError::NoCompatibleFormat {
        pixel_format: required,
    })?;

    debug!(
        width = config.width,
        height = config.height,
        format = %required,
        "Selected stream format"
    );

    Ok(StreamFormat::new(required, config.width, config.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuv(width: u32, height: u32) -> StreamConfiguration {
        StreamConfiguration::new(ImageFormat::Yuv420_888, width, height)
    }

    #[test]
    fn test_selects_smallest_width() {
        let configs = [yuv(640, 480), yuv(320, 240), yuv(1280, 720)];
        let format = select_stream_format(&configs, ImageFormat::Yuv420_888).unwrap();

        assert_eq!(format.width(), 320);
        assert_eq!(format.height(), 240);
        assert_eq!(format.pixel_format(), ImageFormat::Yuv420_888);
    }

    #[test]
    fn test_ties_keep_first_entry() {
        let configs = [yuv(640, 480), yuv(320, 240), yuv(320, 180)];
        let format = select_stream_format(&configs, ImageFormat::Yuv420_888).unwrap();

        assert_eq!((format.width(), format.height()), (320, 240));
    }

    #[test]
    fn test_other_formats_are_ignored() {
        let configs = [
            StreamConfiguration::new(ImageFormat::Jpeg, 160, 120),
            yuv(640, 480),
        ];
        let format = select_stream_format(&configs, ImageFormat::Yuv420_888).unwrap();

        assert_eq!(format.width(), 640);
    }

    #[test]
    fn test_empty_list_fails() {
        assert_eq!(
            select_stream_format(&[], ImageFormat::Yuv420_888),
            Err(FormatError::NoCompatibleFormat {
                pixel_format: ImageFormat::Yuv420_888
            })
        );
    }

    #[test]
    fn test_only_other_formats_fails() {
        let configs = [StreamConfiguration::new(ImageFormat::Jpeg, 640, 480)];
        assert!(select_stream_format(&configs, ImageFormat::Yuv420_888).is_err());
    }

    #[test]
    fn test_minimum_over_many_orders() {
        let widths = [1920u32, 800, 176, 640, 176, 1024];
        let configs: Vec<_> = widths
            .iter()
            .enumerate()
            .map(|(i, &w)| yuv(w, 100 + i as u32))
            .collect();
        let format = select_stream_format(&configs, ImageFormat::Yuv420_888).unwrap();

        // First 176-wide entry is index 2
        assert_eq!((format.width(), format.height()), (176, 102));
    }
}
