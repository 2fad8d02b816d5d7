//! Image recode: decode an uploaded image and re-encode it in the target format.
//!
//! Output formats are a closed set ([`TargetFormat`]). Encoders are picked
//! by format, never by file extension: `jpg` and `jpeg` share the JPEG
//! encoder and differ only in the extension written.
//!
//! JPEG has no alpha channel, so images with transparency are flattened to
//! opaque RGB8 before encoding. PNG and TIFF keep whatever colour model the
//! source had, alpha included.
//!
//! Inputs are wider than outputs: WebP decodes too, and HEIF/HEIC does when
//! the `heif` feature (libheif) is enabled.

use crate::error::{ItemError, RockitError};
use crate::pipeline::intake::is_heif;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use tracing::debug;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Jpg,
    Jpeg,
    Png,
    Bmp,
    Tiff,
    Gif,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 6] = [
        TargetFormat::Jpg,
        TargetFormat::Jpeg,
        TargetFormat::Png,
        TargetFormat::Bmp,
        TargetFormat::Tiff,
        TargetFormat::Gif,
    ];

    /// Extension written after the basename.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Jpg => "jpg",
            TargetFormat::Jpeg => "jpeg",
            TargetFormat::Png => "png",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Tiff => "tiff",
            TargetFormat::Gif => "gif",
        }
    }

    /// Encoder used for this target.
    pub fn image_format(&self) -> ImageFormat {
        match self {
            TargetFormat::Jpg | TargetFormat::Jpeg => ImageFormat::Jpeg,
            TargetFormat::Png => ImageFormat::Png,
            TargetFormat::Bmp => ImageFormat::Bmp,
            TargetFormat::Tiff => ImageFormat::Tiff,
            TargetFormat::Gif => ImageFormat::Gif,
        }
    }

    /// MIME type served on download.
    pub fn mime_type(&self) -> &'static str {
        self.image_format().to_mime_type()
    }

    pub fn is_jpeg(&self) -> bool {
        self.image_format() == ImageFormat::Jpeg
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = RockitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        TargetFormat::ALL
            .into_iter()
            .find(|t| t.extension() == wanted)
            .ok_or_else(|| RockitError::UnsupportedFormat {
                format: s.to_string(),
            })
    }
}

/// Recode one uploaded image.
///
/// `name` is only used to label errors. Fails with
/// [`ItemError::UnsupportedFormat`] when the bytes are not a container we
/// can read, [`ItemError::Decode`] when the container is corrupt and
/// [`ItemError::Encode`] when the target encoder rejects the image.
pub fn recode_image(
    name: &str,
    bytes: &[u8],
    target: TargetFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, ItemError> {
    let (img, source) = decode_source(name, bytes)?;
    debug!(
        "Decoded {} ({}, {}x{}, {:?})",
        name,
        source,
        img.width(),
        img.height(),
        img.color()
    );

    let img = normalize_for(img, target);

    let mut buf = Vec::new();
    let encoded = if target.is_jpeg() {
        let encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
        img.write_with_encoder(encoder)
    } else {
        img.write_to(&mut Cursor::new(&mut buf), target.image_format())
    };
    encoded.map_err(|e| ItemError::Encode {
        name: name.to_string(),
        detail: e.to_string(),
    })?;

    debug!("Encoded {} → {} ({} bytes)", name, target, buf.len());
    Ok(buf)
}

/// Bring the colour model into something the target encoder accepts.
fn normalize_for(img: DynamicImage, target: TargetFormat) -> DynamicImage {
    match target {
        TargetFormat::Jpg | TargetFormat::Jpeg => match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => img,
            // Alpha is dropped, not composited; higher bit depths go to 8-bit.
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
        TargetFormat::Gif => match img {
            DynamicImage::ImageRgba8(_) => img,
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        },
        TargetFormat::Bmp => match img {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_) => img,
            other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        },
        TargetFormat::Png | TargetFormat::Tiff => match img {
            // Neither encoder takes float samples.
            DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb16(img.to_rgb16()),
            DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba16(img.to_rgba16()),
            other => other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn rgba_png(w: u32, h: u32) -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([10, 200, 30, 255]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn parse_target_formats() {
        assert_eq!("jpg".parse::<TargetFormat>().unwrap(), TargetFormat::Jpg);
        assert_eq!("JPEG".parse::<TargetFormat>().unwrap(), TargetFormat::Jpeg);
        assert_eq!(".tiff".parse::<TargetFormat>().unwrap(), TargetFormat::Tiff);
        assert!(matches!(
            "webp".parse::<TargetFormat>(),
            Err(RockitError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn jpg_and_jpeg_share_encoder() {
        assert_eq!(TargetFormat::Jpg.image_format(), ImageFormat::Jpeg);
        assert_eq!(TargetFormat::Jpeg.image_format(), ImageFormat::Jpeg);
        assert_eq!(TargetFormat::Jpg.extension(), "jpg");
        assert_eq!(TargetFormat::Jpeg.extension(), "jpeg");
    }

    #[test]
    fn jpeg_output_has_no_alpha() {
        let out = recode_image("a.png", &rgba_png(8, 8), TargetFormat::Jpg, 75).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&out).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn png_and_tiff_keep_alpha() {
        for target in [TargetFormat::Png, TargetFormat::Tiff] {
            let out = recode_image("a.png", &rgba_png(4, 4), target, 75).unwrap();
            let decoded = image::load_from_memory(&out).unwrap();
            assert!(decoded.color().has_alpha(), "{target} dropped alpha");
            assert_eq!(decoded.to_rgba8().get_pixel(0, 0)[3], 0);
        }
    }

    #[test]
    fn every_target_encodes_rgba_input() {
        for target in TargetFormat::ALL {
            let out = recode_image("a.png", &rgba_png(5, 3), target, 80)
                .unwrap_or_else(|e| panic!("{target}: {e}"));
            let decoded = image::load_from_memory(&out).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (5, 3));
        }
    }

    #[test]
    fn garbage_is_unsupported() {
        let err = recode_image("x.png", b"not an image", TargetFormat::Png, 75).unwrap_err();
        assert_eq!(
            err,
            ItemError::UnsupportedFormat {
                name: "x.png".into()
            }
        );
    }

    #[test]
    fn webp_input_converts() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([9, 99, 199, 128]));
        let mut webp = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut webp), ImageFormat::WebP)
            .unwrap();
        let out = recode_image("shot.webp", &webp, TargetFormat::Png, 75).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert_eq!(decoded.to_rgba8().get_pixel(2, 1), &Rgba([9, 99, 199, 128]));
    }

    fn heic_header() -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypheic");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"mif1heic");
        bytes
    }

    #[cfg(not(feature = "heif"))]
    #[test]
    fn heif_without_feature_is_unsupported() {
        let err = recode_image("IMG_0001.HEIC", &heic_header(), TargetFormat::Jpg, 75).unwrap_err();
        assert_eq!(
            err,
            ItemError::UnsupportedFormat {
                name: "IMG_0001.HEIC".into()
            }
        );
    }

    #[cfg(feature = "heif")]
    #[test]
    fn corrupt_heif_is_decode_error() {
        let err = recode_image("IMG_0001.HEIC", &heic_header(), TargetFormat::Jpg, 75).unwrap_err();
        assert!(matches!(err, ItemError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn truncated_png_is_decode_error() {
        let mut bytes = rgba_png(16, 16);
        bytes.truncate(40);
        let err = recode_image("cut.png", &bytes, TargetFormat::Bmp, 75).unwrap_err();
        assert!(matches!(err, ItemError::Decode { .. }), "got {err:?}");
    }
}
