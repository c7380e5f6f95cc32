//! Image encoding: `DynamicImage` → PNG bytes → base64 [`EncodedImage`].
//!
//! PNG is lossless, and text crispness matters far more than file size when
//! a vision model has to read it. The same bytes serve both the vision
//! request (base64) and the `tables/` / `pictures/` artifacts (raw PNG).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A raster ready to be sent to a vision service.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: String,
    pub base64: String,
}

impl EncodedImage {
    /// `data:` URI, as used in OpenAI-style `image_url` parts and embedded markdown.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime", &self.mime)
            .field("base64", &format_args!("<{} chars>", self.base64.len()))
            .finish()
    }
}

/// Encode an image as PNG bytes.
pub fn to_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as a base64 PNG.
pub fn encode_image(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let png = to_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!("Encoded {}x{} image → {} bytes base64", img.width(), img.height(), b64.len());
    Ok(EncodedImage {
        mime: "image/png".to_string(),
        base64: b64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_image(&img).expect("encode should succeed");
        assert_eq!(data.mime, "image/png");
        let decoded = STANDARD.decode(&data.base64).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
        assert!(data.data_uri().starts_with("data:image/png;base64,"));
    }
}
