//! Node rasterisation: turn a picture or table's attached image into
//! something a vision model can read.
//!
//! Decoding and resizing are CPU-bound, so [`rasterize`] runs them in
//! `spawn_blocking` to keep the Tokio workers free.
//!
//! The longest edge is capped at `max_pixels`. Converters rendering at a
//! high scale factor can hand back very large crops; beyond ~2000 px a
//! vision model gains nothing and the request body balloons.

use crate::document::ImageRef;
use crate::pipeline::encode::{encode_image, EncodedImage};
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Decode `image` and shrink it so neither edge exceeds `max_pixels`.
pub fn prepare_raster(image: &ImageRef, max_pixels: u32) -> Result<DynamicImage, image::ImageError> {
    let img = image::load_from_memory(&image.data)?;
    let (w, h) = (img.width(), img.height());
    if w.max(h) <= max_pixels {
        return Ok(img);
    }
    let resized = img.resize(max_pixels, max_pixels, FilterType::Lanczos3);
    debug!(
        "Downscaled {}x{} → {}x{}",
        w,
        h,
        resized.width(),
        resized.height()
    );
    Ok(resized)
}

/// Decode, cap and PNG-encode a node image off the async runtime.
///
/// The error is a human-readable detail string; the caller attaches the
/// node path.
pub async fn rasterize(image: ImageRef, max_pixels: u32) -> Result<EncodedImage, String> {
    tokio::task::spawn_blocking(move || {
        let img = prepare_raster(&image, max_pixels).map_err(|e| format!("decode: {e}"))?;
        encode_image(&img).map_err(|e| format!("encode: {e}"))
    })
    .await
    .map_err(|e| format!("render task panicked: {e}"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::to_png;
    use image::{Rgb, RgbImage};

    fn png_ref(w: u32, h: u32) -> ImageRef {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([1, 2, 3])));
        ImageRef::png(to_png(&img).unwrap(), w, h)
    }

    #[test]
    fn small_images_pass_through() {
        let img = prepare_raster(&png_ref(40, 20), 100).unwrap();
        assert_eq!((img.width(), img.height()), (40, 20));
    }

    #[test]
    fn large_images_are_capped_keeping_aspect() {
        let img = prepare_raster(&png_ref(400, 200), 100).unwrap();
        assert_eq!((img.width(), img.height()), (100, 50));
    }

    #[test]
    fn garbage_fails_to_decode() {
        let bad = ImageRef::png(vec![0, 1, 2, 3], 1, 1);
        assert!(prepare_raster(&bad, 100).is_err());
    }

    #[tokio::test]
    async fn rasterize_reports_detail() {
        let err = rasterize(ImageRef::png(vec![9; 8], 1, 1), 100)
            .await
            .unwrap_err();
        assert!(err.starts_with("decode:"), "got: {err}");
        let ok = rasterize(png_ref(8, 8), 100).await.unwrap();
        assert_eq!(ok.mime, "image/png");
    }
}
