//! JPEG re-encoding of image tiles

use bigfile_archive::FileKind;
use bigfile_repack::{error::BoxError, TextureLimits, TranscodeRequest, Transcoder};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ImageFormat};
use std::io::Cursor;
use tracing::trace;

/// Decodes each tile, scales it into the configured limits and encodes it again
#[derive(Debug, Clone, Copy)]
pub struct JpegTranscoder {
    /// Quality for standard tiles
    pub quality: u8,
    /// Quality for tiles flagged by the records
    pub special_quality: u8,
}

impl Transcoder for JpegTranscoder {
    fn transcode(&self, request: &TranscodeRequest<'_>, out: Vec<u8>) -> Result<Vec<u8>, BoxError> {
        let mut image = image::load_from_memory_with_format(request.data, ImageFormat::Jpeg)?;

        let (width, height) = fit(image.width(), image.height(), &request.limits);
        if (width, height) != (image.width(), image.height()) {
            trace!(
                name = request.name,
                from = ?(image.width(), image.height()),
                to = ?(width, height),
                "resizing"
            );
            image = image.resize_exact(width, height, FilterType::Triangle);
        }

        let quality = match request.kind {
            FileKind::ImageSpecial => self.special_quality,
            _ => self.quality,
        };
        let mut cursor = Cursor::new(out);
        JpegEncoder::new_with_quality(&mut cursor, quality).encode_image(&image.to_rgb8())?;
        Ok(cursor.into_inner())
    }
}

/// Scale `width` by `height` into the width and height bounds of `limits`, keeping the aspect ratio
/// where the bounds allow it.
///
/// Volume bounds only concern layered textures and are ignored for tiles.
pub fn fit(width: u32, height: u32, limits: &TextureLimits) -> (u32, u32) {
    let (w, h) = (width.max(1) as f64, height.max(1) as f64);

    let shrink = (limits.max_width as f64 / w)
        .min(limits.max_height as f64 / h)
        .min(1.0);
    let grow = (limits.min_width as f64 / w)
        .max(limits.min_height as f64 / h)
        .max(1.0);
    let scale = if shrink < 1.0 { shrink } else { grow };

    let scaled = |value: f64, min: u32, max: u32| {
        (value * scale).round().clamp(min as f64, max as f64) as u32
    };
    (
        scaled(w, limits.min_width, limits.max_width),
        scaled(h, limits.min_height, limits.max_height),
    )
}
