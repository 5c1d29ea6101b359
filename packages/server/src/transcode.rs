use bytes::Bytes;
use common::{ResizeAxis, ResizeDirective};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError};
use thiserror::Error;
use tracing::{debug, instrument};

/// Media type of every transcoded variant.
pub const OUTPUT_CONTENT_TYPE: &str = "image/webp";

/// Hard ceiling on a resize value, independent of the configured policy.
pub const MAX_DIMENSION: u32 = 1000;

/// Largest width or height a WebP bitstream can carry.
pub const WEBP_MAX_DIMENSION: u32 = 16383;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("resize value {0} exceeds {MAX_DIMENSION}")]
    DimensionTooLarge(u32),

    #[error("cannot decode image: {0}")]
    Decode(#[from] ImageError),

    #[error("output {0}x{1} exceeds the WebP limit of {WEBP_MAX_DIMENSION}px")]
    OutputTooLarge(u32, u32),

    #[error("cannot encode image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Transcoder {
    quality: f32,
}

impl Transcoder {
    pub fn new(quality: f32) -> Self {
        Self {
            quality: quality.clamp(0.0, 100.0),
        }
    }

    /// Decode, scale down to `directive` and encode as lossy WebP.
    ///
    /// CPU bound; callers run it on the blocking pool.
    #[instrument(skip(self, input, directive), fields(input_size = input.len(), directive = %directive))]
    pub fn resize(
        &self,
        input: &[u8],
        directive: ResizeDirective,
    ) -> Result<Bytes, TranscodeError> {
        if directive.value > MAX_DIMENSION {
            return Err(TranscodeError::DimensionTooLarge(directive.value));
        }

        let source = image::load_from_memory(input)?;
        let (width, height) = source.dimensions();
        let (target_w, target_h) = target_dimensions(width, height, directive);
        if target_w > WEBP_MAX_DIMENSION || target_h > WEBP_MAX_DIMENSION {
            return Err(TranscodeError::OutputTooLarge(target_w, target_h));
        }

        let scaled = if (target_w, target_h) == (width, height) {
            source
        } else {
            source.resize_exact(target_w, target_h, FilterType::Lanczos3)
        };

        let encoded = self.encode_webp(&scaled)?;
        debug!(
            width = target_w,
            height = target_h,
            output_size = encoded.len(),
            "transcoded variant"
        );
        Ok(encoded)
    }

    fn encode_webp(&self, image: &DynamicImage) -> Result<Bytes, TranscodeError> {
        let (width, height) = image.dimensions();
        // `Encoder::encode` unwraps libwebp's status; `encode_simple` reports it.
        let encoded = if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), width, height)
                .encode_simple(false, self.quality)
                .map(|memory| Bytes::copy_from_slice(&memory))
        } else {
            let rgb = image.to_rgb8();
            webp::Encoder::from_rgb(rgb.as_raw(), width, height)
                .encode_simple(false, self.quality)
                .map(|memory| Bytes::copy_from_slice(&memory))
        };

        let encoded =
            encoded.map_err(|e| TranscodeError::Encode(format!("{width}x{height}: {e:?}")))?;
        if encoded.is_empty() {
            return Err(TranscodeError::Encode(format!(
                "empty output for {width}x{height}"
            )));
        }
        Ok(encoded)
    }
}

/// Output size for a `width x height` source. The ratio never exceeds 1.
pub fn target_dimensions(width: u32, height: u32, directive: ResizeDirective) -> (u32, u32) {
    let source_axis = match directive.axis {
        ResizeAxis::Width => width,
        ResizeAxis::Height => height,
    };
    if source_axis == 0 {
        return (width.max(1), height.max(1));
    }

    let ratio = (directive.value as f64 / source_axis as f64).min(1.0);
    let scale = |v: u32| ((v as f64 * ratio).round() as u32).max(1);
    (scale(width), scale(height))
}
