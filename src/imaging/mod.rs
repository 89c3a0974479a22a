//! Image normalization pipeline.
//!
//! Every user-supplied image goes through the same steps before it is stored:
//! decode, scale down to a maximum width, re-encode as JPEG and wrap in a
//! base64 data URI. When the encoded result is over the size bound the encode
//! is retried from the decoded original at a lower quality, down to a fixed
//! floor, after which the image is rejected.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::error::ImageError;

/// Default width images are scaled down to
pub const DEFAULT_MAX_WIDTH: u32 = 1080;
/// Default starting JPEG quality
pub const DEFAULT_QUALITY: f32 = 0.7;
/// Size bound for an encoded image, in megabytes
pub const MAX_ENCODED_MB: f64 = 5.0;
/// Largest raw input accepted from the user (5MB)
pub const MAX_INPUT_BYTES: usize = 5 * 1024 * 1024;
/// Quality removed on every retry
pub const QUALITY_STEP: f32 = 0.1;
/// Lowest quality tried before giving up
pub const QUALITY_FLOOR: f32 = 0.1;

const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Tunables for a single normalization run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    pub max_width: u32,
    /// 0.0 to 1.0
    pub quality: f32,
    pub max_encoded_mb: f64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            quality: DEFAULT_QUALITY,
            max_encoded_mb: MAX_ENCODED_MB,
        }
    }
}

impl NormalizeOptions {
    pub fn with_max_width(mut self, max_width: u32) -> Self {
        self.max_width = max_width;
        self
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_max_encoded_mb(mut self, max_encoded_mb: f64) -> Self {
        self.max_encoded_mb = max_encoded_mb;
        self
    }
}

/// A normalized image, ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    data_uri: String,
    width: u32,
    height: u32,
    quality: f32,
    attempts: u32,
}

impl EncodedImage {
    /// The `data:image/jpeg;base64,...` value
    pub fn as_str(&self) -> &str {
        &self.data_uri
    }

    pub fn into_string(self) -> String {
        self.data_uri
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Quality of the encode that fit under the bound
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Number of encodes it took
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn size_mb(&self) -> f64 {
        estimated_size_mb(&self.data_uri)
    }
}

/// Dimensions an image of `width` x `height` is rendered at.
///
/// Only images wider than `max_width` are touched; they are scaled to exactly
/// `max_width` with the height rounded to keep the aspect ratio.
pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }

    let scaled_height = (f64::from(height) * f64::from(max_width) / f64::from(width)).round() as u32;
    (max_width, scaled_height.max(1))
}

/// Decoded size of a base64 payload, in megabytes
pub fn estimated_size_mb(encoded: &str) -> f64 {
    (encoded.len() as f64 * 0.75) / (1024.0 * 1024.0)
}

/// Qualities tried in order, starting at `start` and stepping down to the floor.
///
/// The last quality yielded is always [`QUALITY_FLOOR`], whatever the start.
/// A non-finite start falls back to [`DEFAULT_QUALITY`].
pub fn quality_steps(start: f32) -> impl Iterator<Item = f32> {
    let start = if start.is_finite() { start } else { DEFAULT_QUALITY };
    let start = round_quality(start.clamp(QUALITY_FLOOR, 1.0));
    std::iter::successors(Some(start), |&quality| {
        (quality > QUALITY_FLOOR)
            .then(|| round_quality(quality - QUALITY_STEP).max(QUALITY_FLOOR))
    })
}

// Keeps repeated subtraction from drifting off the 0.01 grid
fn round_quality(quality: f32) -> f32 {
    (quality * 100.0).round() / 100.0
}

fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Reject raw input over the per-file upload limit
pub fn check_input_size(raw: &[u8]) -> Result<(), ImageError> {
    if raw.len() > MAX_INPUT_BYTES {
        return Err(ImageError::TooLarge {
            size: raw.len(),
            limit: MAX_INPUT_BYTES,
        });
    }
    Ok(())
}

/// Normalize raw image bytes into a size-bounded JPEG data URI
pub fn normalize(raw: &[u8], options: &NormalizeOptions) -> Result<EncodedImage, ImageError> {
    let decoded = image::load_from_memory(raw).map_err(ImageError::Decode)?;
    let (width, height) = decoded.dimensions();
    let (target_width, target_height) = target_dimensions(width, height, options.max_width);

    let rendered = if (target_width, target_height) == (width, height) {
        decoded
    } else {
        decoded.resize_exact(target_width, target_height, FilterType::Triangle)
    };
    let rgb = rendered.to_rgb8();

    let mut attempts = 0;
    let mut last = (options.quality, 0.0);
    for quality in quality_steps(options.quality) {
        attempts += 1;
        let data_uri = encode_jpeg(&rgb, quality)?;
        let size_mb = estimated_size_mb(&data_uri);
        tracing::debug!(attempts, quality, size_mb, "encoded image");

        if size_mb <= options.max_encoded_mb {
            return Ok(EncodedImage {
                data_uri,
                width: target_width,
                height: target_height,
                quality,
                attempts,
            });
        }
        last = (quality, size_mb);
    }

    let (last_quality, size_mb) = last;
    Err(ImageError::CompressionLimitExceeded {
        attempts,
        last_quality,
        size_mb,
        limit_mb: options.max_encoded_mb,
    })
}

/// Run [`normalize`] on the blocking pool
pub async fn normalize_async(
    raw: Vec<u8>,
    options: NormalizeOptions,
) -> Result<EncodedImage, ImageError> {
    tokio::task::spawn_blocking(move || normalize(&raw, &options)).await?
}

fn encode_jpeg(rgb: &RgbImage, quality: f32) -> Result<String, ImageError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality))
        .encode_image(rgb)
        .map_err(ImageError::Encode)?;

    Ok(format!("{}{}", JPEG_DATA_URI_PREFIX, BASE64.encode(&bytes)))
}

/// Raw bytes carried by a `data:<mime>;base64,<payload>` value
pub fn decode_data_uri(data_uri: &str) -> Result<Vec<u8>, ImageError> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or(ImageError::InvalidDataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(ImageError::InvalidDataUri)?;
    if !header.ends_with(";base64") {
        return Err(ImageError::InvalidDataUri);
    }

    BASE64
        .decode(payload)
        .map_err(|_| ImageError::InvalidDataUri)
}

/// Dimensions of a stored data URI image
pub fn data_uri_dimensions(data_uri: &str) -> Result<(u32, u32), ImageError> {
    let bytes = decode_data_uri(data_uri)?;
    let decoded: DynamicImage = image::load_from_memory(&bytes).map_err(ImageError::Decode)?;
    Ok(decoded.dimensions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 7 + y * 13) % 256) as u8])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn narrow_images_keep_their_size() {
        assert_eq!(target_dimensions(800, 600, 1080), (800, 600));
        assert_eq!(target_dimensions(1080, 50, 1080), (1080, 50));
    }

    #[test]
    fn wide_images_scale_to_max_width() {
        assert_eq!(target_dimensions(2160, 1000, 1080), (1080, 500));
        // 1999 * 1080 / 3000 = 719.64
        assert_eq!(target_dimensions(3000, 1999, 1080), (1080, 720));
        assert_eq!(target_dimensions(5000, 1, 1080), (1080, 1));
    }

    #[test]
    fn normalize_does_not_upscale() {
        let encoded = normalize(&png_bytes(200, 120), &NormalizeOptions::default()).unwrap();

        assert_eq!((encoded.width(), encoded.height()), (200, 120));
        assert_eq!(data_uri_dimensions(encoded.as_str()).unwrap(), (200, 120));
        assert!(encoded.as_str().starts_with("data:image/jpeg;base64,"));
        assert_eq!(encoded.attempts(), 1);
    }

    #[test]
    fn normalize_downscales_preserving_aspect_ratio() {
        let options = NormalizeOptions::default().with_max_width(100);
        let encoded = normalize(&png_bytes(300, 199), &options).unwrap();

        // 199 * 100 / 300 = 66.33
        assert_eq!((encoded.width(), encoded.height()), (100, 66));
        assert_eq!(data_uri_dimensions(encoded.as_str()).unwrap(), (100, 66));
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let result = normalize(b"definitely not an image", &NormalizeOptions::default());
        assert_matches!(result, Err(ImageError::Decode(_)));
    }

    #[test]
    fn decode_error_leaves_detail_to_its_source() {
        let err = normalize(b"definitely not an image", &NormalizeOptions::default()).unwrap_err();

        assert_eq!(err.to_string(), "could not decode image");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn quality_steps_strictly_decrease_and_stop_at_floor() {
        let steps: Vec<f32> = quality_steps(0.7).collect();
        assert_eq!(steps, vec![0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1]);
        assert!(steps.windows(2).all(|pair| pair[1] < pair[0]));

        let steps: Vec<f32> = quality_steps(0.75).collect();
        assert_eq!(steps.first(), Some(&0.75));
        assert_eq!(steps.last(), Some(&QUALITY_FLOOR));
        assert_eq!(&steps[steps.len() - 2..], &[0.15, QUALITY_FLOOR]);
        assert!(steps.windows(2).all(|pair| pair[1] < pair[0]));

        assert_eq!(quality_steps(0.0).collect::<Vec<_>>(), vec![QUALITY_FLOOR]);
    }

    #[test]
    fn non_finite_quality_starts_from_default() {
        let steps: Vec<f32> = quality_steps(f32::NAN).collect();
        assert_eq!(steps.first(), Some(&DEFAULT_QUALITY));
        assert_eq!(steps.len(), 7);
    }

    #[test]
    fn off_grid_start_still_tries_floor_before_giving_up() {
        let options = NormalizeOptions::default()
            .with_quality(0.75)
            .with_max_encoded_mb(0.000_001);

        assert_matches!(
            normalize(&png_bytes(32, 32), &options),
            Err(ImageError::CompressionLimitExceeded { attempts: 8, last_quality, .. })
                if (last_quality - QUALITY_FLOOR).abs() < f32::EPSILON
        );
    }

    #[test]
    fn backoff_gives_up_at_floor_quality() {
        let options = NormalizeOptions::default().with_max_encoded_mb(0.000_001);
        let result = normalize(&png_bytes(64, 64), &options);

        assert_matches!(
            result,
            Err(ImageError::CompressionLimitExceeded { attempts: 7, last_quality, .. })
                if (last_quality - QUALITY_FLOOR).abs() < f32::EPSILON
        );
    }

    #[test]
    fn backoff_settles_on_first_quality_that_fits() {
        let raw = png_bytes(256, 256);
        let best = normalize(&raw, &NormalizeOptions::default().with_quality(1.0)).unwrap();
        let floor_options = NormalizeOptions::default().with_quality(QUALITY_FLOOR);
        let floor = normalize(&raw, &floor_options).unwrap();
        assert!(floor.size_mb() < best.size_mb());

        // Only the floor encode fits under a bound between the two sizes
        let limit = (floor.size_mb() + best.size_mb()) / 2.0;
        let options = NormalizeOptions::default()
            .with_quality(1.0)
            .with_max_encoded_mb(limit);
        let encoded = normalize(&raw, &options).unwrap();

        assert!(encoded.attempts() > 1);
        assert!(encoded.quality() < 1.0);
        assert!(encoded.size_mb() <= limit);
    }

    #[test]
    fn oversized_input_is_rejected_before_decoding() {
        assert!(check_input_size(&vec![0; MAX_INPUT_BYTES]).is_ok());
        assert_matches!(
            check_input_size(&vec![0; MAX_INPUT_BYTES + 1]),
            Err(ImageError::TooLarge { size, .. }) if size == MAX_INPUT_BYTES + 1
        );
    }

    #[test]
    fn data_uri_decoding_rejects_malformed_values() {
        assert_matches!(decode_data_uri("http://example.com/a.jpg"), Err(ImageError::InvalidDataUri));
        assert_matches!(decode_data_uri("data:image/png,rawtext"), Err(ImageError::InvalidDataUri));
        assert_matches!(decode_data_uri("data:image/png;base64,@@@"), Err(ImageError::InvalidDataUri));
        assert_eq!(decode_data_uri("data:image/png;base64,AQID").unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn normalize_async_matches_sync_result() {
        let raw = png_bytes(120, 80);
        let options = NormalizeOptions::default();

        let expected = normalize(&raw, &options).unwrap();
        let actual = normalize_async(raw, options).await.unwrap();

        assert_eq!(actual, expected);
    }
}
