use std::io::Cursor;

use base64::Engine;
use image::{ImageFormat, ImageReader};

use crate::services::ai::ImagePayload;

/// A verified raster image ready for upload.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("Image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image payload is empty")]
    Empty,

    #[error("Image payload is not a supported raster image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a model's payload and check it really is an image.
///
/// Only the header is parsed; the raster itself is never decoded.
pub fn decode_payload(payload: ImagePayload) -> Result<DecodedImage, ImageDecodeError> {
    let bytes = match payload {
        ImagePayload::Binary(bytes) => bytes,
        ImagePayload::Base64(encoded) => {
            // Tolerate a data URL prefix.
            let data = encoded
                .split_once("base64,")
                .map(|(_, data)| data)
                .unwrap_or(&encoded);
            base64::engine::general_purpose::STANDARD.decode(data.trim())?
        }
    };

    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let format = image::guess_format(&bytes)?;
    let (width, height) = ImageReader::with_format(Cursor::new(&bytes), format).into_dimensions()?;

    Ok(DecodedImage {
        width,
        height,
        bytes,
        format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mock::tiny_png;

    #[test]
    fn test_binary_png() {
        let decoded = decode_payload(ImagePayload::Binary(tiny_png())).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!(decoded.content_type(), "image/png");
        assert_eq!(decoded.extension(), "png");
        assert_eq!((decoded.width, decoded.height), (2, 2));
    }

    #[test]
    fn test_base64_png_with_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(tiny_png());
        let decoded =
            decode_payload(ImagePayload::Base64(format!("data:image/png;base64,{encoded}"))).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_payload(ImagePayload::Binary(b"not an image".to_vec())).is_err());
        assert!(matches!(
            decode_payload(ImagePayload::Base64("%%%".to_string())),
            Err(ImageDecodeError::Base64(_))
        ));
        assert!(matches!(
            decode_payload(ImagePayload::Binary(Vec::new())),
            Err(ImageDecodeError::Empty)
        ));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        let signature_only = tiny_png()[..8].to_vec();
        assert!(matches!(
            decode_payload(ImagePayload::Binary(signature_only)),
            Err(ImageDecodeError::Image(_))
        ));
    }
}
