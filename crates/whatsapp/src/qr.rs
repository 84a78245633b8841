//! QR challenge rendering.

use std::io::Cursor;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    image::{DynamicImage, ImageFormat, Luma},
    qrcode::QrCode,
    thiserror::Error,
};

/// Smallest edge of the rendered image, in pixels.
const MIN_QR_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("failed to encode QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("failed to write QR image: {0}")]
    Image(#[from] image::ImageError),
}

/// Render a raw pairing challenge as a `data:image/png;base64,...` URL.
pub fn qr_data_url(challenge: &str) -> Result<String, QrError> {
    let code = QrCode::new(challenge.as_bytes())?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_QR_SIZE, MIN_QR_SIZE)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

    #[test]
    fn renders_png_data_url() {
        let url = qr_data_url("2@abcDEF123,someKey==,otherKey==,advSecret==").unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert!(bytes.starts_with(PNG_MAGIC));

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.width() >= MIN_QR_SIZE);
    }

    #[test]
    fn oversized_challenge_is_an_error() {
        let huge = "x".repeat(8000);
        assert!(matches!(qr_data_url(&huge), Err(QrError::Encode(_))));
    }
}
