//! Credential payloads and their rendering into scannable images.

use crate::error::RegistryError;
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Default edge length of rendered credentials, in pixels.
pub const DEFAULT_IMAGE_SIZE: u32 = 256;

/// Minimal data set carried by the scannable credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    pub id: String,
    pub tourist_name: String,
    pub digital_id_expiry: String,
}

impl CredentialPayload {
    /// Compact JSON, as embedded in the credential image.
    pub fn to_json(&self) -> Result<Vec<u8>, RegistryError> {
        serde_json::to_vec(self)
            .map_err(|e| RegistryError::Encoding(format!("Failed to prepare QR payload: {}", e)))
    }
}

/// An encoded credential image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialImage {
    pub content_type: &'static str,
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

pub trait CredentialEncoder: Send + Sync {
    fn encode(&self, payload: &CredentialPayload) -> Result<CredentialImage, RegistryError>;
}

/// Renders the payload as a QR code (medium error correction) in a PNG.
#[derive(Debug, Clone)]
pub struct QrPngEncoder {
    size: u32,
}

impl Default for QrPngEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_SIZE)
    }
}

impl QrPngEncoder {
    pub fn new(size: u32) -> Self {
        QrPngEncoder { size }
    }
}

impl CredentialEncoder for QrPngEncoder {
    fn encode(&self, payload: &CredentialPayload) -> Result<CredentialImage, RegistryError> {
        let data = payload.to_json()?;
        let code = QrCode::with_error_correction_level(&data, EcLevel::M)
            .map_err(|e| RegistryError::Encoding(format!("Failed to generate QR: {}", e)))?;

        let image = code
            .render::<Luma<u8>>()
            .min_dimensions(self.size, self.size)
            .build();

        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| RegistryError::Encoding(format!("Failed to write PNG: {}", e)))?;

        Ok(CredentialImage {
            content_type: "image/png",
            extension: "png",
            bytes: buf.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn payload() -> CredentialPayload {
        CredentialPayload {
            id: "0b7c6f58-9d0e-4a53-9a84-7e1a8b9b2c11".to_string(),
            tourist_name: "Asha Verma".to_string(),
            digital_id_expiry: "2025-11-09".to_string(),
        }
    }

    #[test]
    fn test_payload_json_is_compact() {
        let json = String::from_utf8(payload().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"id":"0b7c6f58-9d0e-4a53-9a84-7e1a8b9b2c11","tourist_name":"Asha Verma","digital_id_expiry":"2025-11-09"}"#
        );
    }

    #[test]
    fn test_qr_png_encoder_emits_png() {
        let image = QrPngEncoder::default().encode(&payload()).unwrap();
        assert_eq!(image.content_type, "image/png");
        assert!(image.bytes.starts_with(&PNG_MAGIC));
    }

    #[test]
    fn test_longest_accepted_name_still_fits() {
        let mut long = payload();
        long.tourist_name = "\u{1D538}".repeat(crate::registration::validation::MAX_NAME_CHARS);
        let image = QrPngEncoder::default().encode(&long).unwrap();
        assert!(image.bytes.starts_with(&PNG_MAGIC));
    }

    #[test]
    fn test_oversized_payload_is_an_encoding_error() {
        let mut big = payload();
        big.tourist_name = "x".repeat(4000);
        assert!(matches!(
            QrPngEncoder::default().encode(&big),
            Err(RegistryError::Encoding(_))
        ));
    }
}
