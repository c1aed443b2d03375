use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// Errors from [`QrImage::from_data_url`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrImageError {
    #[error("not a data URL")]
    NotDataUrl,
    #[error("data URL is not base64-encoded")]
    NotBase64Encoded,
    #[error("unsupported image type: {0}")]
    UnsupportedMediaType(String),
    #[error("invalid base64 payload: {0}")]
    Decode(String),
    #[error("image payload is empty")]
    Empty,
}

/// QR code image decoded from the backend's `qrCodeImage` field.
#[derive(Clone, PartialEq, Eq)]
pub struct QrImage {
    media_type: String,
    bytes: Vec<u8>,
}

impl QrImage {
    /// Decode a `data:image/png;base64,...` URL.
    ///
    /// # Errors
    ///
    /// Returns [`QrImageError`] if the URL is not a base64 `image/*` data URL
    /// or its payload does not decode.
    pub fn from_data_url(data_url: &str) -> Result<Self, QrImageError> {
        let rest = data_url
            .trim()
            .strip_prefix(DATA_URL_PREFIX)
            .ok_or(QrImageError::NotDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(QrImageError::NotDataUrl)?;
        let media_type = header
            .strip_suffix(BASE64_MARKER)
            .ok_or(QrImageError::NotBase64Encoded)?;
        if !media_type.starts_with("image/") {
            return Err(QrImageError::UnsupportedMediaType(media_type.to_owned()));
        }

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| QrImageError::Decode(e.to_string()))?;
        if bytes.is_empty() {
            return Err(QrImageError::Empty);
        }

        Ok(Self {
            media_type: media_type.to_owned(),
            bytes,
        })
    }

    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl std::fmt::Debug for QrImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QrImage")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
