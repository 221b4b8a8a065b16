use thiserror::Error;

/// Callback protocol violations. All of them mean the input is not trusted.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid EncodingAESKey: {0}")]
    InvalidKey(String),

    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The trailing receive id of the decrypted buffer is not our corp id.
    #[error("Corp ID mismatch")]
    CorpIdMismatch,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Malformed XML: {0}")]
    Xml(String),
}

impl CryptoError {
    /// Short error code string, sent back to the relay on failed verification.
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::InvalidKey(_) => "INVALID_KEY",
            CryptoError::SignatureMismatch => "SIGNATURE_MISMATCH",
            CryptoError::Decryption(_) => "DECRYPTION_FAILED",
            CryptoError::CorpIdMismatch => "CORP_ID_MISMATCH",
            CryptoError::Encryption(_) => "ENCRYPTION_FAILED",
            CryptoError::Xml(_) => "MALFORMED_XML",
        }
    }
}
