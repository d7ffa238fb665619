use aes::Aes256;
use base64::{
    Engine as _, alphabet,
    engine::{
        DecodePaddingMode,
        general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD},
    },
};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use thiserror::Error;

use crate::signature::verify_signature;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Padding block used by the protocol. Not the AES block size.
pub const PKCS7_BLOCK_SIZE: usize = 32;
/// Length of the random prefix in every plaintext frame.
pub const RANDOM_PREFIX_LEN: usize = 16;

const AES_BLOCK_SIZE: usize = 16;
const AES_KEY_LEN: usize = 32;
const HEADER_LEN: usize = RANDOM_PREFIX_LEN + 4;

// EncodingAESKey is shipped as 43 unpadded base64 characters.
const AES_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("crypto config incomplete: {0} is empty")]
    MissingField(&'static str),
    #[error("encoding_aes_key is not valid base64: {0}")]
    KeyEncoding(String),
    #[error("encoding_aes_key must decode to {AES_KEY_LEN} bytes, got {0}")]
    KeyLength(usize),
    #[error("ciphertext is not valid base64: {0}")]
    Base64(String),
    #[error("ciphertext length {0} is not a multiple of the cipher block size")]
    Misaligned(usize),
    #[error("invalid pkcs7 padding")]
    Padding,
    #[error("plaintext shorter than the {HEADER_LEN} byte header")]
    TooShort,
    #[error("declared message length {declared} exceeds the {available} available bytes")]
    LengthOverflow { declared: usize, available: usize },
    #[error("receiver id mismatch")]
    ReceiverMismatch,
    #[error("random prefix must be {RANDOM_PREFIX_LEN} bytes, got {0}")]
    InvalidRandom(usize),
    #[error("message too large to frame")]
    MessageTooLarge,
    #[error("cipher initialisation failed")]
    Cipher,
}

impl CryptoError {
    /// Stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CryptoError::MissingField(_) => "missing_field",
            CryptoError::KeyEncoding(_) => "key_encoding",
            CryptoError::KeyLength(_) => "key_length",
            CryptoError::Base64(_) => "base64",
            CryptoError::Misaligned(_) => "misaligned",
            CryptoError::Padding => "padding",
            CryptoError::TooShort => "too_short",
            CryptoError::LengthOverflow { .. } => "length_overflow",
            CryptoError::ReceiverMismatch => "receiver_mismatch",
            CryptoError::InvalidRandom(_) => "invalid_random",
            CryptoError::MessageTooLarge => "message_too_large",
            CryptoError::Cipher => "cipher",
        }
    }
}

#[derive(Clone, Default)]
pub struct CryptoConfig {
    pub token: String,
    pub encoding_aes_key: String,
    pub receiver_id: String,
}

/// Verifies, decrypts and encrypts callback envelopes for one WeCom app.
#[derive(Clone)]
pub struct EnvelopeCrypto {
    token: String,
    key: [u8; AES_KEY_LEN],
    receiver_id: String,
}

impl std::fmt::Debug for EnvelopeCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCrypto")
            .field("receiver_id", &self.receiver_id)
            .finish_non_exhaustive()
    }
}

impl EnvelopeCrypto {
    pub fn new(cfg: CryptoConfig) -> Result<Self, CryptoError> {
        if cfg.token.is_empty() {
            return Err(CryptoError::MissingField("token"));
        }
        if cfg.encoding_aes_key.is_empty() {
            return Err(CryptoError::MissingField("encoding_aes_key"));
        }
        if cfg.receiver_id.is_empty() {
            return Err(CryptoError::MissingField("receiver_id"));
        }

        let decoded = AES_KEY_ENGINE
            .decode(cfg.encoding_aes_key.trim())
            .map_err(|err| CryptoError::KeyEncoding(err.to_string()))?;
        let key: [u8; AES_KEY_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::KeyLength(decoded.len()))?;

        Ok(Self {
            token: cfg.token,
            key,
            receiver_id: cfg.receiver_id,
        })
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn verify_signature(
        &self,
        msg_signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
    ) -> bool {
        verify_signature(&self.token, msg_signature, timestamp, nonce, encrypted)
    }

    /// Signs an envelope the way the platform would. Used for replies and tests.
    pub fn sign(&self, timestamp: &str, nonce: &str, encrypted: &str) -> String {
        crate::signature::signature(&self.token, timestamp, nonce, encrypted)
    }

    pub fn decrypt(&self, encrypted_base64: &str) -> Result<Vec<u8>, CryptoError> {
        let mut buf = STANDARD
            .decode(encrypted_base64)
            .map_err(|err| CryptoError::Base64(err.to_string()))?;
        if buf.is_empty() || buf.len() % AES_BLOCK_SIZE != 0 {
            return Err(CryptoError::Misaligned(buf.len()));
        }

        let total = buf.len();
        let cipher = Aes256CbcDec::new_from_slices(&self.key, self.iv())
            .map_err(|_| CryptoError::Cipher)?;
        let plain_len = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptoError::Misaligned(total))?
            .len();
        buf.truncate(plain_len);

        let unpadded = pkcs7_unpad(&buf, PKCS7_BLOCK_SIZE)?;
        if unpadded.len() < HEADER_LEN {
            return Err(CryptoError::TooShort);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&unpadded[RANDOM_PREFIX_LEN..HEADER_LEN]);
        let declared = u32::from_be_bytes(len_bytes) as usize;
        let available = unpadded.len() - HEADER_LEN;
        if declared > available {
            return Err(CryptoError::LengthOverflow {
                declared,
                available,
            });
        }

        let (message, receiver) = unpadded[HEADER_LEN..].split_at(declared);
        if receiver != self.receiver_id.as_bytes() {
            return Err(CryptoError::ReceiverMismatch);
        }
        Ok(message.to_vec())
    }

    pub fn encrypt(&self, plaintext: &[u8], random16: &[u8]) -> Result<String, CryptoError> {
        if random16.len() != RANDOM_PREFIX_LEN {
            return Err(CryptoError::InvalidRandom(random16.len()));
        }
        let msg_len = u32::try_from(plaintext.len()).map_err(|_| CryptoError::MessageTooLarge)?;

        let mut frame = Vec::with_capacity(
            HEADER_LEN + plaintext.len() + self.receiver_id.len() + PKCS7_BLOCK_SIZE,
        );
        frame.extend_from_slice(random16);
        frame.extend_from_slice(&msg_len.to_be_bytes());
        frame.extend_from_slice(plaintext);
        frame.extend_from_slice(self.receiver_id.as_bytes());
        pkcs7_pad(&mut frame, PKCS7_BLOCK_SIZE);

        let frame_len = frame.len();
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, self.iv())
            .map_err(|_| CryptoError::Cipher)?;
        cipher
            .encrypt_padded_mut::<NoPadding>(&mut frame, frame_len)
            .map_err(|_| CryptoError::Misaligned(frame_len))?;

        Ok(STANDARD.encode(frame))
    }

    fn iv(&self) -> &[u8] {
        &self.key[..AES_BLOCK_SIZE]
    }
}

fn pkcs7_pad(buf: &mut Vec<u8>, block_size: usize) {
    let padding = block_size - (buf.len() % block_size);
    buf.resize(buf.len() + padding, padding as u8);
}

fn pkcs7_unpad(buf: &[u8], block_size: usize) -> Result<&[u8], CryptoError> {
    if buf.is_empty() || buf.len() % block_size != 0 {
        return Err(CryptoError::Padding);
    }
    let padding = buf[buf.len() - 1] as usize;
    if padding == 0 || padding > block_size {
        return Err(CryptoError::Padding);
    }
    let (body, pad) = buf.split_at(buf.len() - padding);
    if pad.iter().any(|&byte| byte as usize != padding) {
        return Err(CryptoError::Padding);
    }
    Ok(body)
}
