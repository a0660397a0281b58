//! Human-readable coupon code generation.
//!
//! A code is `[PREFIX<sep>]BODY-IN-SEGMENTS<checksum>`. The body is drawn from an
//! alphabet without the look-alike characters `O`, `I`, `0` and `1`, and the trailing
//! checksum character is `sum(char codes of body + prefix) mod alphabet size`.
//!
//! Candidates come from an ordered list of strategies. The caller walks the list,
//! checking each candidate for collisions, and falls through to the next strategy when
//! one fails. [`last_resort_code`] ends the chain and cannot fail.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::coupon::{normalize_code, DiscountType};

pub const LETTERS: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ";
pub const DIGITS: &str = "23456789";

pub const DEFAULT_LENGTH: usize = 8;
pub const DEFAULT_SEGMENT_LENGTH: usize = 4;
pub const DEFAULT_SEPARATOR: &str = "-";
pub const DEFAULT_EXPIRY_DAYS: u32 = 30;

const FRAGMENT_LEN: usize = 8;
const NONCE_LEN: usize = 12;
const SEED_BYTES: usize = 16;
const LAST_RESORT_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("coupon sealing key material is not configured")]
    MissingKeyMaterial,
    #[error("metadata sealing failed: {0}")]
    Sealing(String),
    #[error("secure randomness unavailable: {0}")]
    Randomness(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeOptions {
    pub prefix: String,
    pub length: usize,
    pub use_letters: bool,
    pub use_numbers: bool,
    pub separator: String,
    pub segment_length: usize,
    pub discount_value: Option<Decimal>,
    pub discount_type: DiscountType,
    pub expiry_days: u32,
}

impl Default for CodeOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            length: DEFAULT_LENGTH,
            use_letters: true,
            use_numbers: true,
            separator: DEFAULT_SEPARATOR.to_string(),
            segment_length: DEFAULT_SEGMENT_LENGTH,
            discount_value: None,
            discount_type: DiscountType::Percentage,
            expiry_days: DEFAULT_EXPIRY_DAYS,
        }
    }
}

impl CodeOptions {
    /// Codes are stored uppercase, so the prefix and separator are too. A zero length
    /// means default. A separator that shares characters with the alphabet could not be
    /// told apart from the body and is replaced by the default one.
    pub fn normalized(mut self) -> Self {
        self.prefix = normalize_code(&self.prefix);
        self.separator = self.separator.to_uppercase();
        if self.separator.chars().any(|ch| LETTERS.contains(ch) || DIGITS.contains(ch)) {
            self.separator = DEFAULT_SEPARATOR.to_string();
        }
        if self.length == 0 {
            self.length = DEFAULT_LENGTH;
        }
        self
    }

    pub fn charset(&self) -> Vec<char> {
        let mut charset = String::new();
        if self.use_letters {
            charset.push_str(LETTERS);
        }
        if self.use_numbers {
            charset.push_str(DIGITS);
        }
        if charset.is_empty() {
            charset.push_str(LETTERS);
            charset.push_str(DIGITS);
        }
        charset.chars().collect()
    }

    pub fn wants_metadata(&self) -> bool {
        self.discount_value.is_some()
    }

    /// `type|value|expiryDays`, with the type shortened to its first letter.
    pub fn metadata(&self) -> Option<String> {
        let value = self.discount_value?;
        let kind = match self.discount_type {
            DiscountType::Percentage => 'p',
            DiscountType::Fixed => 'f',
        };
        Some(format!("{kind}|{}|{}", value.normalize(), self.expiry_days))
    }
}

pub fn checksum_char(charset: &[char], body: &str, prefix: &str) -> char {
    if charset.is_empty() {
        return '?';
    }
    let sum: u64 = body.chars().chain(prefix.chars()).map(|ch| u64::from(u32::from(ch))).sum();
    let index = (sum % charset.len() as u64) as usize;
    charset.get(index).copied().unwrap_or('?')
}

/// Formats a raw body into the final code: prefix, segmented body, checksum.
pub fn assemble(options: &CodeOptions, body: &str) -> String {
    let charset = options.charset();
    let checksum = checksum_char(&charset, body, &options.prefix);

    let segment = options.segment_length;
    let chars: Vec<char> = body.chars().collect();
    let formatted = if segment > 0 && chars.len() > segment {
        chars
            .chunks(segment)
            .map(|chunk| chunk.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(&options.separator)
    } else {
        body.to_string()
    };

    let mut code = String::new();
    if !options.prefix.is_empty() {
        code.push_str(&options.prefix);
        code.push_str(&options.separator);
    }
    code.push_str(&formatted);
    code.push(checksum);
    code
}

/// Recomputes the checksum of a code produced with `options` and compares it with the
/// trailing character.
pub fn verify_checksum(code: &str, options: &CodeOptions) -> bool {
    let options = options.clone().normalized();
    let code = normalize_code(code);
    let charset = options.charset();

    let rest = if options.prefix.is_empty() {
        code.as_str()
    } else {
        let head = format!("{}{}", options.prefix, options.separator);
        match code.strip_prefix(head.as_str()) {
            Some(rest) => rest,
            None => return false,
        }
    };

    let mut chars: Vec<char> = rest.chars().collect();
    let Some(expected) = chars.pop() else {
        return false;
    };
    let joined: String = chars.into_iter().collect();
    let body =
        if options.separator.is_empty() { joined } else { joined.replace(&options.separator, "") };

    if !body.chars().all(|ch| charset.contains(&ch)) {
        return false;
    }

    checksum_char(&charset, &body, &options.prefix) == expected
}

/// Symmetric key and nonce derived once from configured key material.
#[derive(Clone)]
pub struct SealingKey {
    key: [u8; 32],
    nonce: [u8; NONCE_LEN],
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(<redacted>)")
    }
}

impl SealingKey {
    pub fn derive(key_material: &str, iv_material: &str) -> Result<Self, CodegenError> {
        if key_material.trim().is_empty() || iv_material.trim().is_empty() {
            return Err(CodegenError::MissingKeyMaterial);
        }

        let key: [u8; 32] = Sha256::digest(key_material.as_bytes()).into();
        let iv_digest: [u8; 32] = Sha256::digest(iv_material.as_bytes()).into();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&iv_digest[..NONCE_LEN]);

        Ok(Self { key, nonce })
    }

    /// Seals `metadata` and returns the first eight hex characters of the ciphertext.
    pub fn seal_fragment(&self, metadata: &str) -> Result<String, CodegenError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|error| CodegenError::Sealing(error.to_string()))?;
        let nonce = Nonce::from(self.nonce);
        let sealed = cipher
            .encrypt(&nonce, metadata.as_bytes())
            .map_err(|error| CodegenError::Sealing(error.to_string()))?;

        let mut fragment = hex::encode(sealed);
        fragment.truncate(FRAGMENT_LEN);
        Ok(fragment)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    /// Body from SHA-256 over a timestamp, OS randomness and the sealed metadata fragment.
    Sealed,
    /// Body from thread-local random bytes.
    Simple,
}

impl GenerationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sealed => "sealed",
            Self::Simple => "simple",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CodeGenerator {
    sealing: Option<SealingKey>,
}

impl CodeGenerator {
    pub fn new(sealing: Option<SealingKey>) -> Self {
        Self { sealing }
    }

    /// Key derivation failures leave the generator without a sealing key, which makes
    /// the sealed strategy fail over to the simple one at generation time.
    pub fn from_key_material(key_material: &str, iv_material: &str) -> Self {
        Self::new(SealingKey::derive(key_material, iv_material).ok())
    }

    pub fn strategies(&self, options: &CodeOptions) -> Vec<GenerationStrategy> {
        if options.wants_metadata() {
            vec![GenerationStrategy::Sealed, GenerationStrategy::Simple]
        } else {
            vec![GenerationStrategy::Simple]
        }
    }

    pub fn candidate(
        &self,
        strategy: GenerationStrategy,
        options: &CodeOptions,
        now: DateTime<Utc>,
    ) -> Result<String, CodegenError> {
        let charset = options.charset();
        let body = match strategy {
            GenerationStrategy::Sealed => self.sealed_body(options, &charset, now)?,
            GenerationStrategy::Simple => simple_body(options.length, &charset),
        };
        Ok(assemble(options, &body))
    }

    fn sealed_body(
        &self,
        options: &CodeOptions,
        charset: &[char],
        now: DateTime<Utc>,
    ) -> Result<String, CodegenError> {
        let sealing = self.sealing.as_ref().ok_or(CodegenError::MissingKeyMaterial)?;
        let fragment = match options.metadata() {
            Some(metadata) => sealing.seal_fragment(&metadata)?,
            None => String::new(),
        };

        let mut random = [0u8; SEED_BYTES];
        rand::rngs::OsRng
            .try_fill_bytes(&mut random)
            .map_err(|error| CodegenError::Randomness(error.to_string()))?;

        let seed = format!("{}{}{}", now.timestamp_millis(), hex::encode(random), fragment);
        Ok(body_from_digest_stream(seed.as_bytes(), options.length, charset))
    }
}

/// Maps bytes of `SHA-256(seed)`, then `SHA-256(previous digest)`, onto the alphabet.
fn body_from_digest_stream(seed: &[u8], length: usize, charset: &[char]) -> String {
    let mut body = String::with_capacity(length);
    let mut digest: [u8; 32] = Sha256::digest(seed).into();

    while body.len() < length {
        for byte in digest.iter() {
            if body.len() == length {
                break;
            }
            body.push(pick(charset, *byte));
        }
        digest = Sha256::digest(digest).into();
    }

    body
}

fn simple_body(length: usize, charset: &[char]) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.into_iter().map(|byte| pick(charset, byte)).collect()
}

fn pick(charset: &[char], byte: u8) -> char {
    if charset.is_empty() {
        return '?';
    }
    charset.get(usize::from(byte) % charset.len()).copied().unwrap_or('?')
}

/// Final fallback: `PREFIX-` plus eight uppercase characters of a random UUID. Not
/// checked for collisions and carries no checksum.
pub fn last_resort_code(prefix: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    let random: String = random.chars().take(LAST_RESORT_LEN).collect();
    let prefix = normalize_code(prefix);
    if prefix.is_empty() {
        random
    } else {
        format!("{prefix}-{random}")
    }
}
