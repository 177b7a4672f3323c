// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sealing secret values under the server key.
//!
//! Ciphertext layout is `nonce (12 bytes) || AES-256-GCM output (ciphertext + 16 byte tag)`.
//! Stored values are the standard base64 of that layout. Digests are
//! HMAC-SHA-512/256 keyed with a fixed tag and are safe to display.

use std::fmt;

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512_256;
use weft_common_secret::{SecretString, REDACTED};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of the server key in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const VALUE_DIGEST_TAG: &[u8] = b"user defined secrets";
const KEY_FINGERPRINT_TAG: &[u8] = b"server key fingerprint";

type HmacSha512_256 = Hmac<Sha512_256>;

/// The symmetric key every secret of the server is sealed under.
///
/// Construct with [`ServerKey::parse`]; the fingerprint is computed once and
/// is what gets persisted per project.
#[derive(Clone)]
pub struct ServerKey {
	bytes: Zeroizing<[u8; KEY_SIZE]>,
	fingerprint: String,
}

impl ServerKey {
	/// Accepts 64 hex characters, standard base64 of 32 bytes, or a raw
	/// 32 byte string, tried in that order. Surrounding whitespace is ignored.
	pub fn parse(raw: &SecretString) -> Result<Self, CryptoError> {
		let text = raw.expose().trim();
		if text.is_empty() {
			return Err(CryptoError::MalformedKey("key is empty".to_string()));
		}

		if text.len() == KEY_SIZE * 2 {
			if let Ok(decoded) = hex::decode(text) {
				return Self::from_bytes(&Zeroizing::new(decoded));
			}
		}
		if let Ok(decoded) = STANDARD.decode(text) {
			if decoded.len() == KEY_SIZE {
				return Self::from_bytes(&Zeroizing::new(decoded));
			}
		}
		if text.len() == KEY_SIZE {
			return Self::from_bytes(text.as_bytes());
		}

		Err(CryptoError::MalformedKey(format!(
			"expected {KEY_SIZE} bytes as hex, base64 or raw text"
		)))
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
		if bytes.len() != KEY_SIZE {
			return Err(CryptoError::MalformedKey(format!(
				"expected {KEY_SIZE} bytes, got {}",
				bytes.len()
			)));
		}
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		key.copy_from_slice(bytes);
		let fingerprint = tagged_hash(KEY_FINGERPRINT_TAG, key.as_slice())?;
		Ok(Self {
			bytes: key,
			fingerprint,
		})
	}

	/// A fresh random key.
	pub fn generate() -> Result<Self, CryptoError> {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(key.as_mut());
		Self::from_bytes(key.as_slice())
	}

	/// Hex encoding of the key, for handing a generated key to an operator.
	pub fn to_hex(&self) -> SecretString {
		SecretString::new(hex::encode(self.bytes.as_slice()))
	}

	/// One-way identifier of this key, stable across processes.
	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}

	fn cipher(&self) -> Aes256Gcm {
		Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.bytes.as_slice()))
	}
}

impl fmt::Debug for ServerKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServerKey")
			.field("bytes", &REDACTED)
			.field("fingerprint", &self.fingerprint)
			.finish()
	}
}

impl PartialEq for ServerKey {
	fn eq(&self, other: &Self) -> bool {
		self.fingerprint == other.fingerprint
	}
}

/// Encrypt with a fresh random nonce, returned as the ciphertext prefix.
pub fn encrypt(key: &ServerKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
	let mut nonce_bytes = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce_bytes);

	let sealed = key
		.cipher()
		.encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
		.map_err(|e| CryptoError::Encryption(e.to_string()))?;

	let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
	out.extend_from_slice(&nonce_bytes);
	out.extend_from_slice(&sealed);
	Ok(out)
}

/// Inverse of [`encrypt`]. A wrong key or any altered byte fails authentication.
pub fn decrypt(key: &ServerKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
	if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
		return Err(CryptoError::MalformedCiphertext(format!(
			"{} bytes is shorter than nonce and tag",
			ciphertext.len()
		)));
	}
	let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

	key.cipher()
		.decrypt(Nonce::from_slice(nonce), sealed)
		.map(Zeroizing::new)
		.map_err(|_| CryptoError::AuthenticationFailed)
}

/// Display fingerprint of ciphertext bytes.
pub fn digest(data: &[u8]) -> Result<String, CryptoError> {
	tagged_hash(VALUE_DIGEST_TAG, data)
}

/// Whether `value` is standard-alphabet, padded base64.
pub fn validate_base64(value: &str) -> bool {
	STANDARD.decode(value).is_ok()
}

/// What gets persisted for one secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
	pub encrypted_value: String,
	pub digest: String,
}

/// Encrypt a base64 payload for storage.
pub fn seal_value(key: &ServerKey, payload: &str) -> Result<SealedValue, CryptoError> {
	let ciphertext = encrypt(key, payload.as_bytes())?;
	Ok(SealedValue {
		digest: digest(&ciphertext)?,
		encrypted_value: STANDARD.encode(&ciphertext),
	})
}

/// Recover the base64 payload from a stored value.
pub fn open_value(key: &ServerKey, encrypted_value: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
	let ciphertext = STANDARD
		.decode(encrypted_value)
		.map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
	decrypt(key, &ciphertext)
}

fn tagged_hash(tag: &[u8], data: &[u8]) -> Result<String, CryptoError> {
	let mut mac = <HmacSha512_256 as Mac>::new_from_slice(tag)
		.map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
	mac.update(data);
	Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
