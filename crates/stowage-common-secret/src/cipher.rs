// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Symmetric encryption for credentials stored in the database.
//!
//! Stored form is `base64(nonce || ciphertext)` using AES-256-GCM with a
//! random 96-bit nonce per value.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{Secret, SecretString};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
	#[error("invalid encryption key: {0}")]
	InvalidKey(String),

	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("malformed ciphertext: {0}")]
	Malformed(String),
}

/// Opaque encrypt/decrypt service for credentials at rest.
pub trait SecretCipher: Send + Sync {
	fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;

	fn decrypt(&self, ciphertext: &str) -> Result<SecretString, SecretError>;
}

/// AES-256-GCM implementation of [`SecretCipher`].
pub struct AesGcmCipher {
	key: Zeroizing<[u8; KEY_SIZE]>,
}

impl AesGcmCipher {
	pub fn new(key: [u8; KEY_SIZE]) -> Self {
		Self {
			key: Zeroizing::new(key),
		}
	}

	/// Build from a 64 character hex string.
	pub fn from_hex(hex_key: &str) -> Result<Self, SecretError> {
		let bytes = Zeroizing::new(
			hex::decode(hex_key.trim()).map_err(|e| SecretError::InvalidKey(e.to_string()))?,
		);
		if bytes.len() != KEY_SIZE {
			return Err(SecretError::InvalidKey(format!(
				"expected {KEY_SIZE} bytes, got {}",
				bytes.len()
			)));
		}
		let mut key = [0u8; KEY_SIZE];
		key.copy_from_slice(&bytes);
		Ok(Self::new(key))
	}

	pub fn generate() -> Self {
		let mut key = [0u8; KEY_SIZE];
		OsRng.fill_bytes(&mut key);
		Self::new(key)
	}

	fn cipher(&self) -> Aes256Gcm {
		Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
	}
}

impl SecretCipher for AesGcmCipher {
	fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);

		let ciphertext = self
			.cipher()
			.encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
			.map_err(|e| SecretError::Encryption(e.to_string()))?;

		let mut out = nonce_bytes.to_vec();
		out.extend_from_slice(&ciphertext);
		Ok(STANDARD.encode(out))
	}

	fn decrypt(&self, ciphertext: &str) -> Result<SecretString, SecretError> {
		let raw = STANDARD
			.decode(ciphertext.trim())
			.map_err(|e| SecretError::Malformed(e.to_string()))?;
		if raw.len() <= NONCE_SIZE {
			return Err(SecretError::Malformed("ciphertext too short".to_string()));
		}

		let (nonce, data) = raw.split_at(NONCE_SIZE);
		let plaintext = Zeroizing::new(
			self
				.cipher()
				.decrypt(Nonce::from_slice(nonce), data)
				.map_err(|e| SecretError::Decryption(e.to_string()))?,
		);

		let text = std::str::from_utf8(&plaintext)
			.map_err(|e| SecretError::Decryption(format!("plaintext is not utf-8: {e}")))?;
		Ok(Secret::new(text.to_string()))
	}
}
