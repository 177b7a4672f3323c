// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting holder for plaintext secret values and server key material.
//!
//! Anything decrypted by the secret store, and every configured server key,
//! travels through the workspace as a [`Secret<T>`]. The wrapper:
//!
//! - renders `[REDACTED]` for `Debug`, `Display` and `Serialize`
//! - zeroes its memory when dropped
//! - hands out the inner value only through [`Secret::expose`]
//!
//! ```
//! use weft_common_secret::SecretString;
//!
//! let token = SecretString::from("warehouse-password");
//! assert_eq!(format!("{token}"), "[REDACTED]");
//! assert_eq!(format!("{token:?}"), "Secret(\"[REDACTED]\")");
//! assert_eq!(token.expose(), "warehouse-password");
//! ```
//!
//! Structured logging goes through `Display`/`Debug`, so both
//! `info!(value = %secret)` and `info!(?secret)` emit the placeholder.

use std::fmt;
use zeroize::Zeroize;

/// Placeholder written wherever a secret would otherwise be rendered.
pub const REDACTED: &str = "[REDACTED]";

/// A sensitive value that refuses to print itself.
///
/// There is deliberately no `Deref`; callers opt in with `.expose()`.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

/// Decrypted secret values and textual key material.
pub type SecretString = Secret<String>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Borrow the plaintext.
	pub fn expose(&self) -> &T {
		&self.inner
	}

	pub fn expose_mut(&mut self) -> &mut T {
		&mut self.inner
	}

	/// Take an owned copy of the plaintext.
	///
	/// The copy is cloned out so the wrapper's own buffer is still wiped on drop.
	pub fn into_inner(self) -> T
	where
		T: Clone,
	{
		self.inner.clone()
	}
}

impl SecretString {
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Secret::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Secret::new(value.to_string())
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

#[cfg(feature = "serde")]
mod serde_impl {
	use super::{Secret, REDACTED};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use zeroize::Zeroize;

	impl<T> Serialize for Secret<T>
	where
		T: Serialize + Zeroize,
	{
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			serializer.serialize_str(REDACTED)
		}
	}

	impl<'de, T> Deserialize<'de> for Secret<T>
	where
		T: Deserialize<'de> + Zeroize,
	{
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: Deserializer<'de>,
		{
			T::deserialize(deserializer).map(Secret::new)
		}
	}
}
