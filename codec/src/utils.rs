// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! String helpers shared by the packet decoders.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of data exceeds its limitation.
    TooManyData,

    /// Not a valid UTF-8 sequence, or contains forbidden code points.
    InvalidString,
}

/// Convert `bytes` into an owned UTF-8 string.
///
/// A UTF-8 encoded string MUST NOT include an encoding of the null
/// character U+0000 [MQTT-1.5.3-2].
///
/// # Errors
///
/// Returns error if `bytes` is not a valid UTF-8 sequence.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(bytes.to_vec()).map_err(|_err| StringError::InvalidString)?;
    if s.contains('\u{0}') {
        return Err(StringError::InvalidString);
    }
    Ok(s)
}

/// Check string length is within the two-byte length prefix range.
///
/// # Errors
///
/// Returns error if `s` is longer than 65535 bytes.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(StringError::TooManyData);
    }
    if s.contains('\u{0}') {
        return Err(StringError::InvalidString);
    }
    Ok(())
}

/// Generate a random alphanumeric string with `len` chars.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a random client id.
///
/// The Server MUST allow ClientIds which are between 1 and 23 UTF-8 encoded
/// bytes in length [MQTT-3.1.3-5].
#[must_use]
pub fn random_client_id() -> String {
    format!("petrel-{}", random_string(16))
}
