//! Random, human-typable redemption codes.
//!
//! The alphabet drops glyphs that are easy to misread (`0`/`O`, `1`/`I`).
//! Generation is stateless and makes no uniqueness promise; the batch
//! service and the store's unique constraint handle collisions.

use rand::Rng;

use crate::Error;

pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const MIN_CODE_LENGTH: usize = 6;
pub const MAX_CODE_LENGTH: usize = 20;

/// Shortest random tail we accept after the prefix (32^4 ≈ 1M combinations).
pub const MIN_RANDOM_CHARS: usize = 4;

/// Upper bound on user-supplied code strings before we even look them up.
pub const MAX_INPUT_CODE_LENGTH: usize = 64;

/// Checks and canonicalises a batch prefix for a code of `length` characters.
pub fn normalize_prefix(prefix: &str, length: usize) -> Result<String, Error> {
    let prefix = prefix.trim().to_ascii_uppercase();
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidParameters(
            "prefix may only contain ASCII letters and digits".into(),
        ));
    }
    if prefix.len() + MIN_RANDOM_CHARS > length {
        return Err(Error::InvalidParameters(format!(
            "prefix '{}' leaves fewer than {} random characters in a {}-character code",
            prefix, MIN_RANDOM_CHARS, length
        )));
    }
    Ok(prefix)
}

/// Produces a code of exactly `length` characters: `prefix` verbatim followed
/// by uniformly drawn alphabet characters.
pub fn generate(length: usize, prefix: &str) -> String {
    let mut rng = rand::rng();
    generate_with(&mut rng, length, prefix)
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, length: usize, prefix: &str) -> String {
    let random_len = length.saturating_sub(prefix.len());
    let mut code = String::with_capacity(length.max(prefix.len()));
    code.push_str(prefix);
    for _ in 0..random_len {
        let idx = rng.random_range(0..CODE_ALPHABET.len());
        code.push(CODE_ALPHABET[idx] as char);
    }
    code
}

/// Canonical form of a code typed by a user: trimmed and upper-cased.
pub fn normalize_code(input: &str) -> Result<String, Error> {
    let code = input.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(Error::InvalidParameters("code is required".into()));
    }
    if code.len() > MAX_INPUT_CODE_LENGTH {
        return Err(Error::InvalidParameters("code is too long".into()));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidParameters(
            "code may only contain letters and digits".into(),
        ));
    }
    Ok(code)
}
