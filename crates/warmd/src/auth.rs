//! Per-process session token.
//!
//! The daemon generates one token at startup and publishes it next to the
//! port. Any process able to read the port file can therefore talk to the
//! daemon; anything else cannot.

use std::fmt;

use subtle::ConstantTimeEq;
use thiserror::Error;

/// Number of random bytes behind a token.
pub const TOKEN_BYTES: usize = 8;

/// Length of the hex-encoded token on the wire.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// Shared secret presented by every client connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Draws a fresh token from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Accepts an externally supplied token, e.g. one injected by a test.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] unless `value` is exactly [`TOKEN_LEN`]
    /// lowercase hex digits.
    pub fn from_hex(value: &str) -> Result<Self, TokenError> {
        let well_formed = value.len() == TOKEN_LEN
            && value
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        if well_formed {
            Ok(Self(value.to_owned()))
        } else {
            Err(TokenError::Malformed {
                length: value.len(),
            })
        }
    }

    /// Checks a client's claimed token in constant time.
    #[must_use]
    pub fn verify(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let claimed = candidate.as_bytes();
        expected.len() == claimed.len() && bool::from(expected.ct_eq(claimed))
    }

    /// Hex representation for publishing.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Token(<redacted>)")
    }
}

/// Errors raised when injecting a token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The value was not a lowercase hex string of the expected length.
    #[error("token must be {TOKEN_LEN} lowercase hex digits (got {length} characters)")]
    Malformed {
        /// Length of the rejected value.
        length: usize,
    },
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn generated_tokens_are_hex_of_fixed_length() {
        let token = Token::generate();
        assert_eq!(token.as_str().len(), TOKEN_LEN);
        assert!(Token::from_hex(token.as_str()).is_ok());
    }

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(Token::generate(), Token::generate());
    }

    #[rstest]
    #[case("a1b2c3d4e5f6a1b2", true)]
    #[case("a1b2c3d4e5f6a1b3", false)]
    #[case("a1b2c3d4e5f6a1b", false)]
    #[case("a1b2c3d4e5f6a1b2 ", false)]
    #[case("", false)]
    fn verify_requires_exact_match(#[case] candidate: &str, #[case] accepted: bool) {
        let token = Token::from_hex("a1b2c3d4e5f6a1b2").expect("valid token");
        assert_eq!(token.verify(candidate), accepted);
    }

    #[rstest]
    #[case("A1B2C3D4E5F6A1B2")]
    #[case("a1b2c3d4")]
    #[case("zzzzzzzzzzzzzzzz")]
    fn rejects_malformed_injected_tokens(#[case] value: &str) {
        assert!(Token::from_hex(value).is_err());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let token = Token::from_hex("a1b2c3d4e5f6a1b2").expect("valid token");
        assert!(!format!("{token:?}").contains("a1b2"));
    }
}
