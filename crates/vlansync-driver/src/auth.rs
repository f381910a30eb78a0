//! Login challenge-response and the explicit session value.
//!
//! The admin UI issues a per-session nonce on the login page. The
//! client proves knowledge of the password by interleaving password and
//! nonce characters position-by-position (once the shorter runs out,
//! the leftover suffix of the password, then of the nonce, is appended)
//! and submitting the MD5 hex digest of the result as the password
//! field. The interleave must be reproduced bit-exact or the device
//! rejects the login.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Password both device families ship with from the factory. Session
/// establishment falls back to it when the configured password is
/// rejected, then immediately replaces it with the configured one.
pub const FACTORY_PASSWORD: &str = "password";

/// Interleaves `password` and `nonce` character-by-character.
pub fn merge_password_nonce(password: &str, nonce: &str) -> String {
    let mut buf = String::with_capacity(password.len() + nonce.len());
    let mut pw = password.chars();
    let mut nc = nonce.chars();
    loop {
        match (pw.next(), nc.next()) {
            (Some(p), Some(n)) => {
                buf.push(p);
                buf.push(n);
            }
            (Some(p), None) => {
                buf.push(p);
                buf.extend(pw);
                break;
            }
            (None, Some(n)) => {
                buf.push(n);
                buf.extend(nc);
                break;
            }
            (None, None) => break,
        }
    }
    buf
}

/// Computes the hex digest submitted as the login password field.
pub fn challenge_response(password: &str, nonce: &str) -> String {
    let merged = merge_password_nonce(password, nonce);
    let mut hasher = Md5::new();
    hasher.update(merged.as_bytes());
    hex::encode(hasher.finalize())
}

/// Captured HTTP session, passed into and read back out of the HTTP
/// driver's lifecycle.
///
/// Loading before connect and saving after is owned by the caller;
/// there is no process-wide cookie store. An empty session simply
/// forces a fresh login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// The session cookie the device issued at login, if any.
    pub cookie: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_even_lengths() {
        assert_eq!(merge_password_nonce("ace", "bdf"), "abcdef");
    }

    #[test]
    fn test_merge_password_longer() {
        // Pairs first, then the password tail.
        assert_eq!(merge_password_nonce("password", "123"), "p1a2s3sword");
    }

    #[test]
    fn test_merge_nonce_longer() {
        assert_eq!(merge_password_nonce("ab", "12345"), "a1b2345");
    }

    #[test]
    fn test_merge_empty_sides() {
        assert_eq!(merge_password_nonce("", "123"), "123");
        assert_eq!(merge_password_nonce("abc", ""), "abc");
        assert_eq!(merge_password_nonce("", ""), "");
    }

    #[test]
    fn test_challenge_response_known_digest() {
        // merge("ac", "b") == "abc"; md5("abc") is the RFC 1321 vector.
        assert_eq!(
            challenge_response("ac", "b"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_challenge_response_empty_is_md5_of_empty() {
        assert_eq!(
            challenge_response("", ""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_session_state_round_trip() {
        let session = SessionState {
            cookie: Some("GS108SID=abc123".to_string()),
        };
        let json = serde_json::to_string(&session).unwrap();
        assert_eq!(serde_json::from_str::<SessionState>(&json).unwrap(), session);
    }
}
