//! Utility functions: casefolding, validation, link-password digests

use crate::{Error, Result};
use sha2::{Digest, Sha256, Sha512};

/// Case-fold a nickname or server name per the rfc1459 casemapping.
///
/// `[]\~` are the uppercase forms of `{}|^` in addition to the ASCII
/// letters, so two nicks differing only in those are the same nick.
pub fn fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            _ => c,
        })
        .collect()
}

/// Check if a string is a valid IRC nickname
pub fn is_valid_nickname(nick: &str, max_length: usize) -> bool {
    if nick.is_empty() || nick.len() > max_length {
        return false;
    }

    let mut chars = nick.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() && !"[]\\`_^{|}~".contains(first) {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || "-[]\\`_^{|}~".contains(c))
}

/// Check if a string is a valid ident (username) field
pub fn is_valid_ident(ident: &str) -> bool {
    if ident.is_empty() || ident.len() > 10 {
        return false;
    }
    ident
        .chars()
        .all(|c| c.is_ascii() && !c.is_control() && c != ' ' && c != '@' && c != '!')
}

/// Check if a string is a valid 3-character server ID: a digit followed
/// by two digits or uppercase letters.
pub fn is_valid_sid(sid: &str) -> bool {
    let bytes = sid.as_bytes();
    bytes.len() == 3
        && bytes[0].is_ascii_digit()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
}

/// Compute the hex digest of a link password using the algorithm named
/// in the connect block (`sha256` or `sha512`).
pub fn digest(algorithm: &str, input: &str) -> Result<String> {
    match algorithm.to_ascii_lowercase().as_str() {
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            Ok(hex_encode(&hasher.finalize()))
        }
        "sha512" => {
            let mut hasher = Sha512::new();
            hasher.update(input.as_bytes());
            Ok(hex_encode(&hasher.finalize()))
        }
        other => Err(Error::Config(format!("unknown digest algorithm: {}", other))),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Format an uptime-style duration as a human readable string
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold() {
        assert_eq!(fold("Alice"), "alice");
        assert_eq!(fold("[a]\\~"), "{a}|^");
        assert_eq!(fold("plain"), "plain");
    }

    #[test]
    fn test_valid_nickname() {
        assert!(is_valid_nickname("alice", 30));
        assert!(is_valid_nickname("alice123", 30));
        assert!(is_valid_nickname("[away]_", 30));
        assert!(!is_valid_nickname("", 30));
        assert!(!is_valid_nickname("123alice", 30));
        assert!(!is_valid_nickname("alice space", 30));
        assert!(!is_valid_nickname("toolongnick", 8));
    }

    #[test]
    fn test_valid_sid() {
        assert!(is_valid_sid("0AA"));
        assert!(is_valid_sid("999"));
        assert!(!is_valid_sid("AAA"));
        assert!(!is_valid_sid("0A"));
        assert!(!is_valid_sid("0aa"));
    }

    #[test]
    fn test_digest() {
        // SHA-256 of "password"
        assert_eq!(
            digest("sha256", "password").unwrap(),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
        assert!(digest("md4", "password").is_err());
    }
}
