//! Deterministic cache-key generation from request content.
//!
//! Keys are derived with a fast non-cryptographic 32-bit rolling
//! multiplicative hash folded to base-36, prefixed by the logical request
//! purpose so distinct request types can never collide on one key.

use std::fmt;

/// Logical purpose of a cached payload; each maps to a distinct key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Content-analysis results.
    Analysis,
    /// Generated content.
    Generation,
    /// Parsed HTML documents.
    HtmlParse,
    /// Scored results.
    ScoredResult,
}

impl KeyPurpose {
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyPurpose::Analysis => "analysis",
            KeyPurpose::Generation => "gen",
            KeyPurpose::HtmlParse => "html",
            KeyPurpose::ScoredResult => "score",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// 32-bit rolling multiplicative hash (`h = h * 31 + byte`, wrapping) folded
/// to base-36. Fast and deterministic; not collision-resistant by design.
pub fn content_hash(content: &str) -> String {
    let mut h: u32 = 0;
    for byte in content.bytes() {
        h = h.wrapping_mul(31).wrapping_add(byte as u32);
    }
    to_base36(h)
}

/// Purpose-prefixed cache key for arbitrary request content.
pub fn content_key(purpose: KeyPurpose, content: &str) -> String {
    format!("{}-{}", purpose.prefix(), content_hash(content))
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base-36 digits are ascii")
}
