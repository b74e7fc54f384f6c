//! # Key Sanitizer
//!
//! Normalizes raw text scraped from a map cell. Everything outside the allowed
//! set is dropped: ASCII word characters, whitespace, `#` and the two code
//! points that make up the battle glyph (`U+2694` and the `U+FE0F` variation
//! selector).
//!
//! "Whitespace" is the ECMAScript set: ASCII blanks, `U+00A0`, `U+1680`,
//! `U+2000..=U+200A`, the line and paragraph separators, `U+202F`, `U+205F`,
//! `U+3000` and the byte order mark. `U+0085` is not in it, unlike Unicode
//! `White_Space`.

use std::sync::LazyLock;

use regex::Regex;

use super::tracker::LocationKey;

/// The glyph that marks a cell as active.
pub const FLAG_GLYPH: &str = "\u{2694}\u{FE0F}";

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"[^A-Za-z0-9_#\x{2694}\x{FE0F}",
        r"\t\n\x{0B}\x{0C}\r \x{A0}\x{1680}\x{2000}-\x{200A}",
        r"\x{2028}\x{2029}\x{202F}\x{205F}\x{3000}\x{FEFF}]",
    ))
    .expect("static sanitizer pattern is valid")
});

/// Strips every character outside the allowed set. Total: never fails.
pub fn sanitize(raw: &str) -> String {
    DISALLOWED.replace_all(raw, "").into_owned()
}

/// Builds the canonical key of a cell from its right-side and top-side text.
pub fn location_key(right: &str, top: &str) -> LocationKey {
    let mut key = sanitize(right);
    key.push_str(&sanitize(top));
    LocationKey::new(key)
}

/// Whether the sanitized left-side text carries the flag glyph.
pub fn is_flagged(left: &str) -> bool {
    sanitize(left).contains(FLAG_GLYPH)
}
