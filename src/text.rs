//! Text normalization and duration parsing helpers.
//!
//! Two normal forms exist on purpose: `normalize` is the cheap cache key
//! (case fold, trim, collapse whitespace), while `fold_obfuscation`
//! additionally undoes leetspeak, homoglyph substitutions and letter
//! stretching for blacklist matching.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref DURATION_RE: Regex = Regex::new(r"^(\d+)([smhd])$").unwrap();
    static ref LEET_MAP: HashMap<char, char> = {
        let mut m = HashMap::new();
        m.insert('4', 'a');
        m.insert('@', 'a');
        m.insert('8', 'b');
        m.insert('3', 'e');
        m.insert('€', 'e');
        m.insert('1', 'i');
        m.insert('!', 'i');
        m.insert('|', 'i');
        m.insert('0', 'o');
        m.insert('$', 's');
        m.insert('5', 's');
        m.insert('7', 't');
        m.insert('+', 't');
        m.insert('2', 'z');
        m.insert('6', 'g');
        m.insert('9', 'g');
        m
    };
    static ref HOMOGLYPH_MAP: HashMap<char, char> = {
        let mut m = HashMap::new();
        // Turkish variants seen in the wild
        m.insert('ı', 'i');
        m.insert('İ', 'i');
        m.insert('ğ', 'g');
        m.insert('Ğ', 'g');
        m.insert('ü', 'u');
        m.insert('Ü', 'u');
        m.insert('ş', 's');
        m.insert('Ş', 's');
        m.insert('ö', 'o');
        m.insert('Ö', 'o');
        m.insert('ç', 'c');
        m.insert('Ç', 'c');
        // Cyrillic lookalikes
        m.insert('а', 'a');
        m.insert('е', 'e');
        m.insert('о', 'o');
        m.insert('р', 'p');
        m.insert('с', 'c');
        m.insert('х', 'x');
        m
    };
}

/// Canonical form used as the cache key: lowercased, trimmed, internal
/// whitespace collapsed to single spaces. Idempotent.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Aggressive fold for blacklist matching: lowercases, maps leetspeak and
/// homoglyphs to plain letters, squeezes repeated letters (digits are kept
/// as-is), drops punctuation and collapses whitespace.
pub fn fold_obfuscation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = '\0';

    for c in text.chars() {
        let mut mapped = c.to_lowercase().next().unwrap_or(c);
        if let Some(&leet) = LEET_MAP.get(&mapped) {
            mapped = leet;
        }
        if let Some(&glyph) = HOMOGLYPH_MAP.get(&c) {
            mapped = glyph;
        }

        if mapped.is_alphanumeric() {
            if mapped != last || !mapped.is_alphabetic() {
                out.push(mapped);
                last = mapped;
            }
        } else if c.is_whitespace() && last != ' ' {
            out.push(' ');
            last = ' ';
        }
    }

    out.trim().to_string()
}

/// Parses a punishment duration into minutes. Accepts `45s`, `10m`, `2h`,
/// `1d`, bare integers (minutes) and `permanent`/`perm` (-1). Seconds are
/// floored to whole minutes with a minimum of one.
pub fn parse_duration_minutes(input: &str) -> anyhow::Result<i64> {
    let s = input.trim().to_lowercase();
    if s == "permanent" || s == "perm" {
        return Ok(-1);
    }

    if let Some(caps) = DURATION_RE.captures(&s) {
        let value: i64 = caps[1].parse()?;
        let minutes = match &caps[2] {
            "s" => std::cmp::max(1, value / 60),
            "m" => value,
            "h" => value * 60,
            "d" => value * 60 * 24,
            _ => value,
        };
        return Ok(minutes);
    }

    s.parse::<i64>()
        .map_err(|_| anyhow::anyhow!("invalid duration: {input:?}"))
}

/// Renders a minute count for player-facing notices.
pub fn format_duration_minutes(minutes: i64) -> String {
    if minutes <= 0 {
        "permanent".to_string()
    } else if minutes < 60 {
        format!("{minutes}m")
    } else if minutes < 1440 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}d", minutes / 1440)
    }
}
