//! Text normalization for speech input.
//!
//! [`sanitize`] reduces free-form chat text to what the generation service
//! pronounces reliably:
//!
//! 1. trim, then drop everything outside `[a-zA-Z0-9,\-+?!. ]`
//! 2. a `.` or `,` between two digits becomes `" point "`
//! 3. every run of digits is spelled out in English words
//! 4. trim again and end with `.` if the text ends in a letter
//!
//! ```rust
//! assert_eq!(bragi::text::sanitize("Hello, 5 units."), "Hello, five units.");
//! assert_eq!(bragi::text::sanitize("pi is 3.14"), "pi is three point fourteen.");
//! ```

use std::sync::LazyLock;

use regex::{Captures, Regex};

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9,\-+?!. ]").expect("valid regex"));

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

const ONES: [&str; 20] = [
    "", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven",
    "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen", "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 5] = [
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
    (100, "hundred"),
];

/// Numbers at or above this are left as digits.
const SPELL_LIMIT: u64 = 1_000_000_000_000_000;

/// Normalize `text` for synthesis. May return an empty string.
pub fn sanitize(text: &str) -> String {
    let text = INVALID_CHARS.replace_all(text.trim(), "");
    let text = spell_decimal_separators(&text);
    let text = DIGITS.replace_all(&text, |caps: &Captures<'_>| number_to_words(&caps[0]));
    let mut text = text.trim().to_string();
    if text.chars().last().is_some_and(char::is_alphabetic) {
        text.push('.');
    }
    text
}

/// Replace `.`/`,` between two ASCII digits with `" point "`.
fn spell_decimal_separators(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let between_digits = i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(char::is_ascii_digit);
        if (c == '.' || c == ',') && between_digits {
            out.push_str(" point ");
        } else {
            out.push(c);
        }
    }
    out
}

/// Spell out a run of ASCII digits in English.
pub fn number_to_words(digits: &str) -> String {
    match digits.parse::<u64>() {
        Ok(0) => "zero".to_string(),
        Ok(n) if n < SPELL_LIMIT => spell(n),
        _ => digits.to_string(),
    }
}

fn spell(mut number: u64) -> String {
    let mut parts = Vec::new();
    for (value, name) in SCALES {
        if number < value {
            continue;
        }
        parts.push(format!("{} {name}", spell(number / value)));
        number %= value;
    }
    match number {
        20.. => {
            let ten = TENS[(number / 10) as usize];
            let one = ONES[(number % 10) as usize];
            parts.push(if one.is_empty() {
                ten.to_string()
            } else {
                format!("{ten} {one}")
            });
        }
        1.. => parts.push(ONES[number as usize].to_string()),
        0 => {}
    }
    parts.join(" ")
}
