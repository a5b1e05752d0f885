use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

const CURRENCY_SYMBOLS: [(char, &str); 5] = [
    ('₺', "TRY"),
    ('€', "EUR"),
    ('£', "GBP"),
    ('¥', "JPY"),
    ('$', "USD"),
];

const CURRENCY_CODES: [(&str, &str); 6] = [
    ("TRY", "TRY"),
    ("TL", "TRY"),
    ("EUR", "EUR"),
    ("USD", "USD"),
    ("GBP", "GBP"),
    ("JPY", "JPY"),
];

const MINUS_SIGNS: [char; 2] = ['-', '\u{2212}'];

/// Digit groups joined by single separators: `.`, `,`, `'` or a space.
static NUMBER_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]+(?:[.,' \x{a0}\x{202f}][0-9]+)*").expect("number run regex is valid")
});

/// One group of a number run with the separator in front of it.
static NUMBER_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([.,' \x{a0}\x{202f}]?)([0-9]+)").expect("number group regex is valid")
});

/// Parses the first numeric token of a price label.
///
/// Separator rules: when both `.` and `,` occur the last one is the decimal
/// mark; a single kind occurring several times is grouping; a single
/// occurrence followed by exactly three digits is grouping, otherwise decimal.
/// Spaces (including NBSP) are grouping only between a digit and a group of
/// exactly three digits. Returns `None` for text without digits and for
/// negated amounts.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let run = NUMBER_RUN.find(text)?;
    if is_negated(&text[..run.start()]) {
        return None;
    }

    let token = numeric_token(run.as_str());
    let canonical = canonicalize(&token);
    Decimal::from_str(&canonical).ok()
}

/// Currency code implied by a symbol or code inside the price label.
pub fn detect_currency(text: &str) -> Option<&'static str> {
    for (symbol, code) in CURRENCY_SYMBOLS {
        if text.contains(symbol) {
            return Some(code);
        }
    }

    text.split(|ch: char| !ch.is_alphabetic())
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            let upper = word.to_uppercase();
            CURRENCY_CODES
                .iter()
                .find(|(candidate, _)| *candidate == upper)
                .map(|(_, code)| *code)
        })
}

/// Accepts a known alias or any three-letter alphabetic code, uppercased.
pub fn normalize_currency_code(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if let Some(code) = detect_currency(trimmed) {
        return Some(code.to_owned());
    }

    (trimmed.len() == 3 && trimmed.chars().all(|ch| ch.is_ascii_alphabetic()))
        .then(|| trimmed.to_ascii_uppercase())
}

fn is_negated(prefix: &str) -> bool {
    prefix
        .chars()
        .rev()
        .find(|ch| {
            !(ch.is_whitespace() || CURRENCY_SYMBOLS.iter().any(|(symbol, _)| symbol == ch))
        })
        .is_some_and(|ch| MINUS_SIGNS.contains(&ch))
}

/// Keeps `.` and `,` for [`canonicalize`], drops `'` grouping, and accepts a
/// space only in front of a group of exactly three digits.
fn numeric_token(run: &str) -> String {
    let mut token = String::with_capacity(run.len());

    for group in NUMBER_GROUP.captures_iter(run) {
        let separator = group.get(1).map_or("", |found| found.as_str());
        let digits = group.get(2).map_or("", |found| found.as_str());
        match separator {
            "." | "," => token.push_str(separator),
            "" | "'" => {}
            _ if digits.len() == 3 => {}
            _ => break,
        }
        token.push_str(digits);
    }

    token
}

fn canonicalize(token: &str) -> String {
    let decimal_mark = decimal_mark(token);
    let decimal_index = decimal_mark.and_then(|mark| token.rfind(mark));

    token
        .char_indices()
        .filter_map(|(index, ch)| {
            if ch.is_ascii_digit() {
                Some(ch)
            } else if Some(index) == decimal_index {
                Some('.')
            } else {
                None
            }
        })
        .collect()
}

fn decimal_mark(token: &str) -> Option<char> {
    match (token.rfind('.'), token.rfind(',')) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (Some(_), None) => single_kind_mark(token, '.'),
        (None, Some(_)) => single_kind_mark(token, ','),
        (None, None) => None,
    }
}

fn single_kind_mark(token: &str, mark: char) -> Option<char> {
    if token.matches(mark).count() > 1 {
        return None;
    }

    let position = token.rfind(mark)?;
    let digits_after = token[position + mark.len_utf8()..].len();
    (digits_after != 3).then_some(mark)
}
