//! Digit-run parsing
//!
//! Turns noisy OCR text into candidate digit strings. Several passes feed a
//! single deduplicated output list:
//! 1. Exact digit groups on the raw text
//! 2. Noisy groups with short separators between digits
//! 3. Neighboring digit tokens merged across short punctuation
//! 4. Letter-prefixed codes reduced to their digit suffix
//!
//! Passes 2 and 3 run on text where digit-like tokens have had lookalike
//! letters mapped to digits.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::warn;

/// Shortest emitted candidate
pub const MIN_CANDIDATE_DIGITS: usize = 2;
/// Longest emitted candidate
pub const MAX_CANDIDATE_DIGITS: usize = 10;
/// Merging stops once a merged value reaches this many digits
const MERGE_LIMIT: usize = 14;
/// Longest separator tolerated between digits or tokens
const MAX_SEPARATOR_LEN: usize = 3;

const DIGIT_TOKEN_PATTERN: &str = r"[A-Za-z0-9|!]+";
const DIGIT_RUN_PATTERN: &str = r"[0-9]+";
/// Shortest letter prefix wins, so a misread `O` right after it joins the digits
const PREFIXED_CODE_PATTERN: &str = r"\b[A-Za-z]{1,3}?([0-9Oo]{2,10})\b";

struct Patterns {
    digit_token: Regex,
    digit_run: Regex,
    prefixed_code: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            digit_token: Regex::new(DIGIT_TOKEN_PATTERN)?,
            digit_run: Regex::new(DIGIT_RUN_PATTERN)?,
            prefixed_code: Regex::new(PREFIXED_CODE_PATTERN)?,
        })
    }
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| match Patterns::compile() {
            Ok(patterns) => Some(patterns),
            Err(e) => {
                warn!("Digit patterns failed to compile: {}", e);
                None
            }
        })
        .as_ref()
}

/// Digit a lookalike character is commonly misread for
pub fn lookalike_digit(c: char) -> Option<char> {
    match c {
        'O' | 'o' | 'Q' | 'D' => Some('0'),
        'I' | 'l' | '|' | '!' => Some('1'),
        'Z' | 'z' => Some('2'),
        'S' | 's' => Some('5'),
        'G' => Some('6'),
        'B' => Some('8'),
        _ => None,
    }
}

fn is_candidate_len(digits: &str) -> bool {
    (MIN_CANDIDATE_DIGITS..=MAX_CANDIDATE_DIGITS).contains(&digits.len())
}

/// Insertion-ordered set of candidate strings
#[derive(Default)]
struct Outputs {
    values: Vec<String>,
}

impl Outputs {
    fn add(&mut self, digits: &str) {
        if is_candidate_len(digits) && !self.values.iter().any(|v| v == digits) {
            self.values.push(digits.to_string());
        }
    }
}

/// Extract deduplicated candidate digit strings from recognized text
pub fn extract_digits_from_text(text: &str) -> Vec<String> {
    let mut outputs = Outputs::default();
    let Some(patterns) = patterns() else {
        return outputs.values;
    };

    for run in patterns.digit_run.find_iter(text) {
        outputs.add(run.as_str());
    }

    let normalized = normalize_with(patterns, text);

    for group in noisy_digit_groups(&normalized) {
        outputs.add(&group);
    }

    for merged in merge_neighbor_digit_tokens(patterns, &normalized) {
        outputs.add(&merged);
    }

    for caps in patterns.prefixed_code.captures_iter(text) {
        if let Some(suffix) = caps.get(1) {
            if let Some(code) = prefixed_code_digits(suffix.as_str()) {
                outputs.add(&code);
            }
        }
    }

    outputs.values
}

/// Map lookalikes to digits inside tokens that already contain a digit and
/// consist only of digits and lookalikes. Pure words are left alone.
pub fn normalize_likely_digit_runs(text: &str) -> String {
    match patterns() {
        Some(patterns) => normalize_with(patterns, text),
        None => text.to_string(),
    }
}

fn normalize_with(patterns: &Patterns, text: &str) -> String {
    patterns
        .digit_token
        .replace_all(text, |caps: &Captures| {
            let token = &caps[0];
            if is_likely_digit_token(token) {
                token.chars().map(|c| lookalike_digit(c).unwrap_or(c)).collect()
            } else {
                token.to_string()
            }
        })
        .into_owned()
}

fn is_likely_digit_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || lookalike_digit(c).is_some())
}

/// Digits of a code suffix, with `O`/`o` read as zero; needs at least one real digit
fn prefixed_code_digits(suffix: &str) -> Option<String> {
    if !suffix.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(suffix.chars().map(|c| if c.is_ascii_digit() { c } else { '0' }).collect())
}

fn is_noise_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '.' | ',' | '/' | '|')
}

/// Digits separated by up to three separator characters, 2 to 10 digits long.
///
/// A group starts at a digit not preceded by a digit and ends at a digit not
/// followed by one; when the longest run ends against a digit the group is
/// shortened until it does not.
fn noisy_digit_groups(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut groups = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() || (i > 0 && chars[i - 1].is_ascii_digit()) {
            i += 1;
            continue;
        }

        // Indices of the digits in the greedy run
        let mut digit_positions = vec![i];
        let mut pos = i + 1;
        while digit_positions.len() < MAX_CANDIDATE_DIGITS {
            let mut sep = 0;
            while pos + sep < chars.len() && sep < MAX_SEPARATOR_LEN && is_noise_separator(chars[pos + sep]) {
                sep += 1;
            }
            if pos + sep < chars.len() && chars[pos + sep].is_ascii_digit() {
                digit_positions.push(pos + sep);
                pos += sep + 1;
            } else {
                break;
            }
        }

        let followed_by_digit = |end: usize| chars.get(end + 1).is_some_and(|c| c.is_ascii_digit());
        let accepted = (MIN_CANDIDATE_DIGITS..=digit_positions.len())
            .rev()
            .find(|&n| !followed_by_digit(digit_positions[n - 1]));

        match accepted {
            Some(n) => {
                groups.push(digit_positions[..n].iter().map(|&p| chars[p]).collect());
                i = digit_positions[n - 1] + 1;
            }
            None => i += 1,
        }
    }

    groups
}

fn is_mergeable_separator(separator: &str) -> bool {
    separator.chars().count() <= MAX_SEPARATOR_LEN
        && separator
            .chars()
            .all(|c| c.is_whitespace() || matches!(c, ',' | '.' | '/' | '|' | ':' | '-'))
}

/// Concatenate runs of digit tokens separated by short punctuation
fn merge_neighbor_digit_tokens(patterns: &Patterns, text: &str) -> Vec<String> {
    let tokens: Vec<_> = patterns.digit_run.find_iter(text).collect();
    let mut merged = Vec::new();

    for start in 0..tokens.len() {
        let mut value = tokens[start].as_str().to_string();
        merged.push(value.clone());

        for end in start + 1..tokens.len() {
            let between = &text[tokens[end - 1].end()..tokens[end].start()];
            if !is_mergeable_separator(between) {
                break;
            }
            value.push_str(tokens[end].as_str());
            merged.push(value.clone());
            if value.len() >= MERGE_LIMIT {
                break;
            }
        }
    }

    merged
}
