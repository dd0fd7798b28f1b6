//! Category labels derived from catalog identifiers.
//!
//! Catalog paths carry their breed in a directory segment such as
//! `n02085620-Chihuahua` or `n02108089-boxer`. The label is the part after the
//! dash with underscores turned into spaces and each word title-cased.

use std::sync::OnceLock;

use regex::Regex;

/// Label returned when an identifier has no category segment.
pub const UNKNOWN_CATEGORY: &str = "Unknown Breed";

const SEGMENT_PATTERN: &str = r"^n[0-9]+-(.+)$";

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(SEGMENT_PATTERN).expect("valid regex"))
}

/// Returns the raw category slug of `identifier`, if any.
///
/// The first matching path segment wins.
pub fn category_slug(identifier: &str) -> Option<&str> {
    let pattern = segment_pattern();
    identifier
        .split(['/', '\\'])
        .filter_map(|segment| pattern.captures(segment))
        .find_map(|captures| captures.get(1))
        .map(|slug| slug.as_str())
}

/// Human-readable category of a catalog identifier.
pub fn category_of(identifier: &str) -> String {
    match category_slug(identifier) {
        Some(slug) => title_case(&slug.replace('_', " ")),
        None => UNKNOWN_CATEGORY.to_string(),
    }
}

/// Upper-cases the first letter of every run of letters and lower-cases the
/// rest, so `german short-haired` becomes `German Short-Haired`.
fn title_case(raw: &str) -> String {
    let mut titled = String::with_capacity(raw.len());
    let mut previous_is_letter = false;
    for character in raw.chars() {
        if character.is_alphabetic() {
            if previous_is_letter {
                titled.extend(character.to_lowercase());
            } else {
                titled.extend(character.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            titled.push(character);
            previous_is_letter = false;
        }
    }
    titled
}
