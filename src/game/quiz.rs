//! Quiz Verifier
//!
//! Pure answer checking. The comparison rule comes from the mission's
//! [`QuizDescriptor`]; nothing here branches on mission identity.
//!
//! A wrong or malformed answer is never an error: it is simply `false`,
//! and the player may resubmit as often as they like.

use std::collections::BTreeMap;

use crate::game::mission::{
    ChoiceSlot, MissionCatalog, MissionId, QuizDescriptor, SubCheck, ANSWER_FIELD,
};

/// Submitted answer fields keyed by field key.
pub type AnswerFields = BTreeMap<String, String>;

// =============================================================================
// PRIMITIVE CHECKS
// =============================================================================

/// Strip every non-digit character and parse what remains.
///
/// `"138m"` -> 138, `"1 8 3"` -> 183, `"abc"` -> None.
pub fn parse_digits(input: &str) -> Option<i64> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Does the input parse into the inclusive band `[min, max]`?
pub fn in_band(input: &str, min: i64, max: i64) -> bool {
    parse_digits(input).is_some_and(|n| n >= min && n <= max)
}

/// Free-text containment match.
///
/// Correct if the trimmed input equals or contains `expected`, or contains
/// one of the whitelisted alternates.
pub fn free_text_matches(input: &str, expected: &str, alternates: &[String]) -> bool {
    let input = input.trim();
    if input.is_empty() {
        return false;
    }
    if !expected.is_empty() && (input == expected || input.contains(expected)) {
        return true;
    }
    alternates
        .iter()
        .any(|alt| !alt.is_empty() && input.contains(alt.as_str()))
}

/// Categorical pair match. Values outside the option sets never match.
pub fn pair_matches(
    first: &ChoiceSlot,
    second: &ChoiceSlot,
    accepted: &[(String, String)],
    a: &str,
    b: &str,
) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if !first.options.iter().any(|o| o == a) || !second.options.iter().any(|o| o == b) {
        return false;
    }
    accepted.iter().any(|(x, y)| x == a && y == b)
}

/// Keyword presence: at least one keyword from every group.
pub fn keywords_present(text: &str, groups: &[Vec<String>]) -> bool {
    let text = text.trim();
    !text.is_empty()
        && groups
            .iter()
            .all(|group| group.iter().any(|kw| !kw.is_empty() && text.contains(kw.as_str())))
}

fn field<'a>(fields: &'a AnswerFields, key: &str) -> &'a str {
    fields.get(key).map(String::as_str).unwrap_or("")
}

// =============================================================================
// DESCRIPTOR DISPATCH
// =============================================================================

/// Check one sub-check against the submitted fields.
pub fn check_sub(check: &SubCheck, fields: &AnswerFields) -> bool {
    match check {
        SubCheck::NumericRanges { fields: ranges } => ranges
            .iter()
            .all(|r| in_band(field(fields, &r.key), r.min, r.max)),
        SubCheck::Keywords { field: key, groups } => keywords_present(field(fields, key), groups),
    }
}

/// Verify a whole quiz.
pub fn verify(descriptor: &QuizDescriptor, fields: &AnswerFields) -> bool {
    match descriptor {
        QuizDescriptor::FreeText { expected, alternates } => {
            free_text_matches(field(fields, ANSWER_FIELD), expected, alternates)
        }
        QuizDescriptor::CategoricalPair { first, second, accepted } => pair_matches(
            first,
            second,
            accepted,
            field(fields, &first.key),
            field(fields, &second.key),
        ),
        QuizDescriptor::SubChecks { checks } => {
            !checks.is_empty() && checks.iter().all(|c| check_sub(c, fields))
        }
    }
}

/// Verify one part of a quiz. Single-part quizzes only have part 0.
///
/// Returns None when the part index does not exist.
pub fn verify_part(descriptor: &QuizDescriptor, part: usize, fields: &AnswerFields) -> Option<bool> {
    match descriptor {
        QuizDescriptor::SubChecks { checks } => checks.get(part).map(|c| check_sub(c, fields)),
        _ if part == 0 => Some(verify(descriptor, fields)),
        _ => None,
    }
}

// =============================================================================
// CATALOG-LEVEL VERIFIER
// =============================================================================

/// `verify(missionId, submittedFields)` over a catalog.
pub struct QuizVerifier<'a> {
    catalog: &'a MissionCatalog,
}

impl<'a> QuizVerifier<'a> {
    /// Create a verifier over a catalog.
    pub fn new(catalog: &'a MissionCatalog) -> Self {
        Self { catalog }
    }

    /// Verify a submission. Unknown missions and missions without a quiz are never correct.
    pub fn verify(&self, mission_id: &MissionId, fields: &AnswerFields) -> bool {
        self.catalog
            .get(mission_id)
            .and_then(|m| m.quiz.as_ref())
            .is_some_and(|q| verify(&q.descriptor, fields))
    }
}
