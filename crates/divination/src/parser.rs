//! Conversion of raw model text into an [`InterpretationResult`].
//!
//! Two strategies, selected by [`ResponseFormat`]:
//!
//! - **JSON schema**: the whole message must deserialise into
//!   [`StructuredInterpretation`]. Anything else is a [`ResponseShapeError`];
//!   nothing is coerced.
//! - **Sectioned text**: `【title】` headers split the message into ordered
//!   sections. This strategy is total. Text with no recognisable header
//!   becomes a single fallback section, so content is never dropped.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::error::Category;

use crate::errors::ResponseShapeError;
use crate::types::{InterpretationResult, ResponseFormat, Section, StructuredInterpretation};

/// Title of the single section emitted when no `【】` header is found.
pub const FALLBACK_SECTION_TITLE: &str = "AI 智解";

/// A bracketed title alone on its line. The title stops at the line end.
static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【(.*?)】[ \t]*\r?\n").expect("section header pattern is valid"));

/// Parses model output according to `format`.
///
/// Idempotent: the same input always yields the same result.
///
/// # Errors
///
/// JSON-schema mode only; sectioned text never fails.
///
/// - [`ResponseShapeError::Empty`] for blank input.
/// - [`ResponseShapeError::NotJson`] / [`ResponseShapeError::SchemaMismatch`]
///   for anything else that is not the structured object.
pub fn parse_response(
    format: ResponseFormat,
    raw: &str,
) -> Result<InterpretationResult, ResponseShapeError> {
    match format {
        ResponseFormat::JsonSchema if raw.trim().is_empty() => Err(ResponseShapeError::Empty),
        ResponseFormat::JsonSchema => parse_structured(raw).map(InterpretationResult::Structured),
        ResponseFormat::SectionedText => Ok(InterpretationResult::Sectioned {
            sections: parse_sections(raw),
        }),
    }
}

fn parse_structured(raw: &str) -> Result<StructuredInterpretation, ResponseShapeError> {
    serde_json::from_str(raw).map_err(|e| match e.classify() {
        Category::Data => ResponseShapeError::SchemaMismatch {
            reason: e.to_string(),
            raw: raw.to_string(),
        },
        Category::Io | Category::Syntax | Category::Eof => ResponseShapeError::NotJson {
            reason: e.to_string(),
            raw: raw.to_string(),
        },
    })
}

/// Splits bracket-headed text into ordered sections.
///
/// Each header yields one section whose content runs to the next header or
/// the end of the text; titles and contents are whitespace-trimmed. Text
/// before the first header is not part of any section.
///
/// Never fails. Returns an empty list only for empty input; any other input
/// without a header comes back as one [`FALLBACK_SECTION_TITLE`] section
/// holding the text unchanged.
pub fn parse_sections(raw: &str) -> Vec<Section> {
    let headers: Vec<(usize, usize, &str)> = SECTION_HEADER
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let title = caps.get(1)?;
            Some((whole.start(), whole.end(), title.as_str()))
        })
        .collect();

    if headers.is_empty() {
        if raw.is_empty() {
            return Vec::new();
        }
        tracing::debug!(len = raw.len(), "no section headers found, using fallback section");
        return vec![Section {
            title: FALLBACK_SECTION_TITLE.to_string(),
            content: raw.to_string(),
        }];
    }

    headers
        .iter()
        .enumerate()
        .map(|(i, &(_, body_start, title))| {
            let body_end = headers.get(i + 1).map_or(raw.len(), |&(next_start, _, _)| next_start);
            Section {
                title: title.trim().to_string(),
                content: raw[body_start..body_end].trim().to_string(),
            }
        })
        .collect()
}
