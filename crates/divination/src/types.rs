//! Shared value types for the interpretation domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (a changing-line index is in `1..=6`, a
//! question is never blank) and cross the wire between client and server.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;
use crate::parser::parse_sections;

// ---------------------------------------------------------------------------
// Divination result
// ---------------------------------------------------------------------------

/// Position of the changing line within a hexagram, counted from the bottom.
///
/// Always in `1..=6`. Deserialisation rejects out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LineIndex(u8);

impl LineIndex {
    /// The bottom line.
    pub const MIN: Self = Self(1);
    /// The top line.
    pub const MAX: Self = Self(6);

    /// Creates a [`LineIndex`], returning `None` if `index` is outside `1..=6`.
    #[must_use]
    pub fn new(index: u8) -> Option<Self> {
        if (1..=6).contains(&index) {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Returns the 1-based index.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for LineIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("line index {value} is outside 1..=6"))
    }
}

impl From<LineIndex> for u8 {
    fn from(index: LineIndex) -> Self {
        index.0
    }
}

impl std::fmt::Display for LineIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Outcome of casting a hexagram from three numbers.
///
/// Produced by [`crate::compute_hexagram`] and immutable afterwards; the caller
/// owns it for the duration of one divination session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HexagramResult {
    /// Full hexagram name, e.g. `"火地晋"`.
    pub hexagram_name: String,
    /// Text identifying the changing line, e.g. `"六三"`.
    pub line_text: String,
    /// Position of the changing line.
    pub line_index: LineIndex,
}

// ---------------------------------------------------------------------------
// Response format
// ---------------------------------------------------------------------------

/// Output contract requested from the model, selected per deployment.
///
/// The same value drives both prompt rendering ([`crate::render`]) and
/// response parsing ([`crate::parse_response`]), so the two never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    /// A single JSON object with the keys of [`StructuredInterpretation`].
    #[default]
    JsonSchema,
    /// `【title】` headers, each followed by bullet-point lines.
    SectionedText,
}

impl std::fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseFormat::JsonSchema => write!(f, "json-schema"),
            ResponseFormat::SectionedText => write!(f, "sectioned-text"),
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json-schema" => Ok(ResponseFormat::JsonSchema),
            "sectioned-text" => Ok(ResponseFormat::SectionedText),
            other => Err(format!(
                "unknown response format '{other}' (expected 'json-schema' or 'sectioned-text')"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound request
// ---------------------------------------------------------------------------

/// The divination payload nested inside an [`InterpretationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivinationData {
    /// Hexagram name.
    #[serde(rename = "guaName")]
    pub gua_name: String,
    /// Changing-line position.
    #[serde(rename = "yaoIndex")]
    pub yao_index: LineIndex,
    /// Changing-line text, when the caller has it.
    #[serde(rename = "yaoText", default, skip_serializing_if = "Option::is_none")]
    pub yao_text: Option<String>,
}

/// Body of `POST /api/v1/get-interpretation`.
///
/// Wire shape: `{ "question": ..., "divinationData": { "guaName", "yaoIndex", "yaoText"? } }`.
/// Construct through [`InterpretationRequest::new`] or
/// [`InterpretationRequest::from_json`]; both enforce the invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretationRequest {
    /// The user's question, trimmed and never empty.
    pub question: String,
    /// What was cast.
    #[serde(rename = "divinationData")]
    pub divination_data: DivinationData,
}

impl InterpretationRequest {
    /// Builds a request from a question and a cast hexagram.
    ///
    /// # Errors
    ///
    /// [`ValidationError::MissingQuestion`] if the question is blank, and
    /// [`ValidationError::MissingHexagramName`] if the hexagram name is.
    pub fn new(question: &str, hexagram: &HexagramResult) -> Result<Self, ValidationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ValidationError::MissingQuestion);
        }
        let gua_name = hexagram.hexagram_name.trim();
        if gua_name.is_empty() {
            return Err(ValidationError::MissingHexagramName);
        }
        let line_text = hexagram.line_text.trim();

        Ok(Self {
            question: question.to_string(),
            divination_data: DivinationData {
                gua_name: gua_name.to_string(),
                yao_index: hexagram.line_index,
                yao_text: (!line_text.is_empty()).then(|| line_text.to_string()),
            },
        })
    }

    /// Validates an untyped JSON body.
    ///
    /// Checks run in a fixed order (question, then the divination payload, then
    /// its fields) so the first problem found is the one reported.
    ///
    /// # Errors
    ///
    /// The first [`ValidationError`] encountered.
    pub fn from_json(body: &Value) -> Result<Self, ValidationError> {
        let question = body
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or(ValidationError::MissingQuestion)?;

        let data = body
            .get("divinationData")
            .and_then(Value::as_object)
            .ok_or(ValidationError::MissingDivinationData)?;

        let gua_name = data
            .get("guaName")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(ValidationError::MissingHexagramName)?;

        let yao_index = match data.get("yaoIndex") {
            None => {
                return Err(ValidationError::LineIndexOutOfRange {
                    found: "missing".to_string(),
                })
            }
            Some(value) => value
                .as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .and_then(LineIndex::new)
                .ok_or_else(|| ValidationError::LineIndexOutOfRange {
                    found: value.to_string(),
                })?,
        };

        let yao_text = match data.get("yaoText") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Some(_) => return Err(ValidationError::InvalidLineText),
        };

        Ok(Self {
            question: question.to_string(),
            divination_data: DivinationData {
                gua_name: gua_name.to_string(),
                yao_index,
                yao_text,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Interpretation result
// ---------------------------------------------------------------------------

/// `questionBackground` block of a structured interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBackground {
    pub question: String,
}

/// `hexagramOverview` block of a structured interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HexagramOverview {
    pub hexagram: String,
    pub xiang_ci: String,
    pub gua_ci: String,
    pub yao_ci: String,
    /// One of `吉` / `凶` / `中性`, as the model reports it.
    pub fortune: String,
    pub key_hint: String,
}

/// `hexagramAnalysis` block of a structured interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HexagramAnalysis {
    pub xiang_ci_interpretation: String,
    pub gua_ci_essence: String,
    pub yao_ci_analysis: String,
    pub changed_hexagram_analysis: String,
}

/// `problemAnalysis` block of a structured interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemAnalysis {
    pub analysis: String,
    pub recommendations: Vec<String>,
}

/// The JSON-schema output contract. Every key is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredInterpretation {
    pub question_background: QuestionBackground,
    pub hexagram_overview: HexagramOverview,
    pub hexagram_analysis: HexagramAnalysis,
    pub problem_analysis: ProblemAnalysis,
    pub reminder: String,
}

/// One titled block of sectioned-text output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Header text without the surrounding `【】`, whitespace-trimmed.
    pub title: String,
    /// Everything up to the next header, whitespace-trimmed.
    pub content: String,
}

/// What the server returns on success and the client hands to the UI.
///
/// Exactly one shape is produced per deployment. Serialised untagged, so the
/// wire form is the bare structured object, `{ "sections": [...] }`,
/// `{ "interpretation": "..." }` (plain text from a server that leaves the
/// sectioning to its caller), or a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterpretationResult {
    /// JSON-schema mode output.
    Structured(StructuredInterpretation),
    /// Sectioned-text mode output, in header order.
    Sectioned { sections: Vec<Section> },
    /// Unsectioned model text, passed through for display-side sectioning.
    Text { interpretation: String },
    /// A body the client could not recognise, kept verbatim.
    Raw(String),
}

impl InterpretationResult {
    /// Returns display sections for any shape.
    ///
    /// Structured results become one section per block; text shapes go through
    /// [`parse_sections`], which never drops content.
    pub fn sections(&self) -> Vec<Section> {
        match self {
            InterpretationResult::Structured(s) => structured_sections(s),
            InterpretationResult::Sectioned { sections } => sections.clone(),
            InterpretationResult::Text { interpretation } => parse_sections(interpretation),
            InterpretationResult::Raw(raw) => parse_sections(raw),
        }
    }
}

fn structured_sections(s: &StructuredInterpretation) -> Vec<Section> {
    let overview = &s.hexagram_overview;
    let analysis = &s.hexagram_analysis;
    let recommendations = s
        .problem_analysis
        .recommendations
        .iter()
        .map(|r| format!("• {r}"))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        Section {
            title: "问题背景".to_string(),
            content: format!("• {}", s.question_background.question),
        },
        Section {
            title: "卦象总览".to_string(),
            content: format!(
                "• 本卦：{}\n• 卦辞：{}\n• 象辞：{}\n• 爻辞：{}\n• 吉凶：{}\n• 关键提示：{}",
                overview.hexagram,
                overview.gua_ci,
                overview.xiang_ci,
                overview.yao_ci,
                overview.fortune,
                overview.key_hint
            ),
        },
        Section {
            title: "卦象分析".to_string(),
            content: format!(
                "• 象辞解读：{}\n• 卦辞精要：{}\n• 爻辞分析：{}\n• 变卦分析：{}",
                analysis.xiang_ci_interpretation,
                analysis.gua_ci_essence,
                analysis.yao_ci_analysis,
                analysis.changed_hexagram_analysis
            ),
        },
        Section {
            title: "问题分析".to_string(),
            content: if recommendations.is_empty() {
                format!("• {}", s.problem_analysis.analysis)
            } else {
                format!("• {}\n{recommendations}", s.problem_analysis.analysis)
            },
        },
        Section {
            title: "温馨提醒".to_string(),
            content: format!("• {}", s.reminder),
        },
    ]
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from milliseconds since the Unix epoch.
    ///
    /// Returns `None` if the value is outside the representable range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self` (negative if `earlier` is later).
    pub fn millis_since(self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).num_milliseconds()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
