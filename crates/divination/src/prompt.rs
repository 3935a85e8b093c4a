//! Deterministic prompt rendering.
//!
//! [`render`] turns an [`InterpretationRequest`] into the chat messages sent
//! upstream. The instruction text fixes the output contract for the active
//! [`ResponseFormat`] so that [`crate::parse_response`] can recover the
//! structure from a well-formed reply:
//!
//! - JSON schema: a system message carrying the persona, the cast and the exact
//!   key layout, followed by the question as the user message.
//! - Sectioned text: one user message that lays out the [`SECTION_TITLES`]
//!   headers in order, each with bullet-point placeholders.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::types::{InterpretationRequest, ResponseFormat};

/// Header titles requested in sectioned-text mode, in output order.
pub const SECTION_TITLES: [&str; 5] = ["问题", "卦象总览", "卦象分析", "结合问题解答", "总结启示"];

const PERSONA: &str = "你是一位资深的周易导师，熟读《周易》六十四卦与十翼，善于把古典智慧转化为现代人可以执行的建议。请使用地道的简体中文回答，条理清晰，逻辑严谨。";

const JSON_LAYOUT: &str = r#"{
  "questionBackground": {"question": "问题文本"},
  "hexagramOverview": {"hexagram": "卦名", "xiangCi": "象辞", "guaCi": "卦辞", "yaoCi": "爻辞", "fortune": "吉/凶/中性", "keyHint": "关键提示"},
  "hexagramAnalysis": {"xiangCiInterpretation": "象辞解读", "guaCiEssence": "卦辞精要", "yaoCiAnalysis": "爻辞分析", "changedHexagramAnalysis": "变卦分析"},
  "problemAnalysis": {"analysis": "问题分析", "recommendations": ["建议1", "建议2", "建议3"]},
  "reminder": "温馨提醒"
}"#;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat-completions conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// The rendered prompt, ready to be placed in a chat-completions request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub messages: Vec<ChatMessage>,
}

/// Renders the prompt for `request` under `format`.
///
/// Pure: no I/O, and the same inputs always give the same messages.
pub fn render(request: &InterpretationRequest, format: ResponseFormat) -> PromptPayload {
    match format {
        ResponseFormat::JsonSchema => render_json_schema(request),
        ResponseFormat::SectionedText => render_sectioned(request),
    }
}

/// `第3爻` or `第3爻（六三）` when the line text is known.
fn line_label(request: &InterpretationRequest) -> String {
    let data = &request.divination_data;
    match &data.yao_text {
        Some(text) => format!("第{}爻（{}）", data.yao_index, text),
        None => format!("第{}爻", data.yao_index),
    }
}

fn render_json_schema(request: &InterpretationRequest) -> PromptPayload {
    let gua = &request.divination_data.gua_name;
    let mut system = String::from(PERSONA);
    // Writing into a String cannot fail.
    let _ = write!(
        system,
        "\n用户抽得「{gua}」，变爻为{line}。用户的问题是：「{question}」。\
         \n请基于本卦、变爻以及卦辞、象辞、爻辞，结合上下卦（外卦、内卦）的关系给出精准解读，并提供可操作的建议。\
         \n输出必须是一个严格的JSON对象，不要包含JSON之外的任何文字，也不要使用代码块。键名必须与下列结构完全一致，hexagram 字段填写「{gua}」：\n{layout}",
        line = line_label(request),
        question = request.question,
        layout = JSON_LAYOUT,
    );

    PromptPayload {
        messages: vec![
            ChatMessage::system(system),
            ChatMessage::user(request.question.clone()),
        ],
    }
}

fn render_sectioned(request: &InterpretationRequest) -> PromptPayload {
    let question = &request.question;
    let gua = &request.divination_data.gua_name;
    let line = line_label(request);
    let [problem, overview, analysis, answer, summary] = SECTION_TITLES;

    let prompt = format!(
        "{PERSONA}请为用户做一次精准、条理清晰的卜卦解读。\n\n\
         用户的提问是：\n\"{question}\"\n\n\
         卜算出的卦象是：\n{gua}\n\n\
         变爻是：\n{line}\n\n\
         ---\n\n\
         请严格按照以下格式输出。每个标题单独占一行并保留【】，标题下的每一条内容以 • 开头：\n\n\
         【{problem}】\n\
         • {question}\n\n\
         【{overview}】\n\
         • 本卦：{gua}\n\
         • 变爻：{line}\n\
         • 关键提示：[用一句话提炼本次占卜的核心信息]\n\n\
         【{analysis}】\n\
         • 卦象总解：[用现代语言解读「{gua}」的整体含义、象征以及上下卦的关系]\n\
         • 爻辞精解：[深入分析{line}的爻辞含义，以及它在此卦中的具体指示]\n\n\
         【{answer}】\n\
         • [将上述分析与用户的问题\"{question}\"紧密结合，给出明确、可操作的建议；问题需要结论时直接给出结论]\n\n\
         【{summary}】\n\
         • [用一两句富有哲理的话总结本次占卜的启示]"
    );

    PromptPayload {
        messages: vec![ChatMessage::user(prompt)],
    }
}
