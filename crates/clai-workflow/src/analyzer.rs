//! Prompt construction and LLM response parsing for step analysis.
//!
//! Everything here is pure: the analyzer owns the masker so no text can
//! reach an LLM without passing the masking path, and response parsing
//! never fails upward; an unreadable reply degrades to `needs_human`.

use crate::mask::SecretMasker;
use crate::schema::RiskLevel;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cap on sanitized output shipped to the LLM (roughly 25k tokens).
pub const DEFAULT_MAX_CONTEXT_BYTES: usize = 100 * 1024;

const DEFAULT_INSTRUCTION: &str =
    "Decide whether this output indicates the workflow can safely continue.";

/// The LLM's classification of a step's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Halt,
    NeedsHuman,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Proceed => "proceed",
            Decision::Halt => "halt",
            Decision::NeedsHuman => "needs_human",
        }
    }

    /// Normalize an LLM-supplied decision string. Models phrase the same
    /// intent many ways; unrecognized strings return `None` and are
    /// handled as needs-human by callers.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "proceed" | "approve" | "approved" | "ok" | "continue" => Some(Decision::Proceed),
            "halt" | "reject" | "rejected" | "block" | "abort" => Some(Decision::Halt),
            "needs_human" | "ask" | "human" | "review" => Some(Decision::NeedsHuman),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub decision: Decision,
    pub reasoning: String,
    pub flags: BTreeMap<String, String>,
}

impl AnalysisResult {
    pub fn needs_human(reasoning: impl Into<String>) -> Self {
        Self {
            decision: Decision::NeedsHuman,
            reasoning: reasoning.into(),
            flags: BTreeMap::new(),
        }
    }
}

pub struct Analyzer {
    masker: Arc<SecretMasker>,
    max_context_bytes: usize,
}

impl Analyzer {
    pub fn new(masker: Arc<SecretMasker>) -> Self {
        Self {
            masker,
            max_context_bytes: DEFAULT_MAX_CONTEXT_BYTES,
        }
    }

    pub fn with_max_context_bytes(mut self, max: usize) -> Self {
        self.max_context_bytes = if max == 0 { DEFAULT_MAX_CONTEXT_BYTES } else { max };
        self
    }

    /// Assemble the sanitized analysis context from the captured tails:
    /// label each stream, mask secrets, and truncate around the middle
    /// so the head and tail both survive.
    pub fn build_analysis_context(&self, stdout: &[u8], stderr: &[u8]) -> String {
        let mut sections = Vec::new();

        let stdout = String::from_utf8_lossy(stdout);
        let stdout = stdout.trim();
        if !stdout.is_empty() {
            sections.push(format!("stdout:\n{}", stdout));
        }

        let stderr = String::from_utf8_lossy(stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            sections.push(format!("stderr:\n{}", stderr));
        }

        if sections.is_empty() {
            return "(no output)".to_string();
        }

        let masked = self.masker.mask(&sections.join("\n\n"));
        truncate_middle(&masked, self.max_context_bytes)
    }

    /// Assemble the full analysis prompt. `sanitized_output` must come
    /// from [`build_analysis_context`](Self::build_analysis_context).
    pub fn build_prompt(
        &self,
        step_name: &str,
        risk_level: RiskLevel,
        sanitized_output: &str,
        custom_prompt: Option<&str>,
    ) -> String {
        let instruction = custom_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTION);

        format!(
            "You are reviewing the output of one step in an automated workflow.\n\
             \n\
             Step: {step}\n\
             Risk level: {risk}\n\
             \n\
             Reviewer instruction: {instruction}\n\
             \n\
             Step output (secrets masked):\n\
             ---\n\
             {output}\n\
             ---\n\
             \n\
             Respond with strict JSON only, no surrounding text:\n\
             {{\"decision\": \"proceed\" | \"halt\" | \"needs_human\", \"reasoning\": \"...\", \"flags\": {{\"name\": \"value\"}}}}\n\
             \"reasoning\" may span multiple lines. Use \"halt\" when the output shows something dangerous, \
             \"needs_human\" when a person should look before the workflow continues.",
            step = step_name,
            risk = risk_level.as_str(),
            instruction = instruction,
            output = sanitized_output,
        )
    }

    /// Parse an LLM reply. Never errors: anything unreadable becomes a
    /// `needs_human` result so the decision gate stays in control.
    pub fn parse_analysis_response(&self, text: &str) -> AnalysisResult {
        let parsed: RawResponse = match serde_json::from_str(text.trim()) {
            Ok(parsed) => parsed,
            Err(_) => return AnalysisResult::needs_human("could not parse LLM response"),
        };

        let decision = Decision::parse(&parsed.decision).unwrap_or(Decision::NeedsHuman);
        AnalysisResult {
            decision,
            reasoning: parsed.reasoning,
            flags: parse_flags(parsed.flags.as_ref()),
        }
    }
}

#[derive(Deserialize)]
struct RawResponse {
    decision: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    flags: Option<Value>,
}

/// Flags arrive either as a string-to-string mapping or, from older
/// daemon builds, as an array of flag names.
pub(crate) fn parse_flags(value: Option<&Value>) -> BTreeMap<String, String> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (k.clone(), v)
            })
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|flag| (flag.to_string(), "true".to_string()))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn truncate_middle(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let half = max / 2;
    let head_end = floor_char_boundary(text, half);
    let tail_start = ceil_char_boundary(text, text.len() - half);
    let omitted = tail_start - head_end;
    format!(
        "{}\n… [truncated {} bytes] …\n{}",
        &text[..head_end],
        omitted,
        &text[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
