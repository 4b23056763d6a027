//! Delivery of analysis requests: daemon RPC first, direct LLM second.
//!
//! The transport never propagates infrastructure errors upward. Every
//! path ends in a well-formed [`AnalysisResult`]; when nothing can be
//! reached the result is `needs_human` with an explanatory reasoning.

use crate::analyzer::{parse_flags, AnalysisResult, Analyzer, Decision};
use crate::cancel::CancelToken;
use crate::schema::RiskLevel;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// A directly-invokable LLM used when the daemon cannot be reached.
/// Only ever called with prompts built by the analyzer, which guarantees
/// the masking path ran.
pub trait DirectLlm: Send + Sync {
    fn complete(&self, cancel: &CancelToken, prompt: &str) -> Result<String>;
}

impl<F> DirectLlm for F
where
    F: Fn(&CancelToken, &str) -> Result<String> + Send + Sync,
{
    fn complete(&self, cancel: &CancelToken, prompt: &str) -> Result<String> {
        self(cancel, prompt)
    }
}

pub struct AnalyzeRequest<'a> {
    pub run_id: &'a str,
    pub step_id: &'a str,
    pub step_name: &'a str,
    pub matrix_key: &'a str,
    pub risk_level: RiskLevel,
    pub scrubbed_output: &'a str,
    pub analysis_prompt: Option<&'a str>,
}

#[derive(Serialize)]
struct RpcEnvelope<'a> {
    method: &'static str,
    params: RpcParams<'a>,
}

#[derive(Serialize)]
struct RpcParams<'a> {
    run_id: &'a str,
    step_id: &'a str,
    step_name: &'a str,
    matrix_key: &'a str,
    risk_level: &'a str,
    scrubbed_output: &'a str,
    analysis_prompt: &'a str,
}

#[derive(Deserialize)]
struct RpcResponse {
    decision: String,
    #[serde(default)]
    reasoning: String,
    /// JSON-encoded flags; a mapping or a legacy array of names.
    #[serde(default)]
    flags_json: Option<String>,
}

pub struct AnalysisTransport {
    analyzer: Analyzer,
    daemon_socket: Option<PathBuf>,
    direct: Option<Box<dyn DirectLlm>>,
    dial_timeout: Duration,
    response_timeout: Option<Duration>,
}

impl AnalysisTransport {
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer,
            daemon_socket: None,
            direct: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            response_timeout: None,
        }
    }

    pub fn with_daemon_socket(mut self, path: PathBuf) -> Self {
        self.daemon_socket = Some(path);
        self
    }

    pub fn with_direct_llm(mut self, llm: Box<dyn DirectLlm>) -> Self {
        self.direct = Some(llm);
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Classify a step's scrubbed output. Infallible by design.
    pub fn analyze(&self, cancel: &CancelToken, request: &AnalyzeRequest<'_>) -> AnalysisResult {
        let daemon_error = match &self.daemon_socket {
            Some(path) => match self.analyze_via_daemon(path, request) {
                Ok(result) => return result,
                Err(e) => e,
            },
            None => anyhow!("no daemon socket configured"),
        };
        tracing::debug!(error = %daemon_error, "daemon analysis path unavailable");

        let Some(direct) = &self.direct else {
            return AnalysisResult::needs_human("daemon unavailable and no direct LLM configured");
        };

        let prompt = self.analyzer.build_prompt(
            request.step_name,
            request.risk_level,
            request.scrubbed_output,
            request.analysis_prompt,
        );
        match direct.complete(cancel, &prompt) {
            Ok(text) => self.analyzer.parse_analysis_response(&text),
            Err(e) => AnalysisResult::needs_human(format!("all analysis paths failed: {}", e)),
        }
    }

    #[cfg(unix)]
    fn analyze_via_daemon(
        &self,
        path: &std::path::Path,
        request: &AnalyzeRequest<'_>,
    ) -> Result<AnalysisResult> {
        use anyhow::{bail, Context};
        use std::io::{BufRead, BufReader, Write};
        use std::os::unix::net::UnixStream;

        let mut stream = UnixStream::connect(path)
            .with_context(|| format!("dial analysis daemon at {}", path.display()))?;
        stream.set_write_timeout(Some(self.dial_timeout))?;
        stream.set_read_timeout(self.response_timeout)?;

        let envelope = RpcEnvelope {
            method: "AnalyzeStepOutput",
            params: RpcParams {
                run_id: request.run_id,
                step_id: request.step_id,
                step_name: request.step_name,
                matrix_key: request.matrix_key,
                risk_level: request.risk_level.as_str(),
                scrubbed_output: request.scrubbed_output,
                analysis_prompt: request.analysis_prompt.unwrap_or(""),
            },
        };
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');
        stream.write_all(line.as_bytes())?;

        let mut reply = String::new();
        BufReader::new(&stream).read_line(&mut reply)?;
        if reply.trim().is_empty() {
            bail!("daemon closed the connection without a reply");
        }

        let response: RpcResponse =
            serde_json::from_str(reply.trim()).context("malformed daemon reply")?;
        Ok(convert_response(response))
    }

    #[cfg(not(unix))]
    fn analyze_via_daemon(
        &self,
        _path: &std::path::Path,
        _request: &AnalyzeRequest<'_>,
    ) -> Result<AnalysisResult> {
        anyhow::bail!("daemon transport requires unix domain sockets")
    }
}

fn convert_response(response: RpcResponse) -> AnalysisResult {
    let decision = Decision::parse(&response.decision).unwrap_or(Decision::NeedsHuman);

    let flags = match response.flags_json.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(json) => match serde_json::from_str::<serde_json::Value>(json) {
            Ok(value) => parse_flags(Some(&value)),
            Err(_) => {
                tracing::warn!("daemon sent unreadable flags_json, dropping flags");
                BTreeMap::new()
            }
        },
        None => BTreeMap::new(),
    };

    AnalysisResult {
        decision,
        reasoning: response.reasoning,
        flags,
    }
}
