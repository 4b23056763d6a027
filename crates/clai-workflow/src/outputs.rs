//! Parsing of the `$CLAI_OUTPUT` file a step writes `KEY=value` lines to.

use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("key pattern"))
}

/// Read exported outputs from `path`. A missing file means the step
/// exported nothing; other I/O errors propagate. Malformed lines are
/// logged and skipped, never fatal.
pub fn parse_output_file(path: &Path) -> io::Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e),
    };
    Ok(parse_output_lines(&content))
}

fn parse_output_lines(content: &str) -> HashMap<String, String> {
    let mut outputs = HashMap::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            tracing::warn!(line = trimmed, "output line has no '=', skipping");
            continue;
        };

        if !key_pattern().is_match(key) {
            tracing::warn!(key, "invalid output key name, skipping");
            continue;
        }

        outputs.insert(key.to_string(), value.to_string());
    }

    outputs
}
