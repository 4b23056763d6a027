//! JSONL run artifacts and per-step output sidecars.
//!
//! One file per run at `<log_dir>/<sanitized-run-id>.jsonl`, appended a
//! line per event. Artifact I/O problems are logged and never halt a
//! run.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_COMPONENT_LEN: usize = 64;

const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub struct ArtifactWriter {
    file: File,
    path: PathBuf,
    log_dir: PathBuf,
    run_id: String,
    write_step_files: bool,
}

impl ArtifactWriter {
    pub fn create(log_dir: &Path, run_id: &str, write_step_files: bool) -> Result<Self> {
        let run_id = sanitize_component(run_id);
        create_private_dir(log_dir)
            .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

        let path = log_dir.join(format!("{}.jsonl", run_id));
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(&path)
            .with_context(|| format!("cannot open run log {}", path.display()))?;

        Ok(Self {
            file,
            path,
            log_dir: log_dir.to_path_buf(),
            run_id,
            write_step_files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event line. Marshal or write failures are logged and
    /// swallowed so the run keeps going.
    pub fn write_event(&mut self, event_type: &str, data: serde_json::Value) {
        let record = json!({
            "type": event_type,
            "timestamp_ms": Utc::now().timestamp_millis(),
            "data": data,
        });
        match serde_json::to_string(&record) {
            Ok(mut line) => {
                line.push('\n');
                if let Err(e) = self.file.write_all(line.as_bytes()) {
                    tracing::warn!(error = %e, "failed to append run event");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode run event"),
        }
    }

    /// Write the masked stdout/stderr tails of one step as sidecar files
    /// under `<run-id>-steps/`. Best-effort.
    pub fn write_step_streams(&self, step_id: &str, stdout: &[u8], stderr: &[u8]) {
        if !self.write_step_files {
            return;
        }

        let steps_dir = self.log_dir.join(format!("{}-steps", self.run_id));
        if let Err(e) = create_private_dir(&steps_dir) {
            tracing::warn!(error = %e, "cannot create step output directory");
            return;
        }

        let step_id = sanitize_component(step_id);
        for (extension, bytes) in [("stdout", stdout), ("stderr", stderr)] {
            let path = steps_dir.join(format!("{}.{}", step_id, extension));
            if let Err(e) = write_private_file(&path, bytes) {
                tracing::warn!(error = %e, path = %path.display(), "cannot write step output file");
            }
        }
    }
}

fn create_private_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;
        DirBuilder::new().recursive(true).mode(0o750).create(path)
    }
    #[cfg(not(unix))]
    std::fs::create_dir_all(path)
}

fn write_private_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?.write_all(bytes)
}

/// Make an untrusted string safe as a single path component: path
/// separators, colons and control characters are replaced, leading dots
/// stripped, Windows reserved device names defused, length capped. An
/// empty result becomes `_`.
pub fn sanitize_component(raw: &str) -> String {
    let mut sanitized: String = raw
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == ':' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    sanitized = sanitized.trim_start_matches('.').to_string();

    if WINDOWS_RESERVED
        .iter()
        .any(|reserved| sanitized.eq_ignore_ascii_case(reserved))
    {
        sanitized.insert(0, '_');
    }

    if sanitized.len() > MAX_COMPONENT_LEN {
        let mut end = MAX_COMPONENT_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }

    if sanitized.is_empty() {
        sanitized.push('_');
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn sanitize_replaces_separators_and_colons() {
        assert_eq!(sanitize_component("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn sanitize_strips_control_chars_and_leading_dots() {
        assert_eq!(sanitize_component("..\x07run\n1"), "run_1");
    }

    #[test]
    fn sanitize_defuses_windows_reserved_names() {
        assert_eq!(sanitize_component("CON"), "_CON");
        assert_eq!(sanitize_component("lpt1"), "_lpt1");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_component(&long).len(), MAX_COMPONENT_LEN);
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("..."), "_");
    }

    #[test]
    fn events_append_as_jsonl() {
        let dir = tempdir().unwrap();
        let mut writer = ArtifactWriter::create(dir.path(), "run-test01", false).unwrap();
        writer.write_event("run_start", json!({"workflow": "demo"}));
        writer.write_event("run_end", json!({"status": "passed"}));
        drop(writer);

        let content = fs::read_to_string(dir.path().join("run-test01.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "run_start");
        assert!(first["timestamp_ms"].as_i64().unwrap() > 0);
        assert_eq!(first["data"]["workflow"], "demo");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "run_end");
    }

    #[test]
    fn step_streams_land_in_sidecar_directory() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "run-test02", true).unwrap();
        writer.write_step_streams("build", b"out bytes", b"err bytes");

        let steps_dir = dir.path().join("run-test02-steps");
        assert_eq!(fs::read(steps_dir.join("build.stdout")).unwrap(), b"out bytes");
        assert_eq!(fs::read(steps_dir.join("build.stderr")).unwrap(), b"err bytes");
    }

    #[cfg(unix)]
    #[test]
    fn run_log_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "run-test03", false).unwrap();
        let mode = fs::metadata(writer.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
