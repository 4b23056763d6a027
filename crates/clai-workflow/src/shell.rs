//! Shell adapter: turns a step definition into a subprocess invocation.
//!
//! Two variants, one per OS family. Argv mode tokenizes the command text
//! with a POSIX lexer (quoting respected; `$()` and backticks are opaque
//! to the lexer); shell mode defers to `<shell> -c` or `cmd.exe /C`.

use crate::schema::ShellMode;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Environment variable naming the file a step writes `KEY=value`
/// output lines to.
pub const OUTPUT_ENV_VAR: &str = "CLAI_OUTPUT";

/// Build the subprocess for a resolved `run` command on the current
/// platform, with the effective environment and the step's output file
/// installed.
pub fn build_command(
    run: &str,
    mode: &ShellMode,
    env: &HashMap<String, String>,
    workdir: &Path,
    output_path: &Path,
) -> Result<Command> {
    #[cfg(unix)]
    let mut command = build_unix_command(run, mode)?;
    #[cfg(not(unix))]
    let mut command = build_windows_command(run, mode)?;

    command.current_dir(workdir);
    command.envs(env);
    command.env(OUTPUT_ENV_VAR, output_path);
    Ok(command)
}

fn build_unix_command(run: &str, mode: &ShellMode) -> Result<Command> {
    match mode {
        ShellMode::Default | ShellMode::Argv => argv_command(run),
        ShellMode::PlatformShell => Ok(shell_command("/bin/sh", run)),
        ShellMode::Named(shell) => Ok(shell_command(shell, run)),
    }
}

#[cfg_attr(unix, allow(dead_code))]
fn build_windows_command(run: &str, mode: &ShellMode) -> Result<Command> {
    match mode {
        ShellMode::Argv => argv_command(run),
        ShellMode::Default | ShellMode::PlatformShell => Ok(cmd_exe_command(run)),
        ShellMode::Named(shell) if shell == "cmd" => Ok(cmd_exe_command(run)),
        ShellMode::Named(shell) => Ok(shell_command(shell, run)),
    }
}

fn argv_command(run: &str) -> Result<Command> {
    let argv = shell_words::split(run)?;
    let Some((program, args)) = argv.split_first() else {
        bail!("step command is empty after tokenization");
    };
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

fn shell_command(shell: &str, run: &str) -> Command {
    let mut command = Command::new(shell);
    command.arg("-c").arg(run);
    command
}

fn cmd_exe_command(run: &str) -> Command {
    let mut command = Command::new("cmd.exe");
    command.arg("/C").arg(run);
    command
}
