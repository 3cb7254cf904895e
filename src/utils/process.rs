// src/utils/process.rs: child process plumbing

use std::fs::File;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use log::debug;
use tokio::process::{Child, Command};

use crate::pipelines::stage::ToolCommand;


fn log_stdio(log_file: &Option<File>) -> Result<Stdio> {
    match log_file {
        Some(file) => Ok(Stdio::from(file.try_clone()?)),
        None => Ok(Stdio::null()),
    }
}


/// Runs a chain of commands, wiring each stdout into the next stdin.
/// Stderr of every command, and stdout of the last one unless redirected,
/// are appended to `log_path`. Every process in the chain must exit 0.
///
/// # Arguments
///
/// * `commands` - Commands in pipe order; only the last may redirect stdout.
/// * `log_path` - Optional log file, truncated first.
///
/// # Returns
/// Ok(()) when all commands succeed.
pub async fn run_tool_chain(commands: &[ToolCommand], log_path: Option<&Path>) -> Result<()> {
    if commands.is_empty() {
        return Ok(());
    }
    let log_file = match log_path {
        Some(path) => Some(File::create(path).map_err(|e| anyhow!("Cannot create log {}: {}", path.display(), e))?),
        None => None,
    };

    let mut children: Vec<(String, Child)> = Vec::with_capacity(commands.len());
    let mut upstream: Option<Stdio> = None;

    for (i, tool) in commands.iter().enumerate() {
        let last = i + 1 == commands.len();
        if !last && tool.stdout.is_some() {
            return Err(anyhow!("{} redirects stdout but is not the last command in its pipe", tool.program));
        }

        let mut command = Command::new(&tool.program);
        command
            .args(&tool.args)
            .stdin(upstream.take().unwrap_or_else(Stdio::null))
            .stderr(log_stdio(&log_file)?)
            .kill_on_drop(true);

        let stdout = match (&tool.stdout, last) {
            (Some(path), _) => Stdio::from(
                File::create(path).map_err(|e| anyhow!("Cannot create {}: {}", path.display(), e))?,
            ),
            (None, false) => Stdio::piped(),
            (None, true) => log_stdio(&log_file)?,
        };
        command.stdout(stdout);

        debug!("Spawning {}", tool);
        let mut child = command
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", tool.program, e))?;

        if !last {
            let out = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("Failed to get stdout from {}", tool.program))?;
            upstream = Some(out.try_into()?);
        }
        children.push((tool.program.clone(), child));
    }

    let mut failures = Vec::new();
    for (program, mut child) in children {
        let status = child.wait().await?;
        if !status.success() {
            failures.push(match status.code() {
                Some(code) => format!("{} exited with status {}", program, code),
                None => format!("{} was terminated by a signal", program),
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(failures.join("; ")))
    }
}
