// src/pipelines/executor.rs: runs a StageGraph with a core budget

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::defs::PipelineError;
use crate::pipelines::graph::StageGraph;
use crate::pipelines::stage::{Invocation, Stage};
use crate::utils::file::{ensure_parent_dirs, is_up_to_date, remove_partial_outputs};
use crate::utils::process::run_tool_chain;


#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Total cores shared by concurrently running stages.
    pub cores: usize,
    /// On failure, keep running stages that do not depend on the failed one.
    pub keep_going: bool,
    pub dry_run: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions { cores: 1, keep_going: false, dry_run: false }
    }
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub up_to_date: Vec<String>,
    pub failed: Vec<String>,
    /// Not attempted because an upstream stage failed.
    pub unreachable: Vec<String>,
    /// Not attempted because the run stopped after a failure.
    pub cancelled: Vec<String>,
    /// Dry-run only: stages that would have run.
    pub planned: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.unreachable.is_empty() && self.cancelled.is_empty()
    }
}


#[derive(Debug)]
enum StageOutcome {
    Executed,
    UpToDate,
    Failed(PipelineError),
}


#[derive(Debug, Clone, Copy, PartialEq)]
enum StageState {
    Pending,
    Running,
    Finished,
    Failed,
    Unreachable,
}


/// Brings every target up to date.
///
/// # Arguments
///
/// * `graph` - Validated stage graph.
/// * `targets` - Files that must exist afterwards.
/// * `options` - Core budget, keep-going and dry-run switches.
///
/// # Returns
/// RunSummary of what happened to each required stage. Stage failures are
/// reported in the summary, not as Err; Err means nothing could start.
pub async fn execute(
    graph: &StageGraph,
    targets: &[PathBuf],
    options: &ExecutionOptions,
) -> Result<RunSummary, PipelineError> {
    let required = graph.required_for(targets)?;

    for (path, stage) in graph.external_inputs(&required) {
        if !path.exists() {
            return Err(PipelineError::MissingInput { path, stage });
        }
    }

    if options.dry_run {
        return Ok(plan(graph, &required));
    }

    let cores = options.cores.max(1);
    info!("Running {} stage(s) with {} core(s)", required.len(), cores);

    let mut in_run = vec![false; graph.len()];
    let mut topo_pos = vec![0usize; graph.len()];
    for (pos, &idx) in required.iter().enumerate() {
        in_run[idx] = true;
        topo_pos[idx] = pos;
    }

    let mut remaining: Vec<usize> = (0..graph.len())
        .map(|idx| graph.dependencies(idx).iter().filter(|&&d| in_run[d]).count())
        .collect();
    let mut state = vec![StageState::Pending; graph.len()];

    let mut ready: BinaryHeap<(i32, Reverse<usize>, usize)> = BinaryHeap::new();
    for &idx in &required {
        if remaining[idx] == 0 {
            ready.push((graph.stage(idx).priority, Reverse(topo_pos[idx]), idx));
        }
    }

    let semaphore = Arc::new(Semaphore::new(cores));
    let mut halted = false;
    let mut running: JoinSet<(usize, StageOutcome)> = JoinSet::new();
    let mut summary = RunSummary::default();

    loop {
        // Start ready stages in heap order while their cores are free. A stage that
        // does not fit yet blocks lower-priority ones until running stages finish.
        while !halted {
            let Some(&(_, _, idx)) = ready.peek() else {
                break;
            };
            let threads = graph.stage(idx).threads.clamp(1, cores);
            let Ok(permit) = semaphore.clone().try_acquire_many_owned(threads as u32) else {
                break;
            };
            ready.pop();
            state[idx] = StageState::Running;
            let stage = graph.stage(idx).clone();
            running.spawn(async move {
                let outcome = run_stage(stage, threads).await;
                drop(permit);
                (idx, outcome)
            });
        }

        let Some(joined) = running.join_next().await else {
            break;
        };
        let (idx, outcome) = joined.map_err(|e| PipelineError::Other(anyhow!("Stage task panicked: {}", e)))?;
        let id = graph.stage(idx).id();

        match outcome {
            StageOutcome::Executed | StageOutcome::UpToDate => {
                if matches!(outcome, StageOutcome::Executed) {
                    summary.executed.push(id);
                } else {
                    summary.up_to_date.push(id);
                }
                state[idx] = StageState::Finished;
                for &dependent in graph.dependents(idx) {
                    if !in_run[dependent] || state[dependent] != StageState::Pending {
                        continue;
                    }
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        ready.push((graph.stage(dependent).priority, Reverse(topo_pos[dependent]), dependent));
                    }
                }
            }
            StageOutcome::Failed(err) => {
                error!("Stage {} failed: {}", id, err);
                summary.failed.push(id);
                state[idx] = StageState::Failed;
                for dependent in graph.descendants(idx) {
                    if in_run[dependent] && state[dependent] == StageState::Pending {
                        state[dependent] = StageState::Unreachable;
                        summary.unreachable.push(graph.stage(dependent).id());
                    }
                }
                if !options.keep_going {
                    halted = true;
                    warn!("Stopping after failure of {}; waiting for running stages", graph.stage(idx).id());
                }
            }
        }
    }

    for &idx in &required {
        if state[idx] == StageState::Pending || state[idx] == StageState::Running {
            summary.cancelled.push(graph.stage(idx).id());
        }
    }

    info!(
        "{} executed, {} up to date, {} failed, {} unreachable, {} cancelled",
        summary.executed.len(),
        summary.up_to_date.len(),
        summary.failed.len(),
        summary.unreachable.len(),
        summary.cancelled.len()
    );
    Ok(summary)
}


/// Stages that would run: stale ones and everything downstream of them.
fn plan(graph: &StageGraph, required: &[usize]) -> RunSummary {
    let mut will_run = vec![false; graph.len()];
    let mut summary = RunSummary::default();
    for &idx in required {
        let stage = graph.stage(idx);
        let upstream_runs = graph.dependencies(idx).iter().any(|&d| will_run[d]);
        if upstream_runs || !is_up_to_date(&stage.inputs, &stage.outputs) {
            will_run[idx] = true;
            info!("Would run {}: {}", stage.id(), stage.invocation);
            summary.planned.push(stage.id());
        } else {
            summary.up_to_date.push(stage.id());
        }
    }
    summary
}


/// Runs one stage whose cores are already reserved by the caller.
async fn run_stage(stage: Stage, threads: usize) -> StageOutcome {
    let id = stage.id();
    if is_up_to_date(&stage.inputs, &stage.outputs) {
        debug!("{} is up to date", id);
        return StageOutcome::UpToDate;
    }
    if stage.invocation == Invocation::None {
        return StageOutcome::Executed;
    }

    let dirs: Vec<&PathBuf> = stage.outputs.iter().chain(stage.log.iter()).chain(stage.benchmark.iter()).collect();
    if let Err(e) = ensure_parent_dirs(dirs) {
        return StageOutcome::Failed(PipelineError::IOError(format!("cannot create output directories: {}", e)));
    }

    match &stage.environment {
        Some(env) => info!("Starting {} ({} thread(s), environment {})", id, threads, env),
        None => info!("Starting {} ({} thread(s))", id, threads),
    }
    debug!("{}: {}", id, stage.invocation);

    let start = Instant::now();
    let result = run_tool_chain(stage.invocation.commands(), stage.log.as_deref()).await;
    let elapsed = start.elapsed();

    let result = result.map_err(|e| e.to_string()).and_then(|()| {
        let missing: Vec<String> = stage
            .outputs
            .iter()
            .filter(|o| !o.exists())
            .map(|o| o.display().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("finished but did not produce: {}", missing.join(", ")))
        }
    });

    if let Some(path) = &stage.benchmark {
        if let Err(e) = write_benchmark(path, elapsed, result.is_ok()) {
            warn!("Could not write benchmark {}: {}", path.display(), e);
        }
    }

    match result {
        Ok(()) => {
            info!("Finished {} in {:.1}s", id, elapsed.as_secs_f64());
            StageOutcome::Executed
        }
        Err(reason) => {
            let removed = remove_partial_outputs(&stage.outputs);
            if !removed.is_empty() {
                debug!("Removed {} partial output(s) of {}", removed.len(), id);
            }
            let error = match &stage.log {
                Some(log) => format!("{} (see {})", reason, log.display()),
                None => reason,
            };
            StageOutcome::Failed(PipelineError::ToolExecution {
                tool: stage.invocation.programs().join(" | "),
                error,
            })
        }
    }
}


/// Tab-separated: wall seconds, h:m:s, exit status (0 ok, 1 failed).
pub fn write_benchmark(path: &Path, elapsed: Duration, success: bool) -> std::io::Result<()> {
    let secs = elapsed.as_secs();
    let mut file = File::create(path)?;
    writeln!(file, "s\th:m:s\texit_status")?;
    writeln!(
        file,
        "{:.4}\t{}:{:02}:{:02}\t{}",
        elapsed.as_secs_f64(),
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        if success { 0 } else { 1 }
    )?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::stage::ToolCommand;
    use tempfile::tempdir;

    #[test]
    fn test_benchmark_format() -> std::io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bench.tsv");
        write_benchmark(&path, Duration::from_secs(3725), false)?;
        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "s\th:m:s\texit_status");
        assert_eq!(lines[1], "3725.0000\t1:02:05\t1");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_command_reports_the_tool() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("s1/out.txt");
        let stage = Stage::new("align")
            .sample("s1")
            .output(&out)
            .command(ToolCommand::new("sh", vec!["-c".to_string(), "exit 2".to_string()]))
            .log(dir.path().join("s1/logs/align.log"));

        match run_stage(stage, 1).await {
            StageOutcome::Failed(PipelineError::ToolExecution { tool, error }) => {
                assert_eq!(tool, "sh");
                assert!(error.contains("align.log"));
            }
            other => panic!("expected a tool failure, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_success() {
        let mut summary = RunSummary::default();
        assert!(summary.is_success());
        summary.unreachable.push("consensus[s1]".to_string());
        assert!(!summary.is_success());
    }
}
