// src/pipelines/stage.rs: typed stage descriptors

use std::fmt;
use std::path::{Path, PathBuf};

use crate::utils::targets::Mate;


/// One external program call. `stdout` redirects standard output to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdout: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        ToolCommand {
            program: program.to_string(),
            args,
            stdout: None,
        }
    }

    pub fn stdout_to(mut self, path: PathBuf) -> Self {
        self.stdout = Some(path);
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(path) = &self.stdout {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Nothing to run; the stage only groups files.
    None,
    Command(ToolCommand),
    /// Each command's stdout feeds the next command's stdin.
    Pipe(Vec<ToolCommand>),
}

impl Invocation {
    pub fn commands(&self) -> &[ToolCommand] {
        match self {
            Invocation::None => &[],
            Invocation::Command(cmd) => std::slice::from_ref(cmd),
            Invocation::Pipe(cmds) => cmds,
        }
    }

    pub fn programs(&self) -> Vec<&str> {
        self.commands().iter().map(|c| c.program.as_str()).collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.commands().iter().map(|c| c.to_string()).collect();
        write!(f, "{}", rendered.join(" | "))
    }
}


/// Declarative record of one processing step for one sample (or for the whole run).
#[derive(Debug, Clone)]
pub struct Stage {
    pub rule: String,
    pub sample: Option<String>,
    pub mate: Option<Mate>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub invocation: Invocation,
    pub threads: usize,
    pub priority: i32,
    pub log: Option<PathBuf>,
    pub benchmark: Option<PathBuf>,
    /// Named toolchain environment the stage expects (informational).
    pub environment: Option<String>,
}

impl Stage {
    pub fn new(rule: &str) -> Self {
        Stage {
            rule: rule.to_string(),
            sample: None,
            mate: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            invocation: Invocation::None,
            threads: 1,
            priority: 0,
            log: None,
            benchmark: None,
            environment: None,
        }
    }

    pub fn sample(mut self, sample: &str) -> Self {
        self.sample = Some(sample.to_string());
        self
    }

    pub fn mate(mut self, mate: Mate) -> Self {
        self.mate = Some(mate);
        self
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.inputs.extend(paths.into_iter().map(|p| p.as_ref().to_path_buf()));
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.outputs.push(path.as_ref().to_path_buf());
        self
    }

    pub fn command(mut self, command: ToolCommand) -> Self {
        self.invocation = Invocation::Command(command);
        self
    }

    pub fn pipe(mut self, commands: Vec<ToolCommand>) -> Self {
        self.invocation = Invocation::Pipe(commands);
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn log(mut self, path: PathBuf) -> Self {
        self.log = Some(path);
        self
    }

    pub fn benchmark(mut self, path: PathBuf) -> Self {
        self.benchmark = Some(path);
        self
    }

    pub fn environment(mut self, name: &str) -> Self {
        self.environment = Some(name.to_string());
        self
    }

    /// `rule`, `rule[sample]` or `rule[sample,R1]`.
    pub fn id(&self) -> String {
        match (&self.sample, self.mate) {
            (Some(s), Some(m)) => format!("{}[{},R{}]", self.rule, s, m),
            (Some(s), None) => format!("{}[{}]", self.rule, s),
            (None, Some(m)) => format!("{}[R{}]", self.rule, m),
            (None, None) => self.rule.clone(),
        }
    }
}


/// Named build target grouping per-sample outputs. Runs nothing itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub name: String,
    pub targets: Vec<PathBuf>,
}

impl Goal {
    pub fn new(name: &str, targets: Vec<PathBuf>) -> Self {
        Goal { name: name.to_string(), targets }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ids() {
        assert_eq!(Stage::new("consensus").sample("s1").id(), "consensus[s1]");
        assert_eq!(Stage::new("combine_raw_reads").sample("s1").mate(Mate::R2).id(), "combine_raw_reads[s1,R2]");
        assert_eq!(Stage::new("viral_reference_bwa_build").id(), "viral_reference_bwa_build");
    }

    #[test]
    fn test_pipe_display() {
        let invocation = Invocation::Pipe(vec![
            ToolCommand::new("samtools", vec!["mpileup".into(), "in.bam".into()]),
            ToolCommand::new("ivar", vec!["consensus".into()]),
        ]);
        assert_eq!(invocation.to_string(), "samtools mpileup in.bam | ivar consensus");
        assert_eq!(invocation.programs(), vec!["samtools", "ivar"]);
    }
}
