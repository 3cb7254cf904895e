use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum Module {
    /// Run every per-sample processing stage.
    #[default]
    All,
    /// Aggregate whatever the main run produced into a summary table.
    Postprocess,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "covseq-pipelines", version, about = "SARS-CoV-2 Illumina consensus and QC pipeline")]
pub struct Arguments {

    #[arg(short, long, value_enum, default_value = "all")]
    pub module: Module,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'c', long = "config", help = "Pipeline configuration (TOML). Required for the 'all' module.")]
    pub config: Option<String>,

    #[arg(short = 's', long = "samples", help = "Sample manifest (CSV). Overrides the manifest named in the configuration; required for 'postprocess'.")]
    pub samples: Option<String>,

    #[arg(short = 'r', long = "result-dir", help = "Directory holding per-sample outputs. Defaults to the configured result_dir, or the current directory for 'postprocess'.")]
    pub result_dir: Option<String>,

    #[arg(short = 'o', long = "out", help = "Postprocessing report path. Defaults to <result_dir>/summary.csv")]
    pub out_file: Option<String>,

    #[arg(short = 't', long, default_value_t = 8, help = "Core budget shared by all concurrently running stages")]
    pub threads: usize,

    #[arg(short = 'k', long = "keep-going", action, help = "Keep running stages that do not depend on a failed stage")]
    pub keep_going: bool,

    #[arg(short = 'n', long = "dry-run", action, help = "List the stages that would run without running them")]
    pub dry_run: bool,

    #[clap(
        long,
        value_delimiter = ',',
        default_value = "all",
        help = "Comma-separated list of goals (e.g., consensus,variant_calling)"
    )]
    pub targets: Vec<String>,
}
