/// Typed parameter sets and argument builders for every external tool, plus presence checks

use std::process::Stdio;

use log::{debug, info, warn};
use tokio::process::Command;

use crate::config::defs::{PipelineError, BWA_TAG, IVAR_TAG, TOOL_VERSIONS};


fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().to_string()
}


pub mod bwa {
    use std::path::{Path, PathBuf};
    use crate::config::defs::BWA_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    pub fn index(reference: &Path, prefix: &Path) -> ToolCommand {
        ToolCommand::new(
            BWA_TAG,
            vec!["index".to_string(), "-p".to_string(), path_arg(prefix), path_arg(reference)],
        )
    }

    #[derive(Debug, Clone)]
    pub struct BwaMemConfig {
        pub index_prefix: PathBuf,
        pub threads: usize,
    }

    pub fn mem(config: &BwaMemConfig, r1: &Path, r2: &Path) -> ToolCommand {
        ToolCommand::new(
            BWA_TAG,
            vec![
                "mem".to_string(),
                "-t".to_string(),
                config.threads.to_string(),
                path_arg(&config.index_prefix),
                path_arg(r1),
                path_arg(r2),
            ],
        )
    }
}


pub mod samtools {
    use std::path::Path;
    use crate::config::defs::{SamtoolsSubcommand, SAMTOOLS_TAG};
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    /// Subcommand plus flag/value pairs, rendered in insertion order.
    #[derive(Debug, Clone)]
    pub struct SamtoolsConfig {
        pub subcommand: SamtoolsSubcommand,
        pub subcommand_fields: Vec<(String, Option<String>)>,
    }

    impl SamtoolsConfig {
        pub fn new(subcommand: SamtoolsSubcommand) -> Self {
            SamtoolsConfig { subcommand, subcommand_fields: Vec::new() }
        }

        pub fn flag(mut self, flag: &str) -> Self {
            self.subcommand_fields.push((flag.to_string(), None));
            self
        }

        pub fn option(mut self, flag: &str, value: impl ToString) -> Self {
            self.subcommand_fields.push((flag.to_string(), Some(value.to_string())));
            self
        }

        pub fn operand(self, value: &Path) -> Self {
            self.flag(&path_arg(value))
        }
    }

    pub fn arg_generator(config: &SamtoolsConfig) -> Vec<String> {
        let mut args_vec = vec![config.subcommand.as_str().to_string()];
        for (key, value) in &config.subcommand_fields {
            args_vec.push(key.clone());
            if let Some(v) = value {
                args_vec.push(v.clone());
            }
        }
        args_vec
    }

    pub fn command(config: &SamtoolsConfig) -> ToolCommand {
        ToolCommand::new(SAMTOOLS_TAG, arg_generator(config))
    }
}


pub mod trim_galore {
    use std::path::{Path, PathBuf};
    use crate::config::defs::TRIM_GALORE_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    #[derive(Debug, Clone)]
    pub struct TrimGaloreConfig {
        pub min_qual: u32,
        pub min_len: u32,
        pub cores: usize,
        pub basename: String,
        pub output_dir: PathBuf,
    }

    pub fn arg_generator(config: &TrimGaloreConfig, r1: &Path, r2: &Path) -> Vec<String> {
        vec![
            "--paired".to_string(),
            "--gzip".to_string(),
            "--quality".to_string(),
            config.min_qual.to_string(),
            "--length".to_string(),
            config.min_len.to_string(),
            "--cores".to_string(),
            config.cores.to_string(),
            "--basename".to_string(),
            config.basename.clone(),
            "-o".to_string(),
            path_arg(&config.output_dir),
            path_arg(r1),
            path_arg(r2),
        ]
    }

    pub fn command(config: &TrimGaloreConfig, r1: &Path, r2: &Path) -> ToolCommand {
        ToolCommand::new(TRIM_GALORE_TAG, arg_generator(config, r1, r2))
    }
}


pub mod ivar {
    use std::path::{Path, PathBuf};
    use crate::config::defs::{IvarSubcommand, IVAR_TAG};
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    #[derive(Debug, Clone)]
    pub struct IvarTrimConfig {
        pub primer_bed: PathBuf,
        pub min_len: u32,
        pub min_qual: u32,
        pub prefix: PathBuf,
    }

    #[derive(Debug, Clone)]
    pub struct IvarConsensusConfig {
        pub freq_threshold: f64,
        pub min_depth: u32,
        pub prefix: PathBuf,
    }

    #[derive(Debug, Clone)]
    pub struct IvarVariantsConfig {
        pub freq_threshold: f64,
        pub min_depth: u32,
        pub min_quality: u32,
        pub reference: PathBuf,
        pub feature_coords: PathBuf,
        pub prefix: PathBuf,
    }

    /// `-e` keeps reads without primers (Illumina Nextera style libraries).
    pub fn trim(config: &IvarTrimConfig, bam: &Path) -> ToolCommand {
        ToolCommand::new(
            IVAR_TAG,
            vec![
                IvarSubcommand::Trim.as_str().to_string(),
                "-e".to_string(),
                "-i".to_string(),
                path_arg(bam),
                "-b".to_string(),
                path_arg(&config.primer_bed),
                "-p".to_string(),
                path_arg(&config.prefix),
                "-m".to_string(),
                config.min_len.to_string(),
                "-q".to_string(),
                config.min_qual.to_string(),
            ],
        )
    }

    /// Reads a pileup on stdin; writes `<prefix>.fa` and `<prefix>.qual.txt`.
    pub fn consensus(config: &IvarConsensusConfig) -> ToolCommand {
        ToolCommand::new(
            IVAR_TAG,
            vec![
                IvarSubcommand::Consensus.as_str().to_string(),
                "-t".to_string(),
                config.freq_threshold.to_string(),
                "-m".to_string(),
                config.min_depth.to_string(),
                "-n".to_string(),
                "N".to_string(),
                "-p".to_string(),
                path_arg(&config.prefix),
            ],
        )
    }

    /// Reads a pileup on stdin; writes `<prefix>.tsv`.
    pub fn variants(config: &IvarVariantsConfig) -> ToolCommand {
        ToolCommand::new(
            IVAR_TAG,
            vec![
                IvarSubcommand::Variants.as_str().to_string(),
                "-p".to_string(),
                path_arg(&config.prefix),
                "-t".to_string(),
                config.freq_threshold.to_string(),
                "-m".to_string(),
                config.min_depth.to_string(),
                "-q".to_string(),
                config.min_quality.to_string(),
                "-r".to_string(),
                path_arg(&config.reference),
                "-g".to_string(),
                path_arg(&config.feature_coords),
            ],
        )
    }
}


pub mod bedtools {
    use std::path::Path;
    use crate::config::defs::BEDTOOLS_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    /// Per-base depth, one line per reference position.
    pub fn genomecov(bam: &Path, depth_out: &Path) -> ToolCommand {
        ToolCommand::new(
            BEDTOOLS_TAG,
            vec!["genomecov".to_string(), "-d".to_string(), "-ibam".to_string(), path_arg(bam)],
        )
        .stdout_to(depth_out.to_path_buf())
    }
}


pub mod kraken2 {
    use std::path::{Path, PathBuf};
    use crate::config::defs::KRAKEN2_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    #[derive(Debug, Clone)]
    pub struct Kraken2Config {
        pub db: PathBuf,
        pub threads: usize,
        pub confidence: f64,
        pub output: PathBuf,
        pub report: PathBuf,
    }

    pub fn arg_generator(config: &Kraken2Config, r1: &Path, r2: &Path) -> Vec<String> {
        vec![
            "--db".to_string(),
            path_arg(&config.db),
            "--threads".to_string(),
            config.threads.to_string(),
            "--confidence".to_string(),
            config.confidence.to_string(),
            "--paired".to_string(),
            "--gzip-compressed".to_string(),
            "--output".to_string(),
            path_arg(&config.output),
            "--report".to_string(),
            path_arg(&config.report),
            path_arg(r1),
            path_arg(r2),
        ]
    }

    pub fn command(config: &Kraken2Config, r1: &Path, r2: &Path) -> ToolCommand {
        ToolCommand::new(KRAKEN2_TAG, arg_generator(config, r1, r2))
    }
}


pub mod quast {
    use std::path::{Path, PathBuf};
    use crate::config::defs::QUAST_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    #[derive(Debug, Clone)]
    pub struct QuastConfig {
        pub reference: PathBuf,
        pub feature_coords: PathBuf,
        pub threads: usize,
        pub output_dir: PathBuf,
    }

    pub fn command(config: &QuastConfig, consensus: &Path) -> ToolCommand {
        ToolCommand::new(
            QUAST_TAG,
            vec![
                "--threads".to_string(),
                config.threads.to_string(),
                "-r".to_string(),
                path_arg(&config.reference),
                "-g".to_string(),
                path_arg(&config.feature_coords),
                "-o".to_string(),
                path_arg(&config.output_dir),
                path_arg(consensus),
            ],
        )
    }
}


pub mod breseq {
    use std::path::{Path, PathBuf};
    use crate::config::defs::BRESEQ_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    #[derive(Debug, Clone)]
    pub struct BreseqConfig {
        pub reference: PathBuf,
        pub threads: usize,
        pub output_dir: PathBuf,
    }

    pub fn command(config: &BreseqConfig, r1: &Path, r2: &Path) -> ToolCommand {
        ToolCommand::new(
            BRESEQ_TAG,
            vec![
                "--reference".to_string(),
                path_arg(&config.reference),
                "--num-processors".to_string(),
                config.threads.to_string(),
                "--polymorphism-prediction".to_string(),
                "--output".to_string(),
                path_arg(&config.output_dir),
                path_arg(r1),
                path_arg(r2),
            ],
        )
    }
}


pub mod fastqc {
    use std::path::{Path, PathBuf};
    use crate::config::defs::FASTQC_TAG;
    use crate::pipelines::stage::ToolCommand;
    use super::path_arg;

    pub fn command(threads: usize, output_dir: &Path, reads: &[PathBuf]) -> ToolCommand {
        let mut args_vec = vec![
            "-t".to_string(),
            threads.to_string(),
            "-o".to_string(),
            path_arg(output_dir),
        ];
        args_vec.extend(reads.iter().map(|r| path_arg(r)));
        ToolCommand::new(FASTQC_TAG, args_vec)
    }
}


/// Argument that makes each tool print its version and exit.
fn version_args(tool: &str) -> Vec<&'static str> {
    match tool {
        BWA_TAG => vec![], // bare `bwa` prints usage and version to stderr
        IVAR_TAG => vec!["version"],
        _ => vec!["--version"],
    }
}


/// Pulls the first `major.minor` looking token out of a version banner.
pub fn parse_version(text: &str) -> Option<(u32, u32)> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
        .map(|token| token.trim_start_matches('v'))
        .find_map(|token| {
            let mut parts = token.split(['.', '-', 'r']);
            let major = parts.next()?.parse::<u32>().ok()?;
            let minor = parts.next()?.parse::<u32>().ok()?;
            Some((major, minor))
        })
}


/// Confirms a tool can be launched and returns the line of its banner that carries a version.
pub async fn check_version(tool: &str) -> Result<String, PipelineError> {
    let output = Command::new(tool)
        .args(version_args(tool))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|_| PipelineError::ToolNotFound(tool.to_string()))?;

    // Some tools print their banner to stderr, and some exit nonzero doing it
    let banner = String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
        .find(|l| parse_version(l).is_some())
        .map(str::to_string)
        .unwrap_or_default();
    Ok(banner)
}


/// Checks every tool in the list, failing on the first one that cannot be launched.
/// Versions below the known minimum only produce a warning.
pub async fn check_versions(tools: Vec<&str>) -> Result<(), PipelineError> {
    for tool in tools {
        let banner = check_version(tool).await?;
        match (parse_version(&banner), TOOL_VERSIONS.get(tool)) {
            (Some(found), Some(&minimum)) if found < minimum => {
                warn!(
                    "{} reports version {}.{}; {}.{} or newer is expected",
                    tool, found.0, found.1, minimum.0, minimum.1
                );
            }
            (Some(found), _) => info!("{} version {}.{}", tool, found.0, found.1),
            (None, _) => debug!("{} is present but did not report a version", tool),
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use crate::config::defs::SamtoolsSubcommand;

    #[test]
    fn test_samtools_args_keep_order() {
        let config = samtools::SamtoolsConfig::new(SamtoolsSubcommand::Mpileup)
            .flag("-aa")
            .flag("-A")
            .option("-d", 1000)
            .option("-Q", 0)
            .operand(Path::new("/r/s1.bam"));
        assert_eq!(
            samtools::arg_generator(&config),
            vec!["mpileup", "-aa", "-A", "-d", "1000", "-Q", "0", "/r/s1.bam"]
        );
    }

    #[test]
    fn test_ivar_consensus_thresholds() {
        let cmd = ivar::consensus(&ivar::IvarConsensusConfig {
            freq_threshold: 0.75,
            min_depth: 10,
            prefix: PathBuf::from("/r/s1/core/s1.consensus"),
        });
        assert_eq!(cmd.program, IVAR_TAG);
        assert_eq!(cmd.args, vec!["consensus", "-t", "0.75", "-m", "10", "-n", "N", "-p", "/r/s1/core/s1.consensus"]);
    }

    #[test]
    fn test_trim_galore_thresholds() {
        let config = trim_galore::TrimGaloreConfig {
            min_qual: 25,
            min_len: 30,
            cores: 2,
            basename: "s1".to_string(),
            output_dir: PathBuf::from("/r/s1/adapter_trimmed"),
        };
        let args = trim_galore::arg_generator(&config, Path::new("a.fq.gz"), Path::new("b.fq.gz"));
        let pos = args.iter().position(|a| a == "--quality").unwrap();
        assert_eq!(args[pos + 1], "25");
        let pos = args.iter().position(|a| a == "--length").unwrap();
        assert_eq!(args[pos + 1], "30");
        assert_eq!(args.last().unwrap(), "b.fq.gz");
    }

    #[test]
    fn test_genomecov_redirects_stdout() {
        let cmd = bedtools::genomecov(Path::new("in.bam"), Path::new("depth.txt"));
        assert_eq!(cmd.stdout, Some(PathBuf::from("depth.txt")));
    }

    #[test]
    fn test_version_args_per_tool() {
        use crate::config::defs::{KRAKEN2_TAG, SAMTOOLS_TAG, TRIM_GALORE_TAG};
        assert!(version_args(BWA_TAG).is_empty());
        assert_eq!(version_args(IVAR_TAG), vec!["version"]);
        for tool in [SAMTOOLS_TAG, TRIM_GALORE_TAG, KRAKEN2_TAG, "bedtools"] {
            assert_eq!(version_args(tool), vec!["--version"], "{}", tool);
        }
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("samtools 1.17"), Some((1, 17)));
        assert_eq!(parse_version("Version: 0.7.17-r1188"), Some((0, 7)));
        assert_eq!(parse_version("iVar version 1.3.1"), Some((1, 3)));
        assert_eq!(parse_version("FastQC v0.11.9"), Some((0, 11)));
        assert_eq!(parse_version("no digits here"), None);
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let err = check_version("definitely-not-a-real-tool-xyz").await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotFound(_)));
    }
}
