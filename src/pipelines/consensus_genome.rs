// src/pipelines/consensus_genome.rs: SARS-CoV-2 consensus genome rule set

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::defs::*;
use crate::pipelines::executor::{execute, ExecutionOptions, RunSummary};
use crate::pipelines::graph::StageGraph;
use crate::pipelines::stage::{Goal, Stage, ToolCommand};
use crate::utils::command::bwa::{self, BwaMemConfig};
use crate::utils::command::ivar::{self, IvarConsensusConfig, IvarTrimConfig, IvarVariantsConfig};
use crate::utils::command::kraken2::{self, Kraken2Config};
use crate::utils::command::quast::{self, QuastConfig};
use crate::utils::command::breseq::{self, BreseqConfig};
use crate::utils::command::samtools::{self, SamtoolsConfig};
use crate::utils::command::trim_galore::{self, TrimGaloreConfig};
use crate::utils::command::{bedtools, check_versions, fastqc};
use crate::utils::targets::{expand_targets, Mate, PathTemplate};


/// Every goal name, in the order `all` lists them.
pub const GOALS: &[&str] = &[
    "combine_raw_reads",
    "host_removed_reads",
    "adapter_trimming",
    "sort",
    "consensus",
    "variant_calling",
    "coverage",
    "kraken2",
    "quast",
    "breseq",
    "fastqc",
];


/// Rendered per-sample output paths, all absolute under the result directory.
struct SamplePaths {
    sample: String,
    root: PathBuf,
    combined: [PathBuf; 2],
    host_removed_bam: PathBuf,
    host_removed: [PathBuf; 2],
    adapter_trimmed_dir: PathBuf,
    adapter_trimmed: [PathBuf; 2],
    viral_bam: PathBuf,
    primer_trimmed_prefix: PathBuf,
    primer_trimmed_bam: PathBuf,
    sorted_bam: PathBuf,
    sorted_bam_index: PathBuf,
    consensus_prefix: PathBuf,
    consensus_fasta: PathBuf,
    variants_prefix: PathBuf,
    variants_tsv: PathBuf,
    flagstat: PathBuf,
    depth: PathBuf,
    kraken2_out: PathBuf,
    kraken2_report: PathBuf,
    quast_dir: PathBuf,
    quast_report: PathBuf,
    breseq_dir: PathBuf,
    breseq_index: PathBuf,
    raw_fastqc_dir: PathBuf,
    raw_fastqc: [PathBuf; 2],
    trimmed_fastqc_dir: PathBuf,
    trimmed_fastqc: [PathBuf; 2],
    benchmark_dir: PathBuf,
    log_dir: PathBuf,
}

impl SamplePaths {
    fn new(result_dir: &Path, sample: &str) -> Result<Self, PipelineError> {
        let one = |pattern: &str| -> Result<PathBuf, PipelineError> {
            Ok(result_dir.join(PathTemplate::new(pattern)?.render(Some(sample), None)?))
        };
        let pair = |pattern: &str| -> Result<[PathBuf; 2], PipelineError> {
            let template = PathTemplate::new(pattern)?;
            Ok([
                result_dir.join(template.render(Some(sample), Some(Mate::R1))?),
                result_dir.join(template.render(Some(sample), Some(Mate::R2))?),
            ])
        };

        Ok(SamplePaths {
            sample: sample.to_string(),
            root: result_dir.join(sample),
            combined: pair(COMBINED_READS)?,
            host_removed_bam: one(HOST_REMOVED_BAM)?,
            host_removed: pair(HOST_REMOVED_READS)?,
            adapter_trimmed_dir: one(ADAPTER_TRIMMED_DIR)?,
            adapter_trimmed: pair(ADAPTER_TRIMMED_READS)?,
            viral_bam: one(VIRAL_BAM)?,
            primer_trimmed_prefix: one(PRIMER_TRIMMED_PREFIX)?,
            primer_trimmed_bam: one(PRIMER_TRIMMED_BAM)?,
            sorted_bam: one(SORTED_BAM)?,
            sorted_bam_index: one(SORTED_BAM_INDEX)?,
            consensus_prefix: one(CONSENSUS_PREFIX)?,
            consensus_fasta: one(CONSENSUS_FASTA)?,
            variants_prefix: one(VARIANTS_PREFIX)?,
            variants_tsv: one(VARIANTS_TSV)?,
            flagstat: one(FLAGSTAT_TXT)?,
            depth: one(COVERAGE_DEPTH)?,
            kraken2_out: one(KRAKEN2_OUT)?,
            kraken2_report: one(KRAKEN2_REPORT)?,
            quast_dir: one(QUAST_DIR)?,
            quast_report: one(QUAST_REPORT)?,
            breseq_dir: one(BRESEQ_DIR)?,
            breseq_index: one(BRESEQ_INDEX)?,
            raw_fastqc_dir: one(RAW_FASTQC_DIR)?,
            raw_fastqc: pair(RAW_FASTQC_REPORT)?,
            trimmed_fastqc_dir: one(TRIMMED_FASTQC_DIR)?,
            trimmed_fastqc: pair(TRIMMED_FASTQC_REPORT)?,
            benchmark_dir: one(BENCHMARK_DIR)?,
            log_dir: one(LOG_DIR)?,
        })
    }

    fn log(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", name))
    }

    fn benchmark(&self, name: &str) -> PathBuf {
        self.benchmark_dir.join(format!("{}.benchmark.tsv", name))
    }

    /// Stage with the sample's log and benchmark files attached.
    fn stage(&self, rule: &str) -> Stage {
        Stage::new(rule)
            .sample(&self.sample)
            .log(self.log(rule))
            .benchmark(self.benchmark(rule))
    }
}


fn samtools_cmd(config: SamtoolsConfig) -> ToolCommand {
    samtools::command(&config)
}

fn bwa_index_files(prefix: &Path) -> Vec<PathBuf> {
    BWA_INDEX_EXTS
        .iter()
        .map(|ext| PathBuf::from(format!("{}.{}", prefix.display(), ext)))
        .collect()
}


/// Builds the complete stage graph for every sample in the manifest.
///
/// # Arguments
///
/// * `run_config` - Validated configuration, manifest and result directory.
///
/// # Returns
/// StageGraph with all stages and the named goals.
pub fn build_graph(run_config: &RunConfig) -> Result<StageGraph, PipelineError> {
    let config = &run_config.config;
    let result_dir = &run_config.result_dir;
    let threads = config.threads.capped(run_config.max_cores);

    let viral_index_prefix = result_dir.join(VIRAL_INDEX_PREFIX);
    let viral_index_files = bwa_index_files(&viral_index_prefix);
    let human_index_files = bwa_index_files(&config.human_reference_index);
    let kraken2_db_files: Vec<PathBuf> = KRAKEN2_DB_FILES.iter().map(|f| config.kraken2_db.join(f)).collect();

    let mut stages = Vec::new();

    let mut index_stage = Stage::new("viral_reference_bwa_build")
        .input(&config.viral_reference_genome)
        .command(bwa::index(&config.viral_reference_genome, &viral_index_prefix))
        .priority(10)
        .log(result_dir.join(SHARED_LOG_DIR).join("viral_reference_bwa_build.log"))
        .benchmark(result_dir.join(SHARED_BENCHMARK_DIR).join("viral_reference_bwa_build.benchmark.tsv"));
    for file in &viral_index_files {
        index_stage = index_stage.output(file);
    }
    stages.push(index_stage);

    for sample in run_config.manifest.samples() {
        let p = SamplePaths::new(result_dir, &sample.id)?;

        for mate in Mate::BOTH {
            let name = format!("combine_raw_reads_R{}", mate);
            let combined = &p.combined[mate as usize];
            stages.push(
                Stage::new("combine_raw_reads")
                    .sample(&sample.id)
                    .mate(mate)
                    .inputs(sample.reads(mate))
                    .output(combined)
                    .command(
                        ToolCommand::new(
                            CAT_TAG,
                            sample.reads(mate).iter().map(|r| r.to_string_lossy().to_string()).collect(),
                        )
                        .stdout_to(combined.clone()),
                    )
                    .log(p.log(&name))
                    .benchmark(p.benchmark(&name)),
            );
        }

        stages.push(
            p.stage("raw_reads_fastqc")
                .inputs(&p.combined)
                .output(&p.raw_fastqc[0])
                .output(&p.raw_fastqc[1])
                .command(fastqc::command(threads.fastqc, &p.raw_fastqc_dir, &p.combined))
                .threads(threads.fastqc)
                .priority(-5)
                .environment("qc"),
        );

        let host_mem = BwaMemConfig {
            index_prefix: config.human_reference_index.clone(),
            threads: threads.alignment,
        };
        stages.push(
            p.stage("host_removal")
                .inputs(&p.combined)
                .inputs(&human_index_files)
                .output(&p.host_removed_bam)
                .pipe(vec![
                    bwa::mem(&host_mem, &p.combined[0], &p.combined[1]),
                    samtools_cmd(
                        SamtoolsConfig::new(SamtoolsSubcommand::View)
                            .flag("-b")
                            .option("-f", 12)
                            .option("-F", 256)
                            .option("-o", p.host_removed_bam.display())
                            .flag("-"),
                    ),
                ])
                .threads(threads.alignment)
                .environment("alignment"),
        );

        stages.push(
            p.stage("host_removed_reads")
                .input(&p.host_removed_bam)
                .output(&p.host_removed[0])
                .output(&p.host_removed[1])
                .command(samtools_cmd(
                    SamtoolsConfig::new(SamtoolsSubcommand::Fastq)
                        .option("-1", p.host_removed[0].display())
                        .option("-2", p.host_removed[1].display())
                        .option("-0", "/dev/null")
                        .option("-s", "/dev/null")
                        .flag("-n")
                        .operand(&p.host_removed_bam),
                ))
                .environment("alignment"),
        );

        let trim_config = TrimGaloreConfig {
            min_qual: config.min_qual,
            min_len: config.min_len,
            cores: threads.trimming,
            basename: sample.id.clone(),
            output_dir: p.adapter_trimmed_dir.clone(),
        };
        stages.push(
            p.stage("adapter_trimming")
                .inputs(&p.host_removed)
                .output(&p.adapter_trimmed[0])
                .output(&p.adapter_trimmed[1])
                .command(trim_galore::command(&trim_config, &p.host_removed[0], &p.host_removed[1]))
                .threads(threads.trimming)
                .environment("trimming"),
        );

        stages.push(
            p.stage("trimmed_reads_fastqc")
                .inputs(&p.adapter_trimmed)
                .output(&p.trimmed_fastqc[0])
                .output(&p.trimmed_fastqc[1])
                .command(fastqc::command(threads.fastqc, &p.trimmed_fastqc_dir, &p.adapter_trimmed))
                .threads(threads.fastqc)
                .priority(-5)
                .environment("qc"),
        );

        let viral_mem = BwaMemConfig {
            index_prefix: viral_index_prefix.clone(),
            threads: threads.alignment,
        };
        stages.push(
            p.stage("viral_reference_mapping")
                .inputs(&p.adapter_trimmed)
                .inputs(&viral_index_files)
                .output(&p.viral_bam)
                .pipe(vec![
                    bwa::mem(&viral_mem, &p.adapter_trimmed[0], &p.adapter_trimmed[1]),
                    samtools_cmd(
                        SamtoolsConfig::new(SamtoolsSubcommand::View)
                            .flag("-bS")
                            .option("-F", 4)
                            .option("-o", p.viral_bam.display())
                            .flag("-"),
                    ),
                ])
                .threads(threads.alignment)
                .priority(5)
                .environment("alignment"),
        );

        let ivar_trim = IvarTrimConfig {
            primer_bed: config.primer_scheme_bed.clone(),
            min_len: config.min_len,
            min_qual: config.min_qual,
            prefix: p.primer_trimmed_prefix.clone(),
        };
        stages.push(
            p.stage("primer_trimming")
                .input(&p.viral_bam)
                .input(&config.primer_scheme_bed)
                .output(&p.primer_trimmed_bam)
                .command(ivar::trim(&ivar_trim, &p.viral_bam))
                .priority(5)
                .environment("ivar"),
        );

        stages.push(
            p.stage("primer_trimmed_sort")
                .input(&p.primer_trimmed_bam)
                .output(&p.sorted_bam)
                .command(samtools_cmd(
                    SamtoolsConfig::new(SamtoolsSubcommand::Sort)
                        .option("-o", p.sorted_bam.display())
                        .operand(&p.primer_trimmed_bam),
                ))
                .priority(5)
                .environment("alignment"),
        );

        stages.push(
            p.stage("primer_trimmed_index")
                .input(&p.sorted_bam)
                .output(&p.sorted_bam_index)
                .command(samtools_cmd(SamtoolsConfig::new(SamtoolsSubcommand::Index).operand(&p.sorted_bam)))
                .priority(5)
                .environment("alignment"),
        );

        let consensus_config = IvarConsensusConfig {
            freq_threshold: config.ivar_consensus_freq_threshold,
            min_depth: config.ivar_min_coverage_depth,
            prefix: p.consensus_prefix.clone(),
        };
        stages.push(
            p.stage("consensus")
                .input(&p.sorted_bam)
                .input(&p.sorted_bam_index)
                .output(&p.consensus_fasta)
                .pipe(vec![
                    samtools_cmd(
                        SamtoolsConfig::new(SamtoolsSubcommand::Mpileup)
                            .flag("-aa")
                            .flag("-A")
                            .option("-d", config.mpileup_depth)
                            .option("-Q", 0)
                            .operand(&p.sorted_bam),
                    ),
                    ivar::consensus(&consensus_config),
                ])
                .priority(10)
                .environment("ivar"),
        );

        let variants_config = IvarVariantsConfig {
            freq_threshold: config.ivar_variant_freq_threshold,
            min_depth: config.ivar_min_coverage_depth,
            min_quality: config.ivar_min_variant_quality,
            reference: config.viral_reference_genome.clone(),
            feature_coords: config.viral_reference_feature_coords.clone(),
            prefix: p.variants_prefix.clone(),
        };
        stages.push(
            p.stage("variant_calling")
                .input(&p.sorted_bam)
                .input(&p.sorted_bam_index)
                .input(&config.viral_reference_genome)
                .input(&config.viral_reference_feature_coords)
                .output(&p.variants_tsv)
                .pipe(vec![
                    samtools_cmd(
                        SamtoolsConfig::new(SamtoolsSubcommand::Mpileup)
                            .flag("-aa")
                            .flag("-A")
                            .option("-d", 0)
                            .option("--reference", config.viral_reference_genome.display())
                            .flag("-B")
                            .option("-Q", 0)
                            .operand(&p.sorted_bam),
                    ),
                    ivar::variants(&variants_config),
                ])
                .priority(5)
                .environment("ivar"),
        );

        stages.push(
            p.stage("coverage")
                .input(&p.sorted_bam)
                .output(&p.depth)
                .command(bedtools::genomecov(&p.sorted_bam, &p.depth))
                .environment("alignment"),
        );

        stages.push(
            p.stage("flagstat")
                .input(&p.sorted_bam)
                .output(&p.flagstat)
                .command(
                    samtools_cmd(SamtoolsConfig::new(SamtoolsSubcommand::Flagstat).operand(&p.sorted_bam))
                        .stdout_to(p.flagstat.clone()),
                )
                .environment("alignment"),
        );

        let kraken_config = Kraken2Config {
            db: config.kraken2_db.clone(),
            threads: threads.kraken2,
            confidence: config.kraken2_confidence,
            output: p.kraken2_out.clone(),
            report: p.kraken2_report.clone(),
        };
        stages.push(
            p.stage("kraken2")
                .inputs(&p.adapter_trimmed)
                .inputs(&kraken2_db_files)
                .output(&p.kraken2_out)
                .output(&p.kraken2_report)
                .command(kraken2::command(&kraken_config, &p.adapter_trimmed[0], &p.adapter_trimmed[1]))
                .threads(threads.kraken2)
                .environment("kraken2"),
        );

        let quast_config = QuastConfig {
            reference: config.viral_reference_genome.clone(),
            feature_coords: config.viral_reference_feature_coords.clone(),
            threads: threads.quast,
            output_dir: p.quast_dir.clone(),
        };
        stages.push(
            p.stage("quast")
                .input(&p.consensus_fasta)
                .output(&p.quast_report)
                .command(quast::command(&quast_config, &p.consensus_fasta))
                .threads(threads.quast)
                .environment("quast"),
        );

        if config.run_breseq {
            let breseq_config = BreseqConfig {
                reference: config.breseq_reference.clone(),
                threads: threads.breseq,
                output_dir: p.breseq_dir.clone(),
            };
            stages.push(
                p.stage("breseq")
                    .inputs(&p.adapter_trimmed)
                    .input(&config.breseq_reference)
                    .output(&p.breseq_index)
                    .command(breseq::command(&breseq_config, &p.adapter_trimmed[0], &p.adapter_trimmed[1]))
                    .threads(threads.breseq)
                    .priority(-10)
                    .environment("breseq"),
            );
        }

        debug!("Declared stages for sample {} under {}", sample.id, p.root.display());
    }

    let goals = build_goals(run_config)?;
    StageGraph::build(stages, goals)
}


/// Output templates that make up each goal.
fn goal_templates(name: &str) -> &'static [&'static str] {
    match name {
        "combine_raw_reads" => &[COMBINED_READS],
        "host_removed_reads" => &[HOST_REMOVED_READS],
        "adapter_trimming" => &[ADAPTER_TRIMMED_READS],
        "sort" => &[SORTED_BAM, SORTED_BAM_INDEX],
        "consensus" => &[CONSENSUS_FASTA],
        "variant_calling" => &[VARIANTS_TSV],
        "coverage" => &[COVERAGE_DEPTH, FLAGSTAT_TXT],
        "kraken2" => &[KRAKEN2_REPORT],
        "quast" => &[QUAST_REPORT],
        "breseq" => &[BRESEQ_INDEX],
        "fastqc" => &[RAW_FASTQC_REPORT, TRIMMED_FASTQC_REPORT],
        _ => &[],
    }
}


fn build_goals(run_config: &RunConfig) -> Result<Vec<Goal>, PipelineError> {
    let samples = run_config.manifest.sample_ids();
    let mut goals = Vec::new();
    let mut all_templates = Vec::new();

    for &name in GOALS {
        if name == "breseq" && !run_config.config.run_breseq {
            continue;
        }
        let templates = goal_templates(name)
            .iter()
            .map(|pattern| PathTemplate::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        let targets = expand_targets(&templates, &samples)
            .into_iter()
            .map(|t| run_config.result_dir.join(t))
            .collect();
        goals.push(Goal::new(name, targets));
        all_templates.extend(templates);
    }

    let all_targets = expand_targets(&all_templates, &samples)
        .into_iter()
        .map(|t| run_config.result_dir.join(t))
        .collect();
    goals.push(Goal::new("all", all_targets));
    Ok(goals)
}


/// Builds the graph, checks the tools the requested goals need, and runs them.
///
/// # Arguments
///
/// * `run_config` - Run context.
/// * `options` - Core budget and execution switches.
/// * `goal_names` - Goals to bring up to date (`all` for everything).
///
/// # Returns
/// RunSummary when every required stage succeeded (or was up to date);
/// PipelineError::StagesFailed otherwise.
pub async fn run(
    run_config: Arc<RunConfig>,
    options: &ExecutionOptions,
    goal_names: &[String],
) -> Result<RunSummary, PipelineError> {
    println!("\n-------------\n Consensus Genome\n-------------\n");

    let graph = build_graph(&run_config)?;
    info!(
        "Built {} stage(s) for {} sample(s) from {}; goals: {}",
        graph.len(),
        run_config.manifest.len(),
        run_config.manifest.path().display(),
        graph.goal_names().join(", ")
    );

    if goal_names.iter().any(|g| g == "breseq") && !run_config.config.run_breseq {
        warn!("Goal breseq requested but run_breseq is false in the configuration");
    }
    let targets = graph.goal_targets(goal_names)?;

    if !options.dry_run {
        let required = graph.required_for(&targets)?;
        let mut tools: Vec<&str> = required
            .iter()
            .flat_map(|&idx| graph.stage(idx).invocation.programs())
            .filter(|&program| program != CAT_TAG)
            .collect();
        tools.sort_unstable();
        tools.dedup();
        check_versions(tools).await?;
    }

    let summary = execute(&graph, &targets, options).await?;

    if options.dry_run {
        info!("Dry run: {} stage(s) would run, {} up to date", summary.planned.len(), summary.up_to_date.len());
        return Ok(summary);
    }
    if !summary.is_success() {
        if !summary.unreachable.is_empty() {
            warn!("Not run because an upstream stage failed: {}", summary.unreachable.join(", "));
        }
        if !summary.cancelled.is_empty() {
            warn!("Cancelled: {}", summary.cancelled.join(", "));
        }
        return Err(PipelineError::StagesFailed { failed: summary.failed });
    }
    Ok(summary)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::pipeline::PipelineConfig;
    use crate::utils::manifest::SampleManifest;
    use std::path::Path;

    fn run_config(run_breseq: bool) -> RunConfig {
        run_config_with_cores(run_breseq, 4)
    }

    fn run_config_with_cores(run_breseq: bool, max_cores: usize) -> RunConfig {
        let toml = format!(
            r#"
            samples = "samples.csv"
            result_dir = "results"
            human_reference_index = "refs/human"
            viral_reference_genome = "refs/MN908947.3.fa"
            viral_reference_feature_coords = "refs/MN908947.3.gff3"
            primer_scheme_bed = "refs/primers.bed"
            kraken2_db = "refs/kraken2"
            breseq_reference = "refs/MN908947.3.gbk"
            run_breseq = {}
            "#,
            run_breseq
        );
        let base = Path::new("/data");
        let config = PipelineConfig::from_toml_str(&toml, base).unwrap();
        let csv = "sample,r1_path,r2_path\n\
                   s2,reads/s2_R1.fastq.gz,reads/s2_R2.fastq.gz\n\
                   s1,reads/s1_a_R1.fastq.gz,reads/s1_a_R2.fastq.gz\n\
                   s1,reads/s1_b_R1.fastq.gz,reads/s1_b_R2.fastq.gz\n";
        let manifest = SampleManifest::from_reader(csv.as_bytes(), Path::new("/data/samples.csv"), base).unwrap();
        RunConfig {
            result_dir: config.result_dir.clone(),
            config,
            manifest,
            max_cores,
        }
    }

    #[test]
    fn test_graph_builds_for_two_samples() {
        let graph = build_graph(&run_config(false)).unwrap();
        // one shared index stage, 17 per-sample stages without breseq
        assert_eq!(graph.len(), 1 + 2 * 17);
        assert!(graph.find("consensus[s1]").is_some());
        assert!(graph.find("combine_raw_reads[s2,R2]").is_some());
        assert!(graph.find("breseq[s1]").is_none());
        assert!(graph.goal("breseq").is_err());
    }

    #[test]
    fn test_goal_targets() {
        let graph = build_graph(&run_config(true)).unwrap();
        let consensus = graph.goal("consensus").unwrap();
        assert_eq!(
            consensus.targets,
            vec![
                PathBuf::from("/data/results/s1/core/s1.consensus.fa"),
                PathBuf::from("/data/results/s2/core/s2.consensus.fa"),
            ]
        );
        assert_eq!(graph.goal("combine_raw_reads").unwrap().targets.len(), 4);
        for name in GOALS.iter().chain(["all"].iter()) {
            assert!(graph.goal(name).is_ok(), "missing goal {}", name);
        }
        assert!(graph.find("breseq[s2]").is_some());
    }

    #[test]
    fn test_consensus_depends_on_the_whole_chain() {
        let graph = build_graph(&run_config(false)).unwrap();
        let targets = graph.goal_targets(&["consensus"]).unwrap();
        let required: Vec<String> = graph
            .required_for(&targets)
            .unwrap()
            .into_iter()
            .map(|idx| graph.stage(idx).id())
            .collect();
        assert_eq!(required.first().map(String::as_str), Some("viral_reference_bwa_build"));
        assert!(required.contains(&"host_removal[s1]".to_string()));
        assert!(required.contains(&"primer_trimmed_index[s2]".to_string()));
        assert!(!required.iter().any(|id| id.starts_with("kraken2")));
        assert_eq!(required.len(), 1 + 2 * 10);
    }

    #[test]
    fn test_combined_reads_keep_row_order() {
        let graph = build_graph(&run_config(false)).unwrap();
        let idx = graph.find("combine_raw_reads[s1,R1]").unwrap();
        let stage = graph.stage(idx);
        assert_eq!(
            stage.inputs,
            vec![
                PathBuf::from("/data/reads/s1_a_R1.fastq.gz"),
                PathBuf::from("/data/reads/s1_b_R1.fastq.gz"),
            ]
        );
        assert_eq!(stage.invocation.commands()[0].stdout, Some(PathBuf::from("/data/results/s1/combined_raw_fastq/s1_R1.fastq.gz")));
    }

    #[test]
    fn test_tool_threads_follow_core_budget() {
        let graph = build_graph(&run_config_with_cores(true, 1)).unwrap();
        for id in ["host_removal[s1]", "kraken2[s1]", "adapter_trimming[s2]", "breseq[s2]", "raw_reads_fastqc[s1]"] {
            let stage = graph.stage(graph.find(id).unwrap());
            assert_eq!(stage.threads, 1, "{}", id);
        }

        let host = graph.stage(graph.find("host_removal[s1]").unwrap());
        let bwa_args = &host.invocation.commands()[0].args;
        let t = bwa_args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(bwa_args[t + 1], "1");

        let kraken = graph.stage(graph.find("kraken2[s1]").unwrap());
        let kraken_args = &kraken.invocation.commands()[0].args;
        let t = kraken_args.iter().position(|a| a == "--threads").unwrap();
        assert_eq!(kraken_args[t + 1], "1");
    }

    #[test]
    fn test_reference_databases_are_declared_inputs() {
        let graph = build_graph(&run_config(false)).unwrap();
        let host = graph.stage(graph.find("host_removal[s2]").unwrap());
        for ext in BWA_INDEX_EXTS {
            assert!(host.inputs.contains(&PathBuf::from(format!("/data/refs/human.{}", ext))));
        }
        let kraken = graph.stage(graph.find("kraken2[s2]").unwrap());
        assert!(kraken.inputs.contains(&PathBuf::from("/data/refs/kraken2/hash.k2d")));

        let targets = graph.goal_targets(&["all"]).unwrap();
        let external = graph.external_inputs(&graph.required_for(&targets).unwrap());
        assert!(external.iter().any(|(path, _)| path == Path::new("/data/refs/human.bwt")));
        assert!(external.iter().any(|(path, _)| path == Path::new("/data/refs/kraken2/taxo.k2d")));
    }
}
