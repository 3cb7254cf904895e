use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use covseq_pipelines::cli::parse;
use covseq_pipelines::config::defs::{PipelineError, RunConfig};
use covseq_pipelines::config::pipeline::PipelineConfig;
use covseq_pipelines::pipelines::executor::ExecutionOptions;
use covseq_pipelines::pipelines::{consensus_genome, postprocess};
use covseq_pipelines::utils::file::resolve_path;
use covseq_pipelines::utils::manifest::SampleManifest;
use covseq_pipelines::utils::system::detect_cores_and_load;
use covseq_pipelines::{Arguments, Module};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n CovSeq\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}", dir);

    if let Err(e) = match args.module {
        Module::All => all_run(&args, dir).await,
        Module::Postprocess => postprocess_run(&args, &dir),
    } {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn all_run(args: &Arguments, cwd: PathBuf) -> Result<(), PipelineError> {
    let config_path = args
        .config
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidConfig("--config is required for the 'all' module".to_string()))?;
    let mut config = PipelineConfig::from_path(&resolve_path(Path::new(config_path), &cwd))?;

    if let Some(samples) = &args.samples {
        config.samples = resolve_path(Path::new(samples), &cwd);
    }
    if let Some(result_dir) = &args.result_dir {
        config.result_dir = resolve_path(Path::new(result_dir), &cwd);
    }

    let manifest = SampleManifest::from_path(&config.samples)?;

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    debug!("Using {} core(s); CPU load {:.0}%", max_cores, cpu_load);

    let options = ExecutionOptions {
        cores: max_cores,
        keep_going: args.keep_going,
        dry_run: args.dry_run,
    };

    let run_config = Arc::new(RunConfig {
        result_dir: config.result_dir.clone(),
        config,
        manifest,
        max_cores,
    });
    info!("Writing results to {}", run_config.result_dir.display());

    consensus_genome::run(run_config, &options, &args.targets).await?;
    Ok(())
}


fn postprocess_run(args: &Arguments, cwd: &Path) -> Result<(), PipelineError> {
    let samples = args
        .samples
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidConfig("--samples is required for the 'postprocess' module".to_string()))?;
    let result_dir = args
        .result_dir
        .as_ref()
        .map(|d| resolve_path(Path::new(d), cwd))
        .unwrap_or_else(|| cwd.to_path_buf());
    let out_file = args.out_file.as_ref().map(|o| resolve_path(Path::new(o), cwd));

    postprocess::run(&resolve_path(Path::new(samples), cwd), &result_dir, out_file.as_deref())?;
    Ok(())
}
