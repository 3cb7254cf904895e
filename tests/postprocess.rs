use std::fs;

use anyhow::Result;
use tempfile::tempdir;

use covseq_pipelines::config::defs::MISSING_PLACEHOLDER;
use covseq_pipelines::pipelines::postprocess::{run, SUMMARY_HEADER};


#[test]
fn test_summary_has_a_row_per_sample_even_when_outputs_are_missing() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let results = root.join("results");

    fs::write(
        root.join("samples.csv"),
        "sample,r1_path,r2_path\n\
         s2,reads/s2_R1.fastq.gz,reads/s2_R2.fastq.gz\n\
         s1,reads/s1_R1.fastq.gz,reads/s1_R2.fastq.gz\n",
    )?;

    fs::create_dir_all(results.join("s1/core"))?;
    fs::create_dir_all(results.join("s1/kraken2"))?;
    fs::write(results.join("s1/core/s1.consensus.fa"), ">s1\nACGTNNACGT\n")?;
    fs::write(results.join("s1/core/s1_ivar_variants.tsv"), "REGION\tPOS\tREF\tALT\tPASS\nMN908947.3\t241\tC\tT\tTRUE\n")?;
    fs::write(results.join("s1/kraken2/kraken2.report"), "99.00\t990\t990\tS\t2697049\tSARS-CoV-2\n")?;

    let out = run(&root.join("samples.csv"), &results, None)?;
    assert_eq!(out, results.join("summary.csv"));

    let mut reader = csv::Reader::from_path(&out)?;
    let header: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    assert_eq!(header, SUMMARY_HEADER);

    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 2);

    let s1 = &rows[0];
    assert_eq!(&s1[0], "s1");
    assert_eq!(&s1[1], MISSING_PLACEHOLDER);
    assert_eq!(&s1[5], "10");
    assert_eq!(&s1[6], "2");
    assert_eq!(&s1[10], "1");
    assert_eq!(&s1[11], "99.00");
    assert!(!s1[13].contains("consensus"));
    assert!(s1[13].contains("quast"));

    let s2 = &rows[1];
    assert_eq!(&s2[0], "s2");
    assert!(s2.iter().skip(1).take(12).all(|cell| cell == MISSING_PLACEHOLDER));
    assert!(s2[13].contains("consensus"));
    Ok(())
}


#[test]
fn test_explicit_report_path_is_created() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::write(root.join("samples.csv"), "sample,r1_path,r2_path\ns1,a_R1.fq,a_R2.fq\n")?;

    let target = root.join("reports/nested/summary.csv");
    let out = run(&root.join("samples.csv"), root, Some(target.as_path()))?;
    assert_eq!(out, target);
    assert!(target.exists());
    Ok(())
}


#[test]
fn test_bad_manifest_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    fs::write(root.join("samples.csv"), "sample,r1\ns1,a_R1.fq\n")?;
    assert!(run(&root.join("samples.csv"), root, None).is_err());
    Ok(())
}
