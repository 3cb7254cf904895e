// src/utils/targets.rs: per-sample path templates and target expansion

use std::fmt;
use std::path::PathBuf;

use fxhash::FxHashSet;

use crate::config::defs::PipelineError;

pub const SAMPLE_PLACEHOLDER: &str = "sample";
pub const MATE_PLACEHOLDER: &str = "mate";


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mate {
    R1,
    R2,
}

impl Mate {
    pub const BOTH: [Mate; 2] = [Mate::R1, Mate::R2];

    pub fn index(self) -> u8 {
        match self {
            Mate::R1 => 1,
            Mate::R2 => 2,
        }
    }
}

impl fmt::Display for Mate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Sample,
    Mate,
}


/// A path pattern with `{sample}` and/or `{mate}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parses a pattern. Any placeholder other than `{sample}`/`{mate}`, or an
    /// unbalanced brace, is rejected.
    pub fn new(pattern: &str) -> Result<Self, PipelineError> {
        let invalid = |reason: &str| PipelineError::InvalidTemplate {
            template: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = pattern;
        while let Some(open) = rest.find(['{', '}']) {
            if rest[open..].starts_with('}') {
                return Err(invalid("unmatched '}'"));
            }
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unterminated placeholder"))?;
            let name = &after[..close];
            let segment = match name {
                SAMPLE_PLACEHOLDER => Segment::Sample,
                MATE_PLACEHOLDER => Segment::Mate,
                other => return Err(invalid(&format!("unknown placeholder '{{{}}}'", other))),
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(PathTemplate { pattern: pattern.to_string(), segments })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn has_sample(&self) -> bool {
        self.segments.contains(&Segment::Sample)
    }

    pub fn has_mate(&self) -> bool {
        self.segments.contains(&Segment::Mate)
    }

    /// Substitutes placeholders. Fails if the template needs a value that was not supplied.
    pub fn render(&self, sample: Option<&str>, mate: Option<Mate>) -> Result<PathBuf, PipelineError> {
        let mut out = String::with_capacity(self.pattern.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Sample => out.push_str(sample.ok_or_else(|| PipelineError::InvalidTemplate {
                    template: self.pattern.clone(),
                    reason: "no sample supplied".to_string(),
                })?),
                Segment::Mate => {
                    let mate = mate.ok_or_else(|| PipelineError::InvalidTemplate {
                        template: self.pattern.clone(),
                        reason: "no mate supplied".to_string(),
                    })?;
                    out.push_str(&mate.to_string());
                }
            }
        }
        Ok(PathBuf::from(out))
    }

    /// Expands the template over every sample (sorted) and, when the template has a
    /// `{mate}` placeholder, over both mates. Duplicates are dropped, first occurrence wins.
    pub fn expand<S: AsRef<str>>(&self, samples: &[S]) -> Vec<PathBuf> {
        let mut sorted: Vec<&str> = samples.iter().map(|s| s.as_ref()).collect();
        sorted.sort_unstable();

        let sample_values: Vec<Option<&str>> = if self.has_sample() {
            sorted.into_iter().map(Some).collect()
        } else {
            vec![None]
        };
        let mate_values: Vec<Option<Mate>> = if self.has_mate() {
            Mate::BOTH.iter().copied().map(Some).collect()
        } else {
            vec![None]
        };

        let mut seen = FxHashSet::default();
        let mut targets = Vec::new();
        for sample in &sample_values {
            for mate in &mate_values {
                // Every placeholder has a value here
                if let Ok(path) = self.render(*sample, *mate) {
                    if seen.insert(path.clone()) {
                        targets.push(path);
                    }
                }
            }
        }
        targets
    }
}


/// Expands several templates into one deduplicated, order-stable target list.
pub fn expand_targets<S: AsRef<str>>(templates: &[PathTemplate], samples: &[S]) -> Vec<PathBuf> {
    let mut seen = FxHashSet::default();
    let mut targets = Vec::new();
    for template in templates {
        for path in template.expand(samples) {
            if seen.insert(path.clone()) {
                targets.push(path);
            }
        }
    }
    targets
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::{COMBINED_READS, CONSENSUS_FASTA};

    #[test]
    fn test_per_mate_template_gives_two_targets_per_sample() {
        let template = PathTemplate::new(COMBINED_READS).unwrap();
        let samples = ["s3", "s1", "s2", "s1"];
        let targets = template.expand(&samples);
        assert_eq!(targets.len(), 6);
        assert_eq!(targets[0], PathBuf::from("s1/combined_raw_fastq/s1_R1.fastq.gz"));
        assert_eq!(targets[1], PathBuf::from("s1/combined_raw_fastq/s1_R2.fastq.gz"));
        assert_eq!(targets[5], PathBuf::from("s3/combined_raw_fastq/s3_R2.fastq.gz"));
        let unique: FxHashSet<_> = targets.iter().collect();
        assert_eq!(unique.len(), targets.len());
    }

    #[test]
    fn test_expansion_is_order_stable() {
        let template = PathTemplate::new(CONSENSUS_FASTA).unwrap();
        let a = template.expand(&["b", "a", "c"]);
        let b = template.expand(&["c", "b", "a"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        assert!(PathTemplate::new("{sample}/{lane}.fq").is_err());
        assert!(PathTemplate::new("{sample/x.fq").is_err());
        assert!(PathTemplate::new("sample}/x.fq").is_err());
    }

    #[test]
    fn test_template_without_placeholders() {
        let template = PathTemplate::new("viral_reference/viral_reference.bwt").unwrap();
        assert!(!template.has_sample());
        assert_eq!(template.expand(&["a", "b"]), vec![PathBuf::from("viral_reference/viral_reference.bwt")]);
    }

    #[test]
    fn test_render_requires_values() {
        let template = PathTemplate::new(COMBINED_READS).unwrap();
        assert!(template.render(Some("s1"), None).is_err());
        assert_eq!(
            template.render(Some("s1"), Some(Mate::R2)).unwrap(),
            PathBuf::from("s1/combined_raw_fastq/s1_R2.fastq.gz")
        );
    }

    #[test]
    fn test_expand_targets_merges_templates() {
        let templates = vec![
            PathTemplate::new(CONSENSUS_FASTA).unwrap(),
            PathTemplate::new(CONSENSUS_FASTA).unwrap(),
            PathTemplate::new(COMBINED_READS).unwrap(),
        ];
        let targets = expand_targets(&templates, &["x", "y"]);
        assert_eq!(targets.len(), 2 + 4);
    }
}
