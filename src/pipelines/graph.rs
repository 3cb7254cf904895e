// src/pipelines/graph.rs: explicit stage DAG, built and validated before anything runs

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use fxhash::FxHashSet;
use log::debug;

use crate::config::defs::PipelineError;
use crate::pipelines::stage::{Goal, Stage};


#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
    producers: HashMap<PathBuf, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
    goals: BTreeMap<String, Goal>,
}

impl StageGraph {
    /// Builds the DAG. An edge A -> B exists when B declares an input that A
    /// declares as output. Rejects duplicate stage ids, outputs claimed by two
    /// stages, duplicate goal names and cycles.
    ///
    /// # Arguments
    ///
    /// * `stages` - Every concrete stage of the run.
    /// * `goals` - Named target groups.
    ///
    /// # Returns
    /// Validated StageGraph.
    pub fn build(stages: Vec<Stage>, goals: Vec<Goal>) -> Result<Self, PipelineError> {
        let mut ids = FxHashSet::default();
        for stage in &stages {
            if !ids.insert(stage.id()) {
                return Err(PipelineError::DuplicateStage(stage.id()));
            }
        }

        let mut producers: HashMap<PathBuf, usize> = HashMap::new();
        for (idx, stage) in stages.iter().enumerate() {
            for output in &stage.outputs {
                if let Some(&first) = producers.get(output) {
                    return Err(PipelineError::AmbiguousProducer {
                        path: output.clone(),
                        first: stages[first].id(),
                        second: stage.id(),
                    });
                }
                producers.insert(output.clone(), idx);
            }
        }

        let mut dependencies = vec![Vec::new(); stages.len()];
        let mut dependents = vec![Vec::new(); stages.len()];
        for (idx, stage) in stages.iter().enumerate() {
            for input in &stage.inputs {
                if let Some(&producer) = producers.get(input) {
                    if !dependencies[idx].contains(&producer) {
                        dependencies[idx].push(producer);
                        dependents[producer].push(idx);
                    }
                }
            }
        }

        let order = topological_order(&stages, &dependencies, &dependents)?;

        let mut goal_map = BTreeMap::new();
        for goal in goals {
            if goal_map.contains_key(&goal.name) {
                return Err(PipelineError::DuplicateGoal(goal.name));
            }
            goal_map.insert(goal.name.clone(), goal);
        }

        debug!(
            "Stage graph: {} stages, {} edges, {} goals",
            stages.len(),
            dependencies.iter().map(Vec::len).sum::<usize>(),
            goal_map.len()
        );

        Ok(StageGraph { stages, producers, dependencies, dependents, order, goals: goal_map })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, idx: usize) -> &Stage {
        &self.stages[idx]
    }

    pub fn find(&self, id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.id() == id)
    }

    pub fn producer_of(&self, path: &Path) -> Option<usize> {
        self.producers.get(path).copied()
    }

    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.dependencies[idx]
    }

    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Every stage, producers before consumers. Ties keep declaration order.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    pub fn goal(&self, name: &str) -> Result<&Goal, PipelineError> {
        self.goals.get(name).ok_or_else(|| PipelineError::UnknownGoal(name.to_string()))
    }

    pub fn goal_names(&self) -> Vec<&str> {
        self.goals.keys().map(String::as_str).collect()
    }

    /// Union of the targets of the named goals, first occurrence order.
    pub fn goal_targets<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PathBuf>, PipelineError> {
        let mut seen = FxHashSet::default();
        let mut targets = Vec::new();
        for name in names {
            for target in &self.goal(name.as_ref())?.targets {
                if seen.insert(target.clone()) {
                    targets.push(target.clone());
                }
            }
        }
        Ok(targets)
    }

    /// Stages needed to produce `targets`, in topological order.
    /// A target nobody produces must already exist.
    pub fn required_for(&self, targets: &[PathBuf]) -> Result<Vec<usize>, PipelineError> {
        let mut needed = vec![false; self.stages.len()];
        let mut queue = VecDeque::new();
        for target in targets {
            match self.producer_of(target) {
                Some(idx) => queue.push_back(idx),
                None if target.exists() => {}
                None => {
                    return Err(PipelineError::MissingInput {
                        path: target.clone(),
                        stage: "requested target".to_string(),
                    });
                }
            }
        }
        while let Some(idx) = queue.pop_front() {
            if needed[idx] {
                continue;
            }
            needed[idx] = true;
            queue.extend(self.dependencies[idx].iter().copied());
        }
        Ok(self.order.iter().copied().filter(|&idx| needed[idx]).collect())
    }

    /// Inputs of the given stages that no stage produces, paired with the first stage needing them.
    pub fn external_inputs(&self, subset: &[usize]) -> Vec<(PathBuf, String)> {
        let mut seen = FxHashSet::default();
        let mut external = Vec::new();
        for &idx in subset {
            let stage = &self.stages[idx];
            for input in &stage.inputs {
                if !self.producers.contains_key(input) && seen.insert(input.clone()) {
                    external.push((input.clone(), stage.id()));
                }
            }
        }
        external
    }

    /// All transitive dependents of `idx`, excluding `idx`.
    pub fn descendants(&self, idx: usize) -> Vec<usize> {
        let mut visited = vec![false; self.stages.len()];
        let mut stack: Vec<usize> = self.dependents[idx].clone();
        let mut out = Vec::new();
        while let Some(next) = stack.pop() {
            if visited[next] {
                continue;
            }
            visited[next] = true;
            out.push(next);
            stack.extend(self.dependents[next].iter().copied());
        }
        out.sort_unstable();
        out
    }
}


/// Kahn's algorithm; anything left with unresolved dependencies sits on a cycle.
fn topological_order(
    stages: &[Stage],
    dependencies: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<usize>, PipelineError> {
    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..stages.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(stages.len());

    while let Some(idx) = ready.pop_front() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() != stages.len() {
        let mut cyclic: Vec<String> = (0..stages.len())
            .filter(|&i| remaining[i] > 0)
            .map(|i| stages[i].id())
            .collect();
        cyclic.sort();
        return Err(PipelineError::CycleDetected(cyclic));
    }
    Ok(order)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn stage(rule: &str, sample: &str, inputs: &[&str], outputs: &[&str]) -> Stage {
        let mut stage = Stage::new(rule).sample(sample).inputs(inputs.iter());
        for output in outputs {
            stage = stage.output(output);
        }
        stage
    }

    #[test]
    fn test_edges_follow_file_names() {
        let graph = StageGraph::build(
            vec![
                stage("consensus", "s1", &["/r/s1.bam"], &["/r/s1.fa"]),
                stage("align", "s1", &["/raw/s1.fq"], &["/r/s1.bam"]),
                stage("align", "s2", &["/raw/s2.fq"], &["/r/s2.bam"]),
            ],
            vec![],
        )
        .unwrap();

        let align_s1 = graph.find("align[s1]").unwrap();
        let consensus_s1 = graph.find("consensus[s1]").unwrap();
        assert_eq!(graph.dependencies(consensus_s1), &[align_s1]);
        assert_eq!(graph.dependents(align_s1), &[consensus_s1]);
        assert!(graph.dependents(graph.find("align[s2]").unwrap()).is_empty());

        let order = graph.topological_order();
        let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
        assert!(pos(align_s1) < pos(consensus_s1));
    }

    #[test]
    fn test_ambiguous_producer_is_rejected() {
        let err = StageGraph::build(
            vec![
                stage("align", "s1", &[], &["/r/s1.bam"]),
                stage("realign", "s1", &[], &["/r/s1.bam"]),
            ],
            vec![],
        )
        .unwrap_err();
        match err {
            PipelineError::AmbiguousProducer { path, first, second } => {
                assert_eq!(path, PathBuf::from("/r/s1.bam"));
                assert_eq!(first, "align[s1]");
                assert_eq!(second, "realign[s1]");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = StageGraph::build(
            vec![
                stage("a", "s1", &["/r/b"], &["/r/a"]),
                stage("b", "s1", &["/r/a"], &["/r/b"]),
                stage("c", "s1", &[], &["/r/c"]),
            ],
            vec![],
        )
        .unwrap_err();
        match err {
            PipelineError::CycleDetected(ids) => assert_eq!(ids, vec!["a[s1]", "b[s1]"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let result = StageGraph::build(vec![stage("a", "s1", &["/r/a"], &["/r/a"])], vec![]);
        assert!(matches!(result, Err(PipelineError::CycleDetected(_))));
    }

    #[test]
    fn test_duplicate_stage_and_goal() {
        let dup = StageGraph::build(
            vec![stage("a", "s1", &[], &["/r/1"]), stage("a", "s1", &[], &["/r/2"])],
            vec![],
        );
        assert!(matches!(dup, Err(PipelineError::DuplicateStage(_))));

        let dup_goal = StageGraph::build(
            vec![],
            vec![Goal::new("all", vec![]), Goal::new("all", vec![])],
        );
        assert!(matches!(dup_goal, Err(PipelineError::DuplicateGoal(_))));
    }

    #[test]
    fn test_required_for_walks_ancestors_only() {
        let graph = StageGraph::build(
            vec![
                stage("align", "s1", &["/raw/s1.fq"], &["/r/s1.bam"]),
                stage("consensus", "s1", &["/r/s1.bam"], &["/r/s1.fa"]),
                stage("variants", "s1", &["/r/s1.bam"], &["/r/s1.tsv"]),
                stage("align", "s2", &["/raw/s2.fq"], &["/r/s2.bam"]),
            ],
            vec![Goal::new("consensus", vec![PathBuf::from("/r/s1.fa")])],
        )
        .unwrap();

        let targets = graph.goal_targets(&["consensus"]).unwrap();
        let required: Vec<String> = graph
            .required_for(&targets)
            .unwrap()
            .into_iter()
            .map(|i| graph.stage(i).id())
            .collect();
        assert_eq!(required, vec!["align[s1]", "consensus[s1]"]);

        let external = graph.external_inputs(&graph.required_for(&targets).unwrap());
        assert_eq!(external, vec![(PathBuf::from("/raw/s1.fq"), "align[s1]".to_string())]);

        assert!(matches!(graph.goal("nope"), Err(PipelineError::UnknownGoal(_))));
        assert!(graph.required_for(&[PathBuf::from("/nowhere/x")]).is_err());
    }

    #[test]
    fn test_descendants() {
        let graph = StageGraph::build(
            vec![
                stage("align", "s1", &[], &["/r/s1.bam"]),
                stage("sort", "s1", &["/r/s1.bam"], &["/r/s1.sorted.bam"]),
                stage("consensus", "s1", &["/r/s1.sorted.bam"], &["/r/s1.fa"]),
                stage("align", "s2", &[], &["/r/s2.bam"]),
            ],
            vec![],
        )
        .unwrap();
        let ids: Vec<String> = graph.descendants(0).into_iter().map(|i| graph.stage(i).id()).collect();
        assert_eq!(ids, vec!["sort[s1]", "consensus[s1]"]);
    }
}
