pub mod stage;
pub mod graph;
pub mod executor;
pub mod consensus_genome;
pub mod postprocess;
