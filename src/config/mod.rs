pub mod defs;
pub mod pipeline;
