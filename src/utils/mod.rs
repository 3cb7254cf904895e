pub mod command;
pub mod file;
pub mod manifest;
pub mod process;
pub mod system;
pub mod targets;
