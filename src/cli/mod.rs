pub mod args;

use clap::Parser;

pub use args::{Arguments, Module};

pub fn parse() -> Arguments {
    Arguments::parse()
}
