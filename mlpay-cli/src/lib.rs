pub mod adapters;
pub mod commands;
pub mod engine;
pub mod worker;

pub use commands::Cli;
pub use commands::run;
