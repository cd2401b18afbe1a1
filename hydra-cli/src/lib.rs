// Hydra CLI
// Shared pieces of the `hydra` and `hydra-pipeline` binaries

pub mod commands;
pub mod error;
pub mod logging;
pub mod output;

pub use error::CliError;
