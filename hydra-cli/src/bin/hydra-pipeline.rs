use clap::Parser;
use color_eyre::Result;

use hydra_cli::commands::pipeline::{self, PipelineArgs};
use hydra_cli::output;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = PipelineArgs::parse();
    if let Err(e) = pipeline::execute(args).await {
        output::error(&e.to_string());
        std::process::exit(e.exit_code());
    }
    Ok(())
}
