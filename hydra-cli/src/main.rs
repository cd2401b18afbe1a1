use clap::error::ErrorKind;
use clap::Parser;
use color_eyre::Result;

use hydra_cli::commands::dispatch::{self, DispatchArgs};
use hydra_cli::{output, CliError};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = match DispatchArgs::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }
        Err(e) => {
            e.print()?;
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch::execute(args).await {
        report(&e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

fn report(e: &CliError) {
    match e {
        CliError::Usage(usage) => eprintln!("{}", usage),
        other => output::error(&other.to_string()),
    }
}
