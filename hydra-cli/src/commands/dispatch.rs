use crate::commands::init_logging;
use crate::error::CliError;
use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::debug;

use hydra_service::runners::process::OutputCallback;
use hydra_service::{
    Backend, CommandExecutor, Dispatcher, DryRunExecutor, EnvForwarder, HydraSettings,
    ProcessExecutor, TargetMode,
};

/// Run a tool command inside the pinned execution image, on this host or on
/// a provisioned runner. Only flags before the command are interpreted;
/// everything from the first positional token on is passed through.
#[derive(Parser, Debug)]
#[command(name = "hydra", version)]
pub struct DispatchArgs {
    /// Run on the runner at this IPv4 address instead of locally
    #[arg(long, value_name = "IPV4")]
    pub execute_on_runner: Option<String>,

    /// Print the commands that would run without running them
    #[arg(long = "dry-run-hydra")]
    pub dry_run: bool,

    /// Cluster backend, forwarded to the command as `--backend NAME`
    #[arg(short = 'b', long, value_name = "NAME")]
    pub backend: Option<String>,

    /// Settings file (default: ./hydra.yaml, then the user config dir)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log format: pretty, compact or json
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Tool command and its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

/// What to run and where, after the command line has been interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tokens: Vec<String>,
    pub backend: Option<Backend>,
    pub target: TargetMode,
}

impl Invocation {
    pub fn from_args(args: &DispatchArgs) -> Result<Self, CliError> {
        if let Some(first) = args.command.first().filter(|t| t.starts_with('-')) {
            return Err(CliError::Usage(format!(
                "unrecognized flag '{}'\n\nUsage: hydra [--execute-on-runner <IPV4>] [--dry-run-hydra] \
                 [-b <NAME>] <COMMAND>...",
                first
            )));
        }

        let target = match &args.execute_on_runner {
            Some(address) => TargetMode::remote(address)?,
            None => TargetMode::Local,
        };

        let mut tokens = Vec::with_capacity(args.command.len() + 2);
        if let Some(backend) = &args.backend {
            tokens.push("--backend".to_string());
            tokens.push(backend.clone());
        }
        tokens.extend(args.command.iter().cloned());

        let backend = match args.backend.clone().or_else(|| captured_backend(&args.command)) {
            Some(name) => Some(name.parse::<Backend>()?),
            None => None,
        };

        Ok(Self {
            tokens,
            backend,
            target,
        })
    }
}

/// Value of the last `-b`/`--backend` inside the pass-through tokens
fn captured_backend(tokens: &[String]) -> Option<String> {
    let mut backend = None;
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        if let Some(value) = token.strip_prefix("--backend=") {
            backend = Some(value.to_string());
        } else if token == "-b" || token == "--backend" {
            if let Some(value) = iter.next() {
                backend = Some(value.clone());
            }
        }
    }
    backend
}

pub async fn execute(args: DispatchArgs) -> Result<(), CliError> {
    let invocation = Invocation::from_args(&args)?;
    let settings = HydraSettings::load(args.config.as_deref())?;
    init_logging(&settings, args.log_format.as_deref())?;

    let executor: Arc<dyn CommandExecutor> = if args.dry_run {
        Arc::new(DryRunExecutor::new())
    } else {
        let stream: OutputCallback = Arc::new(|line: &str, is_error: bool| {
            if is_error {
                output::step_error(line);
            } else {
                output::step_output(line);
            }
        });
        Arc::new(ProcessExecutor::new().with_output_callback(stream))
    };

    let forwarder = EnvForwarder::from_process_env(&settings.forwarded_env_prefixes);
    let workspace = std::env::current_dir()?;
    let mut dispatcher = Dispatcher::new(settings, forwarder, workspace, executor);
    if let Some(backend) = invocation.backend {
        dispatcher = dispatcher.with_backend(backend);
    }

    let command = dispatcher.tool_command(invocation.tokens);
    debug!(backend = ?invocation.backend, dry_run = args.dry_run, "command line interpreted");
    output::status("Dispatching", &format!("{} ({})", command, invocation.target));
    dispatcher.dispatch(&command, invocation.target, None).await?;
    Ok(())
}
