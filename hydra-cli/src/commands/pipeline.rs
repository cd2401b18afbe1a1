use crate::commands::init_logging;
use crate::error::CliError;
use crate::output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use hydra_service::{
    progress_channel, BranchPlan, CommandExecutor, Dispatcher, DryRunExecutor, EnvForwarder,
    EnvironmentResolver, FanOutCoordinator, HydraCollaborators, HydraSettings, OverallStatus,
    ProcessExecutor, RawParams, SelectorPolicy, StageSequencer, DEFAULT_AXIS_VARIABLE,
};

/// Axis label used when no `--axis` is given
pub const SINGLE_AXIS: &str = "default";

/// Run the full workflow (checkout, runner, test, logs, cleanup, email) for
/// every axis value concurrently
#[derive(Parser, Debug)]
#[command(name = "hydra-pipeline", version)]
pub struct PipelineArgs {
    /// YAML file with run parameters; SCT_ variables override it
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Axis value, one branch each (repeatable or comma separated)
    #[arg(long = "axis", value_name = "VALUE", value_delimiter = ',')]
    pub axes: Vec<String>,

    /// Variable the axis value is exported as
    #[arg(long, value_name = "NAME", default_value = DEFAULT_AXIS_VARIABLE)]
    pub axis_var: String,

    /// Directory holding one workspace per branch
    #[arg(long, value_name = "DIR", default_value = "hydra-workspaces")]
    pub workdir: PathBuf,

    /// Repository cloned into every branch workspace
    #[arg(long, value_name = "REPO")]
    pub source: Option<String>,

    /// Branch or tag to check out
    #[arg(long = "ref", value_name = "REF", requires = "source")]
    pub git_ref: Option<String>,

    /// Print the commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Write the run summary as JSON to this path
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Reject parameters naming more than one artifact source
    #[arg(long)]
    pub strict_selectors: bool,

    /// Settings file (default: ./hydra.yaml, then the user config dir)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log format: pretty, compact or json
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<String>,
}

/// Parameter file overlaid with `SCT_` variables from `env`
pub fn load_params<I>(path: Option<&Path>, env: I) -> Result<RawParams, CliError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let from_file = match path {
        Some(path) => RawParams::from_yaml_file(path)?,
        None => RawParams::default(),
    };
    Ok(from_file.merged_with(RawParams::from_env_vars(env)))
}

/// One plan per axis value, or a single unlabelled branch
pub fn build_plans(args: &PipelineArgs, params: &RawParams, root: &Path) -> Vec<BranchPlan> {
    if args.axes.is_empty() {
        return vec![BranchPlan::new(SINGLE_AXIS, params.clone(), root)];
    }
    args.axes
        .iter()
        .map(|axis| BranchPlan::new(axis.trim(), params.clone(), root).with_axis_variable(&args.axis_var))
        .collect()
}

pub async fn execute(args: PipelineArgs) -> Result<(), CliError> {
    let settings = HydraSettings::load(args.config.as_deref())?;
    init_logging(&settings, args.log_format.as_deref())?;

    let params = load_params(args.params.as_deref(), std::env::vars())?;
    let root = std::env::current_dir()?.join(&args.workdir);
    let plans = build_plans(&args, &params, &root);
    info!(branches = plans.len(), root = %root.display(), dry_run = args.dry_run, "starting run");

    let executor: Arc<dyn CommandExecutor> = if args.dry_run {
        Arc::new(DryRunExecutor::new())
    } else {
        Arc::new(ProcessExecutor::new())
    };
    let forwarder = EnvForwarder::from_process_env(&settings.forwarded_env_prefixes);
    let dispatcher = Dispatcher::new(settings, forwarder, root.clone(), executor);

    let mut collaborators = HydraCollaborators::new(dispatcher);
    if let Some(source) = &args.source {
        collaborators = collaborators.with_source(source.clone(), args.git_ref.clone());
    }

    let policy = if args.strict_selectors {
        SelectorPolicy::Strict
    } else {
        SelectorPolicy::FirstMatch
    };

    output::status("Workspaces", &root.display().to_string());

    // Both senders live in the run task; the receiver ends with the run
    let (tx, mut rx) = progress_channel();
    let sequencer = StageSequencer::new(Arc::new(collaborators))
        .with_resolver(EnvironmentResolver::with_policy(policy))
        .with_progress(tx.clone());
    let coordinator = FanOutCoordinator::new().with_progress(tx);

    let run_handle = tokio::spawn(async move { coordinator.run_plans(&sequencer, plans).await });

    while let Some(event) = rx.recv().await {
        output::render_event(&event);
    }

    let summary = run_handle.await?;
    output::summary(&summary);

    if let Some(path) = &args.summary {
        summary.write_json(path)?;
        output::info(&format!("Summary written to {}", path.display()));
    }

    match summary.overall {
        OverallStatus::Passed => Ok(()),
        OverallStatus::Degraded => {
            output::banner("RUN DEGRADED: not every branch passed, artifacts were collected");
            Ok(())
        }
        OverallStatus::Failing => Err(CliError::RunFailing),
    }
}
