// Dry-Run Executor
// Prints commands instead of running them and keeps a record for inspection

use crate::error::ServiceResult;
use crate::runners::{CommandExecutor, CommandOutput, CommandSpec};

use std::sync::Mutex;
use std::time::Duration;

/// Executor that never spawns anything
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    recorded: Mutex<Vec<String>>,
    quiet: bool,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record without printing
    pub fn quiet() -> Self {
        Self {
            recorded: Mutex::new(Vec::new()),
            quiet: true,
        }
    }

    /// Rendered commands in the order they were issued
    pub fn recorded(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn run(&self, spec: &CommandSpec, _timeout: Option<Duration>) -> ServiceResult<CommandOutput> {
        let rendered = spec.command_line();
        if !self.quiet {
            println!("[dry-run] {}", rendered);
        }
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(rendered);
        }
        Ok(CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
