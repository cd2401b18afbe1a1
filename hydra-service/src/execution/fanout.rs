// Fan-Out Coordinator
// Runs one isolated branch per axis value and aggregates their outcomes

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::sequencer::{BranchOutcome, BranchPlan, BranchStatus, StageSequencer};
use crate::execution::stages::duration_secs;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Status of the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every branch passed
    Passed,
    /// Some branch did not pass, but artifacts exist for at least one
    Degraded,
    /// No branch produced artifacts
    Failing,
}

impl OverallStatus {
    /// Aggregate branch outcomes. Failing only when artifacts could be
    /// collected for no branch at all.
    pub fn aggregate<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a BranchOutcome>,
    {
        let mut any = false;
        let mut any_artifacts = false;
        let mut all_passed = true;
        for outcome in outcomes {
            any = true;
            any_artifacts |= outcome.artifacts_collected;
            all_passed &= outcome.status == BranchStatus::Passed;
        }
        if !any || !any_artifacts {
            OverallStatus::Failing
        } else if all_passed {
            OverallStatus::Passed
        } else {
            OverallStatus::Degraded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Passed => "passed",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Failing => "failing",
        }
    }
}

/// Aggregated result of a fan-out run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub overall: OverallStatus,
    pub branches: BTreeMap<String, BranchOutcome>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl RunSummary {
    pub fn new(branches: BTreeMap<String, BranchOutcome>, duration: Duration) -> Self {
        Self {
            overall: OverallStatus::aggregate(branches.values()),
            branches,
            duration,
        }
    }

    pub fn count(&self, status: BranchStatus) -> usize {
        self.branches.values().filter(|b| b.status == status).count()
    }

    /// Write the summary as pretty JSON
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Spawns branches concurrently. Branches share no mutable state, and one
/// branch's failure never cancels its siblings.
#[derive(Debug, Clone, Default)]
pub struct FanOutCoordinator {
    event_tx: Option<ProgressSender>,
}

impl FanOutCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run `branch_factory(axis)` for every distinct axis value and wait for
    /// all of them
    pub async fn run<F, Fut>(&self, axis_values: &[String], mut branch_factory: F) -> RunSummary
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = BranchOutcome> + Send + 'static,
    {
        let start = Instant::now();
        let axes = distinct(axis_values);
        self.event_tx.send_event(ExecutionEvent::RunStarted {
            total_branches: axes.len(),
        });
        info!(branches = axes.len(), "fan-out started");

        let handles: Vec<_> = axes
            .into_iter()
            .map(|axis| {
                let handle = tokio::spawn(branch_factory(axis.clone()));
                (axis, handle)
            })
            .collect();

        let mut branches = BTreeMap::new();
        for (axis, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(axis = %axis, error = %e, "branch task did not complete");
                    BranchOutcome::failed(axis.clone(), format!("branch task did not complete: {}", e))
                }
            };
            branches.insert(axis, outcome);
        }

        let summary = RunSummary::new(branches, start.elapsed());
        self.event_tx.send_event(ExecutionEvent::RunCompleted {
            overall: summary.overall,
            duration: summary.duration,
        });
        info!(overall = summary.overall.as_str(), "fan-out finished");
        summary
    }

    /// Run prepared plans, one branch per plan, through `sequencer`
    pub async fn run_plans(&self, sequencer: &StageSequencer, plans: Vec<BranchPlan>) -> RunSummary {
        let axes: Vec<String> = plans.iter().map(|p| p.axis.clone()).collect();
        let mut by_axis: HashMap<String, BranchPlan> = HashMap::new();
        for plan in plans {
            by_axis.entry(plan.axis.clone()).or_insert(plan);
        }

        self.run(&axes, |axis| {
            let plan = by_axis.remove(&axis);
            let sequencer = sequencer.clone();
            async move {
                match plan {
                    Some(plan) => sequencer.run(plan).await,
                    None => BranchOutcome::failed(axis, "no plan for axis"),
                }
            }
        })
        .await
    }
}

/// Axis values in first-seen order without duplicates
fn distinct(axis_values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut axes = Vec::new();
    for axis in axis_values {
        if seen.insert(axis.as_str()) {
            axes.push(axis.clone());
        } else {
            warn!(axis = %axis, "duplicate axis value ignored");
        }
    }
    axes
}
