// Stage Completion Ledger
// Per-branch record of which terminal stages have run

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Stages whose completion is tracked and re-attempted by the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStage {
    CleanResources,
    SendEmail,
}

impl TerminalStage {
    /// Order in which the sweep visits terminal stages
    pub const ORDER: [TerminalStage; 2] = [TerminalStage::CleanResources, TerminalStage::SendEmail];

    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStage::CleanResources => "clean_resources",
            TerminalStage::SendEmail => "send_email",
        }
    }
}

impl fmt::Display for TerminalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal stage name to "has run". Entries only ever go from absent to
/// true; there is no way to clear one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageLedger {
    completed: BTreeMap<TerminalStage, bool>,
}

impl StageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `stage` ran to the end of its body, successfully or not
    pub fn mark_complete(&mut self, stage: TerminalStage) {
        self.completed.insert(stage, true);
    }

    pub fn is_complete(&self, stage: TerminalStage) -> bool {
        self.completed.get(&stage).copied().unwrap_or(false)
    }

    /// Terminal stages not yet run, in sweep order
    pub fn missing(&self) -> Vec<TerminalStage> {
        TerminalStage::ORDER
            .into_iter()
            .filter(|stage| !self.is_complete(*stage))
            .collect()
    }

    pub fn all_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

impl Serialize for StageLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            TerminalStage::ORDER
                .iter()
                .map(|stage| (stage.as_str(), self.is_complete(*stage))),
        )
    }
}
