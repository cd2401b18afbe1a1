// Timeout Budgeter
// Derives per-stage time allocations from the requested test duration

use crate::config::models::Backend;
use crate::error::{ServiceError, ServiceResult};

use serde::Serialize;
use std::time::Duration;

/// Startup plus teardown allowance added on top of the test duration
const MIN_TEST_RUN_MARGIN: u64 = 60;
/// Minimum share of the duration added as margin, in percent
const TEST_RUN_MARGIN_PERCENT: u64 = 15;

const RUNNER_PROVISION: u64 = 20;
const RUNNER_PROVISION_K8S: u64 = 30;
const LOG_COLLECT: u64 = 70;
const LOG_COLLECT_PER_EXTRA_REGION: u64 = 20;
const RESOURCE_CLEANUP: u64 = 30;
const RESOURCE_CLEANUP_K8S: u64 = 60;
const SEND_EMAIL: u64 = 10;
/// Slack on top of the summed allocations before the branch is cancelled
const BRANCH_SLACK: u64 = 10;

/// Longest test duration accepted, in minutes (90 days)
pub const MAX_TEST_DURATION_MINUTES: i64 = 90 * 24 * 60;

/// Named allocations of a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    TestRun,
    RunnerProvision,
    LogCollect,
    ResourceCleanup,
    SendEmail,
}

impl Allocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Allocation::TestRun => "test_run",
            Allocation::RunnerProvision => "runner_provision",
            Allocation::LogCollect => "log_collect",
            Allocation::ResourceCleanup => "resource_cleanup",
            Allocation::SendEmail => "send_email",
        }
    }
}

/// Minute-denominated allocations for one branch. Computed once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutBudget {
    pub test_run: u64,
    pub runner_provision: u64,
    pub log_collect: u64,
    pub resource_cleanup: u64,
    pub send_email: u64,
}

impl TimeoutBudget {
    pub fn minutes(&self, allocation: Allocation) -> u64 {
        match allocation {
            Allocation::TestRun => self.test_run,
            Allocation::RunnerProvision => self.runner_provision,
            Allocation::LogCollect => self.log_collect,
            Allocation::ResourceCleanup => self.resource_cleanup,
            Allocation::SendEmail => self.send_email,
        }
    }

    pub fn limit(&self, allocation: Allocation) -> Duration {
        Duration::from_secs(self.minutes(allocation).saturating_mul(60))
    }

    /// Branch-level cancellation timeout
    pub fn branch_limit(&self) -> Duration {
        let total = [
            self.test_run,
            self.runner_provision,
            self.log_collect,
            self.resource_cleanup,
            self.send_email,
            BRANCH_SLACK,
        ]
        .into_iter()
        .fold(0u64, u64::saturating_add);
        Duration::from_secs(total.saturating_mul(60))
    }
}

/// Compute the budget for a requested duration on a backend/region
pub fn budget(requested_minutes: i64, backend: Backend, region: &str) -> ServiceResult<TimeoutBudget> {
    if requested_minutes <= 0 {
        return Err(ServiceError::config(format!(
            "test duration must be positive, got {} minutes",
            requested_minutes
        )));
    }
    if requested_minutes > MAX_TEST_DURATION_MINUTES {
        return Err(ServiceError::config(format!(
            "test duration of {} minutes exceeds the maximum of {} minutes",
            requested_minutes, MAX_TEST_DURATION_MINUTES
        )));
    }
    let duration = requested_minutes as u64;

    let proportional = (duration * TEST_RUN_MARGIN_PERCENT).div_ceil(100);
    let margin = proportional.max(MIN_TEST_RUN_MARGIN);

    let extra_regions = region.split_whitespace().count().saturating_sub(1) as u64;

    let (runner_provision, resource_cleanup) = if backend.is_kubernetes() {
        (RUNNER_PROVISION_K8S, RESOURCE_CLEANUP_K8S)
    } else {
        (RUNNER_PROVISION, RESOURCE_CLEANUP)
    };

    Ok(TimeoutBudget {
        test_run: duration + margin,
        runner_provision,
        log_collect: LOG_COLLECT + extra_regions * LOG_COLLECT_PER_EXTRA_REGION,
        resource_cleanup,
        send_email: SEND_EMAIL,
    })
}

/// Size class of the runner instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerClass {
    Regular,
    Longterm,
}

impl RunnerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerClass::Regular => "regular",
            RunnerClass::Longterm => "longterm",
        }
    }
}

/// Runner sizing derived from the test duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunnerSizing {
    pub class: RunnerClass,
    pub root_disk_gb: u32,
    /// Hours the runner is kept alive before the reaper may terminate it
    pub keep_hours: u64,
}

impl RunnerSizing {
    pub fn for_duration(duration_minutes: u64) -> Self {
        let class = if duration_minutes > 7 * 60 {
            RunnerClass::Longterm
        } else {
            RunnerClass::Regular
        };
        let root_disk_gb = if duration_minutes > 3 * 24 * 60 { 120 } else { 80 };
        Self {
            class,
            root_disk_gb,
            keep_hours: duration_minutes.div_ceil(60).saturating_add(6),
        }
    }
}
