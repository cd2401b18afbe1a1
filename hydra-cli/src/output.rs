// Output formatting helpers for the CLIs

use hydra_service::{BranchStatus, ExecutionEvent, LogLevel, OverallStatus, RunSummary, StageStatus};

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

pub fn dim_failure(message: &str) {
    eprintln!("\x1b[31m{}\x1b[0m", message);
}

pub fn dim_warning(message: &str) {
    eprintln!("\x1b[33m{}\x1b[0m", message);
}

/// Print dispatched command output (indented)
pub fn step_output(line: &str) {
    println!("        | {}", line);
}

/// Print dispatched command stderr (indented, red)
pub fn step_error(line: &str) {
    eprintln!("\x1b[31m        | {}\x1b[0m", line);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Loud banner for runs that finished with something to look at
pub fn banner(message: &str) {
    let rule = "=".repeat(message.chars().count() + 4);
    eprintln!("\x1b[1;33m{}\x1b[0m", rule);
    eprintln!("\x1b[1;33m  {}\x1b[0m", message);
    eprintln!("\x1b[1;33m{}\x1b[0m", rule);
}

fn stage_symbol(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Succeeded => "OK",
        StageStatus::Failed => "FAIL",
        StageStatus::TimedOut => "TIMEOUT",
        StageStatus::Skipped => "SKIP",
    }
}

/// Render one progress event
pub fn render_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { total_branches } => {
            eprintln!();
            header(&format!("Run started ({} branches)", total_branches));
        }

        ExecutionEvent::RunCompleted { overall, duration } => {
            eprintln!();
            let message = format!("Run {} after {:.2}s", overall.as_str(), duration.as_secs_f64());
            match overall {
                OverallStatus::Passed => success(&message),
                OverallStatus::Degraded => warning(&message),
                OverallStatus::Failing => failure(&message),
            }
        }

        ExecutionEvent::BranchStarted { axis, test_id } => {
            status("Branch", &format!("'{}' (test id {})", axis, test_id));
        }

        ExecutionEvent::BranchCompleted {
            axis,
            status: branch_status,
            duration,
        } => {
            let message = format!(
                "Branch '{}' {} ({:.2}s)",
                axis,
                branch_status.as_str(),
                duration.as_secs_f64()
            );
            match branch_status {
                BranchStatus::Passed => success(&message),
                BranchStatus::Degraded => warning(&message),
                BranchStatus::Failed => failure(&message),
            }
        }

        ExecutionEvent::StageStarted { axis, stage } => {
            eprintln!("    [{}] {} ...", axis, stage);
        }

        ExecutionEvent::StageCompleted {
            axis,
            stage,
            status: stage_status,
            duration,
            error: stage_error,
        } => {
            let line = format!(
                "    [{}] {} {} ({:.2}s)",
                axis,
                stage,
                stage_symbol(*stage_status),
                duration.as_secs_f64()
            );
            match stage_status {
                StageStatus::Succeeded => dim_success(&line),
                StageStatus::Skipped => dim_warning(&line),
                StageStatus::Failed | StageStatus::TimedOut => dim_failure(&line),
            }
            if let Some(message) = stage_error {
                step_error(message);
            }
        }

        ExecutionEvent::SweepInvoked {
            axis,
            stage,
            success: ok,
        } => {
            let line = format!("    [{}] sweep re-ran {}", axis, stage);
            if *ok {
                dim_warning(&line);
            } else {
                dim_failure(&format!("{} and it failed", line));
            }
        }

        ExecutionEvent::ArtifactsArchived { axis, success: ok } => {
            if *ok {
                dim_success(&format!("    [{}] artifacts archived", axis));
            } else {
                dim_failure(&format!("    [{}] artifacts could not be archived", axis));
            }
        }

        ExecutionEvent::Log { level, message, axis } => {
            let message = match axis {
                Some(axis) => format!("[{}] {}", axis, message),
                None => message.clone(),
            };
            match level {
                LogLevel::Debug => {}
                LogLevel::Info => info(&message),
                LogLevel::Warning => warning(&message),
                LogLevel::Error => error(&message),
            }
        }
    }
}

/// Per-branch table printed after the run
pub fn summary(summary: &RunSummary) {
    eprintln!();
    header(&format!(
        "Summary: {} passed, {} degraded, {} failed",
        summary.count(BranchStatus::Passed),
        summary.count(BranchStatus::Degraded),
        summary.count(BranchStatus::Failed)
    ));
    for (axis, outcome) in &summary.branches {
        let artifacts = if outcome.artifacts_collected { "artifacts" } else { "no artifacts" };
        let line = format!(
            "  {:<24} {:<9} {:<13} {}",
            axis,
            outcome.status.as_str(),
            artifacts,
            outcome.test_id
        );
        match outcome.status {
            BranchStatus::Passed => dim_success(&line),
            BranchStatus::Degraded => dim_warning(&line),
            BranchStatus::Failed => dim_failure(&line),
        }
        if let Some(message) = &outcome.error {
            step_error(message);
        }
    }
}
