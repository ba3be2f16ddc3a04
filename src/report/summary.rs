//! Run summary rendering

use crate::core::RunOutcome;
use crate::error::Result;
use crate::tuning::UnitStatus;
use console::style;
use serde::Serialize;
use std::io::Write;

/// Process exit code for a completed run
pub const EXIT_SUCCESS: i32 = 0;
/// At least one unit failed or the run timed out
pub const EXIT_FAILURE: i32 = 1;
/// Invalid configuration or the lock is held; nothing ran
pub const EXIT_ABORTED: i32 = 2;

#[derive(Serialize)]
struct Counts {
    success: usize,
    failed: usize,
    skipped: usize,
    changed: usize,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    success: bool,
    reboot_required: bool,
    timed_out: bool,
    check_only: bool,
    elapsed_secs: f64,
    counts: Counts,
    #[serde(flatten)]
    outcome: &'a RunOutcome,
}

/// Human or machine readable view of one run
pub struct RunReport<'a> {
    outcome: &'a RunOutcome,
}

impl<'a> RunReport<'a> {
    pub fn new(outcome: &'a RunOutcome) -> Self {
        Self { outcome }
    }

    /// 0 on success, 1 if any unit failed, the profile was not written,
    /// or the run timed out
    pub fn exit_code(&self) -> i32 {
        if self.outcome.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    fn counts(&self) -> Counts {
        let run = &self.outcome.run;
        Counts {
            success: run.success_count(),
            failed: run.failed_count(),
            skipped: run.skipped_count(),
            changed: run.changed_count(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let run = &self.outcome.run;
        let report = JsonReport {
            success: self.outcome.is_success(),
            reboot_required: run.reboot_required(),
            timed_out: run.timed_out,
            check_only: run.check_only,
            elapsed_secs: self.outcome.elapsed.as_secs_f64(),
            counts: self.counts(),
            outcome: self.outcome,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    pub fn write_text<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let o = self.outcome;
        let run = &o.run;
        let env = &o.environment;

        let title = if run.check_only {
            "Check Summary"
        } else {
            "Tuning Summary"
        };
        writeln!(out, "\n=== {} ===", style(title).bold())?;
        writeln!(out, "Node:            {}", o.node)?;
        writeln!(
            out,
            "Environment:     {} {} ({})",
            env.provider,
            env.instance_type.as_deref().unwrap_or("-"),
            env.distro.id
        )?;
        writeln!(out, "Devices:         {}", list_or_none(&o.devices))?;
        writeln!(out, "Interfaces:      {}", list_or_none(&o.interfaces))?;
        writeln!(out, "Duration:        {:.2?}", o.elapsed)?;

        if let Some(profile) = &o.profile {
            let p = &profile.resolved.profile;
            writeln!(out, "\nI/O profile ({}):", profile.resolved.source)?;
            writeln!(
                out,
                "  Read:   {} IOPS, {}/s",
                p.read_iops,
                humansize::format_size(p.read_bandwidth, humansize::BINARY)
            )?;
            writeln!(
                out,
                "  Write:  {} IOPS, {}/s",
                p.write_iops,
                humansize::format_size(p.write_bandwidth, humansize::BINARY)
            )?;
            if let Some(path) = &profile.artifact {
                writeln!(out, "  Written to {}", path.display())?;
            }
            if let Some(error) = &profile.error {
                writeln!(out, "  {} {}", style("not written:").red(), error)?;
            }
        }

        for phase in &o.skipped_phases {
            writeln!(out, "{} {}", style("Skipped").dim(), phase)?;
        }

        if !run.results.is_empty() {
            writeln!(out)?;
            for result in &run.results {
                let status = match result.status {
                    UnitStatus::Success if result.changed => style("changed").green(),
                    UnitStatus::Success => style("ok").green(),
                    UnitStatus::Failed => style("failed").red().bold(),
                    UnitStatus::Skipped => style("skipped").yellow(),
                };
                write!(out, "  {:<28} {}", result.id, status)?;
                match &result.message {
                    Some(message) => writeln!(out, "  {}", style(message).dim())?,
                    None => writeln!(out)?,
                }
            }
        }

        let c = self.counts();
        writeln!(
            out,
            "\nUnits: {} ok, {} failed, {} skipped ({} changed)",
            c.success, c.failed, c.skipped, c.changed
        )?;
        if run.reboot_required() {
            writeln!(out, "{}", style("Reboot required to apply boot parameters").yellow())?;
        }
        if run.timed_out {
            writeln!(out, "{}", style("Run timed out").red().bold())?;
        }
        Ok(())
    }

    pub fn print(&self) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = self.write_text(&mut stdout) {
            tracing::warn!("Failed to print summary: {}", e);
        }
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::EnvironmentInfo;
    use crate::tuning::{TunerResult, TuningRun};
    use std::time::Duration;

    fn outcome(status: UnitStatus) -> RunOutcome {
        let mut run = TuningRun::new(false);
        run.record(TunerResult {
            id: "disk_scheduler:nvme0n1".into(),
            status,
            changed: status == UnitStatus::Success,
            message: None,
        });
        RunOutcome {
            node: "node-1".into(),
            environment: EnvironmentInfo::unknown(),
            devices: vec!["nvme0n1".into()],
            interfaces: Vec::new(),
            profile: None,
            skipped_phases: Vec::new(),
            run,
            elapsed: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunReport::new(&outcome(UnitStatus::Success)).exit_code(), 0);
        assert_eq!(RunReport::new(&outcome(UnitStatus::Skipped)).exit_code(), 0);
        assert_eq!(RunReport::new(&outcome(UnitStatus::Failed)).exit_code(), 1);

        let mut timed_out = outcome(UnitStatus::Success);
        timed_out.run.timed_out = true;
        assert_eq!(RunReport::new(&timed_out).exit_code(), 1);
    }

    #[test]
    fn test_text_lists_units() {
        let o = outcome(UnitStatus::Failed);
        let mut buf = Vec::new();
        RunReport::new(&o).write_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("disk_scheduler:nvme0n1"));
        assert!(text.contains("1 failed"));
    }

    #[test]
    fn test_json_has_counts() {
        let o = outcome(UnitStatus::Success);
        let json: serde_json::Value =
            serde_json::from_str(&RunReport::new(&o).to_json().unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["counts"]["changed"], 1);
        assert_eq!(json["node"], "node-1");
    }
}
