//! Node-wide kernel tuning units

use super::units::{ApplyOutcome, CheckOutcome};
use super::RunContext;
use crate::error::{Result, TuneError};
use crate::system::{available_choices, selected_choice, Host};
use std::path::PathBuf;

/// Async I/O event ceiling
pub const AIO_MAX_NR: u64 = 1_048_576;
/// Highest acceptable swap tendency
pub const SWAPPINESS: u64 = 1;
/// Core dumps go to `<dir>/` + this pattern
pub const CORE_PATTERN_FILE: &str = "core.%e.%p.%t";
/// Kernel parameters added to the boot command line
pub const BOOT_PARAMS: &[&str] = &["clocksource=tsc", "tsc=reliable"];

const THP_ENABLED: &str = "/sys/kernel/mm/transparent_hugepage/enabled";
const CLOCKSOURCE_DIR: &str = "/sys/devices/system/clocksource/clocksource0";
const CPU_DIR: &str = "/sys/devices/system/cpu";
const GRUB_DEFAULTS: &str = "/etc/default/grub";
const GRUB_CMDLINE_KEY: &str = "GRUB_CMDLINE_LINUX_DEFAULT=";

fn at_least(value: &str, min: u64) -> bool {
    value.trim().parse::<u64>().map(|v| v >= min).unwrap_or(false)
}

fn at_most(value: &str, max: u64) -> bool {
    value.trim().parse::<u64>().map(|v| v <= max).unwrap_or(false)
}

pub fn check_aio_events(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let current = ctx.host.sysctl("fs.aio-max-nr")?;
    if at_least(&current, AIO_MAX_NR) {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "fs.aio-max-nr is {}, want at least {}",
            current, AIO_MAX_NR
        )))
    }
}

pub fn apply_aio_events(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    ctx.host.set_sysctl("fs.aio-max-nr", &AIO_MAX_NR.to_string())?;
    Ok(ApplyOutcome::default())
}

pub fn check_swappiness(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let current = ctx.host.sysctl("vm.swappiness")?;
    if at_most(&current, SWAPPINESS) {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "vm.swappiness is {}, want at most {}",
            current, SWAPPINESS
        )))
    }
}

pub fn apply_swappiness(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    ctx.host.set_sysctl("vm.swappiness", &SWAPPINESS.to_string())?;
    Ok(ApplyOutcome::default())
}

pub fn check_transparent_hugepages(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let content = ctx.host.read_interface(THP_ENABLED)?;
    match selected_choice(&content) {
        "never" => Ok(CheckOutcome::Satisfied),
        other => Ok(CheckOutcome::diverged(format!(
            "transparent hugepages are '{}'",
            other
        ))),
    }
}

pub fn apply_transparent_hugepages(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    tracing::info!("Disabling transparent hugepages");
    ctx.host.write(THP_ENABLED, "never")?;
    Ok(ApplyOutcome::default())
}

/// Fastest timestamp source for the running architecture
pub fn preferred_clocksource() -> Option<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Some("tsc"),
        "aarch64" => Some("arch_sys_counter"),
        _ => None,
    }
}

fn clocksource_target(host: &Host) -> Result<&'static str> {
    let target = preferred_clocksource().ok_or_else(|| {
        TuneError::unsupported(format!(
            "no preferred clocksource for {}",
            std::env::consts::ARCH
        ))
    })?;
    let available = host.read_interface(format!("{}/available_clocksource", CLOCKSOURCE_DIR))?;
    if !available_choices(&available).contains(&target) {
        return Err(TuneError::unsupported(format!(
            "clocksource {} is not available ({})",
            target, available
        )));
    }
    Ok(target)
}

pub fn check_clocksource(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let target = clocksource_target(ctx.host)?;
    let current = ctx
        .host
        .read_interface(format!("{}/current_clocksource", CLOCKSOURCE_DIR))?;
    if current == target {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "clocksource is {}, want {}",
            current, target
        )))
    }
}

pub fn apply_clocksource(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    let target = clocksource_target(ctx.host)?;
    tracing::info!("Selecting clocksource {}", target);
    ctx.host
        .write(format!("{}/current_clocksource", CLOCKSOURCE_DIR), target)?;
    Ok(ApplyOutcome::default())
}

/// Core pattern for a dump directory
pub fn core_pattern(ctx: &RunContext<'_>) -> String {
    ctx.config
        .coredump_dir
        .join(CORE_PATTERN_FILE)
        .display()
        .to_string()
}

pub fn check_coredump(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let pattern = core_pattern(ctx);
    let current = ctx.host.sysctl("kernel.core_pattern")?;
    if current != pattern {
        return Ok(CheckOutcome::diverged(format!(
            "kernel.core_pattern is '{}'",
            current
        )));
    }
    if ctx.host.sysctl("kernel.core_uses_pid")? != "1" {
        return Ok(CheckOutcome::diverged("kernel.core_uses_pid is not set"));
    }
    if !ctx.host.exists(&ctx.config.coredump_dir) {
        return Ok(CheckOutcome::diverged(format!(
            "{} does not exist",
            ctx.config.coredump_dir.display()
        )));
    }
    Ok(CheckOutcome::Satisfied)
}

pub fn apply_coredump(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    let pattern = core_pattern(ctx);
    ctx.host.create_dir_all(&ctx.config.coredump_dir)?;
    if ctx.host.sysctl("kernel.core_pattern")? != pattern {
        ctx.host.set_sysctl("kernel.core_pattern", &pattern)?;
    }
    if ctx.host.sysctl("kernel.core_uses_pid")? != "1" {
        ctx.host.set_sysctl("kernel.core_uses_pid", "1")?;
    }
    Ok(ApplyOutcome::default())
}

/// `scaling_governor` files of every CPU exposing cpufreq
fn governor_paths(host: &Host) -> Vec<PathBuf> {
    host.list_dir(CPU_DIR)
        .unwrap_or_default()
        .into_iter()
        .filter(|name| {
            name.strip_prefix("cpu")
                .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                .unwrap_or(false)
        })
        .map(|name| PathBuf::from(CPU_DIR).join(name).join("cpufreq/scaling_governor"))
        .filter(|path| host.exists(path))
        .collect()
}

/// Boost control file and the value that disables boosting
fn boost_control(host: &Host) -> Option<(PathBuf, &'static str)> {
    let cpufreq_boost = PathBuf::from(CPU_DIR).join("cpufreq/boost");
    if host.exists(&cpufreq_boost) {
        return Some((cpufreq_boost, "0"));
    }
    let no_turbo = PathBuf::from(CPU_DIR).join("intel_pstate/no_turbo");
    if host.exists(&no_turbo) {
        return Some((no_turbo, "1"));
    }
    None
}

/// New GRUB defaults when the boot command line lacks a tuning parameter
fn pending_boot_edit(ctx: &RunContext<'_>) -> Result<Option<String>> {
    if !ctx.config.tune_boot_params {
        return Ok(None);
    }
    if std::env::consts::ARCH != "x86_64" {
        tracing::debug!("Boot parameter tuning only applies to x86_64");
        return Ok(None);
    }
    if !ctx.host.exists(GRUB_DEFAULTS) {
        tracing::warn!("{} not found, skipping boot parameters", GRUB_DEFAULTS);
        return Ok(None);
    }
    let content = ctx.host.read(GRUB_DEFAULTS)?;
    Ok(grub_with_params(&content, BOOT_PARAMS))
}

/// Add `params` to `GRUB_CMDLINE_LINUX_DEFAULT`, `None` when all are present
pub fn grub_with_params(content: &str, params: &[&str]) -> Option<String> {
    let mut found = false;
    let mut changed = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| match line.trim_start().strip_prefix(GRUB_CMDLINE_KEY) {
            Some(value) => {
                found = true;
                let mut args: Vec<&str> = value
                    .trim()
                    .trim_matches(|c| c == '"' || c == '\'')
                    .split_whitespace()
                    .collect();
                for param in params {
                    if !args.contains(param) {
                        args.push(*param);
                        changed = true;
                    }
                }
                format!("{}\"{}\"", GRUB_CMDLINE_KEY, args.join(" "))
            }
            None => line.to_string(),
        })
        .collect();

    if !found {
        lines.push(format!("{}\"{}\"", GRUB_CMDLINE_KEY, params.join(" ")));
        changed = true;
    }

    changed.then(|| format!("{}\n", lines.join("\n")))
}

pub fn check_cpu(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let governors = governor_paths(ctx.host);
    let boost = boost_control(ctx.host);
    let boot_edit = pending_boot_edit(ctx)?;

    if governors.is_empty() && boost.is_none() && boot_edit.is_none() {
        return Err(TuneError::unsupported("no cpufreq interface"));
    }

    for path in &governors {
        let current = ctx.host.read(path)?;
        if current != "performance" {
            return Ok(CheckOutcome::diverged(format!(
                "{} is '{}'",
                path.display(),
                current
            )));
        }
    }
    if let Some((path, target)) = &boost {
        if ctx.host.read(path)? != *target {
            return Ok(CheckOutcome::diverged("CPU boost is enabled"));
        }
    }
    if boot_edit.is_some() {
        return Ok(CheckOutcome::diverged("boot parameters are missing"));
    }
    Ok(CheckOutcome::Satisfied)
}

pub fn apply_cpu(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();

    for path in governor_paths(ctx.host) {
        if ctx.host.read(&path)? != "performance" {
            ctx.host.write(&path, "performance")?;
        }
    }
    if let Some((path, target)) = boost_control(ctx.host) {
        if ctx.host.read(&path)? != target {
            tracing::info!("Disabling CPU boost via {}", path.display());
            ctx.host.write(&path, target)?;
        }
    }
    if let Some(content) = pending_boot_edit(ctx)? {
        tracing::warn!("Adding {} to the boot command line; reboot required", BOOT_PARAMS.join(" "));
        ctx.host.write_file_atomic(GRUB_DEFAULTS, &content)?;
        outcome.reboot_required = true;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_parsing() {
        assert!(at_least("1048576", AIO_MAX_NR));
        assert!(!at_least("65536", AIO_MAX_NR));
        assert!(!at_least("garbage", 1));
        assert!(at_most("0", SWAPPINESS));
        assert!(!at_most("60", SWAPPINESS));
    }

    #[test]
    fn test_grub_edit_adds_missing_params() {
        let content = "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"\nGRUB_TIMEOUT=5";
        let edited = grub_with_params(content, BOOT_PARAMS).unwrap();
        assert!(edited.contains(
            "GRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash clocksource=tsc tsc=reliable\""
        ));
        assert!(edited.contains("GRUB_TIMEOUT=5"));

        assert_eq!(grub_with_params(&edited, BOOT_PARAMS), None);
    }

    #[test]
    fn test_grub_edit_appends_missing_line() {
        let edited = grub_with_params("GRUB_DEFAULT=0", BOOT_PARAMS).unwrap();
        assert_eq!(
            edited,
            "GRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX_DEFAULT=\"clocksource=tsc tsc=reliable\"\n"
        );
    }
}
