//! Network stack tuning unit
//!
//! Raises core socket limits, spreads NIC interrupts over the non-boot
//! CPUs and, where the NIC has several receive queues, spreads receive
//! steering over the same CPUs. Steering is optional: an interface that
//! cannot be steered does not fail the unit.

use super::irq::distribute;
use super::units::{ApplyOutcome, CheckOutcome};
use super::RunContext;
use crate::error::{ErrorKind, Result};
use crate::system::NetworkInterface;

/// Minimum values for core network sysctls
pub const NET_SYSCTLS: &[(&str, u64)] = &[
    ("net.core.rmem_max", 16 * 1024 * 1024),
    ("net.core.wmem_max", 16 * 1024 * 1024),
    ("net.core.somaxconn", 4096),
    ("net.core.netdev_max_backlog", 10_000),
];

fn below_minimum(current: &str, min: u64) -> bool {
    current.trim().parse::<u64>().map(|v| v < min).unwrap_or(true)
}

/// Non-boot CPUs used for steering; empty on a single CPU host
fn steering_cpus(ctx: &RunContext<'_>) -> Vec<usize> {
    ctx.online_cpus().into_iter().filter(|&c| c != 0).collect()
}

/// Whether steering is in place, treating an unsteerable NIC as done
fn steering_satisfied(ctx: &RunContext<'_>, iface: &NetworkInterface, cpus: &[usize]) -> Result<bool> {
    match ctx.tools.nic.steering_satisfied(ctx.host, iface, cpus) {
        Ok(done) => Ok(done),
        Err(e) if e.kind() == ErrorKind::Unsupported => {
            tracing::debug!("{}: queue steering unavailable: {}", iface.name, e);
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

pub fn check_network(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    for (name, min) in NET_SYSCTLS {
        let current = ctx.host.sysctl(name)?;
        if below_minimum(&current, *min) {
            return Ok(CheckOutcome::diverged(format!(
                "{} is {}, want at least {}",
                name, current, min
            )));
        }
    }

    let cpus = steering_cpus(ctx);
    for iface in &ctx.interfaces {
        if !iface.irqs.is_empty() && !distribute(&iface.irqs, &cpus).is_applied(ctx.host)? {
            return Ok(CheckOutcome::diverged(format!(
                "{} IRQs are not distributed",
                iface.name
            )));
        }
        if iface.is_multiqueue() && !cpus.is_empty() && !steering_satisfied(ctx, iface, &cpus)? {
            return Ok(CheckOutcome::diverged(format!(
                "{} receive steering is not spread",
                iface.name
            )));
        }
    }

    Ok(CheckOutcome::Satisfied)
}

pub fn apply_network(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    for (name, min) in NET_SYSCTLS {
        if below_minimum(&ctx.host.sysctl(name)?, *min) {
            ctx.host.set_sysctl(name, &min.to_string())?;
        }
    }

    let cpus = steering_cpus(ctx);
    for iface in &ctx.interfaces {
        if !iface.irqs.is_empty() {
            let changed = distribute(&iface.irqs, &cpus).apply(ctx.host)?;
            if changed > 0 {
                tracing::info!("{}: pinned {} IRQs", iface.name, changed);
            }
        }
        if iface.is_multiqueue() && !cpus.is_empty() && !steering_satisfied(ctx, iface, &cpus)? {
            tracing::info!(
                "{}: spreading receive steering via {}",
                iface.name,
                ctx.tools.nic.name()
            );
            ctx.tools.nic.apply_steering(ctx.host, iface, &cpus)?;
        }
    }

    Ok(ApplyOutcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_comparison() {
        assert!(below_minimum("212992", 16 * 1024 * 1024));
        assert!(!below_minimum("16777216", 16 * 1024 * 1024));
        assert!(!below_minimum("67108864", 16 * 1024 * 1024));
        assert!(below_minimum("", 1));
    }
}
