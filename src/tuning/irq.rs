//! IRQ affinity distribution
//!
//! Interrupt lines are spread round-robin over the online CPUs, never
//! using CPU 0. Masks use the kernel `smp_affinity` format: comma
//! separated 32-bit hex groups, most significant group first.

use crate::error::Result;
use crate::system::Host;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One IRQ pinned to one CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqAssignment {
    pub irq: u32,
    pub cpu: usize,
}

impl IrqAssignment {
    /// Target `smp_affinity` mask
    pub fn mask(&self) -> String {
        affinity_mask(self.cpu)
    }
}

/// Result of distributing a set of IRQs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrqPlan {
    /// IRQs paired with CPUs in input order
    Assign(Vec<IrqAssignment>),
    /// Only CPU 0 is online; nothing to do
    NoEligibleCpu,
}

impl IrqPlan {
    pub fn assignments(&self) -> &[IrqAssignment] {
        match self {
            Self::Assign(assignments) => assignments,
            Self::NoEligibleCpu => &[],
        }
    }

    /// Whether every IRQ already carries its target mask
    pub fn is_applied(&self, host: &Host) -> Result<bool> {
        for assignment in self.assignments() {
            let current = host.read_interface(smp_affinity_path(assignment.irq))?;
            if !masks_equal(&current, &assignment.mask()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write masks that differ from the target, returning how many changed
    pub fn apply(&self, host: &Host) -> Result<usize> {
        let mut changed = 0;
        for assignment in self.assignments() {
            let path = smp_affinity_path(assignment.irq);
            let current = host.read_interface(&path)?;
            let target = assignment.mask();
            if masks_equal(&current, &target) {
                continue;
            }
            tracing::debug!("IRQ {} -> CPU {}", assignment.irq, assignment.cpu);
            host.write(&path, &target)?;
            changed += 1;
        }
        Ok(changed)
    }
}

/// Assign `irqs` round-robin over `cpus`, excluding CPU 0
pub fn distribute(irqs: &[u32], cpus: &[usize]) -> IrqPlan {
    let mut eligible: Vec<usize> = cpus.iter().copied().filter(|&c| c != 0).collect();
    eligible.sort_unstable();
    eligible.dedup();

    if eligible.is_empty() {
        return IrqPlan::NoEligibleCpu;
    }

    IrqPlan::Assign(
        irqs.iter()
            .zip(eligible.iter().cycle())
            .map(|(&irq, &cpu)| IrqAssignment { irq, cpu })
            .collect(),
    )
}

/// [`distribute`] over CPUs `0..cpu_count`
pub fn distribute_over(irqs: &[u32], cpu_count: usize) -> IrqPlan {
    let cpus: Vec<usize> = (0..cpu_count).collect();
    distribute(irqs, &cpus)
}

/// `/proc/irq/<n>/smp_affinity`
pub fn smp_affinity_path(irq: u32) -> PathBuf {
    PathBuf::from(format!("/proc/irq/{}/smp_affinity", irq))
}

/// Mask selecting a single CPU
pub fn affinity_mask(cpu: usize) -> String {
    cpus_mask(&[cpu])
}

/// Mask selecting every CPU in `cpus`
pub fn cpus_mask(cpus: &[usize]) -> String {
    let groups = cpus.iter().max().map(|&max| max / 32 + 1).unwrap_or(1);
    let mut words = vec![0u32; groups];
    for &cpu in cpus {
        words[cpu / 32] |= 1 << (cpu % 32);
    }
    words
        .iter()
        .rev()
        .map(|w| format!("{:08x}", w))
        .collect::<Vec<_>>()
        .join(",")
}

/// Canonical form for comparison: no separators, no leading zeros
pub fn normalize_mask(mask: &str) -> String {
    let digits: String = mask
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn masks_equal(a: &str, b: &str) -> bool {
    normalize_mask(a) == normalize_mask(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn cpus_of(plan: &IrqPlan) -> Vec<usize> {
        plan.assignments().iter().map(|a| a.cpu).collect()
    }

    #[test]
    fn test_round_robin_skips_cpu0() {
        let plan = distribute_over(&[10, 11, 12, 13], 4);
        assert_eq!(cpus_of(&plan), vec![1, 2, 3, 1]);
    }

    #[test]
    fn test_single_cpu_is_noop() {
        assert_eq!(distribute_over(&[10, 11], 1), IrqPlan::NoEligibleCpu);
        assert_eq!(distribute(&[10], &[0]), IrqPlan::NoEligibleCpu);
        assert!(IrqPlan::NoEligibleCpu.assignments().is_empty());
    }

    #[test]
    fn test_sparse_online_cpus() {
        let plan = distribute(&[1, 2, 3], &[0, 4, 2]);
        assert_eq!(cpus_of(&plan), vec![2, 4, 2]);
    }

    #[test]
    fn test_mask_format() {
        assert_eq!(affinity_mask(0), "00000001");
        assert_eq!(affinity_mask(3), "00000008");
        assert_eq!(affinity_mask(33), "00000002,00000000");
        assert_eq!(cpus_mask(&[1, 2, 3]), "0000000e");
        assert_eq!(cpus_mask(&[]), "00000000");
    }

    #[test]
    fn test_mask_comparison() {
        assert!(masks_equal("00000000,00000008", "8"));
        assert!(masks_equal("0000000E\n", "0000000e"));
        assert!(masks_equal("00000000", "0"));
        assert!(!masks_equal("00000002,00000000", "00000002"));
    }

    #[test]
    fn test_apply_writes_only_differing_masks() {
        let dir = TempDir::new().unwrap();
        for (irq, mask) in [(10, "ff"), (11, "00000004")] {
            let path = dir.path().join(format!("proc/irq/{}", irq));
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("smp_affinity"), mask).unwrap();
        }
        let host = Host::new(dir.path());
        let plan = distribute_over(&[10, 11], 4);

        assert!(!plan.is_applied(&host).unwrap());
        assert_eq!(plan.apply(&host).unwrap(), 1);
        assert!(plan.is_applied(&host).unwrap());
        assert_eq!(plan.apply(&host).unwrap(), 0);
        assert_eq!(host.writes(), 1);
    }

    proptest! {
        #[test]
        fn prop_never_cpu0_and_cycles(irq_count in 0usize..64, cpu_count in 2usize..128) {
            let irqs: Vec<u32> = (0..irq_count as u32).collect();
            let plan = distribute_over(&irqs, cpu_count);
            let assigned = cpus_of(&plan);
            prop_assert_eq!(assigned.len(), irq_count);
            for (i, cpu) in assigned.iter().enumerate() {
                prop_assert_eq!(*cpu, 1 + i % (cpu_count - 1));
            }
        }

        #[test]
        fn prop_mask_has_single_bit(cpu in 0usize..256) {
            let mask = affinity_mask(cpu);
            let ones: u32 = mask
                .split(',')
                .map(|g| u32::from_str_radix(g, 16).unwrap().count_ones())
                .sum();
            prop_assert_eq!(ones, 1);
            prop_assert_eq!(mask.split(',').count(), cpu / 32 + 1);
        }
    }
}
