//! Block device and filesystem tuning units

use super::irq::{distribute, IrqPlan};
use super::units::{ApplyOutcome, CheckOutcome};
use super::RunContext;
use crate::error::{IoResultExt, Result, TuneError};
use crate::system::tools::FSTRIM_JOB;
use crate::system::{available_choices, selected_choice, BlockDevice, CloudProvider, Host};
use std::path::PathBuf;

/// Schedulers in order of preference
pub const SCHEDULER_PREFERENCE: &[&str] = &["none", "noop"];
/// `nomerges` value disabling all merge attempts
pub const NOMERGES: &str = "2";
/// Cache mode forced on persistent disks
pub const WRITE_CACHE_MODE: &str = "write through";
/// The only provider whose disks get write cache tuning
pub const WRITE_CACHE_PROVIDER: CloudProvider = CloudProvider::Gcp;

fn scheduler_target(host: &Host, device: &BlockDevice) -> Result<(String, &'static str)> {
    device.ensure_present(host)?;
    let content = host.read_interface(device.scheduler_path())?;
    let choices = available_choices(&content);
    let target = SCHEDULER_PREFERENCE
        .iter()
        .copied()
        .find(|s| choices.contains(s))
        .ok_or_else(|| {
            TuneError::unsupported(format!(
                "{} offers no none/noop scheduler ({})",
                device.name, content
            ))
        })?;
    Ok((selected_choice(&content).to_string(), target))
}

pub fn check_disk_scheduler(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<CheckOutcome> {
    let (current, target) = scheduler_target(ctx.host, device)?;
    if current == target {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "{} scheduler is {}, want {}",
            device.name, current, target
        )))
    }
}

pub fn apply_disk_scheduler(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<ApplyOutcome> {
    let (_, target) = scheduler_target(ctx.host, device)?;
    tracing::info!("{}: scheduler -> {}", device.name, target);
    ctx.host.write(device.scheduler_path(), target)?;
    Ok(ApplyOutcome::default())
}

pub fn check_disk_nomerges(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<CheckOutcome> {
    device.ensure_present(ctx.host)?;
    let current = ctx.host.read_interface(device.nomerges_path())?;
    if current == NOMERGES {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "{} nomerges is {}",
            device.name, current
        )))
    }
}

pub fn apply_disk_nomerges(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<ApplyOutcome> {
    ctx.host.write(device.nomerges_path(), NOMERGES)?;
    Ok(ApplyOutcome::default())
}

fn device_irq_plan(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<IrqPlan> {
    device.ensure_present(ctx.host)?;
    let irqs = device.irqs(ctx.host);
    if irqs.is_empty() {
        return Err(TuneError::unsupported(format!(
            "{} exposes no interrupt lines",
            device.name
        )));
    }
    let plan = distribute(&irqs, &ctx.online_cpus());
    if plan == IrqPlan::NoEligibleCpu {
        tracing::debug!("{}: single CPU host, leaving IRQ affinity alone", device.name);
    }
    Ok(plan)
}

pub fn check_disk_irq(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<CheckOutcome> {
    let plan = device_irq_plan(ctx, device)?;
    if plan.is_applied(ctx.host)? {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "{} IRQs are not distributed",
            device.name
        )))
    }
}

pub fn apply_disk_irq(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<ApplyOutcome> {
    let plan = device_irq_plan(ctx, device)?;
    let changed = plan.apply(ctx.host)?;
    tracing::info!("{}: pinned {} IRQs", device.name, changed);
    Ok(ApplyOutcome::default())
}

fn ensure_write_cache_applies(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<()> {
    if ctx.environment.provider != WRITE_CACHE_PROVIDER {
        return Err(TuneError::unsupported(format!(
            "write cache tuning only applies on {}",
            WRITE_CACHE_PROVIDER
        )));
    }
    device.ensure_present(ctx.host)
}

pub fn check_disk_write_cache(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<CheckOutcome> {
    ensure_write_cache_applies(ctx, device)?;
    let current = ctx.host.read_interface(device.write_cache_path())?;
    if current == WRITE_CACHE_MODE {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "{} write cache is '{}'",
            device.name, current
        )))
    }
}

pub fn apply_disk_write_cache(ctx: &RunContext<'_>, device: &BlockDevice) -> Result<ApplyOutcome> {
    ensure_write_cache_applies(ctx, device)?;
    ctx.host.write(device.write_cache_path(), WRITE_CACHE_MODE)?;
    Ok(ApplyOutcome::default())
}

fn ballast_path(ctx: &RunContext<'_>) -> Result<PathBuf> {
    ctx.ballast_path()
        .ok_or_else(|| TuneError::not_found("no directory or ballast path configured"))
}

pub fn check_ballast_file(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    let path = ballast_path(ctx)?;
    let full = ctx.host.path(&path);
    match std::fs::metadata(&full) {
        Ok(meta) if meta.is_file() && meta.len() == ctx.config.ballast_size => {
            Ok(CheckOutcome::Satisfied)
        }
        Ok(meta) => Ok(CheckOutcome::diverged(format!(
            "{} is {} bytes, want {}",
            path.display(),
            meta.len(),
            ctx.config.ballast_size
        ))),
        Err(_) => Ok(CheckOutcome::diverged(format!(
            "{} does not exist",
            path.display()
        ))),
    }
}

pub fn apply_ballast_file(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    let path = ballast_path(ctx)?;
    let size = ctx.config.ballast_size;
    let file = ctx.host.open_for_write(&path)?;
    let full = ctx.host.path(&path);

    if file.metadata().with_path(&full)?.len() > size {
        file.set_len(size).with_path(&full)?;
    }
    preallocate(&file, size).with_path(&full)?;
    file.sync_all().with_path(&full)?;

    tracing::info!(
        "Ballast {} reserved ({})",
        path.display(),
        humansize::format_size(size, humansize::BINARY)
    );
    Ok(ApplyOutcome::default())
}

/// Reserve `size` bytes of real blocks for a file
#[cfg(target_os = "linux")]
fn preallocate(file: &std::fs::File, size: u64) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let len = libc::off_t::try_from(size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "ballast too large"))?;
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len) };
    match rc {
        0 => Ok(()),
        libc::EOPNOTSUPP | libc::EINVAL => {
            tracing::warn!("posix_fallocate unsupported, ballast will be sparse");
            file.set_len(size)
        }
        errno => Err(std::io::Error::from_raw_os_error(errno)),
    }
}

#[cfg(not(target_os = "linux"))]
fn preallocate(file: &std::fs::File, size: u64) -> std::io::Result<()> {
    file.set_len(size)
}

pub fn check_fstrim(ctx: &RunContext<'_>) -> Result<CheckOutcome> {
    if ctx.tools.scheduler.is_scheduled(ctx.host, &FSTRIM_JOB)? {
        Ok(CheckOutcome::Satisfied)
    } else {
        Ok(CheckOutcome::diverged(format!(
            "{} is not scheduled ({})",
            FSTRIM_JOB.name,
            ctx.tools.scheduler.name()
        )))
    }
}

pub fn apply_fstrim(ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
    tracing::info!("Scheduling weekly fstrim via {}", ctx.tools.scheduler.name());
    ctx.tools.scheduler.schedule(ctx.host, &FSTRIM_JOB)?;
    Ok(ApplyOutcome::default())
}
