//! NodeTune CLI - kernel and hardware tuning for storage nodes

use anyhow::Context;
use clap::Parser;
use nodetune::config::{parse_duration, CliArgs, Commands, LogFormat, OutputFormat, TuneConfig};
use nodetune::core::Orchestrator;
use nodetune::error::{ErrorKind, TuneError};
use nodetune::report::{RunReport, EXIT_ABORTED, EXIT_FAILURE, EXIT_SUCCESS};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<TuneError>() {
                Some(err) if err.kind() == ErrorKind::Config => EXIT_ABORTED,
                _ => EXIT_FAILURE,
            }
        }
    };
    std::process::exit(code);
}

fn init_logging(args: &CliArgs) {
    let level = if args.quiet {
        "nodetune=warn"
    } else {
        match args.verbose {
            0 => "nodetune=info",
            1 => "nodetune=debug",
            _ => "nodetune=trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: CliArgs) -> anyhow::Result<i32> {
    let config = TuneConfig::from_cli(&args)?;
    if args.verbose > 0 {
        print_config(&config);
    }
    let orchestrator = Orchestrator::new(config)?;

    match args.command.clone().unwrap_or(Commands::Tune) {
        Commands::Tune | Commands::Check => {
            let outcome = orchestrator.run()?;
            report(&args, &RunReport::new(&outcome))
        }
        Commands::Profile => {
            let outcome = orchestrator.run_profile()?;
            report(&args, &RunReport::new(&outcome))
        }
        Commands::Devices => cmd_devices(&args, &orchestrator),
        Commands::Status => cmd_status(&args, &orchestrator),
        Commands::Reset => {
            orchestrator.reset()?;
            println!("Cleared tuning flags for {}", orchestrator.node());
            Ok(EXIT_SUCCESS)
        }
        Commands::Agent { interval } => {
            let interval = parse_duration(&interval)
                .map_err(|e| TuneError::config(format!("invalid interval: {}", e)))?;
            cmd_agent(orchestrator, interval, args.output_format)
        }
    }
}

fn report(args: &CliArgs, report: &RunReport<'_>) -> anyhow::Result<i32> {
    match args.output_format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text if !args.quiet => report.print(),
        OutputFormat::Text => {}
    }
    Ok(report.exit_code())
}

fn cmd_devices(args: &CliArgs, orchestrator: &Orchestrator) -> anyhow::Result<i32> {
    let discovery = orchestrator.discover();

    if args.output_format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&discovery)?);
        return Ok(EXIT_SUCCESS);
    }

    let env = &discovery.environment;
    println!("=== Node {} ===", discovery.node);
    println!(
        "Provider:     {} ({:?})",
        env.provider, env.source
    );
    println!(
        "Instance:     {}",
        env.instance_type.as_deref().unwrap_or("unknown")
    );
    println!(
        "Distro:       {} {}",
        env.distro.id,
        env.distro.version.as_deref().unwrap_or("")
    );
    println!("CPUs:         {}", discovery.cpus.len());

    println!("\nBlock devices:");
    if discovery.devices.is_empty() {
        println!("  none");
    }
    for device in &discovery.devices {
        let sources: Vec<String> = device.sources.iter().map(|p| p.display().to_string()).collect();
        if sources.is_empty() {
            println!("  {}", device.name);
        } else {
            println!("  {:<12} <- {}", device.name, sources.join(", "));
        }
    }

    println!("\nNetwork interfaces:");
    if discovery.interfaces.is_empty() {
        println!("  none");
    }
    for iface in &discovery.interfaces {
        println!(
            "  {:<12} {} IRQs, {} RX queues",
            iface.name,
            iface.irqs.len(),
            iface.rx_queues
        );
    }
    Ok(EXIT_SUCCESS)
}

fn cmd_status(args: &CliArgs, orchestrator: &Orchestrator) -> anyhow::Result<i32> {
    let flags = orchestrator.status()?;

    if args.output_format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&flags)?);
        return Ok(EXIT_SUCCESS);
    }

    let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    println!("=== Node {} ===", orchestrator.node());
    println!("Tuned:            {} ({})", flags.tuned, stamp(flags.tuned_timestamp));
    println!(
        "Tune attempted:   {} ({})",
        flags.tune_attempted,
        stamp(flags.tune_attempted_timestamp)
    );
    println!(
        "I/O profile:      {} ({})",
        flags.iotune_completed,
        stamp(flags.iotune_timestamp)
    );
    println!("Reboot required:  {}", flags.reboot_required);
    Ok(EXIT_SUCCESS)
}

fn cmd_agent(
    orchestrator: Orchestrator,
    interval: Duration,
    format: OutputFormat,
) -> anyhow::Result<i32> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let orchestrator = Arc::new(orchestrator);

    runtime.block_on(async {
        tracing::info!(
            "Agent started, running every {}",
            humantime::format_duration(interval)
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = EXIT_SUCCESS;
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping agent");
                    break;
                }
            }

            let orch = Arc::clone(&orchestrator);
            match tokio::task::spawn_blocking(move || orch.run()).await {
                Ok(Ok(outcome)) => {
                    let report = RunReport::new(&outcome);
                    last = report.exit_code();
                    match format {
                        OutputFormat::Json => match report.to_json() {
                            Ok(json) => println!("{}", json),
                            Err(e) => tracing::warn!("Failed to encode report: {}", e),
                        },
                        OutputFormat::Text => report.print(),
                    }
                }
                Ok(Err(TuneError::LockHeld(path))) => {
                    tracing::warn!("Run lock {} is held, skipping this interval", path.display());
                }
                Ok(Err(e)) if e.kind() == ErrorKind::Config => return Err(e.into()),
                Ok(Err(e)) => {
                    tracing::error!("Tuning run failed: {}", e);
                    last = EXIT_FAILURE;
                }
                Err(e) => {
                    tracing::error!("Tuning task panicked: {}", e);
                    last = EXIT_FAILURE;
                }
            }
        }
        Ok(last)
    })
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_config(config: &TuneConfig) {
    println!("=== Configuration ===");
    println!("Host root:      {}", config.host_root.display());
    println!("Directories:    {:?}", config.directories);
    if !config.devices.is_empty() {
        println!("Devices:        {:?}", config.devices);
    }
    if !config.interfaces.is_empty() {
        println!("Interfaces:     {:?}", config.interfaces);
    }
    println!("Check only:     {}", config.check_only);
    println!("Force retune:   {}", config.force_retune);
    println!("Boot params:    {}", config.tune_boot_params);
    println!(
        "Timeout:        {}",
        humantime::format_duration(config.timeout())
    );
    println!("State file:     {}", config.state_file.display());
    println!();
}
