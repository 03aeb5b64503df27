//! distupgrade - Main entry point

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use distupgrade::cli::{Cli, Commands};
use distupgrade::logging::init_logging;
use distupgrade::os_release::{running_kernel, OsRelease};
use distupgrade::prompt::{AssumeYes, Prompter, StdinPrompter};
use distupgrade::{
    process_guard, HardwareFacts, Profile, Reporter, RunContext, SystemRunner, UpgradeConfig,
    UpgradeError, Upgrader,
};

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    /// The upgrader already printed the failure; only the exit code remains.
    Reported(i32),
}

fn main() {
    let cli = Cli::parse_args();

    let result = run(cli);
    if let Err(err) = &result {
        eprintln!("distupgrade: {:#}", err);
    }
    let code = exit_code(&result);
    if code != 0 {
        std::process::exit(code);
    }
}

fn exit_code(result: &anyhow::Result<Outcome>) -> i32 {
    match result {
        Ok(Outcome::Done) => 0,
        Ok(Outcome::Reported(code)) => *code,
        Err(err) => err
            .downcast_ref::<UpgradeError>()
            .map(UpgradeError::exit_code)
            .unwrap_or(1),
    }
}

fn run(cli: Cli) -> anyhow::Result<Outcome> {
    match cli.command() {
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&UpgradeConfig::default())?);
            Ok(Outcome::Done)
        }
        Commands::Validate { file } => {
            init_logging(None)?;
            validate_config(&file).map(|()| Outcome::Done)
        }
        Commands::Detect => {
            init_logging(None)?;
            detect().map(|()| Outcome::Done)
        }
        Commands::Upgrade => run_upgrade(&cli, Profile::Generic),
        Commands::Sbc => run_upgrade(&cli, Profile::Sbc),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<UpgradeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = UpgradeConfig::load_from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.validate()?;
            config
        }
        None => UpgradeConfig::default(),
    };
    if let Some(dir) = &cli.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(policy) = cli.reboot {
        config.reboot = policy;
    }
    Ok(config)
}

fn validate_config(file: &Path) -> anyhow::Result<()> {
    info!("Validating configuration file: {}", file.display());
    let config = UpgradeConfig::load_from_file(file)
        .with_context(|| format!("loading {}", file.display()))?;
    config.validate()?;
    Reporter::new().ok(&format!(
        "{} is valid ({} conflict rules, {} problematic packages)",
        file.display(),
        config.conflict_rules.len(),
        config.problematic_packages.len()
    ));
    Ok(())
}

fn detect() -> anyhow::Result<()> {
    let reporter = Reporter::new();
    let os = OsRelease::detect(Path::new("/"));
    let facts = HardwareFacts::detect(Path::new("/"));

    reporter.header("System");
    reporter.info(&format!("OS:     {}", os));
    reporter.info(&format!("Kernel: {}", running_kernel()));
    reporter.header("Hardware");
    for line in facts.to_lines() {
        reporter.info(&line);
    }
    Ok(())
}

fn run_upgrade(cli: &Cli, profile: Profile) -> anyhow::Result<Outcome> {
    let config = load_config(cli)?;
    let os = OsRelease::detect(Path::new("/"));
    let ctx = RunContext::new(&config.log_dir, os, profile, cli.dry_run, cli.yes);

    let log_file: Option<PathBuf> = match init_logging(Some(&ctx.log_file())) {
        Ok(()) => Some(ctx.log_file()),
        Err(e) => {
            // Not root, or a read-only /var/log: keep going with stderr only
            init_logging(None)?;
            warn!("Cannot write {}: {}", ctx.log_file().display(), e);
            None
        }
    };
    info!(
        "distupgrade {} starting ({} profile, dry_run={})",
        env!("CARGO_PKG_VERSION"),
        profile,
        cli.dry_run
    );

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let mut runner = SystemRunner::new(cli.dry_run);
    if let Some(path) = &log_file {
        runner = runner.with_log_file(path);
    }
    let prompter: Box<dyn Prompter> = if cli.yes {
        Box::new(AssumeYes)
    } else {
        Box::new(StdinPrompter)
    };
    let reporter = Reporter::new();

    let summary = match Upgrader::new(&ctx, &config, &runner, prompter.as_ref(), &reporter).run() {
        Ok(summary) => summary,
        Err(e) => return Ok(Outcome::Reported(e.exit_code())),
    };

    if let Some(path) = &summary.report_file {
        println!("Report: {}", path.display());
    }
    if let Some(path) = &log_file {
        println!("Log:    {}", path.display());
    }
    Ok(Outcome::Done)
}
