//! CLI command definitions for mms-workflow.
//!
//! Every campaign command reads a campaign file (`--config`), applies the
//! `MMS_*` environment overrides and then works through the pipeline API.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::history::{HistoryStatus, HistoryStore};
use crate::pipeline::{CampaignConfig, WorkflowRun};
use crate::runner::ProcessInvoker;
use crate::scheduler::{fill_order, total_slots};
use crate::svr::Svr;

/// Matchup campaign workflow engine.
#[derive(Parser)]
#[command(name = "mms-workflow")]
#[command(about = "Run resumable, multi-stage satellite matchup campaigns")]
#[command(version)]
#[command(
    long_about = "mms-workflow runs a matchup campaign declared in a YAML or JSON file.\n\nEach primary sensor is crossed with the months of the campaign period it is valid for, and every resulting unit is passed through the declared stage programs in order.\n\nExample usage:\n  mms-workflow --config campaigns/mms6b.yaml run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Campaign file (YAML or JSON).
    #[arg(short, long, global = true, env = "MMS_CAMPAIGN")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the campaign.
    Run(RunArgs),

    /// Validate the campaign without running anything.
    Validate(ValidateArgs),

    /// List the processing units of the campaign.
    Units(UnitsArgs),

    /// Show the run history of the campaign.
    History(HistoryArgs),

    /// Sensor validation report helpers.
    Svr(SvrArgs),

    /// Write an example campaign file.
    GenerateConfig(GenerateConfigArgs),
}

/// Arguments for `mms-workflow run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Print the stage commands instead of running them.
    #[arg(long)]
    pub dry_run: bool,

    /// Enable run history regardless of the campaign file.
    #[arg(long)]
    pub with_history: bool,

    /// Drop ARC stages regardless of the campaign file.
    #[arg(long)]
    pub without_arc: bool,

    /// Directory containing the stage scripts.
    #[arg(long)]
    pub script_dir: Option<PathBuf>,

    /// Watchdog per stage invocation, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `mms-workflow validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Print the validated plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `mms-workflow units`.
#[derive(Parser, Debug)]
pub struct UnitsArgs {
    /// Only list units of this sensor.
    #[arg(long)]
    pub sensor: Option<String>,
}

/// Arguments for `mms-workflow history`.
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Only show records of this stage.
    #[arg(long)]
    pub stage: Option<String>,

    /// Only show records with this status (pending, completed, failed).
    #[arg(long)]
    pub status: Option<String>,

    /// Print records as JSON Lines.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `mms-workflow svr`.
#[derive(Parser, Debug)]
pub struct SvrArgs {
    #[command(subcommand)]
    pub command: SvrCommand,
}

/// SVR helper subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum SvrCommand {
    /// Print the svr.sh invocation for one measure.
    Call {
        interpreter: String,
        input_dir: String,
        result_dir: String,
        measure: String,
    },

    /// Print the archive input path of a sensor month.
    InputPath {
        root: PathBuf,
        sensor: String,
        year: String,
        month: String,
    },

    /// Print the sensor family of a raw sensor identifier.
    Sensor { raw: String },

    /// Print the report destination of a sensor month.
    PostCondition {
        sensor_dir: String,
        year: String,
        month: String,
    },
}

/// Arguments for `mms-workflow generate-config`.
#[derive(Parser, Debug)]
pub struct GenerateConfigArgs {
    /// Output file; prints to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write JSON instead of YAML.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_campaign_command(cli.config.as_deref(), args).await,
        Commands::Validate(args) => run_validate_command(cli.config.as_deref(), args),
        Commands::Units(args) => run_units_command(cli.config.as_deref(), args),
        Commands::History(args) => run_history_command(cli.config.as_deref(), args).await,
        Commands::Svr(args) => {
            run_svr_command(args);
            Ok(())
        }
        Commands::GenerateConfig(args) => run_generate_config_command(args),
    }
}

fn load_campaign(path: Option<&Path>) -> anyhow::Result<CampaignConfig> {
    let path = path.context("no campaign file given (use --config or MMS_CAMPAIGN)")?;
    let config = CampaignConfig::from_file(path)
        .with_context(|| format!("failed to load campaign file {}", path.display()))?
        .apply_env_overrides()?;
    info!(path = %path.display(), usecase = %config.usecase, "Loaded campaign");
    Ok(config)
}

// ============================================================================
// Campaign Commands
// ============================================================================

async fn run_campaign_command(config_path: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_campaign(config_path)?;
    if args.with_history {
        config.with_history = true;
    }
    if args.without_arc {
        config.without_arc = true;
    }
    if let Some(dir) = args.script_dir {
        config.script_dir = Some(dir);
    }
    if let Some(secs) = args.timeout_secs {
        config.unit_timeout_secs = Some(secs);
    }

    let plan = config.validate()?;

    let mut invoker = ProcessInvoker::new().with_timeout(config.unit_timeout());
    if let Some(dir) = &config.script_dir {
        invoker = invoker.with_script_dir(dir);
    }

    if args.dry_run {
        print_dry_run(&config, &plan, &invoker);
        return Ok(());
    }

    let mut workflow = config.to_workflow();
    let result = workflow.run(config.run_options(), Arc::new(invoker)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("\n=== Campaign {} ===", result.usecase);
        println!("Run id:         {}", result.run_id);
        println!("Period:         {}", result.period);
        println!("Units:          {}", result.unit_count);
        println!("State:          {:?}", result.state);
        println!("Duration:       {:.1}s", result.duration.as_secs_f64());
        for stage in &result.dispatch.stages {
            println!(
                "  {:<24} invoked {:>5}  completed {:>5}  failed {:>5}  skipped {:>5}",
                stage.stage,
                stage.invoked(),
                stage.completed(),
                stage.failed(),
                stage.skipped_complete + stage.skipped_blocked
            );
        }
        if let Some(stage) = &result.dispatch.halted_after {
            println!("Halted after:   {}", stage);
        }
    }

    if !result.is_success() {
        anyhow::bail!(
            "campaign {} failed: {} failed unit(s)",
            result.usecase,
            result.dispatch.total_failed()
        );
    }
    Ok(())
}

fn print_dry_run(config: &CampaignConfig, plan: &WorkflowRun, invoker: &ProcessInvoker) {
    for line in dry_run_lines(config, plan, invoker) {
        println!("{}", line);
    }
}

/// Commands a run would issue, one block per stage. Units are laid over the
/// stage's slots in the order a fresh pool leases them; later units in a real
/// run take whichever slot frees first.
fn dry_run_lines(config: &CampaignConfig, plan: &WorkflowRun, invoker: &ProcessInvoker) -> Vec<String> {
    let workflow = config.to_workflow();
    let ctx = workflow.invocation_context(plan);
    let units = plan.units();
    let mut lines = Vec::new();

    for stage in &plan.stages {
        let slots = fill_order(&plan.hosts, stage.parallelism.min(total_slots(&plan.hosts)));
        lines.push(format!(
            "# {} (parallelism {}, {} slot(s))",
            stage.name(),
            stage.parallelism,
            slots.len()
        ));
        if slots.is_empty() {
            continue;
        }
        for (i, unit) in units.iter().enumerate() {
            let slot = &slots[i % slots.len()];
            lines.push(invoker.build_command(stage, unit, &slot.host, &ctx).to_string());
        }
    }
    lines
}

#[derive(Debug, Serialize)]
struct PlanSummary<'a> {
    usecase: &'a str,
    period: String,
    sensors: Vec<&'a str>,
    samples_per_month: u64,
    units: usize,
    stages: Vec<(&'a str, usize)>,
    hosts: Vec<(&'a str, usize)>,
    with_history: bool,
}

fn run_validate_command(config_path: Option<&Path>, args: ValidateArgs) -> anyhow::Result<()> {
    let config = load_campaign(config_path)?;
    let plan = config.validate()?;

    let summary = PlanSummary {
        usecase: &plan.usecase,
        period: plan.period.to_string(),
        sensors: plan.catalog.sensors().iter().map(|s| s.name.as_str()).collect(),
        samples_per_month: plan.sampling.samples_per_month,
        units: plan.units().len(),
        stages: plan.stages.iter().map(|s| (s.name(), s.parallelism)).collect(),
        hosts: plan.hosts.iter().map(|h| (h.hostname.as_str(), h.slots)).collect(),
        with_history: plan.with_history,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Campaign {} is valid", summary.usecase);
        println!("Period:         {}", summary.period);
        println!("Sensors:        {}", summary.sensors.join(", "));
        println!("Units:          {}", summary.units);
        for (name, parallelism) in &summary.stages {
            println!("  stage {:<24} parallelism {}", name, parallelism);
        }
        for (host, slots) in &summary.hosts {
            println!("  host  {:<24} slots {}", host, slots);
        }
    }
    Ok(())
}

fn run_units_command(config_path: Option<&Path>, args: UnitsArgs) -> anyhow::Result<()> {
    let config = load_campaign(config_path)?;
    let plan = config.validate()?;

    for unit in plan.units() {
        if args.sensor.as_deref().is_some_and(|s| s != unit.sensor.name) {
            continue;
        }
        println!(
            "{}\t{}\t{}\t{}",
            unit.sensor.name,
            unit.month.key(),
            unit.start_date(),
            unit.end_date()
        );
    }
    Ok(())
}

async fn run_history_command(config_path: Option<&Path>, args: HistoryArgs) -> anyhow::Result<()> {
    let config = load_campaign(config_path)?;
    let path = config.to_workflow().history_path();

    let status = args
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?;

    let store = HistoryStore::persistent(&path);
    if store.load().await == 0 {
        warn!(path = %path.display(), "No history records found");
    }

    for record in store.records().await {
        if args.stage.as_deref().is_some_and(|s| s != record.stage) {
            continue;
        }
        if status.is_some_and(|s| s != record.status) {
            continue;
        }
        if args.json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                record.sensor,
                record.month,
                record.stage,
                record.status,
                record.reason.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn parse_status(value: &str) -> anyhow::Result<HistoryStatus> {
    match value.to_lowercase().as_str() {
        "pending" => Ok(HistoryStatus::Pending),
        "completed" => Ok(HistoryStatus::Completed),
        "failed" => Ok(HistoryStatus::Failed),
        other => anyhow::bail!("unknown status '{}': expected pending, completed or failed", other),
    }
}

// ============================================================================
// Helper Commands
// ============================================================================

fn run_svr_command(args: SvrArgs) {
    match args.command {
        SvrCommand::Call {
            interpreter,
            input_dir,
            result_dir,
            measure,
        } => println!(
            "{}",
            Svr::assemble_call(&interpreter, &input_dir, &result_dir, &measure)
        ),
        SvrCommand::InputPath {
            root,
            sensor,
            year,
            month,
        } => println!(
            "{}",
            Svr::assemble_input_path(&root, &sensor, &year, &month).display()
        ),
        SvrCommand::Sensor { raw } => println!("{}", Svr::extract_sensor_name(&raw)),
        SvrCommand::PostCondition {
            sensor_dir,
            year,
            month,
        } => println!("{}", Svr::create_post_condition(&sensor_dir, &year, &month)),
    }
}

fn run_generate_config_command(args: GenerateConfigArgs) -> anyhow::Result<()> {
    let example = CampaignConfig::example();
    let content = if args.json {
        serde_json::to_string_pretty(&example)?
    } else {
        example.to_yaml()?
    };

    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
            info!(path = %path.display(), "Wrote example campaign");
        }
        None => print!("{}", content),
    }
    Ok(())
}
