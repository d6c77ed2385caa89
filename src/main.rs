//! expcfg CLI
//!
//! Entry point for the `expcfg` command-line tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use expcfg::{
    LayerNames, Pipeline, ResolutionEvent, ResolveOptions, ResolvedConfig, RecordingSink, Result,
    TracingSink,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "expcfg")]
#[command(about = "Resolve layered experiment configurations", version)]
struct Cli {
    /// Log resolution steps (info level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log everything, including each override location (debug level)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and print the final configuration
    Resolve {
        #[command(flatten)]
        args: ResolveArgs,

        /// Output format for the tree
        #[arg(long, value_enum, default_value = "yaml")]
        format: Format,

        /// Also write the full record with provenance to this file (JSON)
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Show where each override landed and which fields were derived
    Explain {
        #[command(flatten)]
        args: ResolveArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ResolveArgs {
    /// Trainer config name under <config-root>/trainer
    #[arg(long, default_value = "default")]
    trainer: String,

    /// Model config name under <config-root>/models
    #[arg(long, default_value = "motion_clip")]
    model: String,

    /// Dataset config name under <config-root>/datasets
    #[arg(long, default_value = "motion_clip")]
    dataset: String,

    /// Directory holding the layer documents
    #[arg(long, default_value = "src/configs")]
    config_root: PathBuf,

    /// Comma-separated device ids (e.g., "0,1"); CPU when omitted
    #[arg(long)]
    devices: Option<String>,

    /// Checkpoint to resume training from
    #[arg(long)]
    resume_ckpt_path: Option<PathBuf>,

    /// Checkpoint to load weights from
    #[arg(long)]
    load_ckpt_path: Option<PathBuf>,

    /// Disable the training logger
    #[arg(long)]
    no_log: bool,

    /// Suffix appended to the run version
    #[arg(long, default_value = "")]
    log_suffix: String,

    /// Root directory for run logs
    #[arg(long, default_value = "logs")]
    log_root: String,

    /// Do not shuffle the training loader
    #[arg(long)]
    no_shuffle_train: bool,

    /// Training loader length; sets model.training_kwargs.num_training_steps
    #[arg(long)]
    train_batches: Option<u64>,

    /// Overrides as key=value (bare key or dotted path)
    overrides: Vec<String>,
}

impl ResolveArgs {
    fn options(&self) -> ResolveOptions {
        ResolveOptions {
            config_root: self.config_root.clone(),
            layers: LayerNames::new(&self.trainer, &self.model, &self.dataset),
            devices: self.devices.clone(),
            no_log: self.no_log,
            log_suffix: self.log_suffix.clone(),
            log_root: self.log_root.clone(),
            train_batches: self.train_batches,
            resume_ckpt_path: self.resume_ckpt_path.clone(),
            load_ckpt_path: self.load_ckpt_path.clone(),
            no_shuffle_train: self.no_shuffle_train,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);

    let result = match cli.command {
        Commands::Resolve { args, format, dump } => run_resolve(&args, format, dump),
        Commands::Explain { args, json } => run_explain(&args, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// `--debug` > `--verbose` > `RUST_LOG` > warn
fn init_logging(verbose: bool, debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn run_resolve(args: &ResolveArgs, format: Format, dump: Option<PathBuf>) -> Result<()> {
    let pipeline = Pipeline::new(args.options());
    let resolved = pipeline.resolve(&args.overrides, &mut TracingSink)?;

    // Fail on a tree training code could not consume.
    pipeline.plan(&resolved)?;

    print!("{}", render(&resolved, format)?);

    if let Some(path) = dump {
        resolved.write_to_file(&path)?;
        tracing::info!(path = %path.display(), "wrote resolved config");
    }
    Ok(())
}

fn render(resolved: &ResolvedConfig, format: Format) -> Result<String> {
    match format {
        Format::Yaml => resolved.config_to_yaml(),
        Format::Json => serde_json::to_string_pretty(&resolved.config)
            .map(|s| s + "\n")
            .map_err(|e| expcfg::ConfigError::Serialize(e.to_string())),
    }
}

fn run_explain(args: &ResolveArgs, json: bool) -> Result<()> {
    let pipeline = Pipeline::new(args.options());
    let mut sink = RecordingSink::new();
    pipeline.resolve(&args.overrides, &mut sink)?;

    let events: Vec<&ResolutionEvent> = sink
        .events
        .iter()
        .filter(|e| !matches!(e, ResolutionEvent::Resolved { .. }))
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&events)
            .map_err(|e| expcfg::ConfigError::Serialize(e.to_string()))?;
        println!("{}", out);
        return Ok(());
    }

    for event in events {
        println!("{}", describe(event));
    }
    Ok(())
}

fn describe(event: &ResolutionEvent) -> String {
    match event {
        ResolutionEvent::LayerLoaded { layer, name, path } => {
            format!("layer    {} '{}' from {}", layer, name, path)
        }
        ResolutionEvent::OverrideApplied {
            key,
            value,
            locations,
        } => {
            let mut out = format!("override {} = {}", key, value);
            for location in locations {
                out.push_str(&format!("\n         -> {}", location));
            }
            out
        }
        ResolutionEvent::DevicesBound { devices } => format!("derived  trainer.devices = {:?}", devices),
        ResolutionEvent::CpuFallback => "derived  trainer.accelerator = cpu, trainer.devices = 1".to_string(),
        ResolutionEvent::RunNamed {
            save_dir,
            name,
            version,
        } => format!("derived  trainer.logger -> {}/{}/{}", save_dir, name, version),
        ResolutionEvent::LoggingDisabled => "derived  trainer.logger = false".to_string(),
        ResolutionEvent::BatchSizeDistributed { per_device, devices } => format!(
            "derived  dataloader.batch_size = {} per device ({} devices)",
            per_device, devices
        ),
        ResolutionEvent::BatchSizeReduced {
            requested,
            effective,
            ..
        } => format!("warning  real batch size is {} (requested {})", effective, requested),
        ResolutionEvent::EpochsScaled { scaling, max_epochs } => format!(
            "derived  trainer.max_epochs = {} (epoch length scaled by {})",
            max_epochs, scaling
        ),
        ResolutionEvent::TrainingSteps { steps } => {
            format!("derived  model.training_kwargs.num_training_steps = {}", steps)
        }
        ResolutionEvent::Resolved { .. } => "resolved".to_string(),
    }
}
