//! plr CLI - Inspect and act on the persisted power loss recovery state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plr::{CheckpointStore, Config, FileStore, KeyValueStore, Recovery, SnapshotValidator, StdoutExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "plr")]
#[command(version)]
#[command(about = "Power loss recovery checkpointing and resume for print jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "plr.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,

    /// Show the saved checkpoint
    Status,

    /// Clear the saved checkpoint
    Reset,

    /// Rewrite the checkpointed job file and start it
    Resume,

    /// Put back the original of a rewritten job file
    Restore {
        /// Job file name, relative to the job directory
        #[arg(short, long)]
        file: String,
    },

    /// Remember the active bed mesh profile
    SaveMesh {
        /// Profile name
        #[arg(short, long)]
        profile: String,
    },

    /// Load the remembered bed mesh profile
    LoadMesh {
        /// Profiles the machine currently has
        #[arg(short, long, num_args = 1.., required = true)]
        available: Vec<String>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# plr configuration file

[recovery]
enabled = true
save_interval = 30.0       # seconds, 0 disables time-based saving
save_on_layer = true
history_size = 5           # 2..=20
save_delay = 2             # fallback when execution lag is unknown
tools = ["extruder", "extruder1"]
part_cooling_fans = ["fan"]
# chamber_heater = "chamber"
slow_homing_speed = 2.0    # mm/s
restart_gcode = """
M83
G92 E0
"""
before_resume_gcode = ""
after_resume_gcode = ""
before_calibrate_gcode = ""
after_calibrate_gcode = ""
debug = false

[storage]
variables_file = "~/printer_state_vars.json"
gcode_dir = "~/gcode"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn open_store(config: &Config) -> Result<CheckpointStore<dyn KeyValueStore>> {
    let path = config
        .storage
        .variables_path()
        .context("Failed to resolve variables file")?;
    let store = FileStore::new(&path)
        .with_context(|| format!("Failed to open variables file {path:?}"))?;
    Ok(CheckpointStore::new(Arc::new(store) as Arc<dyn KeyValueStore>))
}

fn recovery(config: &Config) -> Result<Recovery> {
    let gcode_dir = config
        .storage
        .gcode_path()
        .context("Failed to resolve job directory")?;
    Ok(Recovery::new(
        config.recovery.clone(),
        gcode_dir,
        open_store(config)?,
        Arc::new(StdoutExecutor),
    ))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Example = cli.command {
        print_example_config();
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    setup_logging(cli.verbose || config.recovery.debug);

    match cli.command {
        Commands::Example => {}

        Commands::Validate => {
            let r = &config.recovery;
            info!("Configuration is valid");
            info!(
                "  Time-based saving: {}",
                if r.time_based_enabled() {
                    format!("every {}s", r.save_interval)
                } else {
                    "disabled".to_string()
                }
            );
            info!("  History: {} snapshots, fallback delay {}", r.history_size, r.save_delay);
            info!("  Tools: {}", r.tools.join(", "));
        }

        Commands::Status => {
            let validator = SnapshotValidator::new(config.recovery.tools.clone());
            match open_store(&config)?
                .load(&validator)
                .context("Failed to read saved checkpoint")?
            {
                Some(checkpoint) => {
                    println!("Currently Saved State:\n{}", checkpoint.summary());
                    let queue = checkpoint.queue_status;
                    println!(
                        "Queue: {} pending ({:.2}s - {:.2}s)",
                        queue.pending, queue.min_time, queue.max_time
                    );
                }
                None => println!("No saved state found"),
            }
        }

        Commands::Reset => {
            open_store(&config)?
                .clear()
                .context("Failed to clear saved checkpoint")?;
            println!("State reset completed");
        }

        Commands::Resume => {
            let report = recovery(&config)?
                .resume_job()
                .context("Failed to resume from saved checkpoint")?;
            eprintln!("{report}");
        }

        Commands::Restore { file } => {
            let recovery = recovery(&config)?;
            let restored = recovery
                .restore_original(&file)
                .with_context(|| format!("Failed to restore {file}"))?;
            if restored {
                info!(file = %file, "Restored original job file");
            } else {
                info!(file = %file, "No backup to restore");
            }
        }

        Commands::SaveMesh { profile } => {
            recovery(&config)?
                .save_mesh(&profile)
                .context("Error saving bed mesh profile")?;
            info!(profile = %profile, "Saved bed mesh profile");
        }

        Commands::LoadMesh { available } => {
            let profile = recovery(&config)?
                .load_mesh(&available)
                .context("Error loading bed mesh profile")?;
            info!(profile = %profile, "Loaded bed mesh profile");
        }
    }

    Ok(())
}
