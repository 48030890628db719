use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use wayprof::{
    commands::{self, Flow},
    paths::Paths,
    ui::{ColorMode, Ui},
};

#[derive(Parser)]
#[command(name = "wayprof")]
#[command(about = "Waydroid Image Profile Switcher - manage multiple Android image profiles")]
#[command(version)]
struct Cli {
    /// Profile root directory (default: ~/waydroid-images)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Runtime config file (default: /var/lib/waydroid/waydroid.cfg)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// When to use colors: always, auto, never
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: ColorMode,

    /// Omit the command to pick a profile interactively
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all discovered image profiles
    List,

    /// Show the active profile and the state of the managed paths
    Status,

    /// Switch the runtime to a profile
    Use {
        /// Profile id as shown by `list`
        id: String,
    },

    /// Register a profile by linking existing image files
    Add {
        /// Name for the new profile
        name: String,
        /// Path to the system image
        system: PathBuf,
        /// Path to the vendor image
        vendor: PathBuf,
    },

    /// Run diagnostics on the wayprof setup
    Doctor,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let ui = Ui::new(cli.color, cli.no_color);

    let paths = match Paths::new(cli.root.as_deref(), cli.config.as_deref()) {
        Ok(paths) => paths,
        Err(e) => {
            ui.err(format!("{:#}", e));
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Commands::List) => commands::list(&paths, &ui).map(|_| Flow::Done),
        Some(Commands::Status) => commands::status(&paths, &ui).map(|_| Flow::Done),
        Some(Commands::Use { id }) => commands::use_profile(&paths, &id, &ui).map(|_| Flow::Done),
        Some(Commands::Add {
            name,
            system,
            vendor,
        }) => commands::add(&paths, &name, &system, &vendor, &ui).map(|_| Flow::Done),
        Some(Commands::Doctor) => commands::doctor(&paths, &ui).map(|_| Flow::Done),
        None => commands::select(&paths, &ui),
    };

    match result {
        Ok(Flow::Done) => ExitCode::SUCCESS,
        // User backed out of the selector; distinct from a failed switch.
        Ok(Flow::Cancelled) => ExitCode::from(2),
        Err(e) => {
            ui.err(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
