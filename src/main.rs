use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use unicode_width::UnicodeWidthStr;

use schemer::SchemeManager;
use schemer::logging::init_logger;
use schemer::models::{ColorScheme, SchemeError, SchemeSearch, scheme_display_name};
use schemer::storage::{
    Config, ConfigStorage, SchemeDirWatcher, TomlConfigStorage, TomlSchemeStorage,
    ensure_directories,
};

type Manager = SchemeManager<ColorScheme, TomlSchemeStorage>;

#[derive(Parser)]
#[command(name = "schemer")]
#[command(about = "Color scheme manager", long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/schemer/schemer.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available schemes
    List {
        /// Fuzzy filter on display names
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Print the current scheme
    Current,

    /// Select a scheme
    Use { name: String },

    /// Create an editable copy of a scheme
    Copy { name: String },

    /// Rename a user scheme
    Rename { old: String, new: String },

    /// Delete a user scheme
    Remove { name: String },

    /// Print a scheme as TOML
    Show { name: String },

    /// Reload schemes whenever the scheme directory changes
    Watch {
        /// Poll interval in milliseconds
        #[arg(short, long, default_value = "500")]
        interval: u64,
    },
}

/// Loaded config plus the manager built from it
struct Session {
    config: Config,
    config_storage: TomlConfigStorage,
    manager: Manager,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let session = open_session(cli.config)?;

    match cli.command {
        Commands::List { filter } => cmd_list(&session, filter.as_deref()),
        Commands::Current => cmd_current(&session),
        Commands::Use { name } => cmd_use(session, &name),
        Commands::Copy { name } => cmd_copy(&session, &name),
        Commands::Rename { old, new } => cmd_rename(session, &old, &new),
        Commands::Remove { name } => cmd_remove(&session, &name),
        Commands::Show { name } => cmd_show(&session, &name),
        Commands::Watch { interval } => cmd_watch(&session, interval),
    }
}

/// Load config, set up logging and populate the manager
fn open_session(config_path: Option<PathBuf>) -> Result<Session> {
    let (_data_dir, config_dir) = ensure_directories()?;
    let config_path = config_path.unwrap_or_else(|| config_dir.join("schemer.toml"));
    let config_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or(config_dir);

    let config_storage = TomlConfigStorage::new(config_path);
    let config = config_storage.load()?;

    match &config.general.log_file {
        Some(log_file) => {
            let echo_level = if config.general.debug_logging {
                "debug"
            } else {
                "warn"
            };
            init_logger(log_file, &config.general.log_level, echo_level)?;
        }
        None => env_logger::init(),
    }

    let manager = SchemeManager::new(
        config.general.schemes_dir(&config_dir),
        TomlSchemeStorage::new(),
    );

    // Bundled schemes first so stored files of the same name override them
    for name in &config.general.bundled {
        manager.load_bundled_scheme(name, "config")?;
    }
    manager.set_current_scheme_name(Some(&config.general.current_scheme), false);
    manager.load_schemes()?;

    Ok(Session {
        config,
        config_storage,
        manager,
    })
}

fn cmd_list(session: &Session, filter: Option<&str>) -> Result<()> {
    let manager = &session.manager;
    let schemes = manager.all_schemes();

    let names: Vec<String> = match filter {
        Some(query) => SchemeSearch::new()
            .search(&schemes, query)
            .into_iter()
            .map(|(name, _score)| name)
            .collect(),
        None => manager.all_scheme_names(),
    };

    let current = manager.current_scheme_name();
    let width = names
        .iter()
        .filter_map(|name| manager.find_scheme_by_name(name))
        .map(|s| scheme_display_name(&*s).width())
        .max()
        .unwrap_or(0);

    for name in &names {
        let Some(scheme) = manager.find_scheme_by_name(name) else {
            continue;
        };
        let display = scheme_display_name(&*scheme);
        let marker = if current.as_deref() == Some(name.as_str()) {
            '*'
        } else {
            ' '
        };
        let padding = " ".repeat(width - display.width());
        let bundled = if manager.is_metadata_editable(&scheme) {
            ""
        } else {
            "  (bundled)"
        };
        println!("{} {}{}  {}{}", marker, display, padding, name, bundled);
    }

    if names.is_empty() {
        println!("(no schemes)");
    }

    Ok(())
}

fn cmd_current(session: &Session) -> Result<()> {
    match session.manager.require_current_scheme() {
        Ok(Some(scheme)) => println!("{}", scheme.name),
        Ok(None) => println!("(none)"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn cmd_use(mut session: Session, name: &str) -> Result<()> {
    let scheme = session
        .manager
        .find_scheme_by_name(name)
        .ok_or_else(|| SchemeError::NotFound(name.to_string()))?;

    session.manager.set_current_scheme(Some(scheme));
    persist_selection(&mut session)?;
    println!("Using {}", name);
    Ok(())
}

fn cmd_copy(session: &Session, name: &str) -> Result<()> {
    let copy = session.manager.create_editable_copy(name)?;
    save_schemes(&session.manager)?;
    println!("Created {}", copy.name);
    Ok(())
}

fn cmd_rename(mut session: Session, old: &str, new: &str) -> Result<()> {
    let renamed = session.manager.rename_scheme(old, new)?;
    save_schemes(&session.manager)?;
    if session.config.general.current_scheme == old {
        persist_selection(&mut session)?;
    }
    println!("Renamed {} to {}", old, renamed.name);
    Ok(())
}

fn cmd_remove(session: &Session, name: &str) -> Result<()> {
    session.manager.delete_scheme(name)?;
    save_schemes(&session.manager)?;
    println!("Removed {}", name);
    Ok(())
}

fn cmd_show(session: &Session, name: &str) -> Result<()> {
    let scheme = session
        .manager
        .find_scheme_by_name(name)
        .ok_or_else(|| SchemeError::NotFound(name.to_string()))?;
    print!("{}", scheme.to_toml()?);
    Ok(())
}

fn cmd_watch(session: &Session, interval: u64) -> Result<()> {
    let manager = &session.manager;
    let watcher = SchemeDirWatcher::new(manager.root_directory())?;
    println!("Watching {:?} (Ctrl-C to stop)", watcher.dir());

    loop {
        if watcher.has_changes() {
            match manager.reload() {
                Ok(()) => {
                    let current = manager
                        .current_scheme()
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| "(unresolved)".to_string());
                    println!(
                        "Reloaded {} scheme(s), current: {}",
                        manager.all_scheme_names().len(),
                        current
                    );
                }
                Err(e) => log::error!("Failed to reload schemes: {:#}", e),
            }
        }
        thread::sleep(Duration::from_millis(interval));
    }
}

/// Write pending scheme changes, reporting every failure
fn save_schemes(manager: &Manager) -> Result<()> {
    let mut errors = Vec::new();
    manager.save(&mut errors);

    for e in &errors {
        eprintln!("error: {}", e);
    }
    if !errors.is_empty() {
        bail!("{} scheme(s) could not be saved", errors.len());
    }
    Ok(())
}

/// Store the manager's selection as the startup scheme
fn persist_selection(session: &mut Session) -> Result<()> {
    let Some(name) = session.manager.current_scheme_name() else {
        return Ok(());
    };

    session.config.general.current_scheme = name;
    session
        .config_storage
        .save(&session.config)
        .context("Failed to save selection to config")
}
