//! Modwarden - mod folder manager for PAYDAY 2
//!
//! Headless entry point.
//!
//! # Overview
//!
//! Each invocation runs one command against the configured game install:
//!
//! ```text
//! modwarden set-game-path <dir>
//! modwarden list
//! modwarden enable <mod>...
//! modwarden disable <mod>...
//! modwarden delete <mod>...
//! modwarden install <mods|mods_override|maps> <folder-or-archive>...
//! modwarden recategorize <mods|mods_override|maps> <mod>...
//! modwarden relocate-disabled <dir>
//! modwarden ignore <mod>... / unignore <mod>...
//! modwarden tag <tag> <mod>... / untag <tag> <mod>...
//! modwarden profile list | add <name> [mod...] | remove <name> | apply <name>
//! ```
//!
//! It initializes:
//! - Logging infrastructure (daily rotating file + console output)
//! - Tokio runtime (Ctrl-C handling only; tasks run on their own threads)
//! - Configuration and stores from the data directory ([`ConfigManager`])
//!
//! Ctrl-C while a task runs cancels it; completed items are rolled back.
//!
//! # Data directory
//!
//! `Modwarden Data/` in the working directory, or `$MODWARDEN_DATA` when set:
//! - `options.yaml`: game path, disabled path, UI preferences
//! - `mods.json`: per-mod metadata
//! - `profiles.json`: named mod sets
//! - `trash/`: deleted mods

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use modwarden::state::ProgressChange;
use modwarden::tasks::TaskReport;
use modwarden::{APP_NAME, ConfigManager, ModCategory, ModManager, VERSION};
use std::env;
use std::thread;
use tokio::sync::broadcast::error::RecvError;

const DATA_DIR: &str = "Modwarden Data";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let debug = args.iter().any(|arg| arg == "--debug");
    let args: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|arg| *arg != "--debug")
        .collect();

    let _guard = modwarden::logging::setup_logging_with_console(
        Utf8Path::new("logs"),
        "modwarden",
        debug,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Tasks run on their own worker threads; the runtime only listens for Ctrl-C
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("modwarden-signal")
        .build()?;

    let data_dir = env::var("MODWARDEN_DATA").unwrap_or_else(|_| DATA_DIR.to_string());
    let mut manager = ModManager::open(ConfigManager::new(&data_dir)?)?;

    let interrupter = manager.interrupter();
    runtime.spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupter.interrupt() {
                tracing::warn!("Interrupted, canceling the running task");
            }
        }
    });

    spawn_progress_printer(&manager);

    let result = dispatch(&mut manager, &args);

    manager.metrics().log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    tracing::info!("Shutdown complete");

    result.inspect_err(|e| tracing::error!("{:#}", e))
}

fn dispatch(manager: &mut ModManager, args: &[&str]) -> Result<()> {
    let Some((&command, rest)) = args.split_first() else {
        print_usage();
        return Ok(());
    };

    match command {
        "set-game-path" => {
            let [path] = rest else {
                bail!("usage: set-game-path <dir>");
            };
            manager.options_mut().set_game_path(*path);
            manager.save_options()?;
            manager.ensure_dirs()?;
            println!("Game path set to {}", path);
            Ok(())
        }
        "list" => list(manager),
        "enable" => report(manager.enable(require_names(rest)?)?),
        "disable" => report(manager.disable(require_names(rest)?)?),
        "delete" => report(manager.delete(require_names(rest)?)?),
        "install" => {
            let (category, sources) = category_and_rest(rest)?;
            let sources: Vec<Utf8PathBuf> = sources.iter().map(|source| Utf8PathBuf::from(*source)).collect();
            for task_report in manager.install(&sources, category)? {
                report(task_report)?;
            }
            Ok(())
        }
        "recategorize" => {
            let (category, names) = category_and_rest(rest)?;
            report(manager.change_category(names, category)?)
        }
        "relocate-disabled" => {
            let [dir] = rest else {
                bail!("usage: relocate-disabled <dir>");
            };
            report(manager.relocate_disabled(Utf8Path::new(dir))?)
        }
        "ignore" | "unignore" => {
            let ignored = command == "ignore";
            let names = require_names(rest)?;
            manager.store().write(|store| {
                for name in names {
                    if !store.set_ignored(name, ignored) {
                        println!("Unknown mod: {}", name);
                    }
                }
            });
            manager.save_store()
        }
        "tag" | "untag" => {
            let Some((&tag, names)) = rest.split_first() else {
                bail!("usage: {} <tag> <mod>...", command);
            };
            let names = require_names(names)?;
            manager.store().write(|store| {
                if command == "tag" {
                    store.add_tags(&[tag], names);
                } else {
                    store.remove_tags(&[tag], names);
                }
            });
            manager.save_store()
        }
        "profile" => profile(manager, rest),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => bail!("Unknown command: {} (try `help`)", other),
    }
}

fn list(manager: &ModManager) -> Result<()> {
    let reconciliation = manager.reconcile()?;

    for entry in &reconciliation.mods {
        let state = if entry.enabled { "enabled " } else { "disabled" };
        let version = entry.version.as_deref().unwrap_or("1.0.0");
        let tags = entry.tags.iter().cloned().collect::<Vec<_>>().join(", ");
        println!(
            "{} {:<14} {:<40} {:<10} {}",
            state, entry.category.as_str(), entry.name, version, tags
        );
    }

    for name in &reconciliation.ignored {
        println!("ignored  {}", name);
    }
    for name in &reconciliation.unknown_disabled {
        println!("unknown  {} (in the disabled folder without a category)", name);
    }

    Ok(())
}

fn profile(manager: &mut ModManager, args: &[&str]) -> Result<()> {
    match args {
        ["list"] => {
            for name in manager.profiles().names() {
                let count = manager.profiles().mods(name).map_or(0, <[String]>::len);
                println!("{} ({} mods)", name, count);
            }
            Ok(())
        }
        ["add", name, mods @ ..] => {
            if !manager.profiles().contains(name) {
                manager.profiles_mut().add_profile(name)?;
            }
            let added = manager.profiles_mut().add_mods(name, mods)?;
            manager.save_profiles()?;
            println!("Added {} mods to {}", added, name);
            Ok(())
        }
        ["remove", name] => {
            if !manager.profiles_mut().remove_profile(name) {
                bail!("No profile named {}", name);
            }
            manager.save_profiles()
        }
        ["apply", name] => {
            let application = manager.apply_profile(name)?;
            if application.plan.is_noop() {
                println!("Profile {} is already applied", name);
            }
            for name in &application.plan.not_installed {
                println!("Not installed: {}", name);
            }
            for task_report in application.reports {
                report(task_report)?;
            }
            Ok(())
        }
        _ => bail!("usage: profile list | add <name> [mod...] | remove <name> | apply <name>"),
    }
}

fn require_names<'a>(names: &'a [&'a str]) -> Result<&'a [&'a str]> {
    if names.is_empty() {
        bail!("No mod names given");
    }
    Ok(names)
}

fn category_and_rest<'a>(args: &'a [&'a str]) -> Result<(ModCategory, &'a [&'a str])> {
    let Some((&category, rest)) = args.split_first() else {
        bail!("Missing category (mods, mods_override or maps)");
    };
    let category: ModCategory = category
        .parse()
        .with_context(|| format!("Invalid category: {}", category))?;
    Ok((category, require_names(rest)?))
}

/// Print the outcome of a task and turn failures into an error exit.
fn report(report: TaskReport) -> Result<()> {
    println!(
        "{}: {:?} ({} done, {} skipped, {} abandoned, {} rolled back)",
        report.kind,
        report.state,
        report.processed.len(),
        report.skipped.len(),
        report.abandoned.len(),
        report.rolled_back.len()
    );
    for name in &report.abandoned {
        println!("  could not move {}", name);
    }

    match report.error {
        Some(error) => bail!("{} failed: {}", report.kind, error),
        None => Ok(()),
    }
}

fn spawn_progress_printer(manager: &ModManager) {
    let mut rx = manager.progress().subscribe();

    let spawned = thread::Builder::new()
        .name("modwarden-progress".to_string())
        .spawn(move || {
            loop {
                match rx.blocking_recv() {
                    Ok(ProgressChange::Advanced {
                        current,
                        total,
                        label,
                    }) => eprintln!("[{}/{}] {}", current, total, label),
                    Ok(ProgressChange::Finished { outcome, message }) => match message {
                        Some(message) => eprintln!("{:?}: {}", outcome, message),
                        None => eprintln!("{:?}", outcome),
                    },
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });

    if let Err(e) = spawned {
        tracing::warn!("Progress output disabled: {}", e);
    }
}

fn print_usage() {
    println!("{} v{}", APP_NAME, VERSION);
    println!();
    println!("Commands:");
    println!("  set-game-path <dir>");
    println!("  list");
    println!("  enable | disable | delete <mod>...");
    println!("  install <mods|mods_override|maps> <folder-or-archive>...");
    println!("  recategorize <mods|mods_override|maps> <mod>...");
    println!("  relocate-disabled <dir>");
    println!("  ignore | unignore <mod>...");
    println!("  tag | untag <tag> <mod>...");
    println!("  profile list | add <name> [mod...] | remove <name> | apply <name>");
    println!();
    println!("Options: --debug");
}
