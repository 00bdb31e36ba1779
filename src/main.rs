// src/main.rs

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use xcer::cache::ArchiveCache;
use xcer::conflict;
use xcer::engine::TransactionEngine;
use xcer::index::PackageIndex;
use xcer::plan::TransactionPlan;
use xcer::resolver::{self, InstallTarget, Request};
use xcer::settings::Settings;
use xcer::store::InstalledStore;
use xcer::transport::{FileTransport, HttpTransport, Transport};

#[derive(Parser)]
#[command(name = "xcer")]
#[command(author, version, about = "Package manager with transactional, conflict-checked installs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Target-root options shared by every mutating command
#[derive(Args)]
struct TargetOpts {
    /// Target root directory to install under
    #[arg(short, long, default_value = "/")]
    root: PathBuf,
    /// Installed-state store file (default: <root>/var/lib/xcer/state.json)
    #[arg(long)]
    state: Option<PathBuf>,
    /// Archive cache directory (default: <root>/var/cache/xcer)
    #[arg(long)]
    cache: Option<PathBuf>,
}

impl TargetOpts {
    fn settings(&self) -> Settings {
        Settings::new(&self.root, self.state.clone(), self.cache.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install packages, resolving and installing their dependencies
    Install {
        /// Package specs such as 'nginx' or 'libssl>=3.0'
        #[arg(required = true)]
        specs: Vec<String>,
        /// Package index location (local path or http(s) URL)
        #[arg(short, long)]
        index: String,
        #[command(flatten)]
        target: TargetOpts,
        /// Resolve and print the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove installed packages
    Remove {
        /// Package names to remove
        #[arg(required = true)]
        names: Vec<String>,
        /// Package index location (used to validate declared conflicts)
        #[arg(short, long)]
        index: Option<String>,
        #[command(flatten)]
        target: TargetOpts,
        /// Resolve and print the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },
    /// Upgrade installed packages to the newest satisfiable versions
    Update {
        /// Package names (updates everything installed if omitted)
        names: Vec<String>,
        /// Package index location (local path or http(s) URL)
        #[arg(short, long)]
        index: String,
        #[command(flatten)]
        target: TargetOpts,
        /// Resolve and print the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },
    /// List installed packages
    List {
        #[command(flatten)]
        target: TargetOpts,
    },
    /// Search the package index by name
    Search {
        /// Substring to look for (case-insensitive)
        term: String,
        /// Package index location (local path or http(s) URL)
        #[arg(short, long)]
        index: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Load an index and the matching transport for its archive locations.
/// Relative archive locations in a file-based index resolve against the
/// index file's directory.
fn open_repository(location: &str) -> Result<(PackageIndex, Box<dyn Transport>)> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let transport = HttpTransport::new()?;
        let index = PackageIndex::fetch(location, &transport)?;
        Ok((index, Box::new(transport)))
    } else {
        let path = PathBuf::from(location);
        let index = PackageIndex::load(&path)?;
        let base = path.parent().unwrap_or(std::path::Path::new(".")).to_path_buf();
        Ok((index, Box::new(FileTransport::new(base))))
    }
}

/// Print the plan, then apply it unless this is a dry run
fn execute(
    settings: &Settings,
    transport: &dyn Transport,
    store: &mut InstalledStore,
    plan: &TransactionPlan,
    dry_run: bool,
) -> Result<()> {
    if plan.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    println!("Transaction plan:");
    println!("{}", plan);

    if dry_run {
        println!("Dry run, not applying.");
        return Ok(());
    }

    let cache = ArchiveCache::new(&settings.cache_dir);
    let engine = TransactionEngine::new(settings, &cache, transport);
    engine.apply(plan, store)?;
    println!("Transaction committed ({} step(s)).", plan.len());
    Ok(())
}

fn resolve_and_execute(
    settings: &Settings,
    index: &PackageIndex,
    transport: &dyn Transport,
    request: &Request,
    dry_run: bool,
) -> Result<()> {
    let mut store = InstalledStore::load(&settings.state_path)?;
    let plan = resolver::resolve(index, &store, request)?;
    conflict::check(&plan, &store)?;
    execute(settings, transport, &mut store, &plan, dry_run)
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install {
            specs,
            index,
            target,
            dry_run,
        } => {
            let targets = specs
                .iter()
                .map(|spec| InstallTarget::parse(spec))
                .collect::<xcer::Result<Vec<_>>>()?;
            info!("Installing {} package spec(s)", targets.len());

            let settings = target.settings();
            let (index, transport) = open_repository(&index)?;
            resolve_and_execute(
                &settings,
                &index,
                transport.as_ref(),
                &Request::install(targets),
                dry_run,
            )
        }
        Commands::Remove {
            names,
            index,
            target,
            dry_run,
        } => {
            info!("Removing {} package(s)", names.len());
            let settings = target.settings();
            let (index, transport): (PackageIndex, Box<dyn Transport>) = match index {
                Some(location) => open_repository(&location)?,
                None => (
                    PackageIndex::from_packages("local", Vec::new()),
                    Box::new(FileTransport::new(".")),
                ),
            };
            resolve_and_execute(
                &settings,
                &index,
                transport.as_ref(),
                &Request::remove(names),
                dry_run,
            )
        }
        Commands::Update {
            names,
            index,
            target,
            dry_run,
        } => {
            let settings = target.settings();
            let store = InstalledStore::load(&settings.state_path)?;
            let names = if names.is_empty() {
                store.records().map(|r| r.name.clone()).collect()
            } else {
                names
            };
            if names.is_empty() {
                println!("Nothing installed.");
                return Ok(());
            }
            info!("Updating {} package(s)", names.len());

            let (index, transport) = open_repository(&index)?;
            let targets = names.into_iter().map(InstallTarget::new).collect();
            resolve_and_execute(
                &settings,
                &index,
                transport.as_ref(),
                &Request::install(targets),
                dry_run,
            )
        }
        Commands::List { target } => {
            let settings = target.settings();
            let store = InstalledStore::load(&settings.state_path)?;
            if store.is_empty() {
                println!("No packages installed.");
                return Ok(());
            }
            for record in store.records() {
                println!(
                    "{} {} (installed {})",
                    record.name,
                    record.version,
                    record.installed_at.format("%Y-%m-%d")
                );
            }
            Ok(())
        }
        Commands::Search { term, index } => {
            let (index, _transport) = open_repository(&index)?;
            let hits = index.search(&term);
            if hits.is_empty() {
                println!("No packages matching '{}'.", term);
                return Ok(());
            }
            for package in hits {
                println!("{} {}", package.name, package.version);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    }
}
