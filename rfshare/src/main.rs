//! rfshare: inspect and maintain the shared tuner reservation database.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use rfshare::config::{self, ConfigFile};
use rfshare::database::{Database, Inventory};
use rfshare::logging;
use rfshare::scheduler::Scanner;
use rfshare::tuner::{list_reservations, release_dead_owner_reservations, AllocContext};
use rfshare_types::{DelsysType, Dish, Satellite, ScanHeader};

const DEFAULT_DATABASE: &str = "rfshare.db";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Shared DVB tuner resource allocator.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file path.
    #[arg(short, long, default_value = DEFAULT_DATABASE)]
    database: PathBuf,

    /// Configuration file (TOML format).
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory for log files.
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Days to keep log files.
    #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
    log_retention_days: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show reservations, dish positions and record counts.
    Status,
    /// Release reservations and scan claims left by exited processes.
    Cleanup,
    /// Import frontends, LNBs, dishes, satellites and muxes from a JSON file.
    Import {
        /// Inventory file.
        path: PathBuf,
    },
    /// List muxes and bands claimed by a scan.
    Pending,
}

/// CLI values win over the file unless left at their defaults.
struct Settings {
    database: PathBuf,
    log_dir: PathBuf,
    retention_days: u64,
    log_level: Option<String>,
}

impl Settings {
    fn resolve(args: &Args, file: &ConfigFile) -> Self {
        let pick = |cli: &PathBuf, default: &str, from_file: &Option<PathBuf>| {
            match from_file {
                Some(path) if cli == Path::new(default) => path.clone(),
                _ => cli.clone(),
            }
        };
        let retention_days = match file.logging.retention_days {
            Some(days) if args.log_retention_days == DEFAULT_RETENTION_DAYS => days,
            _ => args.log_retention_days,
        };
        Self {
            database: pick(&args.database, DEFAULT_DATABASE, &file.database.path),
            log_dir: pick(&args.log_dir, DEFAULT_LOG_DIR, &file.logging.log_dir),
            retention_days,
            log_level: file.logging.level.clone(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match config::find_config(args.config.as_deref()) {
        Some(path) => {
            let loaded = config::load_config(&path)?;
            eprintln!("Loaded config from {:?}", path);
            loaded
        }
        None => ConfigFile::default(),
    };
    let settings = Settings::resolve(&args, &file_config);

    logging::init_logging(
        &settings.log_dir,
        settings.retention_days,
        args.verbose,
        settings.log_level.as_deref(),
    )?;

    info!("Opening database: {:?}", settings.database);
    let mut db = match Database::open(&settings.database) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    match args.command {
        Command::Status => status(&mut db),
        Command::Cleanup => cleanup(&mut db, &file_config),
        Command::Import { path } => import(&mut db, &path),
        Command::Pending => pending(&mut db),
    }
}

fn status(db: &mut Database) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = AllocContext::for_current_process();
    let txn = db.read_txn()?;

    let reservations = list_reservations(&txn, &ctx)?;
    println!("Reservations: {}", reservations.len());
    for r in &reservations {
        let rf_path = r
            .sub
            .rf_path
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let delsys = r.sub.delsys_type.map(|d| d.name()).unwrap_or("-");
        let subs: Vec<String> = r
            .sub
            .subs
            .iter()
            .map(|e| e.subscription_id.to_string())
            .collect();
        println!(
            "  {} owner={}{} config={} {} rf_path={} freq={} subs=[{}]",
            r.fe_key,
            r.owner,
            if r.owner_alive { "" } else { " (dead)" },
            r.sub.config_id,
            delsys,
            rf_path,
            r.sub.frequency.unwrap_or(0),
            subs.join(", ")
        );
    }

    let dishes = txn.list::<Dish>()?;
    println!("Dishes: {}", dishes.len());
    for d in &dishes {
        println!(
            "  {} {:?} enabled={} movable={} usals={} target={}",
            d.dish_id, d.name, d.enabled, d.movable, d.cur_usals_pos, d.target_usals_pos
        );
    }
    txn.abort()?;

    println!("Records:");
    for (table, count) in db.table_counts()? {
        println!("  {:<12} {}", table, count);
    }
    Ok(())
}

fn cleanup(db: &mut Database, file_config: &ConfigFile) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = AllocContext::for_current_process();

    let txn = db.write_txn()?;
    let released = release_dead_owner_reservations(&txn, &ctx)?;
    txn.commit()?;

    let mut scanner = Scanner::new(
        ctx,
        file_config.tuning.clone(),
        file_config.scan.max_num_subscriptions(),
    );
    let cleaned = scanner.clean_stale_scan_status(db)?;

    info!(
        "Cleanup: released {} reservation(s), cleared {} scan claim(s)",
        released, cleaned
    );
    println!("Released {} reservation(s), cleared {} scan claim(s)", released, cleaned);
    Ok(())
}

fn import(db: &mut Database, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let inventory: Inventory = serde_json::from_str(&content)?;
    let stats = db.import_inventory(&inventory)?;
    if stats.total_changes() == 0 {
        warn!("Inventory {:?} contained no records", path);
    }
    info!(
        "Imported {:?}: {} inserted, {} updated",
        path, stats.inserted, stats.updated
    );
    println!("Inserted {}, updated {}", stats.inserted, stats.updated);
    Ok(())
}

fn pending(db: &mut Database) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = AllocContext::for_current_process();
    let describe = |c: &ScanHeader| match c.scan_id {
        Some(id) => format!(
            "{:?} by {}{}",
            c.scan_status,
            id,
            if ctx.is_owner_alive(id.pid) { "" } else { " (dead)" }
        ),
        None => format!("{:?} unclaimed", c.scan_status),
    };

    let txn = db.read_txn()?;
    let mut count = 0;
    for delsys_type in [DelsysType::Sat, DelsysType::Cable, DelsysType::Terrestrial] {
        for mux in txn.list_muxes(delsys_type)? {
            if mux.header().scan_status.is_in_progress() {
                println!(
                    "  {} mux {} {} kHz: {}",
                    delsys_type.name(),
                    mux.key(),
                    mux.frequency(),
                    describe(mux.header())
                );
                count += 1;
            }
        }
    }
    for sat in txn.list::<Satellite>()? {
        for bs in sat.band_scans.iter().filter(|b| b.c.scan_status.is_in_progress()) {
            println!(
                "  band {} {} {:?}: {}",
                sat.name,
                bs.pol,
                bs.band,
                describe(&bs.c)
            );
            count += 1;
        }
    }
    txn.abort()?;

    println!("{} pending scan item(s)", count);
    Ok(())
}
