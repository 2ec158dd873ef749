use std::{collections::BTreeMap, fs, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use salvage::{
    CipherConfig, MasterInfo, OutputFlags, RepairError, Result, Session,
    executor::master::MasterCollector,
    load_master, make_master, output, save_master,
    utils::log::Logger,
};

#[derive(Parser)]
#[command(name = "salvage", version, about = "Recover rows from damaged SQLite files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy every recoverable row of SOURCE into DEST
    Recover {
        source: PathBuf,
        dest: PathBuf,
        #[command(flatten)]
        cipher: CipherArgs,
        /// Catalog snapshot written by `save-master`
        #[arg(long)]
        master: Option<PathBuf>,
        #[arg(long)]
        master_key: Option<String>,
        /// Only recover these tables
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        /// DEST already has the schema
        #[arg(long)]
        no_create_tables: bool,
    },
    /// Save the catalog of a healthy database for later recovery
    SaveMaster {
        db: PathBuf,
        out: PathBuf,
        #[arg(long)]
        key: Option<String>,
    },
    /// Walk SOURCE and report what is readable
    Inspect {
        source: PathBuf,
        #[command(flatten)]
        cipher: CipherArgs,
    },
}

#[derive(Args)]
struct CipherArgs {
    /// TOML file with cipher settings
    #[arg(long = "cipher")]
    cipher_file: Option<PathBuf>,
    #[arg(long)]
    key: Option<String>,
    #[arg(long)]
    page_size: Option<u32>,
}

impl CipherArgs {
    fn config(&self) -> Result<Option<CipherConfig>> {
        let mut conf = match &self.cipher_file {
            Some(path) => Some(CipherConfig::from_toml(&fs::read_to_string(path)?)?),
            None => None,
        };
        if let Some(key) = &self.key {
            conf.get_or_insert_with(CipherConfig::default).key = Some(key.clone().into_bytes());
        }
        if let Some(size) = self.page_size {
            conf.get_or_insert_with(CipherConfig::default).page_size = Some(size);
        }
        Ok(conf)
    }
}

#[derive(Serialize)]
struct Report {
    page_size: usize,
    page_count: u32,
    valid_page_count: u32,
    parsed_page_count: usize,
    integrity: u32,
    statuses: BTreeMap<&'static str, usize>,
    catalog: MasterInfo,
}

fn recover(
    source: PathBuf,
    dest: PathBuf,
    cipher: CipherArgs,
    master: Option<PathBuf>,
    master_key: Option<String>,
    tables: Vec<String>,
    no_create_tables: bool,
) -> Result<()> {
    let mut conf = cipher.config()?;
    let master = match master {
        Some(path) => {
            let key = master_key.as_deref().map(str::as_bytes);
            let (info, salt) = load_master(&path, key, tables.as_slice())?;
            if let Some(conf) = conf.as_mut().filter(|conf| conf.key.is_some()) {
                conf.kdf_salt.get_or_insert(salt);
            }
            Some(info)
        }
        None => make_master(tables.as_slice()),
    };

    let mut session = Session::open(&source, conf.as_ref(), Logger::default())?;
    let db = Connection::open(&dest)?;
    let mut flags = OutputFlags::empty();
    if no_create_tables {
        flags |= OutputFlags::NO_CREATE_TABLES;
    }
    let stats = output(&mut session, &db, master.as_ref(), flags)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).map_err(|e| RepairError::misuse(e.to_string()))?
    );
    Ok(())
}

fn inspect(source: PathBuf, cipher: CipherArgs) -> Result<()> {
    let conf = cipher.config()?;
    let mut session = Session::open(&source, conf.as_ref(), Logger::default())?;

    let mut catalog = MasterInfo::new();
    session.set_recursive(false);
    // A damaged catalog leaves the map partial, which is what gets reported.
    let _ = session.parse_page_with(1, &mut MasterCollector::new(&mut catalog, true));
    session.set_recursive(true);
    session.parse()?;

    let mut statuses = BTreeMap::new();
    for status in session.pager().statuses() {
        *statuses.entry(status.name()).or_insert(0) += 1;
    }
    let report = Report {
        page_size: session.pager().page_size(),
        page_count: session.page_count(),
        valid_page_count: session.valid_page_count(),
        parsed_page_count: session.parsed_page_count(),
        integrity: session.integrity().bits(),
        statuses,
        catalog,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).map_err(|e| RepairError::misuse(e.to_string()))?
    );
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Recover {
            source,
            dest,
            cipher,
            master,
            master_key,
            tables,
            no_create_tables,
        } => recover(source, dest, cipher, master, master_key, tables, no_create_tables),
        Command::SaveMaster { db, out, key } => {
            let conn = Connection::open(&db)?;
            let count = save_master(&conn, &out, key.as_deref().map(str::as_bytes))?;
            println!("{count}");
            Ok(())
        }
        Command::Inspect { source, cipher } => inspect(source, cipher),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("salvage=info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(err.code().as_i32() as u8)
        }
    }
}
