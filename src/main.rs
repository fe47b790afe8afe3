//! Minimal demonstration binary: exercises `corebase` directly (open a
//! store, create a table, insert/search/delete rows, commit) with no SQL
//! front end. Stands in for the "host" the library treats as an external
//! collaborator.

use clap::Parser;
use std::fs::OpenOptions;
use tracing_subscriber::EnvFilter;

use corebase::{ColumnDef, DataType, Row, Store, StoreConfig, Value};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "corebase", version = VERSION, about = "Storage/indexing core demo.")]
struct Cli {
    /// Path to the database file to open (created if absent).
    #[arg(long, env = "COREBASE_PATH", default_value = "corebase.db")]
    path: String,
    /// Reset the demo table before running the walkthrough.
    #[arg(long, default_value = "false")]
    fresh: bool,
}

fn main() {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open("corebase.log")
        .expect("failed to open log file");

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> corebase::Result<()> {
    if cli.fresh {
        let _ = std::fs::remove_file(&cli.path);
        let _ = std::fs::remove_file(format!("{}.journal", cli.path));
    }

    let mut store = Store::open(&cli.path, StoreConfig::default())?;

    if store.catalog().find("devices").is_none() {
        store.create_table(
            "devices",
            DataType::Int,
            vec![ColumnDef {
                name: "reading".to_string(),
                data_type: DataType::Int,
            }],
        )?;
    }

    for (id, reading) in [(1i64, 70), (2, 71), (3, 68)] {
        let row = Row {
            key: Value::Int(id),
            columns: vec![Value::Int(reading)],
        };
        match store.insert("devices", &row) {
            Ok(()) => println!("inserted device {}", id),
            Err(corebase::Error::DuplicateKey) => println!("device {} already present", id),
            Err(e) => return Err(e),
        }
    }

    if let Some(row) = store.search("devices", &Value::Int(2))? {
        println!("device 2: {:?}", row.columns);
    }

    store.delete("devices", &Value::Int(3))?;
    println!("deleted device 3");

    let mut iter = store.scan("devices")?;
    print!("devices remaining:");
    while let Some(row) = iter.next_row()? {
        if let Value::Int(id) = row.key {
            print!(" {}", id);
        }
    }
    println!();
    drop(iter);

    store.commit()?;
    Ok(())
}
