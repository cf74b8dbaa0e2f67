//! keel — run SQL against a keel database
//!
//! # Usage
//!
//! ```bash
//! # Run a query
//! keel "SELECT * FROM tables WHERE db_id > ?" --bind 1
//!
//! # Dry run (show SQL and bindings only)
//! keel "DELETE FROM tables" --dry-run
//!
//! # List tables
//! keel tables --database-url sqlite://parts.db
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use keel::driver::Rows;
use keel::prelude::*;
use keel::migrate::VERSION_TABLE;

#[derive(Parser)]
#[command(name = "keel")]
#[command(version)]
#[command(about = "Run SQL against a keel database", long_about = None)]
#[command(after_help = "EXAMPLES:
    keel 'SELECT * FROM tables'
    keel 'SELECT * FROM widgets WHERE db_xtable = ?' --bind 2
    keel 'DELETE FROM tables WHERE db_id = ?' --bind 7 --dry-run")]
struct Cli {
    /// The SQL statement to execute
    sql: Option<String>,

    /// Don't execute, just show the statement and bindings
    #[arg(short, long)]
    dry_run: bool,

    /// Parameter bindings, in placeholder order
    #[arg(short, long, value_delimiter = ',')]
    bind: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Database URL (overrides keel.toml)
    #[arg(long, env = "KEEL_DATABASE_URL")]
    database_url: Option<String>,

    /// Path to a keel.toml
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output (logs every statement)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tables and their recorded versions
    Tables,
    /// Show how column types are stored
    Types,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match &cli.command {
        Some(Commands::Tables) => list_tables(&cli),
        Some(Commands::Types) => {
            show_types();
            Ok(())
        }
        None => match &cli.sql {
            Some(sql) => execute_sql(sql, &cli),
            None => {
                println!("{}", "keel — typed tables over SQLite".cyan().bold());
                println!();
                println!("Usage: keel <SQL> [OPTIONS]");
                println!();
                println!("Try: keel --help");
                Ok(())
            }
        },
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "keel=debug" } else { "keel=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    Ok(config)
}

/// Parse a binding: integer, then real, then boolean, else text.
fn parse_binding(raw: &str) -> SqlValue {
    if raw.eq_ignore_ascii_case("null") {
        SqlValue::Null
    } else if let Ok(n) = raw.parse::<i64>() {
        SqlValue::Integer(n)
    } else if let Ok(f) = raw.parse::<f64>() {
        SqlValue::Real(f)
    } else if raw == "true" {
        SqlValue::from(true)
    } else if raw == "false" {
        SqlValue::from(false)
    } else {
        SqlValue::Text(raw.to_string())
    }
}

fn execute_sql(sql: &str, cli: &Cli) -> anyhow::Result<()> {
    let params: Vec<SqlValue> = cli.bind.iter().map(|b| parse_binding(b)).collect();

    if cli.dry_run {
        println!("{}", "Statement:".green().bold());
        println!("{}", sql.white());
        if !params.is_empty() {
            println!();
            println!("{}", "Bindings:".cyan());
            for (i, p) in params.iter().enumerate() {
                println!("  ?{} = {} ({})", i + 1, p.to_string().yellow(), p.kind());
            }
        }
        return Ok(());
    }

    let config = load_config(cli)?;
    if cli.verbose {
        println!("{} {}", "Connecting to:".dimmed(), config.database.url);
    }
    let db = Database::open(&config)?;
    let rows = db.query(sql, &params)?;
    let (columns, values) = match rows {
        Some(mut rows) => drain(&mut *rows)?,
        None => (Vec::new(), Vec::new()),
    };
    format_output(&columns, &values, &cli.format);
    db.close()?;
    Ok(())
}

type Grid = (Vec<String>, Vec<Vec<SqlValue>>);

fn drain(rows: &mut dyn Rows) -> anyhow::Result<Grid> {
    let columns = rows.column_names().to_vec();
    let mut values = Vec::new();
    while rows.next().map_err(|e| anyhow::anyhow!("{}", e))? {
        let row = (1..=columns.len())
            .map(|i| rows.read_index(i))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        values.push(row);
    }
    rows.close();
    Ok((columns, values))
}

fn list_tables(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let db = Database::open(&config)?;
    let sql = format!(
        "SELECT m.name, v.db_id FROM sqlite_master m \
         LEFT JOIN {} v ON v.db_key = m.name \
         WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' ORDER BY m.name",
        VERSION_TABLE
    );
    let sql = if db.table_exists(VERSION_TABLE)? {
        sql
    } else {
        "SELECT name, NULL FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string()
    };
    let (_, values) = match db.query(&sql, &[])? {
        Some(mut rows) => drain(&mut *rows)?,
        None => (Vec::new(), Vec::new()),
    };
    let columns = vec!["table".to_string(), "version".to_string()];
    format_output(&columns, &values, &cli.format);
    db.close()?;
    Ok(())
}

fn format_output(columns: &[String], rows: &[Vec<SqlValue>], format: &OutputFormat) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            let objects: Vec<serde_json::Value> = rows
                .iter()
                .map(|row| {
                    let map: serde_json::Map<String, serde_json::Value> = columns
                        .iter()
                        .cloned()
                        .zip(row.iter().map(serde_json::Value::from))
                        .collect();
                    serde_json::Value::Object(map)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&objects).unwrap_or_default());
        }
        OutputFormat::Table => {
            // Calculate column widths
            let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
            for row in rows {
                for (i, val) in row.iter().enumerate() {
                    if let Some(w) = widths.get_mut(i) {
                        *w = (*w).max(val.to_string().len());
                    }
                }
            }

            // Print header
            let header: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:width$}", c, width = w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            // Print separator
            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            // Print rows
            for row in rows {
                let cells: Vec<String> = row
                    .iter()
                    .zip(&widths)
                    .map(|(v, w)| format!("{:width$}", v.to_string(), width = w))
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
}

fn show_types() {
    println!("{}", "keel column types".cyan().bold());
    println!();

    let types = [
        (ColumnType::Integer, "Column<i32>", "integer"),
        (ColumnType::Long, "Column<i64>", "integer"),
        (ColumnType::Double, "Column<f64>", "real"),
        (ColumnType::DoubleArray, "Column<Vec<f64>>", "8-byte native doubles"),
        (ColumnType::Text, "Column<String>", "text"),
        (ColumnType::Boolean, "Column<bool>", "0 / 1"),
        (ColumnType::Date, "Column<DateTime<Utc>>", "epoch milliseconds"),
        (ColumnType::Uuid, "Column<Uuid>", "hyphenated text"),
        (ColumnType::Enumerated, "Column<E: Enumerated>", "integer id"),
    ];

    println!(
        "{:10} {:24} {:8} {}",
        "Type".white().bold(),
        "Rust".white().bold(),
        "SQL".white().bold(),
        "Stored as".white().bold()
    );
    println!("{}", "─".repeat(70).dimmed());

    for (kind, rust, stored) in types {
        println!(
            "{:10} {:24} {:8} {}",
            kind.to_string().cyan().bold(),
            rust.yellow(),
            kind.sql_type().white(),
            stored.dimmed()
        );
    }
}
