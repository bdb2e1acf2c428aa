//! rsdump: dump and restore MySQL databases
//!
//! # Usage
//!
//! ```bash
//! # Text dump of every table to stdout
//! rsdump dump --url mysql://root@localhost/shop > shop.sql
//!
//! # Binary dump of two tables, structure only
//! rsdump dump --tables users,orders --no-data --binary -o shop.bin
//!
//! # Restore, merging consecutive inserts
//! rsdump restore shop.sql --url mysql://root@localhost/shop_copy
//!
//! # Print a binary dump as SQL without touching a database
//! rsdump restore --binary --dry-run shop.bin
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rsdump::prelude::*;

#[derive(Parser)]
#[command(name = "rsdump")]
#[command(version)]
#[command(about = "Dump MySQL databases to SQL or binary packages, and restore them", long_about = None)]
#[command(after_help = "EXAMPLES:
    rsdump dump --url mysql://root@localhost/shop -o shop.sql
    rsdump dump --binary --drop-table --target-schema shop_copy -o shop.bin
    rsdump restore shop.bin --binary --batch-rows 500
    rsdump restore shop.sql --dry-run")]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "RSDUMP_DATABASE_URL", global = true)]
    url: Option<String>,

    /// Config file (default: ./rsdump.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump tables from a database
    Dump(DumpArgs),
    /// Replay a dump against a database
    Restore(RestoreArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// Tables to dump (default: all)
    #[arg(short, long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Structure only, no rows
    #[arg(long)]
    no_data: bool,

    /// Emit DROP TABLE IF EXISTS before each table
    #[arg(long)]
    drop_table: bool,

    /// Write framed binary packages instead of SQL text
    #[arg(long)]
    binary: bool,

    /// Include column names in every INSERT
    #[arg(long)]
    column_names: bool,

    /// Qualify statements with this schema
    #[arg(long)]
    target_schema: Option<String>,

    /// Omit comment banners
    #[arg(long)]
    no_annotation: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl DumpArgs {
    /// Flags only switch settings on; anything not given keeps the config value.
    fn apply(&self, mut options: DumpOptions) -> DumpOptions {
        if !self.tables.is_empty() {
            options.tables = self.tables.clone();
        }
        if self.no_data {
            options.with_data = false;
        }
        if self.drop_table {
            options.drop_table = true;
        }
        if self.binary {
            options.mode = OutputMode::Binary;
        }
        if self.column_names {
            options.include_column_names = true;
        }
        if let Some(schema) = &self.target_schema {
            options.target_schema = Some(schema.clone());
        }
        if self.no_annotation {
            options.annotate = false;
        }
        options
    }
}

#[derive(Args)]
struct RestoreArgs {
    /// Dump file, `-` for stdin
    input: Option<PathBuf>,

    /// Input is a binary dump
    #[arg(long)]
    binary: bool,

    /// Execute inserts one by one
    #[arg(long)]
    no_merge: bool,

    /// Most inserts folded into one statement
    #[arg(long)]
    batch_rows: Option<usize>,

    /// Print the statements instead of executing them
    #[arg(long)]
    dry_run: bool,
}

impl RestoreArgs {
    fn apply(&self, mut options: RestoreOptions) -> RestoreOptions {
        if self.binary {
            options.mode = OutputMode::Binary;
        }
        if self.no_merge {
            options.merge_inserts = false;
        }
        if self.batch_rows.is_some() {
            options.max_batch_rows = self.batch_rows;
        }
        options
    }

    fn reader(&self) -> anyhow::Result<Box<dyn BufRead>> {
        match self.input.as_deref() {
            None => Ok(Box::new(io::stdin().lock())),
            Some(path) if path == Path::new("-") => Ok(Box::new(io::stdin().lock())),
            Some(path) => {
                let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Logs go to stderr so a dump on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    match &cli.command {
        Commands::Dump(args) => run_dump(cli, &config, args).await,
        Commands::Restore(args) => run_restore(cli, &config, args).await,
    }
}

fn database_url(cli: &Cli, config: &Config) -> anyhow::Result<String> {
    cli.url
        .clone()
        .or_else(|| config.database.url.clone())
        .ok_or_else(|| {
            anyhow!("no database URL. Use --url, set RSDUMP_DATABASE_URL, or add [database] url to the config file")
        })
}

async fn run_dump(cli: &Cli, config: &Config, args: &DumpArgs) -> anyhow::Result<()> {
    let options = args.apply(config.dump.clone());
    let url = database_url(cli, config)?;
    let mut db = MysqlDatabase::connect(&url).await?;

    let report = match &args.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            dump(&mut db, &options, file).await?
        }
        None => dump(&mut db, &options, io::stdout()).await?,
    };

    let line = format!(
        "{} Dumped {} table(s), {} row(s) in {} ms",
        "✓".green(),
        report.tables.to_string().cyan(),
        report.rows.to_string().cyan(),
        report.elapsed_ms
    );
    print_summary(&report, cli.format, &line, args.output.is_none())
}

async fn run_restore(cli: &Cli, config: &Config, args: &RestoreArgs) -> anyhow::Result<()> {
    let options = args.apply(config.restore.clone());
    let reader = args.reader()?;

    let report = if args.dry_run {
        restore(WriterExecutor::new(io::stdout()), reader, &options).await?
    } else {
        let url = database_url(cli, config)?;
        let db = MysqlDatabase::connect(&url).await?;
        restore(db.executor().await?, reader, &options).await?
    };

    let line = format!(
        "{} Executed {} statement(s) ({} inserts merged into {}), {} row(s) affected in {} ms",
        "✓".green(),
        report.statements_executed.to_string().cyan(),
        report.merge.inserts_in,
        report.merge.inserts_out,
        report.rows_affected.to_string().cyan(),
        report.elapsed_ms
    );
    print_summary(&report, cli.format, &line, args.dry_run)
}

fn print_summary<T: Serialize>(
    report: &T,
    format: OutputFormat,
    line: &str,
    stdout_taken: bool,
) -> anyhow::Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Table => line.to_string(),
    };
    if stdout_taken {
        eprintln!("{}", text);
    } else {
        println!("{}", text);
    }
    Ok(())
}
