use clap::{Parser, Subcommand, builder::styling};
use eyre::{Result, bail};
use landing_zone::cli::{self, RunOptions};
use landing_zone::etl::{DEFAULT_DELIVERY_TIMEOUT, DEFAULT_QUERY_TIMEOUT, TableOutcome};
use landing_zone::format::Format;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::time::Duration;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Landing Zone: incremental, watermarked extraction of relational tables into object storage
#[derive(Parser)]
#[command(name = "landing", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every configured table into the landing zone
    Run {
        /// One or more sources files
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// File format of delivered files
        #[arg(short, long, value_enum, default_value_t = Format::Csv)]
        format: Format,

        /// Number of tables to extract concurrently, each on its own connection
        #[arg(short, long, default_value_t = 1)]
        parallel: usize,

        /// Seconds before a source query is abandoned (0 disables)
        #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT.as_secs())]
        query_timeout: u64,

        /// Seconds before a delivery is abandoned (0 disables)
        #[arg(long, default_value_t = DEFAULT_DELIVERY_TIMEOUT.as_secs())]
        delivery_timeout: u64,

        /// Print the queries that would run without contacting any source
        #[arg(long)]
        dry_run: bool,
    },

    /// Check sources files without contacting any source
    Validate {
        /// One or more sources files
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Show stored watermarks
    Watermarks {
        /// Only show watermarks of this source
        #[arg(short, long)]
        source: Option<String>,
    },
}

fn timeout(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env)
        && !e.not_found()
    {
        return Err(e.into());
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Run {
            sources,
            format,
            parallel,
            query_timeout,
            delivery_timeout,
            dry_run,
        } => {
            let options = RunOptions {
                format,
                parallel,
                query_timeout: timeout(query_timeout),
                delivery_timeout: timeout(delivery_timeout),
            };

            if dry_run {
                log::info!("Dry run, no source will be contacted");
                for planned in cli::plan_extraction(&sources, &options).await? {
                    println!(
                        "{}.{}: {}",
                        planned.source.cyan(),
                        planned.table.cyan(),
                        planned.query
                    );
                }
                return Ok(());
            }

            let summary = cli::run_extraction(&sources, &options).await?;
            for report in &summary.reports {
                match &report.outcome {
                    TableOutcome::Delivered { .. } => println!("{} {}", "✓".green(), report),
                    TableOutcome::Empty => println!("{} {}", "-".bright_black(), report),
                    TableOutcome::Failed { .. } => println!("{} {}", "✗".red(), report),
                }
            }

            if summary.has_failures() {
                println!("{}", summary.red());
                bail!("{} table(s) failed", summary.failed());
            }
            println!("{}", summary.green());
        }
        Commands::Validate { sources } => {
            let tables = cli::validate_files(&sources)?;
            log::info!(
                "✓ {} valid ({} table(s))",
                sources.len().bright_black(),
                tables.cyan()
            );
        }
        Commands::Watermarks { source } => {
            let watermarks = cli::list_watermarks(source.as_deref()).await?;
            if watermarks.is_empty() {
                log::info!("No watermarks stored");
            }
            for stored in watermarks {
                let record = &stored.record;
                println!(
                    "{}.{} {} {} {}",
                    stored.source.cyan(),
                    stored.table.cyan(),
                    record.extract_method.as_deref().unwrap_or("-"),
                    record.incremental_key.as_deref().unwrap_or("-").bright_black(),
                    record.latest_updated_value.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}
