use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use series_store::{
    RawTable, TimeSeries, TimeSeriesRepo,
    config::{self, BackendConfig, StoreConfig},
    db::migrate,
    export,
    preprocess::FillMethod,
    service::{Domain, open_service},
};

#[derive(Parser)]
#[command(version, about = "Time series store CLI")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending database migrations.
    Migrate,
    /// Import a CSV file as a new series.
    Import {
        /// CSV file with a header row.
        file: PathBuf,
        #[arg(long)]
        time_column: Option<String>,
        /// Comma-separated value columns; every other column when omitted.
        #[arg(long, value_delimiter = ',')]
        value_columns: Option<Vec<String>>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Fill missing values before saving.
        #[arg(long, value_enum)]
        fill: Option<Fill>,
    },
    /// List stored series.
    List,
    /// Print one series as JSON.
    Show { id: String },
    /// Print the time-domain view.
    TimeDomain {
        id: String,
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
    },
    /// Print the magnitude spectrum.
    Spectrum {
        id: String,
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
    },
    /// Delete a series.
    Delete { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Fill {
    Forward,
    Backward,
    Mean,
    Median,
}

impl From<Fill> for FillMethod {
    fn from(f: Fill) -> Self {
        match f {
            Fill::Forward => FillMethod::Forward,
            Fill::Backward => FillMethod::Backward,
            Fill::Mean => FillMethod::Mean,
            Fill::Median => FillMethod::Median,
        }
    }
}

fn read_csv(path: &Path) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let columns = rdr.headers()?.iter().map(str::to_owned).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.with_context(|| format!("read {}", path.display()))?;
        rows.push(
            record
                .iter()
                .map(|c| (!c.is_empty()).then(|| c.to_owned()))
                .collect(),
        );
    }
    Ok(RawTable::new(columns, rows))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&export::to_json(value)?)?);
    Ok(())
}

async fn run(cli: Cli, cfg: StoreConfig) -> Result<()> {
    match cli.cmd {
        Cmd::Migrate => {
            let BackendConfig::Sqlite { url } = &cfg.backend else {
                bail!("migrate needs a sqlite backend (set DATABASE_URL or [backend] kind = \"sqlite\")");
            };
            let applied = migrate::run_all(url)?;
            println!("applied {applied} migration(s)");
        }
        Cmd::Import {
            file,
            time_column,
            value_columns,
            name,
            description,
            fill,
        } => {
            let raw = read_csv(&file)?;
            let svc = open_service(&cfg).await?;
            let id = match fill {
                None => {
                    svc.process_upload(
                        &raw,
                        time_column.as_deref(),
                        value_columns.as_deref(),
                        name.as_deref(),
                        description.as_deref(),
                    )
                    .await?
                    .analysis_id
                }
                Some(fill) => {
                    let parser = cfg.analysis.parser()?;
                    let mut series = TimeSeries::create(
                        &raw,
                        time_column.as_deref(),
                        value_columns.as_deref(),
                        &parser,
                    )?
                    .fill_missing(None, fill.into(), None)?;
                    if let Some(n) = name {
                        series = series.with_name(n);
                    }
                    if let Some(d) = description {
                        series = series.with_description(d);
                    }
                    let saved = svc.repo().save(series).await?;
                    saved.id().unwrap_or_default().to_string()
                }
            };
            info!(%id, file = %file.display(), "imported");
            println!("{id}");
        }
        Cmd::List => {
            let svc = open_service(&cfg).await?;
            for s in svc.list().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    s.id,
                    s.name.as_deref().unwrap_or("-"),
                    s.rows,
                    s.value_columns.join(",")
                );
            }
        }
        Cmd::Show { id } => {
            let svc = open_service(&cfg).await?;
            let series = svc.repo().find_by_id(&id).await?;
            print_json(&series)?;
        }
        Cmd::TimeDomain { id, format } => {
            let svc = open_service(&cfg).await?;
            let resp = svc.get_analysis(&id, Domain::Time).await?;
            match format {
                Format::Csv => print!(
                    "{}",
                    export::time_domain_csv(&resp.time_domain, &resp.time_column)?
                ),
                Format::Json => print_json(&resp.time_domain)?,
            }
        }
        Cmd::Spectrum { id, format } => {
            let svc = open_service(&cfg).await?;
            let fd = svc.repo().get_frequency_domain_data(&id).await?;
            match format {
                Format::Csv => print!("{}", export::frequency_domain_csv(&fd)?),
                Format::Json => print_json(&fd)?,
            }
        }
        Cmd::Delete { id } => {
            let svc = open_service(&cfg).await?;
            svc.delete(&id).await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("series_store=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    run(cli, cfg).await
}
