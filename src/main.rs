//! CLI entry point for the harvest productivity calculator.
//!
//! Provides subcommands for a single calculation, a batch report with
//! optional chart/PDF export, and an interactive session on stdin.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use harvest_yield::aggregate::ViewMode;
use harvest_yield::calculator::{EntryForm, Unit, result_message, submit};
use harvest_yield::config::{Settings, parse_delimiter};
use harvest_yield::export::{ChartExporter, ExportRequest, ExportSlot, PdfExporter};
use harvest_yield::history::History;
use harvest_yield::import::{AreaPolicy, import_path};
use harvest_yield::output::{OutputFormat, render_view};
use harvest_yield::report::compose;
use harvest_yield::session::{HELP, Session, parse_form_line};
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "harvest_yield")]
#[command(about = "Harvest productivity calculator (sacks per hectare)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the productivity of a single entry
    Calc {
        /// Planted area in hectares
        #[arg(short, long)]
        area: String,

        /// Harvested quantity
        #[arg(short, long)]
        quantity: String,

        /// Unit of the quantity: sacas or kg
        #[arg(short, long, default_value = "sacas")]
        unit: Unit,

        /// Plot name
        #[arg(short, long)]
        label: Option<String>,

        /// Crop variety
        #[arg(short, long)]
        cultivar: Option<String>,
    },
    /// Build a history from entries and/or a CSV file, print it and export it
    Report {
        /// Entry as key=value pairs, e.g. "area=10 quantidade=550 lote=\"Talhão A\""
        #[arg(short, long = "entry", value_name = "FIELDS")]
        entries: Vec<String>,

        /// CSV file with area, quantidade, nomeLote, cultivar columns
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,

        /// Divisor policy for CSV groups with differing areas
        #[arg(long)]
        area_policy: Option<AreaPolicy>,

        /// CSV field delimiter
        #[arg(long)]
        delimiter: Option<String>,

        /// Unit of the CSV quantidade column
        #[arg(long, default_value = "sacas")]
        csv_unit: Unit,

        /// by-plot or by-cultivar
        #[arg(short, long, default_value = "by-plot")]
        view: ViewMode,

        /// pretty, json or csv
        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,

        /// Write grafico-produtividade.png
        #[arg(long, default_value_t = false)]
        chart: bool,

        /// Write relatorio-produtividade.pdf
        #[arg(long, default_value_t = false)]
        pdf: bool,

        /// Directory for exported files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Interactive session reading commands from stdin
    Session {
        /// Directory for exported files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/harvest_yield.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("harvest_yield.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;

    match cli.command {
        Commands::Calc {
            area,
            quantity,
            unit,
            label,
            cultivar,
        } => {
            let form = EntryForm {
                area,
                quantity,
                unit,
                label,
                cultivar,
            };
            let (_, outcome) = submit(History::new(), &form);
            if let Err(e) = &outcome {
                warn!(error = %e, "Entry rejected");
            }
            println!("{}", result_message(&outcome));
        }
        Commands::Report {
            entries,
            csv,
            area_policy,
            delimiter,
            csv_unit,
            view,
            format,
            chart,
            pdf,
            output_dir,
        } => {
            if let Some(policy) = area_policy {
                settings.area_policy = policy;
            }
            if let Some(delimiter) = delimiter {
                settings.csv_delimiter = parse_delimiter(&delimiter)?;
            }
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }

            let history = build_history(&entries, csv.as_deref(), csv_unit, &settings)?;
            info!(records = history.len(), %view, "History assembled");

            print!("{}", render_view(history.records(), view, format)?);
            if matches!(format, OutputFormat::Pretty) {
                match compose(history.records()) {
                    Ok(report) => println!("\n{report}"),
                    Err(e) => warn!(error = %e, "No report"),
                }
            }

            export_files(&history, view, &settings, chart, pdf).await;
        }
        Commands::Session { output_dir } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            println!("{HELP}");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            Session::new(settings).run(stdin, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}

/// Submits each `--entry` and appends the CSV groups, in that order.
fn build_history(
    entries: &[String],
    csv: Option<&Path>,
    csv_unit: Unit,
    settings: &Settings,
) -> Result<History> {
    let mut history = History::new();

    for entry in entries {
        let form = parse_form_line(entry).map_err(|e| anyhow!("invalid --entry {entry:?}: {e}"))?;
        let (next, outcome) = submit(history, &form);
        history = next;
        match outcome {
            Ok(record) => info!(label = %record.label, productivity = record.productivity, "Entry recorded"),
            Err(e) => warn!(entry = %entry, error = %e, "{}", e.user_message()),
        }
    }

    if let Some(path) = csv {
        let mut options = settings.import_options();
        options.unit = csv_unit;
        let report = import_path(path, &options)?;
        if !report.conflicts.is_empty() {
            warn!(groups = report.conflicts.len(), "CSV groups rejected for conflicting areas");
        }
        history = report.append_to(history);
    }

    Ok(history)
}

/// Runs the requested exports; failures are logged, never fatal.
async fn export_files(history: &History, view: ViewMode, settings: &Settings, chart: bool, pdf: bool) {
    let request = ExportRequest::new(history.records(), view, settings.output_dir.clone());

    if chart {
        let mut slot = ExportSlot::new(ChartExporter {
            size: settings.chart_size,
        });
        match slot.run(request.clone()).await {
            Ok(path) => println!("arquivo gerado: {}", path.display()),
            Err(e) => error!(error = %e, "Erro ao exportar imagem"),
        }
    }

    if pdf {
        let mut slot = ExportSlot::new(PdfExporter {
            chart_size: settings.chart_size,
        });
        match slot.run(request).await {
            Ok(path) => println!("arquivo gerado: {}", path.display()),
            Err(e) => error!(error = %e, "Erro ao gerar PDF"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_parses_unit_aliases() {
        let cli = Cli::try_parse_from(["harvest_yield", "calc", "-a", "5", "-q", "300", "-u", "KG"]).unwrap();
        match cli.command {
            Commands::Calc { unit, .. } => assert_eq!(unit, Unit::Kilograms),
            _ => panic!("expected calc"),
        }

        assert!(Cli::try_parse_from(["harvest_yield", "calc", "-a", "5", "-q", "1", "-u", "ton"]).is_err());
    }
}
