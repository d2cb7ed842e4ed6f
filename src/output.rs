//! Console rendering of the current view.
//!
//! Supports a pretty table, JSON serialization, and CSV.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{ViewMode, group_by_cultivar};
use crate::history::{Origin, Record};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "table" => Ok(OutputFormat::Pretty),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown format '{other}' (expected pretty, json or csv)")),
        }
    }
}

#[derive(Serialize)]
struct PlotRow<'a> {
    label: &'a str,
    cultivar: &'a str,
    productivity: String,
    origin: Origin,
}

#[derive(Serialize)]
struct CultivarRow {
    cultivar: String,
    mean_productivity: String,
    records: usize,
}

/// Renders the records for `mode` in the requested format.
pub fn render_view(records: &[Record], mode: ViewMode, format: OutputFormat) -> Result<String> {
    debug!(records = records.len(), %mode, ?format, "Rendering view");
    match (format, mode) {
        (OutputFormat::Pretty, ViewMode::ByPlot) => Ok(pretty_by_plot(records)),
        (OutputFormat::Pretty, ViewMode::ByCultivar) => Ok(pretty_by_cultivar(records)),
        (OutputFormat::Json, ViewMode::ByPlot) => Ok(serde_json::to_string_pretty(records)?),
        (OutputFormat::Json, ViewMode::ByCultivar) => {
            Ok(serde_json::to_string_pretty(&group_by_cultivar(records))?)
        }
        (OutputFormat::Csv, ViewMode::ByPlot) => to_csv(records.iter().map(|r| PlotRow {
            label: &r.label,
            cultivar: &r.cultivar,
            productivity: format!("{:.2}", r.productivity),
            origin: r.origin,
        })),
        (OutputFormat::Csv, ViewMode::ByCultivar) => {
            to_csv(group_by_cultivar(records).into_iter().map(|g| CultivarRow {
                cultivar: g.cultivar,
                mean_productivity: format!("{:.2}", g.mean),
                records: g.count,
            }))
        }
    }
}

fn to_csv<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<String> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(String::from_utf8(writer.into_inner()?)?)
}

fn pretty_by_plot(records: &[Record]) -> String {
    let label_width = column_width("Lote", records.iter().map(|r| r.label.as_str()));
    let cultivar_width = column_width("Cultivar", records.iter().map(|r| r.cultivar.as_str()));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<label_width$}  {:<cultivar_width$}  Produtividade",
        "Lote", "Cultivar"
    );
    for r in records {
        let marker = match r.origin {
            Origin::Manual => "",
            Origin::Imported => " (csv)",
        };
        let _ = writeln!(
            out,
            "{:<label_width$}  {:<cultivar_width$}  {:.2} sacas/ha{marker}",
            r.label, r.cultivar, r.productivity
        );
    }
    out
}

fn pretty_by_cultivar(records: &[Record]) -> String {
    let groups = group_by_cultivar(records);
    let width = column_width("Cultivar", groups.iter().map(|g| g.cultivar.as_str()));

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  Registros  Média (sacas/ha)", "Cultivar");
    for g in &groups {
        let _ = writeln!(out, "{:<width$}  {:>9}  {:.2}", g.cultivar, g.count, g.mean);
    }
    out
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|v| v.chars().count())
        .chain(std::iter::once(header.chars().count()))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;

    fn sample() -> History {
        History::new()
            .append(Some("Talhão A"), Some("BRS1010"), 55.0, Origin::Manual)
            .append(Some("B"), Some("BRS1010"), 45.0, Origin::Imported)
            .append(Some("C"), Some("IAC"), 30.126, Origin::Manual)
    }

    #[test]
    fn test_pretty_by_plot_lists_every_record() {
        let text = render_view(sample().records(), ViewMode::ByPlot, OutputFormat::Pretty).unwrap();

        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("55.00 sacas/ha"));
        assert!(text.contains("45.00 sacas/ha (csv)"));
    }

    #[test]
    fn test_pretty_by_cultivar_shows_means() {
        let text =
            render_view(sample().records(), ViewMode::ByCultivar, OutputFormat::Pretty).unwrap();

        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("50.00"));
        assert!(text.contains("30.13"));
    }

    #[test]
    fn test_json_by_cultivar() {
        let text = render_view(sample().records(), ViewMode::ByCultivar, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value[0]["cultivar"], "BRS1010");
        assert_eq!(value[0]["mean"], 50.0);
        assert_eq!(value[0]["count"], 2);
    }

    #[test]
    fn test_csv_by_plot_writes_header_once() {
        let text = render_view(sample().records(), ViewMode::ByPlot, OutputFormat::Csv).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "label,cultivar,productivity,origin");
        assert_eq!(lines[1], "Talhão A,BRS1010,55.00,manual");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_empty_records_render() {
        let text = render_view(&[], ViewMode::ByPlot, OutputFormat::Pretty).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
