//! Regrouping of history records for the chart and the report.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::history::Record;

/// Which dimension the chart bars follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    /// One bar per record.
    #[default]
    ByPlot,
    /// One bar per cultivar, averaged.
    ByCultivar,
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "by-plot" | "plot" | "lote" => Ok(ViewMode::ByPlot),
            "by-cultivar" | "cultivar" => Ok(ViewMode::ByCultivar),
            other => Err(format!("unknown view '{other}' (expected by-plot or by-cultivar)")),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewMode::ByPlot => f.write_str("by-plot"),
            ViewMode::ByCultivar => f.write_str("by-cultivar"),
        }
    }
}

/// Mean productivity of every record sharing a cultivar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CultivarGroup {
    pub cultivar: String,
    pub mean: f64,
    pub count: usize,
}

/// A single bar handed to the chart renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub key: String,
    pub productivity: f64,
    /// `true` when the value is a per-cultivar mean.
    pub averaged: bool,
}

/// Groups records by cultivar, keeping the order cultivars first appear in.
pub fn group_by_cultivar(records: &[Record]) -> Vec<CultivarGroup> {
    let mut order: Vec<&str> = Vec::new();
    let mut series: HashMap<&str, Vec<f64>> = HashMap::new();

    for record in records {
        let cultivar = record.cultivar.as_str();
        series
            .entry(cultivar)
            .or_insert_with(|| {
                order.push(cultivar);
                Vec::new()
            })
            .push(record.productivity);
    }

    order
        .into_iter()
        .map(|cultivar| {
            let values = series.remove(cultivar).unwrap_or_default();
            CultivarGroup {
                cultivar: cultivar.to_string(),
                mean: mean(&values),
                count: values.len(),
            }
        })
        .collect()
}

/// Shapes the records into chart bars for the given view.
pub fn chart_points(records: &[Record], mode: ViewMode) -> Vec<ChartPoint> {
    match mode {
        ViewMode::ByPlot => records
            .iter()
            .map(|r| ChartPoint {
                key: r.label.clone(),
                productivity: r.productivity,
                averaged: false,
            })
            .collect(),
        ViewMode::ByCultivar => group_by_cultivar(records)
            .into_iter()
            .map(|g| ChartPoint {
                key: g.cultivar,
                productivity: g.mean,
                averaged: true,
            })
            .collect(),
    }
}

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
