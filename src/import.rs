//! CSV batch import.
//!
//! Rows are validated one by one; rows that cannot be read are reported as
//! skipped and never reach a group. Valid rows are grouped by
//! `(nomeLote, cultivar)`, quantities are summed per group and divided by the
//! area chosen by the configured [`AreaPolicy`].

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::mean;
use crate::calculator::{Unit, checked_productivity, parse_area, parse_quantity};
use crate::errors::ImportError;
use crate::history::{History, Origin};

const AREA_COLUMN: &str = "area";
const QUANTITY_COLUMN: &str = "quantidade";

/// How a group's divisor is chosen when its rows report different areas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaPolicy {
    /// The first area seen for the key wins; later ones are ignored.
    #[default]
    FirstSeen,
    /// Arithmetic mean of the rows' areas.
    Mean,
    /// Rows are sub-plots: their areas add up.
    Sum,
    /// All rows must agree on the area, otherwise the group is rejected.
    RequireConsistent,
}

impl FromStr for AreaPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "first-seen" | "first" => Ok(AreaPolicy::FirstSeen),
            "mean" | "average" => Ok(AreaPolicy::Mean),
            "sum" => Ok(AreaPolicy::Sum),
            "require-consistent" | "strict" => Ok(AreaPolicy::RequireConsistent),
            other => Err(format!(
                "unknown area policy '{other}' (expected first-seen, mean, sum or require-consistent)"
            )),
        }
    }
}

impl fmt::Display for AreaPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AreaPolicy::FirstSeen => "first-seen",
            AreaPolicy::Mean => "mean",
            AreaPolicy::Sum => "sum",
            AreaPolicy::RequireConsistent => "require-consistent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub area_policy: AreaPolicy,
    pub delimiter: u8,
    /// Unit of the `quantidade` column.
    pub unit: Unit,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            area_policy: AreaPolicy::FirstSeen,
            delimiter: b',',
            unit: Unit::Sacks,
        }
    }
}

/// Raw CSV row; every column is optional at this stage.
#[derive(Debug, Default, Deserialize)]
struct CsvRow {
    #[serde(default)]
    area: Option<String>,
    #[serde(default)]
    quantidade: Option<String>,
    #[serde(default, rename = "nomeLote")]
    nome_lote: Option<String>,
    #[serde(default)]
    cultivar: Option<String>,
}

/// A row that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub line: u64,
    pub label: Option<String>,
    pub cultivar: Option<String>,
    pub area: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub line: u64,
    pub reason: String,
}

/// Per-row validation result.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Parsed(ImportRow),
    Skipped(SkippedRow),
}

/// One `(label, cultivar)` group ready to become a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportedGroup {
    pub label: Option<String>,
    pub cultivar: Option<String>,
    pub total_quantity: f64,
    pub area: f64,
    pub rows: usize,
    pub productivity: f64,
}

/// A group rejected under [`AreaPolicy::RequireConsistent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictingGroup {
    pub label: Option<String>,
    pub cultivar: Option<String>,
    pub areas: Vec<f64>,
    pub lines: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub groups: Vec<ImportedGroup>,
    pub skipped: Vec<SkippedRow>,
    pub conflicts: Vec<ConflictingGroup>,
}

impl ImportReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Appends one imported record per group, in first-seen order.
    pub fn append_to(&self, history: History) -> History {
        self.groups.iter().fold(history, |history, group| {
            history.append(
                group.label.as_deref(),
                group.cultivar.as_deref(),
                group.productivity,
                Origin::Imported,
            )
        })
    }
}

/// Imports a CSV file from disk.
#[tracing::instrument(skip(path, options), fields(path = %path.as_ref().display(), policy = %options.area_policy))]
pub fn import_path(path: impl AsRef<Path>, options: &ImportOptions) -> Result<ImportReport, ImportError> {
    let file = File::open(path.as_ref())?;
    import_reader(file, options)
}

/// Imports CSV data from any reader.
pub fn import_reader<R: Read>(reader: R, options: &ImportOptions) -> Result<ImportReport, ImportError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    for required in [AREA_COLUMN, QUANTITY_COLUMN] {
        if !headers.iter().any(|h| h == required) {
            return Err(ImportError::MissingColumn(required));
        }
    }

    let mut outcomes = Vec::new();
    for (index, result) in rdr.records().enumerate() {
        // header is line 1
        let fallback_line = index as u64 + 2;
        let outcome = match result {
            Ok(record) => parse_row(&record, &headers, fallback_line),
            Err(e) => RowOutcome::Skipped(SkippedRow {
                line: e.position().map(|p| p.line()).unwrap_or(fallback_line),
                reason: format!("malformed record: {e}"),
            }),
        };
        outcomes.push(outcome);
    }

    let report = group_rows(outcomes, options);

    info!(
        groups = report.groups.len(),
        skipped = report.skipped.len(),
        conflicts = report.conflicts.len(),
        "CSV import finished"
    );
    for skipped in &report.skipped {
        warn!(line = skipped.line, reason = %skipped.reason, "CSV row skipped");
    }

    Ok(report)
}

/// Validates a single CSV record.
pub fn parse_row(record: &StringRecord, headers: &StringRecord, fallback_line: u64) -> RowOutcome {
    let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);

    let row: CsvRow = match record.deserialize(Some(headers)) {
        Ok(row) => row,
        Err(e) => {
            return RowOutcome::Skipped(SkippedRow {
                line,
                reason: format!("malformed record: {e}"),
            });
        }
    };

    let area = match parse_area(row.area.as_deref().unwrap_or_default()) {
        Ok(area) => area,
        Err(e) => return RowOutcome::Skipped(SkippedRow { line, reason: e.to_string() }),
    };
    let quantity = match parse_quantity(row.quantidade.as_deref().unwrap_or_default()) {
        Ok(quantity) => quantity,
        Err(e) => return RowOutcome::Skipped(SkippedRow { line, reason: e.to_string() }),
    };

    RowOutcome::Parsed(ImportRow {
        line,
        label: non_blank(row.nome_lote),
        cultivar: non_blank(row.cultivar),
        area,
        quantity,
    })
}

#[derive(Debug)]
struct GroupAcc {
    label: Option<String>,
    cultivar: Option<String>,
    quantity: f64,
    areas: Vec<f64>,
    lines: Vec<u64>,
}

/// Groups validated rows by `(label, cultivar)` in first-seen order.
pub fn group_rows(outcomes: Vec<RowOutcome>, options: &ImportOptions) -> ImportReport {
    let mut report = ImportReport::default();
    let mut index: HashMap<(Option<String>, Option<String>), usize> = HashMap::new();
    let mut accs: Vec<GroupAcc> = Vec::new();

    for outcome in outcomes {
        let row = match outcome {
            RowOutcome::Parsed(row) => row,
            RowOutcome::Skipped(skipped) => {
                report.skipped.push(skipped);
                continue;
            }
        };

        let key = (row.label.clone(), row.cultivar.clone());
        let slot = *index.entry(key).or_insert_with(|| {
            accs.push(GroupAcc {
                label: row.label.clone(),
                cultivar: row.cultivar.clone(),
                quantity: 0.0,
                areas: Vec::new(),
                lines: Vec::new(),
            });
            accs.len() - 1
        });

        let acc = &mut accs[slot];
        acc.quantity += row.quantity;
        acc.areas.push(row.area);
        acc.lines.push(row.line);
    }

    for acc in accs {
        match resolve_area(&acc.areas, options.area_policy) {
            Some(area) => {
                let productivity = match checked_productivity(acc.quantity, options.unit, area) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(label = ?acc.label, cultivar = ?acc.cultivar, error = %e, "Group skipped");
                        report.skipped.extend(acc.lines.iter().map(|&line| SkippedRow {
                            line,
                            reason: e.to_string(),
                        }));
                        continue;
                    }
                };
                debug!(label = ?acc.label, cultivar = ?acc.cultivar, area, rows = acc.lines.len(), "Group resolved");
                report.groups.push(ImportedGroup {
                    productivity,
                    label: acc.label,
                    cultivar: acc.cultivar,
                    total_quantity: acc.quantity,
                    area,
                    rows: acc.lines.len(),
                });
            }
            None => {
                warn!(label = ?acc.label, cultivar = ?acc.cultivar, areas = ?acc.areas, "Group has conflicting areas");
                report.conflicts.push(ConflictingGroup {
                    label: acc.label,
                    cultivar: acc.cultivar,
                    areas: acc.areas,
                    lines: acc.lines,
                });
            }
        }
    }

    report
}

/// Picks the divisor for a group. `None` means the policy rejects the group.
pub fn resolve_area(areas: &[f64], policy: AreaPolicy) -> Option<f64> {
    let first = *areas.first()?;
    match policy {
        AreaPolicy::FirstSeen => Some(first),
        AreaPolicy::Mean => Some(mean(areas)),
        AreaPolicy::Sum => Some(areas.iter().sum()),
        AreaPolicy::RequireConsistent => areas
            .iter()
            .all(|a| (a - first).abs() < 1e-9)
            .then_some(first),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
