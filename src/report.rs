//! Textual productivity report handed to the PDF renderer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::ReportError;
use crate::history::Record;

pub const REPORT_TITLE: &str = "Relatório de Produtividade";
pub const CHART_TITLE: &str = "Gráfico de Produtividade";
const SECTION_HEADING: &str = "Resumo por lote:";

/// Record with the highest productivity. Ties go to the earliest record.
pub fn best_record(records: &[Record]) -> Option<&Record> {
    records.iter().fold(None, |best: Option<&Record>, current| match best {
        Some(top) if current.productivity <= top.productivity => Some(top),
        _ => Some(current),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub total_line: String,
    pub best_cultivar: String,
    pub best_productivity: f64,
    pub best_line: String,
    pub section_heading: String,
    pub lines: Vec<String>,
    pub chart_title: String,
}

/// Composes the report for a non-empty record list.
pub fn compose(records: &[Record]) -> Result<Report, ReportError> {
    let best = best_record(records).ok_or(ReportError::Empty)?;

    let lines = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} - Cultivar: {} - {:.2} sacas/ha",
                i + 1,
                r.label,
                r.cultivar,
                r.productivity
            )
        })
        .collect();

    Ok(Report {
        title: REPORT_TITLE.to_string(),
        generated_at: Utc::now(),
        total: records.len(),
        total_line: format!("Total de registros: {}", records.len()),
        best_cultivar: best.cultivar.clone(),
        best_productivity: best.productivity,
        best_line: format!(
            "Cultivar com maior produtividade: {} ({:.2} sacas/ha)",
            best.cultivar, best.productivity
        ),
        section_heading: SECTION_HEADING.to_string(),
        lines,
        chart_title: CHART_TITLE.to_string(),
    })
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f)?;
        writeln!(f, "{}", self.total_line)?;
        writeln!(f, "{}", self.best_line)?;
        writeln!(f)?;
        writeln!(f, "{}", self.section_heading)?;
        for line in &self.lines {
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{History, Origin};

    fn records(entries: &[(&str, f64)]) -> History {
        entries.iter().enumerate().fold(History::new(), |h, (i, (cultivar, p))| {
            h.append(Some(format!("L{}", i + 1).as_str()), Some(*cultivar), *p, Origin::Manual)
        })
    }

    #[test]
    fn test_best_record_first_maximum_wins() {
        let h = records(&[("A", 10.0), ("B", 20.0), ("C", 20.0)]);
        assert_eq!(best_record(h.records()).unwrap().cultivar, "B");
    }

    #[test]
    fn test_best_record_empty() {
        assert!(best_record(&[]).is_none());
    }

    #[test]
    fn test_compose_empty_is_error() {
        assert_eq!(compose(&[]), Err(ReportError::Empty));
    }

    #[test]
    fn test_compose_lines() {
        let h = records(&[("A", 10.0), ("B", 20.5)]);
        let report = compose(h.records()).unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.total_line, "Total de registros: 2");
        assert_eq!(
            report.best_line,
            "Cultivar com maior produtividade: B (20.50 sacas/ha)"
        );
        assert_eq!(report.lines[0], "1. L1 - Cultivar: A - 10.00 sacas/ha");
        assert_eq!(report.lines[1], "2. L2 - Cultivar: B - 20.50 sacas/ha");
    }

    #[test]
    fn test_display_contains_sections() {
        let h = records(&[("A", 1.0)]);
        let text = compose(h.records()).unwrap().to_string();

        assert!(text.starts_with(REPORT_TITLE));
        assert!(text.contains("Resumo por lote:"));
        assert!(text.contains("1. L1 - Cultivar: A - 1.00 sacas/ha"));
    }
}
