//! Append-only session history of yield records.
//!
//! [`History`] is an owned value: operations take it by value and hand back
//! the extended history, so callers decide where (and for how long) it lives.

use serde::Serialize;

/// Cultivar recorded when the user leaves the field blank.
pub const UNSPECIFIED_CULTIVAR: &str = "Cultivar não informada";

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Manual,
    Imported,
}

/// One yield observation, already normalized to sacks per hectare.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub label: String,
    pub cultivar: String,
    pub productivity: f64,
    pub origin: Origin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct History {
    records: Vec<Record>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, filling in the default label and cultivar when the
    /// given ones are absent or blank.
    pub fn append(
        mut self,
        label: Option<&str>,
        cultivar: Option<&str>,
        productivity: f64,
        origin: Origin,
    ) -> Self {
        self.push(label, cultivar, productivity, origin);
        self
    }

    /// In-place form of [`History::append`] returning the stored record.
    pub fn push(
        &mut self,
        label: Option<&str>,
        cultivar: Option<&str>,
        productivity: f64,
        origin: Origin,
    ) -> &Record {
        let label = match non_blank(label) {
            Some(l) => l.to_string(),
            None => self.next_default_label(),
        };
        let cultivar = non_blank(cultivar)
            .unwrap_or(UNSPECIFIED_CULTIVAR)
            .to_string();

        let index = self.records.len();
        self.records.push(Record {
            label,
            cultivar,
            productivity,
            origin,
        });
        &self.records[index]
    }

    /// Label the next record receives when none is given.
    pub fn next_default_label(&self) -> String {
        format!("Lote {}", self.records.len() + 1)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
