//! Unit normalization and productivity calculation for a single form entry.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::errors::ValidationError;
use crate::history::{History, Origin, Record};

/// Weight of one sack, in kilograms.
pub const KG_PER_SACK: f64 = 60.0;

/// Unit the harvested quantity was measured in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unit {
    #[default]
    Sacks,
    Kilograms,
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sacas" | "saca" | "sacks" | "sack" | "sc" => Ok(Unit::Sacks),
            "kg" | "kgs" | "kilograms" | "quilos" => Ok(Unit::Kilograms),
            other => Err(format!("unknown unit '{other}' (expected 'sacas' or 'kg')")),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Sacks => f.write_str("sacas"),
            Unit::Kilograms => f.write_str("kg"),
        }
    }
}

/// Converts a harvested quantity to sacks.
pub fn normalize(quantity: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Sacks => quantity,
        Unit::Kilograms => quantity / KG_PER_SACK,
    }
}

/// Rounds to two decimal places, the precision records are stored with.
///
/// The value is scaled by 100 and rounded half away from zero, so decimal
/// ties such as `2.675` and `1.045` round up to `2.68` and `1.05`. Values too
/// large to scale are returned as they are.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 100.0
}

/// Parses a user-typed decimal, accepting either `.` or `,` as separator.
///
/// Returns `None` for empty input, anything that is not a number, and
/// non-finite values.
pub fn parse_decimal(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Parses and checks an area value; it must be a number greater than zero.
pub fn parse_area(input: &str) -> Result<f64, ValidationError> {
    let area = parse_decimal(input).ok_or_else(|| ValidationError::InvalidArea(input.to_string()))?;
    if area <= 0.0 {
        return Err(ValidationError::NonPositiveArea(input.trim().to_string()));
    }
    Ok(area)
}

/// Parses and checks a harvested quantity; it must be a non-negative number.
pub fn parse_quantity(input: &str) -> Result<f64, ValidationError> {
    let quantity =
        parse_decimal(input).ok_or_else(|| ValidationError::InvalidQuantity(input.to_string()))?;
    if quantity < 0.0 {
        return Err(ValidationError::NegativeQuantity(input.trim().to_string()));
    }
    Ok(quantity)
}

/// Productivity in sacks per hectare, rounded to two decimals.
pub fn productivity(quantity: f64, unit: Unit, area: f64) -> f64 {
    round2(normalize(quantity, unit) / area)
}

/// [`productivity`], rejecting results that overflow to infinity.
pub fn checked_productivity(quantity: f64, unit: Unit, area: f64) -> Result<f64, ValidationError> {
    let value = productivity(quantity, unit, area);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::ProductivityOverflow)
    }
}

/// The raw contents of the entry form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryForm {
    pub area: String,
    pub quantity: String,
    pub unit: Unit,
    pub label: Option<String>,
    pub cultivar: Option<String>,
}

impl EntryForm {
    pub fn new(area: impl Into<String>, quantity: impl Into<String>, unit: Unit) -> Self {
        Self {
            area: area.into(),
            quantity: quantity.into(),
            unit,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_cultivar(mut self, cultivar: impl Into<String>) -> Self {
        self.cultivar = Some(cultivar.into());
        self
    }

    /// Validates the form and returns the productivity it describes.
    pub fn calculate(&self) -> Result<f64, ValidationError> {
        let area = parse_area(&self.area)?;
        let quantity = parse_quantity(&self.quantity)?;
        checked_productivity(quantity, self.unit, area)
    }
}

/// Submits the form against `history`.
///
/// On success the returned history has one more record and the record is
/// returned alongside it; on failure the history comes back unchanged.
pub fn submit(
    mut history: History,
    form: &EntryForm,
) -> (History, Result<Record, ValidationError>) {
    match form.calculate() {
        Ok(value) => {
            let record = history
                .push(
                    form.label.as_deref(),
                    form.cultivar.as_deref(),
                    value,
                    Origin::Manual,
                )
                .clone();
            debug!(productivity = value, records = history.len(), "Entry recorded");
            (history, Ok(record))
        }
        Err(e) => {
            debug!(error = %e, "Entry rejected");
            (history, Err(e))
        }
    }
}

/// Line shown to the user after a submission.
pub fn result_message(outcome: &Result<Record, ValidationError>) -> String {
    match outcome {
        Ok(record) => format!("Produtividade: {:.2} sacas/ha", record.productivity),
        Err(e) => e.user_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VALIDATION_MESSAGE;

    #[test]
    fn test_normalize_kilograms_divides_by_sack_weight() {
        assert_eq!(normalize(120.0, Unit::Kilograms), 2.0);
        assert_eq!(normalize(120.0, Unit::Sacks), 120.0);
    }

    #[test]
    fn test_productivity_in_sacks() {
        assert_eq!(productivity(550.0, Unit::Sacks, 10.0), 55.0);
        assert_eq!(productivity(100.0, Unit::Sacks, 3.0), 33.33);
    }

    #[test]
    fn test_productivity_in_kilograms() {
        assert_eq!(productivity(300.0, Unit::Kilograms, 5.0), 1.0);
        assert_eq!(productivity(1000.0, Unit::Kilograms, 7.0), 2.38);
    }

    #[test]
    fn test_round2_ties_round_away_from_zero() {
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(-0.125), -0.13);
        assert_eq!(round2(2.675), 2.68);
        assert_eq!(round2(1.045), 1.05);
        assert_eq!(round2(33.333), 33.33);
    }

    #[test]
    fn test_round2_keeps_huge_values_finite() {
        assert_eq!(round2(1e307), 1e307);
        assert_eq!(round2(f64::MAX), f64::MAX);
    }

    #[test]
    fn test_overflowing_productivity_is_rejected() {
        assert!(productivity(1e307, Unit::Sacks, 1.0).is_finite());
        assert_eq!(
            checked_productivity(1e308, Unit::Sacks, 0.001),
            Err(ValidationError::ProductivityOverflow)
        );

        let history = History::new().append(Some("a"), None, 1.0, Origin::Manual);
        let (history, outcome) = submit(history, &EntryForm::new("0,001", "1e308", Unit::Sacks));
        assert_eq!(outcome, Err(ValidationError::ProductivityOverflow));
        assert_eq!(result_message(&outcome), VALIDATION_MESSAGE);
        assert_eq!(history.len(), 1);

        let (_, outcome) = submit(History::new(), &EntryForm::new("1", "1e307", Unit::Sacks));
        assert!(outcome.unwrap().productivity.is_finite());
    }

    #[test]
    fn test_parse_decimal_accepts_comma() {
        assert_eq!(parse_decimal("2,5"), Some(2.5));
        assert_eq!(parse_decimal(" 10.25 "), Some(10.25));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
    }

    #[test]
    fn test_parse_area_rejects_zero_and_negative() {
        assert!(matches!(parse_area("0"), Err(ValidationError::NonPositiveArea(_))));
        assert!(matches!(parse_area("-3"), Err(ValidationError::NonPositiveArea(_))));
        assert!(matches!(parse_area("x"), Err(ValidationError::InvalidArea(_))));
    }

    #[test]
    fn test_parse_quantity_rejects_negative() {
        assert_eq!(parse_quantity("0"), Ok(0.0));
        assert!(matches!(
            parse_quantity("-1"),
            Err(ValidationError::NegativeQuantity(_))
        ));
    }

    #[test]
    fn test_unit_from_str() {
        assert_eq!("sacas".parse::<Unit>(), Ok(Unit::Sacks));
        assert_eq!("KG".parse::<Unit>(), Ok(Unit::Kilograms));
        assert!("ton".parse::<Unit>().is_err());
    }

    #[test]
    fn test_submit_success_appends_record() {
        let form = EntryForm::new("10", "550", Unit::Sacks)
            .with_label("Talhão A")
            .with_cultivar("BRS1010");

        let (history, outcome) = submit(History::new(), &form);

        assert_eq!(result_message(&outcome), "Produtividade: 55.00 sacas/ha");
        assert_eq!(history.len(), 1);
        let record = &history.records()[0];
        assert_eq!(record.label, "Talhão A");
        assert_eq!(record.cultivar, "BRS1010");
        assert_eq!(record.productivity, 55.0);
    }

    #[test]
    fn test_submit_kilograms() {
        let form = EntryForm::new("5", "300", Unit::Kilograms);
        let (history, outcome) = submit(History::new(), &form);

        assert_eq!(outcome.unwrap().productivity, 1.0);
        assert_eq!(history.records()[0].label, "Lote 1");
    }

    #[test]
    fn test_submit_failure_leaves_history_untouched() {
        let history = History::new().append(Some("a"), None, 1.0, Origin::Manual);

        for (area, quantity) in [("0", "10"), ("-2", "10"), ("abc", "10"), ("10", ""), ("", "")] {
            let form = EntryForm::new(area, quantity, Unit::Sacks);
            let (after, outcome) = submit(history.clone(), &form);

            assert!(outcome.is_err(), "area={area} quantity={quantity}");
            assert_eq!(result_message(&outcome), VALIDATION_MESSAGE);
            assert_eq!(after, history);
        }
    }
}
