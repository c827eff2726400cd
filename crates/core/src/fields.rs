use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::errors::DomainError;

pub const FIELD_AMOUNT: &str = "amount";
pub const FIELD_CATEGORY: &str = "category";
pub const FIELD_SUBCATEGORY: &str = "subcategory";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_REMARKS: &str = "remarks";
pub const FIELD_START_DATE: &str = "startDate";
pub const FIELD_END_DATE: &str = "endDate";
pub const FIELD_COMPARISON_KEYWORD_1: &str = "comparisonKeyword1";
pub const FIELD_COMPARISON_KEYWORD_2: &str = "comparisonKeyword2";
pub const FIELD_SEARCH_TERM: &str = "searchTerm";

/// Expected value shape for a field, keyed by field name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Amount,
    Instant,
    Text,
}

impl FieldKind {
    pub fn for_name(name: &str) -> Self {
        match name {
            FIELD_AMOUNT => Self::Amount,
            FIELD_TIMESTAMP | FIELD_START_DATE | FIELD_END_DATE => Self::Instant,
            _ => Self::Text,
        }
    }
}

/// A single extracted field value, already coerced to its expected shape.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Number(Decimal),
    Instant(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    /// A field counts as present when it carries usable content. Numeric zero
    /// is a valid amount, not a missing one.
    pub fn is_present(&self) -> bool {
        match self {
            Self::Text(text) => !text.trim().is_empty(),
            Self::Number(_) | Self::Instant(_) => true,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(number) => serde_json::Number::from_str(&number.to_string())
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(number.to_string())),
            Self::Instant(instant) => {
                Value::String(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Self::Text(text) => Value::String(text.clone()),
        }
    }

    fn coerce(kind: FieldKind, value: &Value) -> Result<Self, String> {
        match kind {
            FieldKind::Amount => coerce_amount(value),
            FieldKind::Instant => coerce_instant(value),
            FieldKind::Text => coerce_text(value),
        }
    }
}

fn coerce_amount(value: &Value) -> Result<FieldValue, String> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .map(FieldValue::Number)
            .map_err(|_| format!("`{number}` is not a representable amount")),
        Value::String(text) => text
            .trim()
            .parse::<Decimal>()
            .map(FieldValue::Number)
            .map_err(|_| format!("`{text}` is not a number")),
        other => Err(format!("expected a number, got {}", json_type_name(other))),
    }
}

fn coerce_instant(value: &Value) -> Result<FieldValue, String> {
    match value {
        Value::String(text) => parse_instant(text)
            .map(FieldValue::Instant)
            .ok_or_else(|| format!("`{text}` is not an ISO-8601 instant")),
        other => Err(format!("expected an ISO-8601 string, got {}", json_type_name(other))),
    }
}

fn coerce_text(value: &Value) -> Result<FieldValue, String> {
    match value {
        Value::String(text) => Ok(FieldValue::Text(text.clone())),
        Value::Number(number) => Ok(FieldValue::Text(number.to_string())),
        other => Err(format!("expected text, got {}", json_type_name(other))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parses the instant shapes the pipeline accepts: RFC 3339, a bare
/// `YYYY-MM-DDTHH:MM[:SS]` (assumed UTC, covers `datetime-local` form
/// submissions), or a plain calendar day (midnight UTC).
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&parsed));
        }
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return parsed.and_hms_opt(0, 0, 0).map(|midnight| Utc.from_utc_datetime(&midnight));
    }

    None
}

/// Open field map carried while a conversation collects values across turns.
/// Typed per-intent records are built from this at the dispatch boundary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialFields {
    values: BTreeMap<String, FieldValue>,
}

impl PartialFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.values.insert(name.into(), value);
    }

    /// Coerces a raw JSON value by the field's expected kind and stores it.
    /// Nulls are treated as "not supplied" and skipped.
    pub fn insert_json(&mut self, name: &str, value: &Value) -> Result<(), DomainError> {
        if value.is_null() {
            return Ok(());
        }

        let coerced = FieldValue::coerce(FieldKind::for_name(name), value).map_err(|reason| {
            DomainError::InvalidFieldValue { field: name.to_owned(), reason }
        })?;
        self.values.insert(name.to_owned(), coerced);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.values.remove(name)
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.values.get(name).map(FieldValue::is_present).unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> Option<Decimal> {
        match self.values.get(name) {
            Some(FieldValue::Number(number)) => Some(*number),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(FieldValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn instant(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.values.get(name) {
            Some(FieldValue::Instant(instant)) => Some(*instant),
            _ => None,
        }
    }

    /// Later values win over earlier ones for the same key.
    pub fn merged_with(mut self, newer: PartialFields) -> PartialFields {
        self.values.extend(newer.values);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json_object(&self) -> serde_json::Map<String, Value> {
        self.values.iter().map(|(name, value)| (name.clone(), value.to_json())).collect()
    }

    /// Rebuilds a field map from a raw JSON object, coercing every value by
    /// its field's expected kind.
    pub fn from_json_object(object: &serde_json::Map<String, Value>) -> Result<Self, DomainError> {
        let mut fields = Self::new();
        for (name, value) in object {
            fields.insert_json(name, value)?;
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::fields::{
        parse_instant, FieldKind, FieldValue, PartialFields, FIELD_AMOUNT, FIELD_CATEGORY,
        FIELD_START_DATE, FIELD_TIMESTAMP,
    };

    #[test]
    fn field_kinds_follow_field_names() {
        assert_eq!(FieldKind::for_name(FIELD_AMOUNT), FieldKind::Amount);
        assert_eq!(FieldKind::for_name(FIELD_TIMESTAMP), FieldKind::Instant);
        assert_eq!(FieldKind::for_name(FIELD_START_DATE), FieldKind::Instant);
        assert_eq!(FieldKind::for_name("comparisonKeyword1"), FieldKind::Text);
    }

    #[test]
    fn amounts_accept_numbers_and_numeric_strings() {
        let mut fields = PartialFields::new();
        fields.insert_json(FIELD_AMOUNT, &json!(200.5)).expect("number should coerce");
        assert_eq!(fields.number(FIELD_AMOUNT), Some(Decimal::new(2005, 1)));

        fields.insert_json(FIELD_AMOUNT, &json!("42")).expect("numeric string should coerce");
        assert_eq!(fields.number(FIELD_AMOUNT), Some(Decimal::from(42)));
    }

    #[test]
    fn amount_rejects_non_numeric_text() {
        let mut fields = PartialFields::new();
        let error = fields.insert_json(FIELD_AMOUNT, &json!("lots")).expect_err("must fail");
        assert!(error.to_string().contains("amount"));
    }

    #[test]
    fn zero_amount_counts_as_present() {
        let mut fields = PartialFields::new();
        fields.insert_json(FIELD_AMOUNT, &json!(0)).expect("zero should coerce");
        assert!(fields.is_present(FIELD_AMOUNT));
    }

    #[test]
    fn blank_text_is_not_present() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_CATEGORY, FieldValue::Text("   ".to_owned()));
        assert!(!fields.is_present(FIELD_CATEGORY));
        assert!(!fields.is_present("never-set"));
    }

    #[test]
    fn nulls_are_skipped_rather_than_stored() {
        let mut fields = PartialFields::new();
        fields.insert_json(FIELD_CATEGORY, &serde_json::Value::Null).expect("null is skipped");
        assert!(fields.is_empty());
    }

    #[test]
    fn instants_parse_rfc3339_datetime_local_and_plain_days() {
        let rfc = parse_instant("2024-05-15T10:30:00.000Z").expect("rfc3339 parses");
        assert_eq!(rfc, Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap());

        let local = parse_instant("2024-05-15T10:30").expect("datetime-local parses");
        assert_eq!(local, Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap());

        let day = parse_instant("2024-05-15").expect("plain day parses");
        assert_eq!(day, Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap());

        assert!(parse_instant("next tuesday").is_none());
    }

    #[test]
    fn merge_prefers_newer_values_and_keeps_unspecified_keys() {
        let mut prior = PartialFields::new();
        prior.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::from(200)));
        prior.insert(FIELD_CATEGORY, FieldValue::Text("Food".to_owned()));

        let mut newer = PartialFields::new();
        newer.insert(FIELD_CATEGORY, FieldValue::Text("Travel".to_owned()));

        let merged = prior.merged_with(newer);
        assert_eq!(merged.number(FIELD_AMOUNT), Some(Decimal::from(200)));
        assert_eq!(merged.text(FIELD_CATEGORY), Some("Travel"));
    }

    #[test]
    fn json_round_trip_preserves_shapes() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::from(200)));
        fields.insert(
            FIELD_TIMESTAMP,
            FieldValue::Instant(Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()),
        );
        fields.insert(FIELD_CATEGORY, FieldValue::Text("Food".to_owned()));

        let object = fields.to_json_object();
        assert_eq!(object.get(FIELD_AMOUNT), Some(&json!(200)));
        assert_eq!(object.get(FIELD_TIMESTAMP), Some(&json!("2024-05-15T00:00:00.000Z")));
        assert_eq!(object.get(FIELD_CATEGORY), Some(&json!("Food")));
    }
}
