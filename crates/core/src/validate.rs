use serde::{Deserialize, Serialize};

use crate::catalog::{Category, IntentDefinition};
use crate::conversation::ResumeState;
use crate::fields::{PartialFields, FIELD_AMOUNT, FIELD_TIMESTAMP};

/// Required fields the collected data does not yet satisfy, in catalog
/// order. A field is satisfied by any usable value; numeric zero counts.
pub fn find_missing(
    definition: &IntentDefinition,
    fields: &PartialFields,
) -> Vec<&'static str> {
    definition.required.iter().copied().filter(|name| !fields.is_present(name)).collect()
}

/// Form description streamed back to the client when required fields are
/// missing. Terminal for the turn: no tool runs until the flow resumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissingFieldsPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub fields: Vec<FieldDescriptor>,
    pub categories: Vec<Category>,
    #[serde(rename = "resumeState")]
    pub resume_state: ResumeState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub input_type: String,
    pub required: bool,
}

pub const MISSING_FIELDS_KIND: &str = "missing_fields";

pub fn build_missing_fields_payload(
    definition: &IntentDefinition,
    collected: &PartialFields,
    missing: &[&'static str],
    categories: Vec<Category>,
) -> MissingFieldsPayload {
    MissingFieldsPayload {
        kind: MISSING_FIELDS_KIND.to_owned(),
        fields: missing.iter().map(|name| describe_field(name)).collect(),
        categories,
        resume_state: ResumeState::new(definition.kind, collected),
    }
}

fn describe_field(name: &str) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_owned(),
        label: capitalize(name),
        input_type: input_type_for(name).to_owned(),
        required: true,
    }
}

fn input_type_for(name: &str) -> &'static str {
    match name {
        FIELD_AMOUNT => "number",
        FIELD_TIMESTAMP => "datetime-local",
        _ => "text",
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::catalog::{definition_for, Category, IntentKind};
    use crate::fields::{
        FieldValue, PartialFields, FIELD_AMOUNT, FIELD_CATEGORY, FIELD_SUBCATEGORY,
        FIELD_TIMESTAMP,
    };
    use crate::validate::{build_missing_fields_payload, find_missing};

    fn record_expense() -> &'static crate::catalog::IntentDefinition {
        definition_for(IntentKind::RecordExpense).expect("recordExpense should be defined")
    }

    #[test]
    fn reports_missing_required_fields_in_catalog_order() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::from(200)));

        let missing = find_missing(record_expense(), &fields);
        assert_eq!(missing, vec![FIELD_CATEGORY, FIELD_SUBCATEGORY, FIELD_TIMESTAMP]);
    }

    #[test]
    fn zero_amount_is_not_reported_missing() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::ZERO));

        let missing = find_missing(record_expense(), &fields);
        assert!(!missing.contains(&FIELD_AMOUNT));
    }

    #[test]
    fn blank_text_is_reported_missing() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_CATEGORY, FieldValue::Text("  ".to_owned()));

        let missing = find_missing(record_expense(), &fields);
        assert!(missing.contains(&FIELD_CATEGORY));
    }

    #[test]
    fn optional_fields_are_never_demanded() {
        let definition =
            definition_for(IntentKind::TransactionSearch).expect("transactionSearch defined");
        let mut fields = PartialFields::new();
        fields.insert("searchTerm", FieldValue::Text("uber".to_owned()));

        assert!(find_missing(definition, &fields).is_empty());
    }

    #[test]
    fn payload_describes_inputs_and_snapshots_collected_fields() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::from(200)));

        let missing = find_missing(record_expense(), &fields);
        let payload = build_missing_fields_payload(
            record_expense(),
            &fields,
            &missing,
            vec![Category::new("Food", &["Lunch", "Groceries"])],
        );

        assert_eq!(payload.kind, "missing_fields");
        assert_eq!(payload.resume_state.intent, "recordExpense");
        assert_eq!(payload.resume_state.context.partial_data.get(FIELD_AMOUNT), Some(&json!(200)));
        assert!(payload.fields.iter().all(|field| field.required));

        let timestamp = payload
            .fields
            .iter()
            .find(|field| field.name == FIELD_TIMESTAMP)
            .expect("timestamp should be requested");
        assert_eq!(timestamp.input_type, "datetime-local");
        assert_eq!(timestamp.label, "Timestamp");

        let category = payload
            .fields
            .iter()
            .find(|field| field.name == FIELD_CATEGORY)
            .expect("category should be requested");
        assert_eq!(category.input_type, "text");
        assert_eq!(category.label, "Category");
    }

    #[test]
    fn wire_shape_matches_the_client_contract() {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::from(200)));
        let missing = find_missing(record_expense(), &fields);
        let payload = build_missing_fields_payload(
            record_expense(),
            &fields,
            &missing,
            vec![Category::new("Food", &[])],
        );

        let encoded = serde_json::to_value(&payload).expect("payload should serialize");
        assert_eq!(encoded["type"], "missing_fields");
        assert_eq!(encoded["fields"][0]["type"], "text");
        assert_eq!(encoded["resumeState"]["context"]["partialData"]["amount"], json!(200));
        assert_eq!(encoded["categories"][0]["name"], "Food");
    }
}
