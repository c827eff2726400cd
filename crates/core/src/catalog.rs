use serde::{Deserialize, Serialize};

use crate::fields::{
    PartialFields, FIELD_AMOUNT, FIELD_CATEGORY, FIELD_COMPARISON_KEYWORD_1,
    FIELD_COMPARISON_KEYWORD_2, FIELD_END_DATE, FIELD_REMARKS, FIELD_SEARCH_TERM,
    FIELD_START_DATE, FIELD_SUBCATEGORY, FIELD_TIMESTAMP,
};

/// Classifications scoring below this are treated as "not an expense query".
pub const RELEVANCE_THRESHOLD: u8 = 3;
pub const MAX_RELEVANCE: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
    RecordExpense,
    TotalSpend,
    TopExpense,
    ExpenseComparison,
    TransactionSearch,
    DashboardSummary,
    Other,
}

impl IntentKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::RecordExpense => "recordExpense",
            Self::TotalSpend => "totalSpend",
            Self::TopExpense => "topExpense",
            Self::ExpenseComparison => "expenseComparison",
            Self::TransactionSearch => "transactionSearch",
            Self::DashboardSummary => "dashboardSummary",
            Self::Other => "other",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "recordExpense" => Some(Self::RecordExpense),
            "totalSpend" => Some(Self::TotalSpend),
            "topExpense" => Some(Self::TopExpense),
            "expenseComparison" => Some(Self::ExpenseComparison),
            "transactionSearch" => Some(Self::TransactionSearch),
            "dashboardSummary" => Some(Self::DashboardSummary),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.wire_name())
    }
}

/// Static description of one supported intent: what it does, which fields it
/// needs before dispatch, and sample phrasings for the classification prompt.
#[derive(Clone, Copy, Debug)]
pub struct IntentDefinition {
    pub kind: IntentKind,
    pub description: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub examples: &'static [&'static str],
}

impl IntentDefinition {
    pub fn field_union(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.required.iter().chain(self.optional.iter()).copied()
    }

    pub fn accepts_field(&self, name: &str) -> bool {
        self.field_union().any(|field| field == name)
    }
}

static DEFINITIONS: &[IntentDefinition] = &[
    IntentDefinition {
        kind: IntentKind::RecordExpense,
        description: "Record a single expense the user just described",
        required: &[FIELD_AMOUNT, FIELD_CATEGORY, FIELD_SUBCATEGORY, FIELD_TIMESTAMP],
        optional: &[FIELD_REMARKS],
        examples: &["I spent 200 on lunch today", "paid 1500 for the electricity bill yesterday"],
    },
    IntentDefinition {
        kind: IntentKind::TotalSpend,
        description: "Total amount spent over a period, optionally narrowed to a category",
        required: &[FIELD_START_DATE, FIELD_END_DATE],
        optional: &[FIELD_CATEGORY, FIELD_SUBCATEGORY],
        examples: &["how much did I spend this month", "total spend on food last week"],
    },
    IntentDefinition {
        kind: IntentKind::TopExpense,
        description: "Largest single expense over a period",
        required: &[FIELD_START_DATE, FIELD_END_DATE],
        optional: &[FIELD_CATEGORY],
        examples: &["what was my biggest expense this month"],
    },
    IntentDefinition {
        kind: IntentKind::ExpenseComparison,
        description: "Compare spending between two categories, subcategories or keywords",
        required: &[
            FIELD_COMPARISON_KEYWORD_1,
            FIELD_COMPARISON_KEYWORD_2,
            FIELD_START_DATE,
            FIELD_END_DATE,
        ],
        optional: &[],
        examples: &["compare food vs travel this month", "groceries versus dining out last month"],
    },
    IntentDefinition {
        kind: IntentKind::TransactionSearch,
        description: "Find transactions matching a free-text term",
        required: &[FIELD_SEARCH_TERM],
        optional: &[FIELD_START_DATE, FIELD_END_DATE, FIELD_CATEGORY],
        examples: &["show my uber rides", "find the coffee purchases from last week"],
    },
    IntentDefinition {
        kind: IntentKind::DashboardSummary,
        description: "Spending overview for a period: totals, category breakdown, trend",
        required: &[FIELD_START_DATE, FIELD_END_DATE],
        optional: &[],
        examples: &["summarize my spending this month"],
    },
];

pub fn definitions() -> &'static [IntentDefinition] {
    DEFINITIONS
}

pub fn definition_for(kind: IntentKind) -> Option<&'static IntentDefinition> {
    DEFINITIONS.iter().find(|definition| definition.kind == kind)
}

/// One classification turn's outcome from the extractor.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub relevance: u8,
    pub intent: IntentKind,
    pub fields: PartialFields,
}

impl ClassificationResult {
    pub fn is_relevant(&self) -> bool {
        self.relevance >= RELEVANCE_THRESHOLD
    }

    pub fn irrelevant() -> Self {
        Self { relevance: 0, intent: IntentKind::Other, fields: PartialFields::new() }
    }
}

/// User-scoped category vocabulary fed verbatim into the classification
/// prompt and into missing-field forms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, subcategories: &[&str]) -> Self {
        Self {
            name: name.into(),
            subcategories: subcategories.iter().map(|value| (*value).to_owned()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{definition_for, definitions, IntentKind};

    #[test]
    fn required_and_optional_fields_never_overlap() {
        for definition in definitions() {
            for required in definition.required {
                assert!(
                    !definition.optional.contains(required),
                    "{} lists `{required}` as both required and optional",
                    definition.kind
                );
            }
        }
    }

    #[test]
    fn every_definition_is_reachable_by_kind() {
        for definition in definitions() {
            let looked_up = definition_for(definition.kind).expect("definition should resolve");
            assert_eq!(looked_up.kind, definition.kind);
        }
        assert!(definition_for(IntentKind::Other).is_none());
    }

    #[test]
    fn wire_names_round_trip() {
        for definition in definitions() {
            let name = definition.kind.wire_name();
            assert_eq!(IntentKind::parse(name), Some(definition.kind));
        }
        assert_eq!(IntentKind::parse("other"), Some(IntentKind::Other));
        assert_eq!(IntentKind::parse("payBills"), None);
    }

    #[test]
    fn field_union_covers_required_and_optional() {
        let definition =
            definition_for(IntentKind::TotalSpend).expect("totalSpend should be defined");
        assert!(definition.accepts_field("startDate"));
        assert!(definition.accepts_field("category"));
        assert!(!definition.accepts_field("searchTerm"));
    }
}
