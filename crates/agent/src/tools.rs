use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::error;

use trackcrow_core::catalog::IntentKind;
use trackcrow_core::errors::DomainError;
use trackcrow_core::fields::{
    FieldValue, PartialFields, FIELD_AMOUNT, FIELD_CATEGORY, FIELD_COMPARISON_KEYWORD_1,
    FIELD_COMPARISON_KEYWORD_2, FIELD_END_DATE, FIELD_REMARKS, FIELD_SEARCH_TERM,
    FIELD_START_DATE, FIELD_SUBCATEGORY, FIELD_TIMESTAMP,
};
use trackcrow_core::replies::{tool_failure_reply, unknown_intent_reply};
use trackcrow_core::stream::{StreamEvent, TurnStream};
use trackcrow_core::timeframe::{range_of, DateRange};

use crate::store::{NewTransaction, SpendTotal, Transaction, TransactionStore, UserId};

/// Typed dispatch input, one variant per intent. Rebuilding this from the
/// open field map is the last validation gate before a tool runs.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolRequest {
    RecordExpense(RecordExpenseInput),
    TotalSpend(TotalSpendInput),
    TopExpense(TopExpenseInput),
    ExpenseComparison(ExpenseComparisonInput),
    TransactionSearch(TransactionSearchInput),
    DashboardSummary(DashboardSummaryInput),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordExpenseInput {
    pub amount: Decimal,
    pub category: String,
    pub subcategory: String,
    pub timestamp: DateTime<Utc>,
    pub remarks: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TotalSpendInput {
    pub range: DateRange,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopExpenseInput {
    pub range: DateRange,
    pub category: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseComparisonInput {
    pub keyword1: String,
    pub keyword2: String,
    pub range: DateRange,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionSearchInput {
    pub term: String,
    pub range: Option<DateRange>,
    pub category: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DashboardSummaryInput {
    pub range: DateRange,
}

impl ToolRequest {
    pub fn from_fields(intent: IntentKind, fields: &PartialFields) -> Result<Self, DomainError> {
        match intent {
            IntentKind::RecordExpense => Ok(Self::RecordExpense(RecordExpenseInput {
                amount: require_number(intent, fields, FIELD_AMOUNT)?,
                category: require_text(intent, fields, FIELD_CATEGORY)?,
                subcategory: require_text(intent, fields, FIELD_SUBCATEGORY)?,
                timestamp: require_instant(intent, fields, FIELD_TIMESTAMP)?,
                remarks: optional_text(fields, FIELD_REMARKS),
            })),
            IntentKind::TotalSpend => Ok(Self::TotalSpend(TotalSpendInput {
                range: require_range(intent, fields)?,
                category: optional_text(fields, FIELD_CATEGORY),
                subcategory: optional_text(fields, FIELD_SUBCATEGORY),
            })),
            IntentKind::TopExpense => Ok(Self::TopExpense(TopExpenseInput {
                range: require_range(intent, fields)?,
                category: optional_text(fields, FIELD_CATEGORY),
            })),
            IntentKind::ExpenseComparison => Ok(Self::ExpenseComparison(ExpenseComparisonInput {
                keyword1: require_text(intent, fields, FIELD_COMPARISON_KEYWORD_1)?,
                keyword2: require_text(intent, fields, FIELD_COMPARISON_KEYWORD_2)?,
                range: require_range(intent, fields)?,
            })),
            IntentKind::TransactionSearch => Ok(Self::TransactionSearch(TransactionSearchInput {
                term: require_text(intent, fields, FIELD_SEARCH_TERM)?,
                range: range_of(fields),
                category: optional_text(fields, FIELD_CATEGORY),
            })),
            IntentKind::DashboardSummary => Ok(Self::DashboardSummary(DashboardSummaryInput {
                range: require_range(intent, fields)?,
            })),
            IntentKind::Other => {
                Err(DomainError::UnknownIntent { name: IntentKind::Other.wire_name().to_owned() })
            }
        }
    }

    /// Wire shape for the `tool-input-available` frame, mirroring the field
    /// names the extractor produced.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        match self {
            Self::RecordExpense(input) => {
                object.insert(FIELD_AMOUNT.to_owned(), money(input.amount));
                put_text(&mut object, FIELD_CATEGORY, &input.category);
                put_text(&mut object, FIELD_SUBCATEGORY, &input.subcategory);
                object.insert(FIELD_TIMESTAMP.to_owned(), instant(input.timestamp));
                put_opt_text(&mut object, FIELD_REMARKS, &input.remarks);
            }
            Self::TotalSpend(input) => {
                put_range(&mut object, input.range);
                put_opt_text(&mut object, FIELD_CATEGORY, &input.category);
                put_opt_text(&mut object, FIELD_SUBCATEGORY, &input.subcategory);
            }
            Self::TopExpense(input) => {
                put_range(&mut object, input.range);
                put_opt_text(&mut object, FIELD_CATEGORY, &input.category);
            }
            Self::ExpenseComparison(input) => {
                put_text(&mut object, FIELD_COMPARISON_KEYWORD_1, &input.keyword1);
                put_text(&mut object, FIELD_COMPARISON_KEYWORD_2, &input.keyword2);
                put_range(&mut object, input.range);
            }
            Self::TransactionSearch(input) => {
                put_text(&mut object, FIELD_SEARCH_TERM, &input.term);
                if let Some(range) = input.range {
                    put_range(&mut object, range);
                }
                put_opt_text(&mut object, FIELD_CATEGORY, &input.category);
            }
            Self::DashboardSummary(input) => {
                put_range(&mut object, input.range);
            }
        }
        Value::Object(object)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub message: String,
    pub data: Option<Value>,
}

impl ToolOutput {
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("message".to_owned(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            object.insert("data".to_owned(), data.clone());
        }
        Value::Object(object)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn intent(&self) -> IntentKind;
    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<IntentKind, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.intent(), Box::new(tool));
    }

    pub fn with_standard_tools(store: Arc<dyn TransactionStore>) -> Self {
        let mut registry = Self::new();
        registry.register(RecordExpenseTool { store: Arc::clone(&store) });
        registry.register(TotalSpendTool { store: Arc::clone(&store) });
        registry.register(TopExpenseTool { store: Arc::clone(&store) });
        registry.register(ExpenseComparisonTool { store: Arc::clone(&store) });
        registry.register(TransactionSearchTool { store: Arc::clone(&store) });
        registry.register(DashboardSummaryTool { store });
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs the tool for an intent exactly once and converts the outcome to
    /// stream frames. Execution failures never cross this boundary; they
    /// become a framed failure message so the client stream still terminates
    /// cleanly.
    pub async fn dispatch(
        &self,
        user: &UserId,
        intent: IntentKind,
        fields: &PartialFields,
    ) -> Vec<StreamEvent> {
        let name = intent.wire_name();
        let Some(tool) = self.tools.get(&intent) else {
            return TurnStream::text(unknown_intent_reply(name));
        };

        let request = match ToolRequest::from_fields(intent, fields) {
            Ok(request) => request,
            Err(error) => {
                error!(event_name = "tools.request_rebuild_failed", tool = name, error = %error);
                return TurnStream::text(tool_failure_reply(name, &error.to_string()));
            }
        };

        let input = request.to_json();
        match tool.execute(user, &request).await {
            Ok(output) => TurnStream::tool_result(name, input, output.to_json()),
            Err(error) => {
                error!(event_name = "tools.execution_failed", tool = name, error = %error);
                TurnStream::tool_failure(name, input, &tool_failure_reply(name, &error.to_string()))
            }
        }
    }
}

struct RecordExpenseTool {
    store: Arc<dyn TransactionStore>,
}

#[async_trait]
impl Tool for RecordExpenseTool {
    fn intent(&self) -> IntentKind {
        IntentKind::RecordExpense
    }

    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput> {
        let ToolRequest::RecordExpense(input) = request else {
            anyhow::bail!("mismatched input for recordExpense");
        };
        let recorded = self
            .store
            .record_transaction(
                user,
                NewTransaction {
                    amount: input.amount,
                    category: input.category.clone(),
                    subcategory: input.subcategory.clone(),
                    timestamp: input.timestamp,
                    remarks: input.remarks.clone(),
                },
            )
            .await?;

        Ok(ToolOutput {
            message: format!(
                "Recorded {} for {} / {}.",
                recorded.amount, recorded.category, recorded.subcategory
            ),
            data: Some(transaction_json(&recorded)),
        })
    }
}

struct TotalSpendTool {
    store: Arc<dyn TransactionStore>,
}

#[async_trait]
impl Tool for TotalSpendTool {
    fn intent(&self) -> IntentKind {
        IntentKind::TotalSpend
    }

    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput> {
        let ToolRequest::TotalSpend(input) = request else {
            anyhow::bail!("mismatched input for totalSpend");
        };
        let result = self
            .store
            .sum_spend(user, input.range, input.category.as_deref(), input.subcategory.as_deref())
            .await?;

        let scope = match (&input.category, &input.subcategory) {
            (Some(category), Some(subcategory)) => format!(" on {category} / {subcategory}"),
            (Some(category), None) => format!(" on {category}"),
            (None, Some(subcategory)) => format!(" on {subcategory}"),
            (None, None) => String::new(),
        };
        let message = if result.count == 0 {
            format!("No spending recorded{} {}.", scope, span_text(input.range))
        } else {
            format!("You spent {}{} {}.", result.total, scope, span_text(input.range))
        };

        let mut data = Map::new();
        data.insert("total".to_owned(), money(result.total));
        data.insert("count".to_owned(), Value::from(result.count));
        put_range(&mut data, input.range);
        Ok(ToolOutput { message, data: Some(Value::Object(data)) })
    }
}

struct TopExpenseTool {
    store: Arc<dyn TransactionStore>,
}

#[async_trait]
impl Tool for TopExpenseTool {
    fn intent(&self) -> IntentKind {
        IntentKind::TopExpense
    }

    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput> {
        let ToolRequest::TopExpense(input) = request else {
            anyhow::bail!("mismatched input for topExpense");
        };
        let top = self.store.top_expense(user, input.range, input.category.as_deref()).await?;

        Ok(match top {
            Some(expense) => ToolOutput {
                message: format!(
                    "Your biggest expense {} was {} on {} / {}.",
                    span_text(input.range),
                    expense.amount,
                    expense.category,
                    expense.subcategory
                ),
                data: Some(transaction_json(&expense)),
            },
            None => ToolOutput {
                message: format!("No expenses found {}.", span_text(input.range)),
                data: None,
            },
        })
    }
}

struct ExpenseComparisonTool {
    store: Arc<dyn TransactionStore>,
}

#[async_trait]
impl Tool for ExpenseComparisonTool {
    fn intent(&self) -> IntentKind {
        IntentKind::ExpenseComparison
    }

    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput> {
        let ToolRequest::ExpenseComparison(input) = request else {
            anyhow::bail!("mismatched input for expenseComparison");
        };

        // Independent lookups, no ordering requirement between them.
        let (first, second) = tokio::join!(
            self.store.spend_for_keyword(user, input.range, &input.keyword1),
            self.store.spend_for_keyword(user, input.range, &input.keyword2),
        );
        let first = first?;
        let second = second?;

        let message = format!(
            "You spent {} on \"{}\" and {} on \"{}\" {}.",
            first.total,
            input.keyword1,
            second.total,
            input.keyword2,
            span_text(input.range)
        );

        let mut data = Map::new();
        data.insert("keyword1".to_owned(), keyword_json(&input.keyword1, first));
        data.insert("keyword2".to_owned(), keyword_json(&input.keyword2, second));
        put_range(&mut data, input.range);
        Ok(ToolOutput { message, data: Some(Value::Object(data)) })
    }
}

struct TransactionSearchTool {
    store: Arc<dyn TransactionStore>,
}

#[async_trait]
impl Tool for TransactionSearchTool {
    fn intent(&self) -> IntentKind {
        IntentKind::TransactionSearch
    }

    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput> {
        let ToolRequest::TransactionSearch(input) = request else {
            anyhow::bail!("mismatched input for transactionSearch");
        };
        let matches = self
            .store
            .search_transactions(user, &input.term, input.range, input.category.as_deref())
            .await?;

        let message = match matches.len() {
            0 => format!("No transactions matched \"{}\".", input.term),
            1 => format!("Found 1 transaction matching \"{}\".", input.term),
            n => format!("Found {n} transactions matching \"{}\".", input.term),
        };

        let mut data = Map::new();
        data.insert(
            "matches".to_owned(),
            Value::Array(matches.iter().map(transaction_json).collect()),
        );
        Ok(ToolOutput { message, data: Some(Value::Object(data)) })
    }
}

struct DashboardSummaryTool {
    store: Arc<dyn TransactionStore>,
}

#[async_trait]
impl Tool for DashboardSummaryTool {
    fn intent(&self) -> IntentKind {
        IntentKind::DashboardSummary
    }

    async fn execute(&self, user: &UserId, request: &ToolRequest) -> Result<ToolOutput> {
        let ToolRequest::DashboardSummary(input) = request else {
            anyhow::bail!("mismatched input for dashboardSummary");
        };
        let summary = self.store.summary(user, input.range).await?;

        let mut message = if summary.count == 0 {
            format!("No spending recorded {}.", span_text(input.range))
        } else if summary.count == 1 {
            format!("You spent {} across 1 transaction {}.", summary.total, span_text(input.range))
        } else {
            format!(
                "You spent {} across {} transactions {}.",
                summary.total,
                summary.count,
                span_text(input.range)
            )
        };
        if let Some(leader) = summary.by_category.first() {
            message.push_str(&format!(" Top category: {} ({}).", leader.category, leader.total));
        }

        let mut data = Map::new();
        data.insert("total".to_owned(), money(summary.total));
        data.insert("count".to_owned(), Value::from(summary.count));
        data.insert(
            "byCategory".to_owned(),
            Value::Array(
                summary
                    .by_category
                    .iter()
                    .map(|entry| {
                        let mut object = Map::new();
                        put_text(&mut object, "category", &entry.category);
                        object.insert("total".to_owned(), money(entry.total));
                        Value::Object(object)
                    })
                    .collect(),
            ),
        );
        if let Some(top) = &summary.top {
            data.insert("topExpense".to_owned(), transaction_json(top));
        }
        put_range(&mut data, input.range);
        Ok(ToolOutput { message, data: Some(Value::Object(data)) })
    }
}

fn missing(intent: IntentKind, field: &str) -> DomainError {
    DomainError::MissingField { intent: intent.wire_name().to_owned(), field: field.to_owned() }
}

fn require_number(
    intent: IntentKind,
    fields: &PartialFields,
    name: &str,
) -> Result<Decimal, DomainError> {
    fields.number(name).ok_or_else(|| missing(intent, name))
}

fn require_instant(
    intent: IntentKind,
    fields: &PartialFields,
    name: &str,
) -> Result<DateTime<Utc>, DomainError> {
    fields.instant(name).ok_or_else(|| missing(intent, name))
}

fn require_text(
    intent: IntentKind,
    fields: &PartialFields,
    name: &str,
) -> Result<String, DomainError> {
    optional_text(fields, name).ok_or_else(|| missing(intent, name))
}

fn require_range(intent: IntentKind, fields: &PartialFields) -> Result<DateRange, DomainError> {
    range_of(fields).ok_or_else(|| missing(intent, FIELD_START_DATE))
}

fn optional_text(fields: &PartialFields, name: &str) -> Option<String> {
    fields.text(name).map(str::trim).filter(|text| !text.is_empty()).map(str::to_owned)
}

fn money(value: Decimal) -> Value {
    FieldValue::Number(value).to_json()
}

fn instant(value: DateTime<Utc>) -> Value {
    FieldValue::Instant(value).to_json()
}

fn put_text(object: &mut Map<String, Value>, key: &str, value: &str) {
    object.insert(key.to_owned(), Value::String(value.to_owned()));
}

fn put_opt_text(object: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(text) = value {
        put_text(object, key, text);
    }
}

fn put_range(object: &mut Map<String, Value>, range: DateRange) {
    object.insert(FIELD_START_DATE.to_owned(), instant(range.start));
    object.insert(FIELD_END_DATE.to_owned(), instant(range.end));
}

fn keyword_json(keyword: &str, total: SpendTotal) -> Value {
    let mut object = Map::new();
    put_text(&mut object, "keyword", keyword);
    object.insert("total".to_owned(), money(total.total));
    object.insert("count".to_owned(), Value::from(total.count));
    Value::Object(object)
}

fn transaction_json(transaction: &Transaction) -> Value {
    let mut object = Map::new();
    object.insert("id".to_owned(), Value::String(transaction.id.to_string()));
    object.insert("amount".to_owned(), money(transaction.amount));
    put_text(&mut object, "category", &transaction.category);
    put_text(&mut object, "subcategory", &transaction.subcategory);
    object.insert("timestamp".to_owned(), instant(transaction.timestamp));
    put_opt_text(&mut object, "remarks", &transaction.remarks);
    Value::Object(object)
}

fn friendly_day(instant: DateTime<Utc>) -> String {
    instant.format("%b %-d, %Y").to_string()
}

fn span_text(range: DateRange) -> String {
    format!("between {} and {}", friendly_day(range.start), friendly_day(range.end))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use trackcrow_core::catalog::{Category, IntentKind};
    use trackcrow_core::fields::{
        FieldValue, PartialFields, FIELD_AMOUNT, FIELD_CATEGORY, FIELD_COMPARISON_KEYWORD_1,
        FIELD_COMPARISON_KEYWORD_2, FIELD_END_DATE, FIELD_SEARCH_TERM, FIELD_START_DATE,
        FIELD_SUBCATEGORY, FIELD_TIMESTAMP,
    };
    use trackcrow_core::stream::StreamEvent;
    use trackcrow_core::timeframe::DateRange;

    use crate::store::{
        InMemoryTransactionStore, NewTransaction, SpendSummary, SpendTotal, StoreError,
        Transaction, TransactionStore, UserId,
    };
    use crate::tools::{ToolRegistry, ToolRequest};

    struct OfflineStore;

    #[async_trait]
    impl TransactionStore for OfflineStore {
        async fn record_transaction(
            &self,
            _user: &UserId,
            _new: NewTransaction,
        ) -> Result<Transaction, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }

        async fn sum_spend(
            &self,
            _user: &UserId,
            _range: DateRange,
            _category: Option<&str>,
            _subcategory: Option<&str>,
        ) -> Result<SpendTotal, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }

        async fn top_expense(
            &self,
            _user: &UserId,
            _range: DateRange,
            _category: Option<&str>,
        ) -> Result<Option<Transaction>, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }

        async fn spend_for_keyword(
            &self,
            _user: &UserId,
            _range: DateRange,
            _keyword: &str,
        ) -> Result<SpendTotal, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }

        async fn search_transactions(
            &self,
            _user: &UserId,
            _term: &str,
            _range: Option<DateRange>,
            _category: Option<&str>,
        ) -> Result<Vec<Transaction>, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }

        async fn summary(
            &self,
            _user: &UserId,
            _range: DateRange,
        ) -> Result<SpendSummary, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }

        async fn categories(&self, _user: &UserId) -> Result<Vec<Category>, StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_owned()))
        }
    }

    fn user() -> UserId {
        UserId::new("user-1")
    }

    fn type_names(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| {
                serde_json::to_value(event).expect("event should serialize")["type"]
                    .as_str()
                    .expect("type tag should be a string")
                    .to_owned()
            })
            .collect()
    }

    fn may_range_fields() -> PartialFields {
        let mut fields = PartialFields::new();
        fields.insert(
            FIELD_START_DATE,
            FieldValue::Instant(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
        );
        fields.insert(
            FIELD_END_DATE,
            FieldValue::Instant(Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap()),
        );
        fields
    }

    fn record_fields() -> PartialFields {
        let mut fields = PartialFields::new();
        fields.insert(FIELD_AMOUNT, FieldValue::Number(Decimal::from(200)));
        fields.insert(FIELD_CATEGORY, FieldValue::Text("Food".to_owned()));
        fields.insert(FIELD_SUBCATEGORY, FieldValue::Text("Lunch".to_owned()));
        fields.insert(
            FIELD_TIMESTAMP,
            FieldValue::Instant(Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()),
        );
        fields
    }

    async fn seed(store: &InMemoryTransactionStore, amount: i64, category: &str, day: u32) {
        store
            .record_transaction(
                &user(),
                NewTransaction {
                    amount: Decimal::from(amount),
                    category: category.to_owned(),
                    subcategory: "General".to_owned(),
                    timestamp: Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
                    remarks: None,
                },
            )
            .await
            .expect("seeding should succeed");
    }

    #[test]
    fn standard_registry_covers_every_dispatchable_intent() {
        let registry =
            ToolRegistry::with_standard_tools(Arc::new(InMemoryTransactionStore::new()));
        assert_eq!(registry.len(), 6);
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn record_dispatch_persists_and_frames_a_tool_result() {
        let store = Arc::new(InMemoryTransactionStore::new());
        let registry =
            ToolRegistry::with_standard_tools(Arc::clone(&store) as Arc<dyn TransactionStore>);

        let events = registry.dispatch(&user(), IntentKind::RecordExpense, &record_fields()).await;
        assert_eq!(
            type_names(&events),
            vec![
                "start",
                "start-step",
                "tool-input-start",
                "tool-input-available",
                "tool-output-available",
                "finish-step",
                "finish"
            ]
        );

        let output = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::ToolOutputAvailable { output, .. } => Some(output.clone()),
                _ => None,
            })
            .expect("output frame should exist");
        assert!(output["message"].as_str().unwrap().contains("Recorded 200 for Food / Lunch"));
        assert_eq!(output["data"]["amount"], json!(200));

        let recorded = store
            .search_transactions(&user(), "lunch", None, None)
            .await
            .expect("search should succeed");
        assert_eq!(recorded.len(), 1);
    }

    #[tokio::test]
    async fn comparison_fans_out_both_keywords() {
        let store = Arc::new(InMemoryTransactionStore::new());
        seed(&store, 4200, "Food", 3).await;
        seed(&store, 1850, "Travel", 4).await;
        let registry =
            ToolRegistry::with_standard_tools(Arc::clone(&store) as Arc<dyn TransactionStore>);

        let mut fields = may_range_fields();
        fields.insert(FIELD_COMPARISON_KEYWORD_1, FieldValue::Text("food".to_owned()));
        fields.insert(FIELD_COMPARISON_KEYWORD_2, FieldValue::Text("travel".to_owned()));

        let events = registry.dispatch(&user(), IntentKind::ExpenseComparison, &fields).await;
        let output = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::ToolOutputAvailable { output, .. } => Some(output.clone()),
                _ => None,
            })
            .expect("output frame should exist");

        let message = output["message"].as_str().unwrap();
        assert!(message.contains("4200"));
        assert!(message.contains("1850"));
        assert_eq!(output["data"]["keyword1"]["total"], json!(4200));
        assert_eq!(output["data"]["keyword2"]["keyword"], json!("travel"));
    }

    #[tokio::test]
    async fn unbacked_intent_streams_a_no_handler_message() {
        let registry = ToolRegistry::new();
        let events = registry.dispatch(&user(), IntentKind::TotalSpend, &may_range_fields()).await;

        assert_eq!(
            type_names(&events),
            vec!["start", "text-start", "text-delta", "text-end", "finish"]
        );
        let delta = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .expect("delta should exist");
        assert!(delta.contains("totalSpend"));
        assert!(delta.contains("handler"));
    }

    #[tokio::test]
    async fn execution_failure_is_framed_not_propagated() {
        let registry = ToolRegistry::with_standard_tools(Arc::new(OfflineStore));
        let events = registry.dispatch(&user(), IntentKind::TotalSpend, &may_range_fields()).await;

        let names = type_names(&events);
        assert_eq!(names.first().map(String::as_str), Some("start"));
        assert!(names.contains(&"tool-input-available".to_owned()));
        assert!(names.contains(&"finish-step".to_owned()));
        assert_eq!(names.last().map(String::as_str), Some("finish"));
        assert!(!names.contains(&"tool-output-available".to_owned()));

        let delta = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .expect("failure text should exist");
        assert!(delta.contains("totalSpend"));
        assert!(delta.contains("ledger offline"));
    }

    #[tokio::test]
    async fn missing_required_value_surfaces_as_a_streamed_failure() {
        let registry =
            ToolRegistry::with_standard_tools(Arc::new(InMemoryTransactionStore::new()));
        let mut incomplete = PartialFields::new();
        incomplete.insert(FIELD_SEARCH_TERM, FieldValue::Text("  ".to_owned()));

        let events = registry.dispatch(&user(), IntentKind::TransactionSearch, &incomplete).await;
        assert_eq!(
            type_names(&events),
            vec!["start", "text-start", "text-delta", "text-end", "finish"]
        );
    }

    #[test]
    fn request_rebuild_validates_required_fields() {
        let error = ToolRequest::from_fields(IntentKind::DashboardSummary, &PartialFields::new())
            .expect_err("empty fields must fail");
        assert!(error.to_string().contains("startDate"));

        let request = ToolRequest::from_fields(IntentKind::RecordExpense, &record_fields())
            .expect("complete fields should build");
        let encoded = request.to_json();
        assert_eq!(encoded["amount"], json!(200));
        assert_eq!(encoded["timestamp"], json!("2024-05-15T00:00:00.000Z"));
        assert!(encoded.get("remarks").is_none());
    }
}
