use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use trackcrow_core::catalog::Category;
use trackcrow_core::timeframe::DateRange;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: Decimal,
    pub category: String,
    pub subcategory: String,
    pub timestamp: DateTime<Utc>,
    pub remarks: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTransaction {
    pub amount: Decimal,
    pub category: String,
    pub subcategory: String,
    pub timestamp: DateTime<Utc>,
    pub remarks: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpendTotal {
    pub total: Decimal,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorySpend {
    pub category: String,
    pub total: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpendSummary {
    pub total: Decimal,
    pub count: usize,
    pub by_category: Vec<CategorySpend>,
    pub top: Option<Transaction>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Persistence seam the tools run against. Range bounds are inclusive on
/// both ends; text matching is case-insensitive.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn record_transaction(
        &self,
        user: &UserId,
        new: NewTransaction,
    ) -> Result<Transaction, StoreError>;

    async fn sum_spend(
        &self,
        user: &UserId,
        range: DateRange,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<SpendTotal, StoreError>;

    async fn top_expense(
        &self,
        user: &UserId,
        range: DateRange,
        category: Option<&str>,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Spend across transactions whose category, subcategory or remarks
    /// contain the keyword.
    async fn spend_for_keyword(
        &self,
        user: &UserId,
        range: DateRange,
        keyword: &str,
    ) -> Result<SpendTotal, StoreError>;

    async fn search_transactions(
        &self,
        user: &UserId,
        term: &str,
        range: Option<DateRange>,
        category: Option<&str>,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn summary(&self, user: &UserId, range: DateRange) -> Result<SpendSummary, StoreError>;

    /// The category vocabulary offered to the classifier and to
    /// missing-field forms for this user.
    async fn categories(&self, user: &UserId) -> Result<Vec<Category>, StoreError>;
}

/// Reference store keeping every ledger in process memory. The starter
/// vocabulary grows as recorded transactions introduce new categories.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    ledgers: Mutex<HashMap<UserId, Vec<Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn starter_vocabulary() -> Vec<Category> {
    vec![
        Category::new("Food", &["Lunch", "Dinner", "Groceries", "Snacks"]),
        Category::new("Travel", &["Flights", "Taxi", "Fuel"]),
        Category::new("Bills", &["Electricity", "Internet", "Rent"]),
        Category::new("Shopping", &["Clothes", "Electronics"]),
        Category::new("Entertainment", &["Movies", "Subscriptions"]),
        Category::new("Health", &["Pharmacy", "Doctor"]),
    ]
}

fn in_range(transaction: &Transaction, range: DateRange) -> bool {
    range.start <= transaction.timestamp && transaction.timestamp <= range.end
}

fn matches_category(transaction: &Transaction, category: Option<&str>) -> bool {
    category
        .map(|wanted| transaction.category.eq_ignore_ascii_case(wanted))
        .unwrap_or(true)
}

fn matches_subcategory(transaction: &Transaction, subcategory: Option<&str>) -> bool {
    subcategory
        .map(|wanted| transaction.subcategory.eq_ignore_ascii_case(wanted))
        .unwrap_or(true)
}

fn matches_keyword(transaction: &Transaction, keyword: &str) -> bool {
    let needle = keyword.to_lowercase();
    transaction.category.to_lowercase().contains(&needle)
        || transaction.subcategory.to_lowercase().contains(&needle)
        || transaction
            .remarks
            .as_deref()
            .map(|remarks| remarks.to_lowercase().contains(&needle))
            .unwrap_or(false)
}

fn total_of<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> SpendTotal {
    let mut total = Decimal::ZERO;
    let mut count = 0;
    for transaction in transactions {
        total += transaction.amount;
        count += 1;
    }
    SpendTotal { total, count }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn record_transaction(
        &self,
        user: &UserId,
        new: NewTransaction,
    ) -> Result<Transaction, StoreError> {
        let transaction = Transaction {
            id: Uuid::new_v4(),
            amount: new.amount,
            category: new.category,
            subcategory: new.subcategory,
            timestamp: new.timestamp,
            remarks: new.remarks,
        };

        let mut ledgers = self.ledgers.lock().await;
        ledgers.entry(user.clone()).or_default().push(transaction.clone());
        Ok(transaction)
    }

    async fn sum_spend(
        &self,
        user: &UserId,
        range: DateRange,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<SpendTotal, StoreError> {
        let ledgers = self.ledgers.lock().await;
        let transactions = ledgers.get(user).map(Vec::as_slice).unwrap_or_default();
        Ok(total_of(transactions.iter().filter(|transaction| {
            in_range(transaction, range)
                && matches_category(transaction, category)
                && matches_subcategory(transaction, subcategory)
        })))
    }

    async fn top_expense(
        &self,
        user: &UserId,
        range: DateRange,
        category: Option<&str>,
    ) -> Result<Option<Transaction>, StoreError> {
        let ledgers = self.ledgers.lock().await;
        let transactions = ledgers.get(user).map(Vec::as_slice).unwrap_or_default();
        Ok(transactions
            .iter()
            .filter(|transaction| {
                in_range(transaction, range) && matches_category(transaction, category)
            })
            .max_by(|left, right| left.amount.cmp(&right.amount))
            .cloned())
    }

    async fn spend_for_keyword(
        &self,
        user: &UserId,
        range: DateRange,
        keyword: &str,
    ) -> Result<SpendTotal, StoreError> {
        let ledgers = self.ledgers.lock().await;
        let transactions = ledgers.get(user).map(Vec::as_slice).unwrap_or_default();
        Ok(total_of(transactions.iter().filter(|transaction| {
            in_range(transaction, range) && matches_keyword(transaction, keyword)
        })))
    }

    async fn search_transactions(
        &self,
        user: &UserId,
        term: &str,
        range: Option<DateRange>,
        category: Option<&str>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let ledgers = self.ledgers.lock().await;
        let transactions = ledgers.get(user).map(Vec::as_slice).unwrap_or_default();
        let mut matches: Vec<Transaction> = transactions
            .iter()
            .filter(|transaction| {
                matches_keyword(transaction, term)
                    && range.map(|bounds| in_range(transaction, bounds)).unwrap_or(true)
                    && matches_category(transaction, category)
            })
            .cloned()
            .collect();
        matches.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        Ok(matches)
    }

    async fn summary(&self, user: &UserId, range: DateRange) -> Result<SpendSummary, StoreError> {
        let ledgers = self.ledgers.lock().await;
        let transactions = ledgers.get(user).map(Vec::as_slice).unwrap_or_default();
        let in_window: Vec<&Transaction> =
            transactions.iter().filter(|transaction| in_range(transaction, range)).collect();

        let SpendTotal { total, count } = total_of(in_window.iter().copied());

        let mut by_category: Vec<CategorySpend> = Vec::new();
        for transaction in &in_window {
            match by_category
                .iter_mut()
                .find(|entry| entry.category.eq_ignore_ascii_case(&transaction.category))
            {
                Some(entry) => entry.total += transaction.amount,
                None => by_category.push(CategorySpend {
                    category: transaction.category.clone(),
                    total: transaction.amount,
                }),
            }
        }
        by_category.sort_by(|left, right| right.total.cmp(&left.total));

        let top = in_window
            .iter()
            .max_by(|left, right| left.amount.cmp(&right.amount))
            .map(|transaction| (*transaction).clone());

        Ok(SpendSummary { total, count, by_category, top })
    }

    async fn categories(&self, user: &UserId) -> Result<Vec<Category>, StoreError> {
        let ledgers = self.ledgers.lock().await;
        let mut vocabulary = starter_vocabulary();
        let Some(transactions) = ledgers.get(user) else {
            return Ok(vocabulary);
        };

        for transaction in transactions {
            match vocabulary
                .iter_mut()
                .find(|entry| entry.name.eq_ignore_ascii_case(&transaction.category))
            {
                Some(entry) => {
                    let known = entry
                        .subcategories
                        .iter()
                        .any(|sub| sub.eq_ignore_ascii_case(&transaction.subcategory));
                    if !known && !transaction.subcategory.trim().is_empty() {
                        entry.subcategories.push(transaction.subcategory.clone());
                    }
                }
                None => vocabulary.push(Category {
                    name: transaction.category.clone(),
                    subcategories: vec![transaction.subcategory.clone()],
                }),
            }
        }
        Ok(vocabulary)
    }
}
