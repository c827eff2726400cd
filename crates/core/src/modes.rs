use serde::{Deserialize, Serialize};

use crate::catalog::{definitions, IntentKind};
use crate::errors::DomainError;

/// UI-selected conversation mode. Carried per turn in message metadata,
/// never persisted server-side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Transaction,
    Analytics,
}

impl PromptMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Analytics => "analytics",
        }
    }
}

impl std::fmt::Display for PromptMode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// The intent lives in a different bucket than the active mode.
    /// `correct` is `None` when the intent matches no bucket at all.
    Reject { active: PromptMode, correct: Option<PromptMode> },
}

/// Bucket table mapping intents to the mode they are allowed in. Held as
/// data rather than a hardcoded match so deployments can regroup intents in
/// configuration.
#[derive(Clone, Debug)]
pub struct ModeTable {
    buckets: Vec<(PromptMode, Vec<IntentKind>)>,
}

impl ModeTable {
    pub fn from_buckets(
        transaction: Vec<IntentKind>,
        analytics: Vec<IntentKind>,
    ) -> Result<Self, DomainError> {
        let table = Self {
            buckets: vec![
                (PromptMode::Transaction, transaction),
                (PromptMode::Analytics, analytics),
            ],
        };
        table.validate()?;
        Ok(table)
    }

    /// The original grouping: recording belongs to transaction mode, every
    /// reporting intent to analytics mode.
    pub fn with_defaults() -> Self {
        Self {
            buckets: vec![
                (PromptMode::Transaction, vec![IntentKind::RecordExpense]),
                (
                    PromptMode::Analytics,
                    vec![
                        IntentKind::TotalSpend,
                        IntentKind::TopExpense,
                        IntentKind::ExpenseComparison,
                        IntentKind::TransactionSearch,
                        IntentKind::DashboardSummary,
                    ],
                ),
            ],
        }
    }

    /// Every catalog intent must sit in exactly one bucket; the sentinel
    /// `other` may not be bucketed.
    fn validate(&self) -> Result<(), DomainError> {
        for (_, intents) in &self.buckets {
            if intents.contains(&IntentKind::Other) {
                return Err(DomainError::InvariantViolation(
                    "mode buckets must not contain `other`".to_owned(),
                ));
            }
        }

        for definition in definitions() {
            let memberships = self
                .buckets
                .iter()
                .filter(|(_, intents)| intents.contains(&definition.kind))
                .count();
            if memberships != 1 {
                return Err(DomainError::InvariantViolation(format!(
                    "intent `{}` must belong to exactly one mode bucket, found {memberships}",
                    definition.kind
                )));
            }
        }

        Ok(())
    }

    pub fn mode_of(&self, intent: IntentKind) -> Option<PromptMode> {
        self.buckets
            .iter()
            .find(|(_, intents)| intents.contains(&intent))
            .map(|(mode, _)| *mode)
    }

    /// No active mode means no gating; programmatic callers skip the check.
    pub fn check(&self, prompt_mode: Option<PromptMode>, intent: IntentKind) -> GateDecision {
        let Some(active) = prompt_mode else {
            return GateDecision::Allow;
        };

        match self.mode_of(intent) {
            Some(bucket) if bucket == active => GateDecision::Allow,
            correct => GateDecision::Reject { active, correct },
        }
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
