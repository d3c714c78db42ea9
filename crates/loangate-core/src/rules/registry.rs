//! Immutable rule lookup.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{FieldTransition, RuleKey, TransitionRule};

/// Exact-match mapping from `(field, target_value)` to at most one rule.
///
/// Built once from a validated `RuleCatalog` and shared read-only; there is
/// no way to add or remove rules afterwards.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<TransitionRule>,
    index: HashMap<RuleKey, usize>,
    field_labels: BTreeMap<String, String>,
}

impl RuleRegistry {
    /// A registry with no rules: every transition passes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Callers must have rejected duplicate keys already.
    pub(crate) fn from_parts(
        rules: Vec<TransitionRule>,
        field_labels: BTreeMap<String, String>,
    ) -> Self {
        let index = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.key(), i))
            .collect();
        Self {
            rules,
            index,
            field_labels,
        }
    }

    /// Case-sensitive lookup on both field and target value.
    pub fn lookup(&self, field: &str, target_value: &str) -> Option<&TransitionRule> {
        self.index
            .get(&RuleKey::new(field, target_value))
            .map(|&i| &self.rules[i])
    }

    pub fn rule_for(&self, transition: &FieldTransition) -> Option<&TransitionRule> {
        self.lookup(&transition.field, &transition.to_value)
    }

    /// Display label for a field; falls back to title-casing the name.
    pub fn field_label(&self, field: &str) -> String {
        self.field_labels
            .get(field)
            .cloned()
            .unwrap_or_else(|| title_case(field))
    }

    /// Rules in catalogue order.
    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// `condo_status` -> `Condo Status`.
fn title_case(field: &str) -> String {
    field
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
