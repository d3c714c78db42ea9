//! Automation matching: which notifications a committed change fires.

use std::collections::HashSet;
use std::sync::Arc;

use loangate_state::{AutomationDefinition, AutomationStore, StorageResult, TriggerType};

/// Every active on-field-change definition triggered by `field == new_value`,
/// in the order of `active`, with repeated ids dropped after the first.
///
/// Pure: the same inputs always give the same, identically ordered output.
pub fn match_automations(
    active: &[AutomationDefinition],
    field: &str,
    new_value: &str,
) -> Vec<AutomationDefinition> {
    let mut seen = HashSet::new();
    active
        .iter()
        .filter(|d| d.active && d.trigger_type == TriggerType::OnFieldChange)
        .filter(|d| d.trigger_field == field && d.trigger_target_value == new_value)
        .filter(|d| seen.insert(d.id.as_str()))
        .cloned()
        .collect()
}

/// Reads the active set from an `AutomationStore` and matches against it.
#[derive(Clone)]
pub struct AutomationMatcher {
    store: Arc<dyn AutomationStore>,
}

impl AutomationMatcher {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }

    pub async fn matches(
        &self,
        field: &str,
        new_value: &str,
    ) -> StorageResult<Vec<AutomationDefinition>> {
        let active = self.store.active_field_change_automations().await?;
        Ok(match_automations(&active, field, new_value))
    }
}
