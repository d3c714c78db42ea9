//! Rule catalogue: static configuration loaded once at startup.
//!
//! ```toml
//! [field_labels]
//! status = "Loan Status"
//!
//! [[rules]]
//! kind = "status_change"
//! field = "status"
//! target_value = "Approved"
//! message = "An appraisal must be on file before approval."
//! action_kind = "upload_file"
//! action_label = "Upload appraisal"
//! predicate = { type = "document_on_file", document = "appraisal" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::registry::RuleRegistry;
use crate::domain::{
    ActionKind, AsyncCheck, CatalogError, Predicate, StageRule, StatusChangeRule, TransitionRule,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCatalog {
    #[serde(default)]
    pub field_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<TransitionRule>,
}

impl RuleCatalog {
    /// The built-in loan pipeline catalogue.
    pub fn standard() -> Self {
        Self::default()
            .with_label("status", "Loan Status")
            .with_label("condo_status", "Condo Status")
            .with_label("stage", "Pipeline Stage")
            .with_rule(TransitionRule::StatusChange(StatusChangeRule {
                field: "status".into(),
                target_value: "Approved".into(),
                message: "An appraisal must be on file before the loan can be approved.".into(),
                action_kind: ActionKind::UploadFile,
                action_label: Some("Upload appraisal".into()),
                bypassable: false,
                predicate: Predicate::DocumentOnFile {
                    document: "appraisal".into(),
                },
                async_check: None,
            }))
            .with_rule(TransitionRule::StatusChange(StatusChangeRule {
                field: "status".into(),
                target_value: "Clear to Close".into(),
                message: "Title commitment and homeowners insurance are required to clear to close."
                    .into(),
                action_kind: ActionKind::ManualReview,
                action_label: Some("Request closing review".into()),
                bypassable: true,
                predicate: Predicate::AllOf {
                    predicates: vec![
                        Predicate::DocumentOnFile {
                            document: "title_commitment".into(),
                        },
                        Predicate::DocumentOnFile {
                            document: "homeowners_insurance".into(),
                        },
                    ],
                },
                async_check: None,
            }))
            .with_rule(TransitionRule::StatusChange(StatusChangeRule {
                field: "status".into(),
                target_value: "Funded".into(),
                message: "A signed contract must be on file before funding.".into(),
                action_kind: ActionKind::None,
                action_label: None,
                bypassable: false,
                predicate: Predicate::ContractOnFile,
                async_check: None,
            }))
            .with_rule(TransitionRule::StatusChange(StatusChangeRule {
                field: "condo_status".into(),
                target_value: "Received".into(),
                message: "All required condo documents must be uploaded first.".into(),
                action_kind: ActionKind::UploadFile,
                action_label: Some("Upload condo documents".into()),
                bypassable: false,
                predicate: Predicate::Always,
                async_check: Some(AsyncCheck::RelatedDocumentsComplete {
                    relation: "condo".into(),
                }),
            }))
            .with_rule(TransitionRule::Stage(StageRule {
                field: "stage".into(),
                target_value: "Underwriting".into(),
                message: "A loan amount is required before underwriting.".into(),
                predicate: Predicate::FieldPresent {
                    field: "loan_amount".into(),
                },
                async_check: None,
            }))
            .with_rule(TransitionRule::Stage(StageRule {
                field: "stage".into(),
                target_value: "Closing".into(),
                message: "A signed contract is required before closing.".into(),
                predicate: Predicate::ContractOnFile,
                async_check: None,
            }))
    }

    pub fn with_rule(mut self, rule: TransitionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_label(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        self.field_labels.insert(field.into(), label.into());
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self, CatalogError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let source = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_toml_str(&source)?;
        info!(path = %path.display(), rules = catalog.rules.len(), "rule catalogue loaded");
        Ok(catalog)
    }

    /// Reject catalogues the registry cannot represent unambiguously.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.field().trim().is_empty() || rule.target_value().trim().is_empty() {
                return Err(CatalogError::EmptyKey { index });
            }
            let key = rule.key();
            if rule.action_kind().requires_label()
                && rule.action_label().map_or(true, |l| l.trim().is_empty())
            {
                return Err(CatalogError::MissingActionLabel {
                    key: key.to_string(),
                    action: format!("{:?}", rule.action_kind()),
                });
            }
            if !seen.insert(key.clone()) {
                return Err(CatalogError::DuplicateRule {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn into_registry(self) -> Result<RuleRegistry, CatalogError> {
        self.validate()?;
        Ok(RuleRegistry::from_parts(self.rules, self.field_labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[field_labels]
status = "Loan Status"

[[rules]]
kind = "status_change"
field = "status"
target_value = "Approved"
message = "Appraisal required"
action_kind = "upload_file"
action_label = "Upload appraisal"
predicate = { type = "document_on_file", document = "appraisal" }

[[rules]]
kind = "status_change"
field = "condo_status"
target_value = "Received"
message = "Condo documents required"
action_kind = "upload_file"
action_label = "Upload condo documents"
async_check = { type = "related_documents_complete", relation = "condo" }

[[rules]]
kind = "stage"
field = "stage"
target_value = "Closing"
message = "Contract and insurance required"

[rules.predicate]
type = "all_of"
predicates = [
    { type = "contract_on_file" },
    { type = "document_on_file", document = "homeowners_insurance" },
]
"#;

    #[test]
    fn standard_catalogue_is_valid() {
        let registry = RuleCatalog::standard().into_registry().unwrap();
        assert_eq!(registry.len(), 6);
        let condo = registry.lookup("condo_status", "Received").unwrap();
        assert!(condo.async_check().is_some());
        assert!(registry
            .lookup("status", "Clear to Close")
            .unwrap()
            .is_bypassable());
    }

    #[test]
    fn parses_toml_catalogue() {
        let catalog = RuleCatalog::from_toml_str(SAMPLE).unwrap();
        assert_eq!(catalog.rules.len(), 3);

        let condo = &catalog.rules[1];
        assert_eq!(condo.predicate(), &Predicate::Always);
        assert_eq!(
            condo.async_check(),
            Some(&AsyncCheck::RelatedDocumentsComplete {
                relation: "condo".into()
            })
        );

        let stage = &catalog.rules[2];
        assert!(matches!(stage, TransitionRule::Stage(_)));
        assert!(matches!(stage.predicate(), Predicate::AllOf { predicates } if predicates.len() == 2));
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let err = RuleCatalog::from_toml_str(
            r#"
[[rules]]
kind = "wildcard"
field = "status"
target_value = "*"
message = "nope"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let rule = RuleCatalog::standard().rules[0].clone();
        let err = RuleCatalog::default()
            .with_rule(rule.clone())
            .with_rule(rule)
            .into_registry()
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateRule { key } if key == "status=Approved"));
    }

    #[test]
    fn upload_action_requires_label() {
        let err = RuleCatalog::from_toml_str(
            r#"
[[rules]]
kind = "status_change"
field = "status"
target_value = "Approved"
message = "Appraisal required"
action_kind = "upload_file"
"#,
        )
        .unwrap()
        .validate()
        .unwrap_err();
        assert!(matches!(err, CatalogError::MissingActionLabel { .. }));
    }

    #[test]
    fn empty_target_rejected() {
        let err = RuleCatalog::default()
            .with_rule(TransitionRule::Stage(StageRule {
                field: "stage".into(),
                target_value: " ".into(),
                message: "m".into(),
                predicate: Predicate::Always,
                async_check: None,
            }))
            .validate()
            .unwrap_err();
        assert!(matches!(err, CatalogError::EmptyKey { index: 0 }));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let registry = RuleCatalog::load(file.path())
            .unwrap()
            .into_registry()
            .unwrap();
        assert_eq!(registry.field_label("status"), "Loan Status");
        assert_eq!(registry.field_label("condo_status"), "Condo Status");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = RuleCatalog::load(Path::new("/nonexistent/rules.toml")).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
