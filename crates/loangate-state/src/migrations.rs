//! SurrealDB schema migrations and initialization
//!
//! Sets up every loangate table with its indexes. Uniqueness that the engine
//! relies on (one queue row per dedupe key, one record per id) is enforced
//! here, not only in application code.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all loangate tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing loangate SurrealDB schema");

    init_loan_records_table(db).await?;
    init_field_changes_table(db).await?;
    init_related_documents_table(db).await?;
    init_automations_table(db).await?;
    init_automation_queue_table(db).await?;

    info!("loangate schema initialization complete");
    Ok(())
}

/// Initialize `loan_records`
///
/// Schema:
/// ```text
/// TABLE loan_records {
///   record_id:         STRING (unique)
///   fields:            OBJECT<STRING>
///   documents:         ARRAY<STRING>
///   has_contract:      BOOL
///   related_complete:  OBJECT<BOOL>
///   updated_at:        DATETIME
/// }
/// ```
async fn init_loan_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing loan_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS loan_records
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_record_id ON TABLE loan_records COLUMNS record_id UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ loan_records table initialized");
    Ok(())
}

/// Initialize `field_changes`
///
/// Append-only: every committed write, with its actor and, for overrides,
/// the bypassed rule key.
async fn init_field_changes_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing field_changes table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS field_changes
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_change_id ON TABLE field_changes COLUMNS change_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_change_record ON TABLE field_changes COLUMNS record_id, changed_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ field_changes table initialized");
    Ok(())
}

/// Initialize `related_documents`
///
/// `(record_id, relation, kind)` identifies a slot.
async fn init_related_documents_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing related_documents table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS related_documents
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_related_slot ON TABLE related_documents COLUMNS record_id, relation, kind UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ related_documents table initialized");
    Ok(())
}

/// Initialize `automations`
async fn init_automations_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing automations table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS automations
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_automation_id ON TABLE automations COLUMNS automation_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_automation_trigger ON TABLE automations COLUMNS trigger_field, trigger_target_value;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ automations table initialized");
    Ok(())
}

/// Initialize `automation_queue`
///
/// Schema:
/// ```text
/// TABLE automation_queue {
///   entry_id:       STRING (unique)
///   automation_id:  STRING
///   change_id:      STRING
///   record_id:      STRING (indexed)
///   field:          STRING
///   old_value:      STRING?
///   new_value:      STRING
///   status:         STRING (pending | sent | failed)
///   triggered_by:   STRING
///   triggered_at:   DATETIME
///   sent_at:        DATETIME?
///   error:          STRING?
///   dedupe_key:     STRING (unique)
/// }
/// ```
///
/// `dedupe_key` hashes `(record_id, change_id, automation_id, new_value)`; the UNIQUE
/// index makes concurrent duplicate inserts fail instead of doubling rows.
async fn init_automation_queue_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing automation_queue table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS automation_queue
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_entry_id ON TABLE automation_queue COLUMNS entry_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_dedupe_key ON TABLE automation_queue COLUMNS dedupe_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_queue_record ON TABLE automation_queue COLUMNS record_id;
        DEFINE INDEX IF NOT EXISTS idx_queue_status ON TABLE automation_queue COLUMNS status;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ automation_queue table initialized");
    Ok(())
}
