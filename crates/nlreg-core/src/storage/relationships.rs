//! Relationship store
//!
//! Query/command surface over the nl_relationships table. Write operations
//! and scope reads take an explicit connection so the reconciliation engine
//! controls the transaction boundary; pool-level reads exist for the
//! identity-change cascade, which runs each re-applied claim in its own
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::domain::relationship::{Compensation, NlRelationship, Scope};
use crate::error::{Error, Result};

/// SQLite-backed store for nearest-leader relationship records
#[derive(Debug, Clone)]
pub struct RelationshipStore {
    pool: SqlitePool,
}

impl RelationshipStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========== Transaction-scoped operations ==========

    /// All relationships for a scope, active or not
    pub async fn find_all_for_scope(
        conn: &mut SqliteConnection,
        scope: &Scope,
    ) -> Result<Vec<NlRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            "SELECT * FROM nl_relationships \
             WHERE employee_id = ? AND employer_org_id = ? \
             ORDER BY active_from",
        )
        .bind(&scope.employee_id)
        .bind(&scope.employer_org_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    /// Currently-active relationships for a scope (at most one when the
    /// invariant holds, but callers must not assume that)
    pub async fn find_active_for_scope(
        conn: &mut SqliteConnection,
        scope: &Scope,
    ) -> Result<Vec<NlRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            "SELECT * FROM nl_relationships \
             WHERE employee_id = ? AND employer_org_id = ? AND active_to IS NULL \
             ORDER BY active_from",
        )
        .bind(&scope.employee_id)
        .bind(&scope.employer_org_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    /// Insert a new relationship row
    pub async fn insert(conn: &mut SqliteConnection, rel: &NlRelationship) -> Result<()> {
        sqlx::query(
            "INSERT INTO nl_relationships ( \
                id, employee_id, employer_org_id, manager_id, manager_phone, manager_email, \
                compensation, active_from, active_to, last_modified, manager_display_name \
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rel.id)
        .bind(&rel.employee_id)
        .bind(&rel.employer_org_id)
        .bind(&rel.manager_id)
        .bind(&rel.manager_phone)
        .bind(&rel.manager_email)
        .bind(rel.compensation.as_db())
        .bind(rel.active_from.to_rfc3339())
        .bind(rel.active_to.map(|t| t.to_rfc3339()))
        .bind(rel.last_modified.to_rfc3339())
        .bind(&rel.manager_display_name)
        .execute(&mut *conn)
        .await?;

        debug!(relationship_id = %rel.id, employer = %rel.employer_org_id, "Relationship inserted");
        Ok(())
    }

    /// Refresh contact fields and compensation in place; active_from and
    /// active_to are deliberately untouched.
    pub async fn update_contact(
        conn: &mut SqliteConnection,
        id: &str,
        phone: &str,
        email: &str,
        compensation: Compensation,
        display_name: Option<&str>,
        last_modified: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE nl_relationships SET \
                manager_phone = ?, manager_email = ?, compensation = ?, \
                manager_display_name = ?, last_modified = ? \
             WHERE id = ?",
        )
        .bind(phone)
        .bind(email)
        .bind(compensation.as_db())
        .bind(display_name)
        .bind(last_modified.to_rfc3339())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        debug!(relationship_id = %id, "Relationship contact fields refreshed");
        Ok(())
    }

    /// Close a relationship; other fields are left untouched
    pub async fn close(
        conn: &mut SqliteConnection,
        id: &str,
        active_to: DateTime<Utc>,
        last_modified: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE nl_relationships SET active_to = ?, last_modified = ? WHERE id = ?",
        )
        .bind(active_to.to_rfc3339())
        .bind(last_modified.to_rfc3339())
        .bind(id)
        .execute(&mut *conn)
        .await?;

        debug!(relationship_id = %id, active_to = %active_to, "Relationship closed");
        Ok(())
    }

    // ========== Pool-level reads ==========

    /// Active relationships where the given identifier is the manager
    pub async fn find_active_by_manager(&self, manager_id: &str) -> Result<Vec<NlRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            "SELECT * FROM nl_relationships WHERE manager_id = ? AND active_to IS NULL",
        )
        .bind(manager_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    /// Active relationships where the given identifier is the employee
    pub async fn find_active_by_employee(&self, employee_id: &str) -> Result<Vec<NlRelationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            "SELECT * FROM nl_relationships WHERE employee_id = ? AND active_to IS NULL",
        )
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_relationship()).collect()
    }

    /// Count of currently-active relationships across all scopes
    pub async fn count_active(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM nl_relationships WHERE active_to IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

// ========== Database Row Types ==========

#[derive(Debug, FromRow)]
struct RelationshipRow {
    id: String,
    employee_id: String,
    employer_org_id: String,
    manager_id: String,
    manager_phone: String,
    manager_email: String,
    compensation: Option<i64>,
    active_from: String,
    active_to: Option<String>,
    last_modified: String,
    manager_display_name: Option<String>,
}

impl RelationshipRow {
    fn into_relationship(self) -> Result<NlRelationship> {
        let active_from = parse_timestamp(&self.active_from)?;
        let active_to = self.active_to.as_deref().map(parse_timestamp).transpose()?;
        let last_modified = parse_timestamp(&self.last_modified)?;

        Ok(NlRelationship {
            id: self.id,
            employee_id: self.employee_id,
            employer_org_id: self.employer_org_id,
            manager_id: self.manager_id,
            manager_phone: self.manager_phone,
            manager_email: self.manager_email,
            compensation: Compensation::from_db(self.compensation),
            active_from,
            active_to,
            last_modified,
            manager_display_name: self.manager_display_name,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", value, e)))
}
