//! # Shipping Rule Repository
//!
//! Rule storage plus the one cross-row invariant the rules carry: at most
//! one rule is the default at any time.
//!
//! ## Default Flag
//! ```text
//! set_default(id) is ONE statement:
//!
//!   UPDATE shipping_rules
//!      SET is_default = (id = :target)
//!    WHERE (id = :target OR is_default = 1)
//!      AND :target is an active rule
//!
//! The old default is cleared and the new one set under the same write
//! lock, so no reader ever observes zero or two defaults mid-switch.
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::to_u32;
use ledgerline_core::shipping::{DeliveryEstimate, ShippingRule};

const RULE_COLUMNS: &str = "id, name, description, strategy, conditions, applicable_countries, \
     applicable_states, applicable_methods, min_delivery_days, max_delivery_days, priority, \
     is_active, is_default, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ShippingRuleRow {
    id: String,
    name: String,
    description: Option<String>,
    strategy: String,
    conditions: String,
    applicable_countries: String,
    applicable_states: String,
    applicable_methods: String,
    min_delivery_days: i64,
    max_delivery_days: i64,
    priority: i64,
    is_active: bool,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShippingRuleRow> for ShippingRule {
    type Error = DbError;

    fn try_from(row: ShippingRuleRow) -> DbResult<Self> {
        Ok(ShippingRule {
            strategy: serde_json::from_str(&row.strategy)?,
            conditions: serde_json::from_str(&row.conditions)?,
            applicable_countries: serde_json::from_str(&row.applicable_countries)?,
            applicable_states: serde_json::from_str(&row.applicable_states)?,
            applicable_methods: serde_json::from_str(&row.applicable_methods)?,
            estimated_delivery: DeliveryEstimate {
                min_days: to_u32("shipping_rules.min_delivery_days", row.min_delivery_days)?,
                max_days: to_u32("shipping_rules.max_delivery_days", row.max_delivery_days)?,
            },
            id: row.id,
            name: row.name,
            description: row.description,
            priority: row.priority,
            is_active: row.is_active,
            is_default: row.is_default,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_rules(rows: Vec<ShippingRuleRow>) -> DbResult<Vec<ShippingRule>> {
    rows.into_iter().map(ShippingRule::try_from).collect()
}

/// Repository for shipping rules.
#[derive(Debug, Clone)]
pub struct ShippingRuleRepository {
    pool: SqlitePool,
}

impl ShippingRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShippingRuleRepository { pool }
    }

    /// Inserts a rule. The default flag is ignored here; use
    /// [`set_default`](Self::set_default) so the single-default rule holds.
    pub async fn insert(&self, rule: &ShippingRule) -> DbResult<()> {
        debug!(rule_id = %rule.id, strategy = rule.strategy.kind(), "Inserting shipping rule");

        let estimate = rule.estimated_delivery;
        if estimate.min_days > estimate.max_days {
            return Err(DbError::InvalidInput(format!(
                "rule {}: min delivery days exceed max",
                rule.id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO shipping_rules (
                id, name, description, strategy, conditions, applicable_countries,
                applicable_states, applicable_methods, min_delivery_days, max_delivery_days,
                priority, is_active, is_default, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(serde_json::to_string(&rule.strategy)?)
        .bind(serde_json::to_string(&rule.conditions)?)
        .bind(serde_json::to_string(&rule.applicable_countries)?)
        .bind(serde_json::to_string(&rule.applicable_states)?)
        .bind(serde_json::to_string(&rule.applicable_methods)?)
        .bind(i64::from(estimate.min_days))
        .bind(i64::from(estimate.max_days))
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ShippingRule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM shipping_rules WHERE id = ?1");
        let row: Option<ShippingRuleRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ShippingRule::try_from).transpose()
    }

    /// Active rules in priority order (ties broken by creation time).
    pub async fn list_active(&self) -> DbResult<Vec<ShippingRule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM shipping_rules WHERE is_active = 1 \
             ORDER BY priority, created_at, id"
        );
        let rows: Vec<ShippingRuleRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_rules(rows)
    }

    /// Every rule, active or not.
    pub async fn list_all(&self) -> DbResult<Vec<ShippingRule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM shipping_rules ORDER BY priority, created_at, id");
        let rows: Vec<ShippingRuleRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        into_rules(rows)
    }

    /// Replaces the rule's editable fields. The default flag is untouched.
    pub async fn update(&self, rule: &ShippingRule) -> DbResult<()> {
        debug!(rule_id = %rule.id, "Updating shipping rule");

        let result = sqlx::query(
            r#"
            UPDATE shipping_rules
               SET name = ?2, description = ?3, strategy = ?4, conditions = ?5,
                   applicable_countries = ?6, applicable_states = ?7, applicable_methods = ?8,
                   min_delivery_days = ?9, max_delivery_days = ?10, priority = ?11,
                   updated_at = ?12
             WHERE id = ?1
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(serde_json::to_string(&rule.strategy)?)
        .bind(serde_json::to_string(&rule.conditions)?)
        .bind(serde_json::to_string(&rule.applicable_countries)?)
        .bind(serde_json::to_string(&rule.applicable_states)?)
        .bind(serde_json::to_string(&rule.applicable_methods)?)
        .bind(i64::from(rule.estimated_delivery.min_days))
        .bind(i64::from(rule.estimated_delivery.max_days))
        .bind(rule.priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ShippingRule", &rule.id));
        }
        Ok(())
    }

    /// Activates or deactivates a rule. A deactivated default keeps its
    /// flag but is no longer used as the fallback.
    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE shipping_rules SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("ShippingRule", id));
        }
        Ok(())
    }

    /// Makes `id` the only default rule.
    ///
    /// ## Returns
    /// * `Err(NotFound)` - no such rule
    /// * `Err(Conflict)` - the rule is inactive
    pub async fn set_default(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE shipping_rules
               SET is_default = CASE WHEN id = ?1 THEN 1 ELSE 0 END,
                   updated_at = ?2
             WHERE (id = ?1 OR is_default = 1)
               AND EXISTS (SELECT 1 FROM shipping_rules WHERE id = ?1 AND is_active = 1)
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                None => Err(DbError::not_found("ShippingRule", id)),
                Some(_) => Err(DbError::conflict("ShippingRule", id, "is inactive")),
            };
        }

        info!(rule_id = %id, "Default shipping rule set");
        Ok(())
    }

    /// The current default rule, if any.
    pub async fn default_rule(&self) -> DbResult<Option<ShippingRule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM shipping_rules WHERE is_default = 1 LIMIT 1");
        let row: Option<ShippingRuleRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        row.map(ShippingRule::try_from).transpose()
    }

    /// Deletes a rule. The default rule cannot be deleted.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM shipping_rules WHERE id = ?1 AND is_default = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                None => Err(DbError::not_found("ShippingRule", id)),
                Some(_) => Err(DbError::conflict("ShippingRule", id, "is the default rule")),
            };
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::test_support::memory_db;
    use ledgerline_core::shipping::{FeeStrategy, ShippingConditions};
    use ledgerline_core::{Money, ShippingMethod};

    pub(crate) fn flat_rule(id: &str, cents: i64, priority: i64) -> ShippingRule {
        let now = Utc::now();
        ShippingRule {
            id: id.to_string(),
            name: format!("Rule {id}"),
            description: None,
            strategy: FeeStrategy::Flat {
                rate: Money::from_cents(cents),
            },
            conditions: ShippingConditions::default(),
            applicable_countries: Vec::new(),
            applicable_states: Vec::new(),
            applicable_methods: Vec::new(),
            estimated_delivery: DeliveryEstimate::default(),
            priority,
            is_active: true,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_round_trips_json_columns() {
        let db = memory_db().await;
        let mut rule = flat_rule("r1", 599, 1);
        rule.applicable_countries = vec!["USA".to_string()];
        rule.applicable_methods = vec![ShippingMethod::Express];
        rule.conditions.min_order_amount = Some(Money::from_cents(1000));
        db.shipping_rules().insert(&rule).await.unwrap();

        let loaded = db.shipping_rules().get("r1").await.unwrap().unwrap();
        assert_eq!(loaded.strategy, rule.strategy);
        assert_eq!(loaded.applicable_countries, rule.applicable_countries);
        assert_eq!(loaded.applicable_methods, rule.applicable_methods);
        assert_eq!(loaded.conditions, rule.conditions);
        assert!(!loaded.is_default);
    }

    #[tokio::test]
    async fn test_list_active_by_priority() {
        let db = memory_db().await;
        let repo = db.shipping_rules();
        repo.insert(&flat_rule("late", 100, 5)).await.unwrap();
        repo.insert(&flat_rule("early", 200, 1)).await.unwrap();
        let mut off = flat_rule("off", 300, 0);
        off.is_active = false;
        repo.insert(&off).await.unwrap();

        let ids: Vec<String> = repo.list_active().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(repo.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_single_default() {
        let db = memory_db().await;
        let repo = db.shipping_rules();
        repo.insert(&flat_rule("a", 100, 1)).await.unwrap();
        repo.insert(&flat_rule("b", 200, 2)).await.unwrap();

        repo.set_default("a").await.unwrap();
        repo.set_default("b").await.unwrap();

        let defaults: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_default)
            .map(|r| r.id)
            .collect();
        assert_eq!(defaults, vec!["b"]);
        assert_eq!(repo.default_rule().await.unwrap().unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_default_guards() {
        let db = memory_db().await;
        let repo = db.shipping_rules();
        repo.insert(&flat_rule("a", 100, 1)).await.unwrap();
        let mut off = flat_rule("off", 100, 1);
        off.is_active = false;
        repo.insert(&off).await.unwrap();
        repo.set_default("a").await.unwrap();

        assert!(matches!(repo.set_default("off").await, Err(DbError::Conflict { .. })));
        assert!(matches!(repo.set_default("zz").await, Err(DbError::NotFound { .. })));
        assert!(matches!(repo.delete("a").await, Err(DbError::Conflict { .. })));
        assert!(matches!(repo.set_active("zz", false).await, Err(DbError::NotFound { .. })));

        // A failed switch leaves the old default in place.
        assert_eq!(repo.default_rule().await.unwrap().unwrap().id, "a");

        repo.delete("off").await.unwrap();
        assert!(repo.get("off").await.unwrap().is_none());

        repo.set_active("a", false).await.unwrap();
        let a = repo.default_rule().await.unwrap().unwrap();
        assert!(a.is_default && !a.is_active);
    }
}
