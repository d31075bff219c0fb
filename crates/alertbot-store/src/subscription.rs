//! Subscription CRUD operations.

use async_trait::async_trait;
use sqlx::SqlitePool;

use alertbot_core::{
    domain::{RegionId, UserId},
    subscriptions::SubscriptionStore,
};

use crate::{error::Result, Database};

/// Insert a subscription row. Returns `false` if it already existed.
pub async fn subscribe(pool: &SqlitePool, user_id: i64, region_id: Option<&str>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO subscriptions (user_id, region_id)
        VALUES (?, ?)
        "#,
    )
    .bind(user_id)
    .bind(region_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a subscription row. Returns `false` if there was none.
pub async fn unsubscribe(pool: &SqlitePool, user_id: i64, region_id: Option<&str>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM subscriptions
        WHERE user_id = ? AND region_id IS ?
        "#,
    )
    .bind(user_id)
    .bind(region_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn is_subscribed(pool: &SqlitePool, user_id: i64, region_id: Option<&str>) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT 1
        FROM subscriptions
        WHERE user_id = ? AND region_id IS ?
        "#,
    )
    .bind(user_id)
    .bind(region_id)
    .fetch_optional(pool)
    .await?;

    Ok(result.is_some())
}

/// Users subscribed to `region_id` or to all regions.
pub async fn get_region_subscribers(pool: &SqlitePool, region_id: &str) -> Result<Vec<i64>> {
    let users = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT user_id
        FROM subscriptions
        WHERE region_id = ? OR region_id IS NULL
        ORDER BY user_id
        "#,
    )
    .bind(region_id)
    .fetch_all(pool)
    .await?;

    Ok(users)
}

/// Every user with at least one subscription.
pub async fn get_all_subscribers(pool: &SqlitePool) -> Result<Vec<i64>> {
    let users = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT user_id
        FROM subscriptions
        ORDER BY user_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(users)
}

pub async fn get_user_subscriptions(pool: &SqlitePool, user_id: i64) -> Result<Vec<Option<String>>> {
    let regions = sqlx::query_scalar::<_, Option<String>>(
        r#"
        SELECT region_id
        FROM subscriptions
        WHERE user_id = ?
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(regions)
}

pub async fn delete_user_subscriptions(pool: &SqlitePool, user_id: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM subscriptions
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// [`SubscriptionStore`] over the SQLite pool. Each call is one statement.
#[derive(Debug, Clone)]
pub struct SqliteSubscriptionStore {
    db: Database,
}

impl SqliteSubscriptionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn add(&self, user: UserId, region: Option<&RegionId>) -> alertbot_core::Result<bool> {
        Ok(subscribe(self.db.pool(), user.0, region.map(RegionId::as_str)).await?)
    }

    async fn remove(&self, user: UserId, region: Option<&RegionId>) -> alertbot_core::Result<bool> {
        Ok(unsubscribe(self.db.pool(), user.0, region.map(RegionId::as_str)).await?)
    }

    async fn is_subscribed(
        &self,
        user: UserId,
        region: Option<&RegionId>,
    ) -> alertbot_core::Result<bool> {
        Ok(is_subscribed(self.db.pool(), user.0, region.map(RegionId::as_str)).await?)
    }

    async fn list_subscribers(&self, region: Option<&RegionId>) -> alertbot_core::Result<Vec<UserId>> {
        let users = match region {
            Some(r) => get_region_subscribers(self.db.pool(), r.as_str()).await?,
            None => get_all_subscribers(self.db.pool()).await?,
        };
        Ok(users.into_iter().map(UserId).collect())
    }

    async fn list_for_user(&self, user: UserId) -> alertbot_core::Result<Vec<Option<RegionId>>> {
        let rows = get_user_subscriptions(self.db.pool(), user.0).await?;
        Ok(rows.into_iter().map(|r| r.map(RegionId)).collect())
    }

    async fn remove_user(&self, user: UserId) -> alertbot_core::Result<u64> {
        Ok(delete_user_subscriptions(self.db.pool(), user.0).await?)
    }
}
