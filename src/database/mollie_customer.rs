//! Maps an identity to its PSP customer id (§10.3/§10.4), so repeated
//! checkouts and subscription creation reuse one Mollie customer per
//! identity instead of minting a new one every time.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub identity: Uuid,
    pub provider: String,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub async fn fetch<'q, E>(pool: E, identity: Uuid, provider: &str) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT identity, provider, customer_id, created_at FROM {} WHERE identity = $1 AND provider = $2",
            Tables::MOLLIE_CUSTOMERS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .bind(provider)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Idempotent: a racing concurrent first-checkout from the same
    /// identity just loses the insert and keeps the winner's customer id.
    pub async fn upsert<'q, E>(
        pool: E,
        identity: Uuid,
        provider: &str,
        customer_id: &str,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (identity, provider, customer_id, created_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (identity, provider) DO UPDATE SET customer_id = {table}.customer_id
             RETURNING identity, provider, customer_id, created_at",
            Tables::MOLLIE_CUSTOMERS,
            table = Tables::MOLLIE_CUSTOMERS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .bind(provider)
            .bind(customer_id)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }
}
