use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_postgres::Client;

/// A merchant linked to a tag, as listed in the tag editing UI.
#[derive(Clone, Debug, Serialize)]
pub struct TaggedStore {
    pub id: i64,
    pub name: String,
}

#[async_trait]
pub trait TagStoreRepository: Send + Sync {
    /// Idempotently links a merchant to a tag. Returns `true` only when
    /// the relation row was newly created.
    async fn ensure(&self, merchant_id: i64, tag_id: i64) -> anyhow::Result<bool>;
    async fn stores_by_tag(&self, tag_id: i64) -> anyhow::Result<Vec<TaggedStore>>;
    async fn remove(&self, tag_id: i64, merchant_id: i64) -> anyhow::Result<u64>;
}

pub struct PostgresTagStoreRepository {
    client: Arc<Client>,
}

impl PostgresTagStoreRepository {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TagStoreRepository for PostgresTagStoreRepository {
    async fn ensure(&self, merchant_id: i64, tag_id: i64) -> anyhow::Result<bool> {
        let created = self
            .client
            .execute(
                "INSERT INTO tag_stores (tag_id, merchant_id) VALUES ($1, $2) \
                 ON CONFLICT (tag_id, merchant_id) DO NOTHING",
                &[&tag_id, &merchant_id],
            )
            .await
            .context("Unable to link merchant to tag")?;
        Ok(created > 0)
    }

    async fn stores_by_tag(&self, tag_id: i64) -> anyhow::Result<Vec<TaggedStore>> {
        let rows = self
            .client
            .query(
                "SELECT m.id, m.name FROM tag_stores ts \
                 JOIN merchants m ON m.id = ts.merchant_id \
                 WHERE ts.tag_id = $1 ORDER BY m.name",
                &[&tag_id],
            )
            .await
            .context("Unable to list stores for tag")?;
        Ok(rows
            .into_iter()
            .map(|r| TaggedStore {
                id: r.get(0),
                name: r.get(1),
            })
            .collect())
    }

    async fn remove(&self, tag_id: i64, merchant_id: i64) -> anyhow::Result<u64> {
        self.client
            .execute(
                "DELETE FROM tag_stores WHERE tag_id = $1 AND merchant_id = $2",
                &[&tag_id, &merchant_id],
            )
            .await
            .context("Unable to unlink merchant from tag")
    }
}
