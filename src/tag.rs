use crate::slug::slugify;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_postgres::row::Row;
use tokio_postgres::Client;

#[derive(Clone, Debug, Serialize)]
pub struct Tag {
    pub id: i64,
    pub tag_name: String,
    pub slug: String,
    pub active: bool,
    pub display_order: i64,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<Row> for Tag {
    type Error = anyhow::Error;

    fn try_from(r: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            tag_name: r.try_get("tag_name")?,
            slug: r.try_get("slug")?,
            active: r.try_get("active")?,
            display_order: r.try_get("display_order")?,
            meta_title: r.try_get("meta_title")?,
            meta_description: r.try_get("meta_description")?,
            created_at: r.try_get("created_at")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct TagFields {
    pub tag_name: String,
    pub slug: String,
    pub active: bool,
    pub display_order: i64,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
}

#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn find_id_by_slug(&self, slug: &str) -> anyhow::Result<Option<i64>>;
    async fn slug_taken(&self, slug: &str, exclude_id: Option<i64>) -> anyhow::Result<bool>;
    async fn list(&self, active_only: Option<bool>) -> anyhow::Result<Vec<Tag>>;
    async fn get(&self, id: i64) -> anyhow::Result<Option<Tag>>;
    async fn insert(&self, fields: TagFields) -> anyhow::Result<Tag>;
    async fn update(&self, id: i64, fields: TagFields) -> anyhow::Result<Option<Tag>>;
    async fn delete(&self, id: i64) -> anyhow::Result<u64>;
    async fn count(&self) -> anyhow::Result<i64>;
}

pub struct PostgresTagRepository {
    client: Arc<Client>,
}

impl PostgresTagRepository {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

const TAG_COLS: &str = "id, tag_name, slug, active, display_order, meta_title, \
     meta_description, created_at, updated_at";

#[async_trait]
impl TagRepository for PostgresTagRepository {
    async fn find_id_by_slug(&self, slug: &str) -> anyhow::Result<Option<i64>> {
        let slug = slugify(slug);
        if slug.is_empty() {
            return Ok(None);
        }
        let row = self
            .client
            .query_opt("SELECT id FROM tags WHERE slug = $1", &[&slug])
            .await
            .context("Unable to look up tag by slug")?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn slug_taken(&self, slug: &str, exclude_id: Option<i64>) -> anyhow::Result<bool> {
        let row = match exclude_id {
            Some(id) => {
                self.client
                    .query_opt(
                        "SELECT id FROM tags WHERE slug = $1 AND id <> $2 LIMIT 1",
                        &[&slug, &id],
                    )
                    .await
            }
            None => {
                self.client
                    .query_opt("SELECT id FROM tags WHERE slug = $1 LIMIT 1", &[&slug])
                    .await
            }
        }
        .context("Unable to check tag slug availability")?;
        Ok(row.is_some())
    }

    async fn list(&self, active_only: Option<bool>) -> anyhow::Result<Vec<Tag>> {
        let rows = match active_only {
            Some(active) => {
                self.client
                    .query(
                        &format!(
                            "SELECT {TAG_COLS} FROM tags WHERE active = $1 \
                             ORDER BY display_order, tag_name"
                        ),
                        &[&active],
                    )
                    .await
            }
            None => {
                self.client
                    .query(
                        &format!("SELECT {TAG_COLS} FROM tags ORDER BY display_order, tag_name"),
                        &[],
                    )
                    .await
            }
        }
        .context("Unable to list tags")?;
        rows.into_iter().map(Tag::try_from).collect()
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Tag>> {
        self.client
            .query_opt(&format!("SELECT {TAG_COLS} FROM tags WHERE id = $1"), &[&id])
            .await
            .context("Unable to get tag")?
            .map(Tag::try_from)
            .transpose()
    }

    async fn insert(&self, fields: TagFields) -> anyhow::Result<Tag> {
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO tags \
                     (tag_name, slug, active, display_order, meta_title, meta_description) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {TAG_COLS}"
                ),
                &[
                    &fields.tag_name,
                    &fields.slug,
                    &fields.active,
                    &fields.display_order,
                    &fields.meta_title,
                    &fields.meta_description,
                ],
            )
            .await
            .context("Unable to insert tag")?;
        row.try_into()
    }

    async fn update(&self, id: i64, fields: TagFields) -> anyhow::Result<Option<Tag>> {
        self.client
            .query_opt(
                &format!(
                    "UPDATE tags SET tag_name = $1, slug = $2, active = $3, \
                     display_order = $4, meta_title = $5, meta_description = $6, \
                     updated_at = now() WHERE id = $7 RETURNING {TAG_COLS}"
                ),
                &[
                    &fields.tag_name,
                    &fields.slug,
                    &fields.active,
                    &fields.display_order,
                    &fields.meta_title,
                    &fields.meta_description,
                    &id,
                ],
            )
            .await
            .context("Unable to update tag")?
            .map(Tag::try_from)
            .transpose()
    }

    async fn delete(&self, id: i64) -> anyhow::Result<u64> {
        self.client
            .execute("DELETE FROM tags WHERE id = $1", &[&id])
            .await
            .context("Unable to delete tag")
    }

    async fn count(&self) -> anyhow::Result<i64> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM tags", &[])
            .await
            .context("Unable to count tags")?;
        Ok(row.get(0))
    }
}
