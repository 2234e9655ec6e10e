use crate::slug::slugify;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_postgres::row::Row;
use tokio_postgres::Client;

/// What a lookup-and-write operation did to the matching row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
}

#[derive(Clone, Debug, Serialize)]
pub struct Merchant {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub h1keyword: String,
    pub web_url: String,
    pub aff_url: String,
    pub meta_title: String,
    pub meta_description: String,
    pub side_description_html: String,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<Row> for Merchant {
    type Error = anyhow::Error;

    fn try_from(r: Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            name: r.try_get("name")?,
            slug: r.try_get("slug")?,
            h1keyword: r.try_get("h1keyword")?,
            web_url: r.try_get("web_url")?,
            aff_url: r.try_get("aff_url")?,
            meta_title: r.try_get("meta_title")?,
            meta_description: r.try_get("meta_description")?,
            side_description_html: r.try_get("side_description_html")?,
            active: r.try_get("active")?,
            created_at: r.try_get("created_at")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}

/// The fields a spreadsheet import may write. `slug` is expected to be
/// normalized already; `upsert_basic` normalizes again as a guard.
#[derive(Clone, Debug, Default)]
pub struct MerchantImport {
    pub name: String,
    pub slug: String,
    pub h1keyword: String,
    pub web_url: String,
    pub aff_url: String,
    pub meta_title: String,
    pub meta_description: String,
}

/// Full mutable field set used by the admin create/update endpoints.
#[derive(Clone, Debug, Default)]
pub struct MerchantFields {
    pub name: String,
    pub slug: String,
    pub h1keyword: String,
    pub web_url: String,
    pub aff_url: String,
    pub meta_title: String,
    pub meta_description: String,
    pub side_description_html: String,
    pub active: bool,
}

#[async_trait]
pub trait MerchantRepository: Send + Sync {
    async fn find_id_by_slug(&self, slug: &str) -> anyhow::Result<Option<i64>>;
    /// Is `slug` already held by a merchant other than `exclude_id`?
    async fn slug_taken(&self, slug: &str, exclude_id: Option<i64>) -> anyhow::Result<bool>;
    async fn set_slug(&self, id: i64, slug: &str) -> anyhow::Result<()>;
    async fn upsert_basic(&self, import: MerchantImport) -> anyhow::Result<UpsertAction>;
    async fn update_first_paragraph_by_slug(&self, slug: &str, html: &str) -> anyhow::Result<u64>;
    async fn update_seo_description_by_slug(&self, slug: &str, desc: &str) -> anyhow::Result<u64>;
    async fn list(
        &self,
        search: &str,
        page: usize,
        limit: usize,
    ) -> anyhow::Result<(Vec<Merchant>, i64)>;
    async fn get(&self, id: i64) -> anyhow::Result<Option<Merchant>>;
    async fn insert(&self, fields: MerchantFields) -> anyhow::Result<Merchant>;
    async fn update(&self, id: i64, fields: MerchantFields) -> anyhow::Result<Option<Merchant>>;
    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<u64>;
    async fn delete(&self, id: i64) -> anyhow::Result<u64>;
    async fn count(&self) -> anyhow::Result<i64>;
    async fn search_by_name(&self, query: &str, limit: i64) -> anyhow::Result<Vec<Merchant>>;

    /// Renames the merchant holding `old_slug` to a collision-free slug
    /// derived from `new_slug_seed`, probing `seed`, `seed-1`, … up to 100
    /// attempts. The merchant's own row is excluded from the collision
    /// scan; a missing source slug is an explicit error.
    async fn rename_slug(&self, old_slug: &str, new_slug_seed: &str) -> anyhow::Result<String> {
        let old = slugify(old_slug);
        let seed = slugify(new_slug_seed);
        if old.is_empty() || seed.is_empty() {
            anyhow::bail!("Invalid old_slug or new_slug.");
        }
        let id = self
            .find_id_by_slug(&old)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Merchant not found for slug '{old}'"))?;
        let mut candidate = seed.clone();
        for attempt in 1..=100 {
            if !self.slug_taken(&candidate, Some(id)).await? {
                break;
            }
            candidate = format!("{seed}-{attempt}");
        }
        self.set_slug(id, &candidate).await?;
        Ok(candidate)
    }

    /// Finds a free slug for create/update forms. Falls back to a
    /// timestamp suffix when fifty probes all collide.
    async fn ensure_unique_slug(
        &self,
        base: &str,
        exclude_id: Option<i64>,
    ) -> anyhow::Result<String> {
        let seed = match slugify(base) {
            s if s.is_empty() => "merchant".to_string(),
            s => s,
        };
        let mut slug = seed.clone();
        for attempt in 1..=50 {
            if !self.slug_taken(&slug, exclude_id).await? {
                return Ok(slug);
            }
            slug = format!("{seed}-{attempt}");
        }
        Ok(format!(
            "{seed}-{}",
            OffsetDateTime::now_utc().unix_timestamp()
        ))
    }
}

pub struct PostgresMerchantRepository {
    client: Arc<Client>,
}

impl PostgresMerchantRepository {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

const MERCHANT_COLS: &str = "id, name, slug, h1keyword, web_url, aff_url, meta_title, \
     meta_description, side_description_html, active, created_at, updated_at";

#[async_trait]
impl MerchantRepository for PostgresMerchantRepository {
    async fn find_id_by_slug(&self, slug: &str) -> anyhow::Result<Option<i64>> {
        let slug = slugify(slug);
        if slug.is_empty() {
            return Ok(None);
        }
        let row = self
            .client
            .query_opt("SELECT id FROM merchants WHERE slug = $1", &[&slug])
            .await
            .context("Unable to look up merchant by slug")?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn slug_taken(&self, slug: &str, exclude_id: Option<i64>) -> anyhow::Result<bool> {
        let row = match exclude_id {
            Some(id) => {
                self.client
                    .query_opt(
                        "SELECT id FROM merchants WHERE slug = $1 AND id <> $2 LIMIT 1",
                        &[&slug, &id],
                    )
                    .await
            }
            None => {
                self.client
                    .query_opt("SELECT id FROM merchants WHERE slug = $1 LIMIT 1", &[&slug])
                    .await
            }
        }
        .context("Unable to check slug availability")?;
        Ok(row.is_some())
    }

    async fn set_slug(&self, id: i64, slug: &str) -> anyhow::Result<()> {
        self.client
            .execute(
                "UPDATE merchants SET slug = $1, updated_at = now() WHERE id = $2",
                &[&slug, &id],
            )
            .await
            .context("Unable to update merchant slug")?;
        Ok(())
    }

    async fn upsert_basic(&self, import: MerchantImport) -> anyhow::Result<UpsertAction> {
        let slug = if import.slug.is_empty() {
            slugify(&import.name)
        } else {
            slugify(&import.slug)
        };
        if import.name.is_empty() || slug.is_empty() {
            anyhow::bail!("Missing required merchant fields (name/slug).");
        }
        let existing = self
            .client
            .query_opt("SELECT id FROM merchants WHERE slug = $1", &[&slug])
            .await
            .context("Unable to look up merchant by slug")?;
        match existing {
            Some(row) => {
                let id: i64 = row.get(0);
                self.client
                    .execute(
                        "UPDATE merchants SET name = $1, h1keyword = $2, web_url = $3, \
                         aff_url = $4, meta_title = $5, meta_description = $6, \
                         updated_at = now() WHERE id = $7",
                        &[
                            &import.name,
                            &import.h1keyword,
                            &import.web_url,
                            &import.aff_url,
                            &import.meta_title,
                            &import.meta_description,
                            &id,
                        ],
                    )
                    .await
                    .context("Unable to update merchant")?;
                Ok(UpsertAction::Updated)
            }
            None => {
                self.client
                    .execute(
                        "INSERT INTO merchants \
                         (name, slug, h1keyword, web_url, aff_url, meta_title, meta_description) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7)",
                        &[
                            &import.name,
                            &slug,
                            &import.h1keyword,
                            &import.web_url,
                            &import.aff_url,
                            &import.meta_title,
                            &import.meta_description,
                        ],
                    )
                    .await
                    .context("Unable to insert merchant")?;
                Ok(UpsertAction::Inserted)
            }
        }
    }

    async fn update_first_paragraph_by_slug(&self, slug: &str, html: &str) -> anyhow::Result<u64> {
        let slug = slugify(slug);
        self.client
            .execute(
                "UPDATE merchants SET side_description_html = $1, updated_at = now() \
                 WHERE slug = $2",
                &[&html, &slug],
            )
            .await
            .context("Unable to update merchant first paragraph")
    }

    async fn update_seo_description_by_slug(&self, slug: &str, desc: &str) -> anyhow::Result<u64> {
        let slug = slugify(slug);
        self.client
            .execute(
                "UPDATE merchants SET meta_description = $1, updated_at = now() \
                 WHERE slug = $2",
                &[&desc, &slug],
            )
            .await
            .context("Unable to update merchant SEO description")
    }

    async fn list(
        &self,
        search: &str,
        page: usize,
        limit: usize,
    ) -> anyhow::Result<(Vec<Merchant>, i64)> {
        let offset = ((page.max(1) - 1) * limit) as i64;
        let limit = limit as i64;
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {MERCHANT_COLS} FROM merchants \
                     WHERE ($1 = '' OR name ILIKE '%' || $1 || '%') \
                     ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                ),
                &[&search, &limit, &offset],
            )
            .await
            .context("Unable to list merchants")?;
        let total: i64 = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM merchants \
                 WHERE ($1 = '' OR name ILIKE '%' || $1 || '%')",
                &[&search],
            )
            .await
            .context("Unable to count merchants")?
            .get(0);
        let merchants = rows
            .into_iter()
            .map(Merchant::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((merchants, total))
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Merchant>> {
        self.client
            .query_opt(
                &format!("SELECT {MERCHANT_COLS} FROM merchants WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Unable to get merchant")?
            .map(Merchant::try_from)
            .transpose()
    }

    async fn insert(&self, fields: MerchantFields) -> anyhow::Result<Merchant> {
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO merchants \
                     (name, slug, h1keyword, web_url, aff_url, meta_title, meta_description, \
                      side_description_html, active) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                     RETURNING {MERCHANT_COLS}"
                ),
                &[
                    &fields.name,
                    &fields.slug,
                    &fields.h1keyword,
                    &fields.web_url,
                    &fields.aff_url,
                    &fields.meta_title,
                    &fields.meta_description,
                    &fields.side_description_html,
                    &fields.active,
                ],
            )
            .await
            .context("Unable to insert merchant")?;
        row.try_into()
    }

    async fn update(&self, id: i64, fields: MerchantFields) -> anyhow::Result<Option<Merchant>> {
        self.client
            .query_opt(
                &format!(
                    "UPDATE merchants SET name = $1, slug = $2, h1keyword = $3, web_url = $4, \
                     aff_url = $5, meta_title = $6, meta_description = $7, \
                     side_description_html = $8, active = $9, updated_at = now() \
                     WHERE id = $10 RETURNING {MERCHANT_COLS}"
                ),
                &[
                    &fields.name,
                    &fields.slug,
                    &fields.h1keyword,
                    &fields.web_url,
                    &fields.aff_url,
                    &fields.meta_title,
                    &fields.meta_description,
                    &fields.side_description_html,
                    &fields.active,
                    &id,
                ],
            )
            .await
            .context("Unable to update merchant")?
            .map(Merchant::try_from)
            .transpose()
    }

    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<u64> {
        self.client
            .execute(
                "UPDATE merchants SET active = $1, updated_at = now() WHERE id = $2",
                &[&active, &id],
            )
            .await
            .context("Unable to update merchant status")
    }

    async fn delete(&self, id: i64) -> anyhow::Result<u64> {
        self.client
            .execute("DELETE FROM merchants WHERE id = $1", &[&id])
            .await
            .context("Unable to delete merchant")
    }

    async fn count(&self) -> anyhow::Result<i64> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM merchants", &[])
            .await
            .context("Unable to count merchants")?;
        Ok(row.get(0))
    }

    async fn search_by_name(&self, query: &str, limit: i64) -> anyhow::Result<Vec<Merchant>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {MERCHANT_COLS} FROM merchants \
                     WHERE name ILIKE '%' || $1 || '%' ORDER BY name LIMIT $2"
                ),
                &[&query, &limit],
            )
            .await
            .context("Unable to search merchants")?;
        rows.into_iter().map(Merchant::try_from).collect()
    }
}
