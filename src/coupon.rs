use crate::merchant::UpsertAction;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_postgres::row::Row;
use tokio_postgres::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouponType {
    Coupon,
    Deal,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponType::Coupon => "coupon",
            CouponType::Deal => "deal",
        }
    }

    /// Strict, case-insensitive parse. Anything but `coupon`/`deal` is
    /// rejected rather than defaulted.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "coupon" => Some(CouponType::Coupon),
            "deal" => Some(CouponType::Deal),
            _ => None,
        }
    }
}

impl Serialize for CouponType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Coupon {
    pub id: i64,
    pub merchant_id: i64,
    pub coupon_type: CouponType,
    pub coupon_code: String,
    pub title: String,
    pub description: String,
    pub type_text: String,
    pub is_editor: bool,
    pub is_publish: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<Row> for Coupon {
    type Error = anyhow::Error;

    fn try_from(r: Row) -> Result<Self, Self::Error> {
        let raw_type: String = r.try_get("coupon_type")?;
        Ok(Self {
            id: r.try_get("id")?,
            merchant_id: r.try_get("merchant_id")?,
            coupon_type: CouponType::parse(&raw_type)
                .ok_or_else(|| anyhow::anyhow!("Invalid coupon_type '{raw_type}' in storage"))?,
            coupon_code: r.try_get("coupon_code")?,
            title: r.try_get("title")?,
            description: r.try_get("description")?,
            type_text: r.try_get("type_text")?,
            is_editor: r.try_get("is_editor")?,
            is_publish: r.try_get("is_publish")?,
            created_at: r.try_get("created_at")?,
            updated_at: r.try_get("updated_at")?,
        })
    }
}

/// Coupon row joined with its merchant's name and slug for list views.
#[derive(Clone, Debug, Serialize)]
pub struct CouponWithStore {
    #[serde(flatten)]
    pub coupon: Coupon,
    pub store_name: Option<String>,
    pub store_slug: Option<String>,
}

/// Fields written by the spreadsheet import. The code is normalized to
/// the empty string for deals so the natural key stays stable.
#[derive(Clone, Debug)]
pub struct CouponImport {
    pub coupon_type: CouponType,
    pub coupon_code: String,
    pub title: String,
    pub description: String,
    pub type_text: String,
    pub is_editor: bool,
}

#[derive(Clone, Debug)]
pub struct CouponFields {
    pub coupon_type: CouponType,
    pub coupon_code: String,
    pub title: String,
    pub description: String,
    pub type_text: String,
    pub is_editor: bool,
    pub is_publish: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CouponFilter {
    pub search: String,
    pub merchant_id: Option<i64>,
    pub coupon_type: Option<CouponType>,
    pub published: Option<bool>,
    pub from_date: Option<OffsetDateTime>,
    pub to_date: Option<OffsetDateTime>,
    pub page: usize,
    pub limit: usize,
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Upserts on the natural key `(merchant_id, coupon_type, title,
    /// normalized code)`. New rows are created unpublished.
    async fn upsert_by_natural_key(
        &self,
        merchant_id: i64,
        import: CouponImport,
    ) -> anyhow::Result<UpsertAction>;
    async fn list(&self, filter: &CouponFilter) -> anyhow::Result<(Vec<CouponWithStore>, i64)>;
    async fn get(&self, id: i64) -> anyhow::Result<Option<Coupon>>;
    async fn insert(&self, merchant_id: i64, fields: CouponFields) -> anyhow::Result<Coupon>;
    async fn update(&self, id: i64, fields: CouponFields) -> anyhow::Result<Option<Coupon>>;
    async fn set_publish(&self, id: i64, value: bool) -> anyhow::Result<u64>;
    async fn set_editor(&self, id: i64, value: bool) -> anyhow::Result<u64>;
    async fn delete(&self, id: i64) -> anyhow::Result<u64>;
    async fn count_published(&self) -> anyhow::Result<i64>;
}

pub struct PostgresCouponRepository {
    client: Arc<Client>,
}

impl PostgresCouponRepository {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

const COUPON_COLS: &str = "id, merchant_id, coupon_type, coupon_code, title, description, \
     type_text, is_editor, is_publish, created_at, updated_at";

#[async_trait]
impl CouponRepository for PostgresCouponRepository {
    async fn upsert_by_natural_key(
        &self,
        merchant_id: i64,
        import: CouponImport,
    ) -> anyhow::Result<UpsertAction> {
        if import.title.is_empty() {
            anyhow::bail!("title required");
        }
        let code = match import.coupon_type {
            CouponType::Coupon => import.coupon_code.clone(),
            CouponType::Deal => String::new(),
        };
        let existing = self
            .client
            .query_opt(
                "SELECT id FROM coupons WHERE merchant_id = $1 AND coupon_type = $2 \
                 AND title = $3 AND coupon_code = $4",
                &[
                    &merchant_id,
                    &import.coupon_type.as_str(),
                    &import.title,
                    &code,
                ],
            )
            .await
            .context("Unable to look up coupon by natural key")?;
        match existing {
            Some(row) => {
                let id: i64 = row.get(0);
                self.client
                    .execute(
                        "UPDATE coupons SET description = $1, type_text = $2, is_editor = $3, \
                         updated_at = now() WHERE id = $4",
                        &[&import.description, &import.type_text, &import.is_editor, &id],
                    )
                    .await
                    .context("Unable to update coupon")?;
                Ok(UpsertAction::Updated)
            }
            None => {
                self.client
                    .execute(
                        "INSERT INTO coupons \
                         (merchant_id, coupon_type, coupon_code, title, description, type_text, \
                          is_editor, is_publish) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)",
                        &[
                            &merchant_id,
                            &import.coupon_type.as_str(),
                            &code,
                            &import.title,
                            &import.description,
                            &import.type_text,
                            &import.is_editor,
                        ],
                    )
                    .await
                    .context("Unable to insert coupon")?;
                Ok(UpsertAction::Inserted)
            }
        }
    }

    async fn list(&self, filter: &CouponFilter) -> anyhow::Result<(Vec<CouponWithStore>, i64)> {
        let offset = (filter.page.max(1) - 1) as i64 * filter.limit as i64;
        let limit = filter.limit as i64;
        let coupon_type = filter.coupon_type.map(|t| t.as_str().to_string());
        let conditions = "($1 = '' OR c.title ILIKE '%' || $1 || '%') \
             AND ($2::BIGINT IS NULL OR c.merchant_id = $2) \
             AND ($3::TEXT IS NULL OR c.coupon_type = $3) \
             AND ($4::BOOLEAN IS NULL OR c.is_publish = $4) \
             AND ($5::TIMESTAMPTZ IS NULL OR c.created_at >= $5) \
             AND ($6::TIMESTAMPTZ IS NULL OR c.created_at <= $6)";
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT c.id, c.merchant_id, c.coupon_type, c.coupon_code, c.title, \
                     c.description, c.type_text, c.is_editor, c.is_publish, c.created_at, \
                     c.updated_at, m.name AS store_name, m.slug AS store_slug \
                     FROM coupons c LEFT JOIN merchants m ON m.id = c.merchant_id \
                     WHERE {conditions} \
                     ORDER BY c.created_at DESC LIMIT $7 OFFSET $8"
                ),
                &[
                    &filter.search,
                    &filter.merchant_id,
                    &coupon_type,
                    &filter.published,
                    &filter.from_date,
                    &filter.to_date,
                    &limit,
                    &offset,
                ],
            )
            .await
            .context("Unable to list coupons")?;
        let total: i64 = self
            .client
            .query_one(
                &format!("SELECT COUNT(*) FROM coupons c WHERE {conditions}"),
                &[
                    &filter.search,
                    &filter.merchant_id,
                    &coupon_type,
                    &filter.published,
                    &filter.from_date,
                    &filter.to_date,
                ],
            )
            .await
            .context("Unable to count coupons")?
            .get(0);
        let items = rows
            .into_iter()
            .map(|row| {
                let store_name: Option<String> = row.try_get("store_name")?;
                let store_slug: Option<String> = row.try_get("store_slug")?;
                Ok(CouponWithStore {
                    coupon: Coupon::try_from(row)?,
                    store_name,
                    store_slug,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((items, total))
    }

    async fn get(&self, id: i64) -> anyhow::Result<Option<Coupon>> {
        self.client
            .query_opt(
                &format!("SELECT {COUPON_COLS} FROM coupons WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Unable to get coupon")?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn insert(&self, merchant_id: i64, fields: CouponFields) -> anyhow::Result<Coupon> {
        let code = match fields.coupon_type {
            CouponType::Coupon => fields.coupon_code.clone(),
            CouponType::Deal => String::new(),
        };
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO coupons \
                     (merchant_id, coupon_type, coupon_code, title, description, type_text, \
                      is_editor, is_publish) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {COUPON_COLS}"
                ),
                &[
                    &merchant_id,
                    &fields.coupon_type.as_str(),
                    &code,
                    &fields.title,
                    &fields.description,
                    &fields.type_text,
                    &fields.is_editor,
                    &fields.is_publish,
                ],
            )
            .await
            .context("Unable to insert coupon")?;
        row.try_into()
    }

    async fn update(&self, id: i64, fields: CouponFields) -> anyhow::Result<Option<Coupon>> {
        let code = match fields.coupon_type {
            CouponType::Coupon => fields.coupon_code.clone(),
            CouponType::Deal => String::new(),
        };
        self.client
            .query_opt(
                &format!(
                    "UPDATE coupons SET coupon_type = $1, coupon_code = $2, title = $3, \
                     description = $4, type_text = $5, is_editor = $6, is_publish = $7, \
                     updated_at = now() WHERE id = $8 RETURNING {COUPON_COLS}"
                ),
                &[
                    &fields.coupon_type.as_str(),
                    &code,
                    &fields.title,
                    &fields.description,
                    &fields.type_text,
                    &fields.is_editor,
                    &fields.is_publish,
                    &id,
                ],
            )
            .await
            .context("Unable to update coupon")?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn set_publish(&self, id: i64, value: bool) -> anyhow::Result<u64> {
        self.client
            .execute(
                "UPDATE coupons SET is_publish = $1, updated_at = now() WHERE id = $2",
                &[&value, &id],
            )
            .await
            .context("Unable to update coupon publish status")
    }

    async fn set_editor(&self, id: i64, value: bool) -> anyhow::Result<u64> {
        self.client
            .execute(
                "UPDATE coupons SET is_editor = $1, updated_at = now() WHERE id = $2",
                &[&value, &id],
            )
            .await
            .context("Unable to update coupon editor flag")
    }

    async fn delete(&self, id: i64) -> anyhow::Result<u64> {
        self.client
            .execute("DELETE FROM coupons WHERE id = $1", &[&id])
            .await
            .context("Unable to delete coupon")
    }

    async fn count_published(&self) -> anyhow::Result<i64> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM coupons WHERE is_publish", &[])
            .await
            .context("Unable to count published coupons")?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coupon_type_case_insensitively() {
        assert_eq!(Some(CouponType::Coupon), CouponType::parse("Coupon"));
        assert_eq!(Some(CouponType::Deal), CouponType::parse(" DEAL "));
        assert_eq!(None, CouponType::parse("voucher"));
        assert_eq!(None, CouponType::parse(""));
    }
}
