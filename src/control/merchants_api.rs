use super::{created, limit_or_default, ok, page_or_default, ApiError, PageData, Response};
use crate::merchant::{MerchantFields, MerchantRepository};
use actix_web::web::{Data, Json, Path, Query};
use actix_web::{delete, get, patch, post, put};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct MerchantListQuery {
    #[serde(default)]
    name: String,
    page: Option<usize>,
    limit: Option<usize>,
}

#[get("/merchants")]
async fn list_merchants(
    q: Query<MerchantListQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let page = page_or_default(q.page);
    let limit = limit_or_default(q.limit);
    let (rows, total) = merchants.list(q.name.trim(), page, limit).await?;
    Ok(ok(PageData {
        rows,
        total,
        page,
        limit,
    }))
}

#[get("/merchants/{id}")]
async fn get_merchant(path: Path<i64>, merchants: Data<Arc<dyn MerchantRepository>>) -> Response {
    let merchant = merchants
        .get(path.into_inner())
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(ok(merchant))
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct MerchantPayload {
    name: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    h1keyword: String,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    aff_url: String,
    #[serde(default)]
    meta_title: String,
    #[serde(default)]
    meta_description: String,
    #[serde(default)]
    side_description_html: String,
    #[serde(default = "default_active")]
    active: bool,
}

impl MerchantPayload {
    fn slug_seed(&self) -> String {
        if self.slug.trim().is_empty() {
            self.name.clone()
        } else {
            self.slug.clone()
        }
    }

    fn into_fields(self, slug: String) -> MerchantFields {
        MerchantFields {
            name: self.name.trim().to_string(),
            slug,
            h1keyword: self.h1keyword,
            web_url: self.web_url,
            aff_url: self.aff_url,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            side_description_html: self.side_description_html,
            active: self.active,
        }
    }
}

#[post("/merchants")]
async fn create_merchant(
    payload: Json<MerchantPayload>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let payload = payload.into_inner();
    if payload.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required."));
    }
    let slug = merchants
        .ensure_unique_slug(&payload.slug_seed(), None)
        .await?;
    let merchant = merchants.insert(payload.into_fields(slug)).await?;
    Ok(created(merchant))
}

#[put("/merchants/{id}")]
async fn update_merchant(
    path: Path<i64>,
    payload: Json<MerchantPayload>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let id = path.into_inner();
    let payload = payload.into_inner();
    if payload.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required."));
    }
    let slug = merchants
        .ensure_unique_slug(&payload.slug_seed(), Some(id))
        .await?;
    let merchant = merchants
        .update(id, payload.into_fields(slug))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(ok(merchant))
}

#[derive(Debug, Deserialize)]
pub struct StatusPayload {
    active: bool,
}

#[patch("/merchants/{id}/status")]
async fn update_merchant_status(
    path: Path<i64>,
    payload: Json<StatusPayload>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let updated = merchants
        .set_active(path.into_inner(), payload.active)
        .await?;
    if updated == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ok(json!({ "success": true })))
}

#[delete("/merchants/{id}")]
async fn delete_merchant(
    path: Path<i64>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let deleted = merchants.delete(path.into_inner()).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ok(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreSearchQuery {
    #[serde(default)]
    query: String,
}

/// Merchant name search backing the tag-linking picker.
#[get("/stores/search")]
async fn search_stores(
    q: Query<StoreSearchQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let rows = merchants.search_by_name(q.query.trim(), 20).await?;
    Ok(ok(rows))
}
