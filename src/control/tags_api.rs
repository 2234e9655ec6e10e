use super::{created, ok, ApiError, Response};
use crate::slug::{is_valid_slug, slugify};
use crate::tag::{TagFields, TagRepository};
use crate::tag_store::TagStoreRepository;
use actix_web::web::{Data, Json, Path, Query};
use actix_web::{delete, get, post, put};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct TagListQuery {
    #[serde(default, deserialize_with = "crate::empty_string_as_none_parse")]
    active: Option<bool>,
}

#[get("/tags")]
async fn list_tags(q: Query<TagListQuery>, tags: Data<Arc<dyn TagRepository>>) -> Response {
    let rows = tags.list(q.active).await?;
    Ok(ok(rows))
}

#[get("/tags/{id}")]
async fn get_tag(path: Path<i64>, tags: Data<Arc<dyn TagRepository>>) -> Response {
    let tag = tags.get(path.into_inner()).await?.ok_or(ApiError::NotFound)?;
    Ok(ok(tag))
}

#[derive(Debug, Deserialize)]
pub struct TagPayload {
    tag_name: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    display_order: i64,
    #[serde(default)]
    meta_title: Option<String>,
    #[serde(default)]
    meta_description: Option<String>,
}

impl TagPayload {
    fn resolve_slug(&self) -> Result<String, ApiError> {
        let slug = if self.slug.trim().is_empty() {
            slugify(&self.tag_name)
        } else {
            self.slug.trim().to_string()
        };
        if !is_valid_slug(&slug) {
            return Err(ApiError::bad_request(
                "slug must be URL-safe (lowercase letters, numbers, hyphens).",
            ));
        }
        Ok(slug)
    }

    fn into_fields(self, slug: String) -> TagFields {
        TagFields {
            tag_name: self.tag_name.trim().to_string(),
            slug,
            active: self.active,
            display_order: self.display_order,
            meta_title: self.meta_title.filter(|s| !s.trim().is_empty()),
            meta_description: self.meta_description.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[post("/tags")]
async fn create_tag(payload: Json<TagPayload>, tags: Data<Arc<dyn TagRepository>>) -> Response {
    let payload = payload.into_inner();
    if payload.tag_name.trim().is_empty() {
        return Err(ApiError::bad_request("tag_name is required."));
    }
    let slug = payload.resolve_slug()?;
    if tags.slug_taken(&slug, None).await? {
        return Err(ApiError::bad_request("slug already in use."));
    }
    let tag = tags.insert(payload.into_fields(slug)).await?;
    Ok(created(tag))
}

#[put("/tags/{id}")]
async fn update_tag(
    path: Path<i64>,
    payload: Json<TagPayload>,
    tags: Data<Arc<dyn TagRepository>>,
) -> Response {
    let id = path.into_inner();
    let payload = payload.into_inner();
    if payload.tag_name.trim().is_empty() {
        return Err(ApiError::bad_request("tag_name is required."));
    }
    let slug = payload.resolve_slug()?;
    if tags.slug_taken(&slug, Some(id)).await? {
        return Err(ApiError::bad_request("slug already in use."));
    }
    let tag = tags
        .update(id, payload.into_fields(slug))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(ok(tag))
}

#[delete("/tags/{id}")]
async fn delete_tag(path: Path<i64>, tags: Data<Arc<dyn TagRepository>>) -> Response {
    let deleted = tags.delete(path.into_inner()).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ok(json!({ "success": true })))
}

#[get("/tags/{id}/stores")]
async fn stores_by_tag(
    path: Path<i64>,
    relations: Data<Arc<dyn TagStoreRepository>>,
) -> Response {
    let rows = relations.stores_by_tag(path.into_inner()).await?;
    Ok(ok(rows))
}

#[derive(Debug, Deserialize)]
pub struct LinkStorePayload {
    store_id: i64,
}

#[post("/tags/{id}/stores")]
async fn link_store_to_tag(
    path: Path<i64>,
    payload: Json<LinkStorePayload>,
    relations: Data<Arc<dyn TagStoreRepository>>,
) -> Response {
    let tag_id = path.into_inner();
    let linked = relations.ensure(payload.store_id, tag_id).await?;
    Ok(created(json!({ "created": linked })))
}

#[delete("/tags/{tag_id}/stores/{store_id}")]
async fn unlink_store_from_tag(
    path: Path<(i64, i64)>,
    relations: Data<Arc<dyn TagStoreRepository>>,
) -> Response {
    let (tag_id, store_id) = path.into_inner();
    relations.remove(tag_id, store_id).await?;
    Ok(ok(json!({ "success": true })))
}
