use super::{created, limit_or_default, ok, page_or_default, ApiError, PageData, Response};
use crate::coupon::{CouponFields, CouponFilter, CouponRepository, CouponType};
use crate::merchant::MerchantRepository;
use actix_web::web::{Data, Json, Path, Query};
use actix_web::{delete, get, post, put};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Default, Deserialize)]
pub struct CouponListQuery {
    #[serde(default)]
    search: String,
    #[serde(default, deserialize_with = "crate::empty_string_as_none_parse")]
    store_id: Option<i64>,
    #[serde(default, rename = "type")]
    coupon_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    from_date: String,
    #[serde(default)]
    to_date: String,
    page: Option<usize>,
    limit: Option<usize>,
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (taken as UTC
/// midnight).
fn parse_date_param(input: &str) -> Option<OffsetDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(input, &Rfc3339) {
        return Some(dt);
    }
    let format = format_description!("[year]-[month]-[day]");
    time::Date::parse(input, &format)
        .ok()
        .map(|d| d.midnight().assume_utc())
}

impl CouponListQuery {
    fn to_filter(&self) -> CouponFilter {
        CouponFilter {
            search: self.search.trim().to_string(),
            merchant_id: self.store_id,
            coupon_type: CouponType::parse(&self.coupon_type),
            published: match self.status.trim() {
                "" => None,
                status => Some(status == "published"),
            },
            from_date: parse_date_param(&self.from_date),
            to_date: parse_date_param(&self.to_date),
            page: page_or_default(self.page),
            limit: limit_or_default(self.limit),
        }
    }
}

#[get("/coupons")]
async fn list_coupons(
    q: Query<CouponListQuery>,
    coupons: Data<Arc<dyn CouponRepository>>,
) -> Response {
    let filter = q.to_filter();
    let (rows, total) = coupons.list(&filter).await?;
    Ok(ok(PageData {
        rows,
        total,
        page: filter.page,
        limit: filter.limit,
    }))
}

#[get("/coupons/{id}")]
async fn get_coupon(path: Path<i64>, coupons: Data<Arc<dyn CouponRepository>>) -> Response {
    let coupon = coupons
        .get(path.into_inner())
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(ok(coupon))
}

#[derive(Debug, Deserialize)]
pub struct CouponPayload {
    coupon_type: String,
    #[serde(default)]
    coupon_code: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    type_text: String,
    #[serde(default)]
    is_editor: bool,
    #[serde(default)]
    is_publish: bool,
}

impl CouponPayload {
    fn validate(&self) -> Result<CouponFields, ApiError> {
        let coupon_type = CouponType::parse(&self.coupon_type).ok_or_else(|| {
            ApiError::bad_request(format!("Invalid coupon_type '{}'", self.coupon_type))
        })?;
        if coupon_type == CouponType::Coupon && self.coupon_code.trim().is_empty() {
            return Err(ApiError::bad_request("coupon_code required for type=coupon"));
        }
        if self.title.trim().is_empty() {
            return Err(ApiError::bad_request("title is required"));
        }
        Ok(CouponFields {
            coupon_type,
            coupon_code: self.coupon_code.trim().to_string(),
            title: self.title.trim().to_string(),
            description: self.description.clone(),
            type_text: self.type_text.clone(),
            is_editor: self.is_editor,
            is_publish: self.is_publish,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCouponPayload {
    merchant_id: i64,
    #[serde(flatten)]
    coupon: CouponPayload,
}

#[post("/coupons")]
async fn create_coupon(
    payload: Json<CreateCouponPayload>,
    merchants: Data<Arc<dyn MerchantRepository>>,
    coupons: Data<Arc<dyn CouponRepository>>,
) -> Response {
    let payload = payload.into_inner();
    let fields = payload.coupon.validate()?;
    if merchants.get(payload.merchant_id).await?.is_none() {
        return Err(ApiError::bad_request("merchant_id does not exist."));
    }
    let coupon = coupons.insert(payload.merchant_id, fields).await?;
    Ok(created(coupon))
}

#[put("/coupons/{id}")]
async fn update_coupon(
    path: Path<i64>,
    payload: Json<CouponPayload>,
    coupons: Data<Arc<dyn CouponRepository>>,
) -> Response {
    let fields = payload.validate()?;
    let coupon = coupons
        .update(path.into_inner(), fields)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(ok(coupon))
}

#[derive(Debug, Deserialize)]
pub struct PublishPayload {
    is_publish: bool,
}

#[post("/coupons/{id}/publish")]
async fn toggle_publish(
    path: Path<i64>,
    payload: Json<PublishPayload>,
    coupons: Data<Arc<dyn CouponRepository>>,
) -> Response {
    let updated = coupons
        .set_publish(path.into_inner(), payload.is_publish)
        .await?;
    if updated == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ok(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct EditorPickPayload {
    is_editor: bool,
}

#[post("/coupons/{id}/editor-pick")]
async fn toggle_editor_pick(
    path: Path<i64>,
    payload: Json<EditorPickPayload>,
    coupons: Data<Arc<dyn CouponRepository>>,
) -> Response {
    let updated = coupons
        .set_editor(path.into_inner(), payload.is_editor)
        .await?;
    if updated == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ok(json!({ "success": true })))
}

#[delete("/coupons/{id}")]
async fn delete_coupon(path: Path<i64>, coupons: Data<Arc<dyn CouponRepository>>) -> Response {
    let deleted = coupons.delete(path.into_inner()).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(ok(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_params() {
        assert!(parse_date_param("").is_none());
        assert!(parse_date_param("not a date").is_none());
        let midnight = parse_date_param("2024-03-01").expect("date should parse");
        assert_eq!((2024, 3, 1), (
            midnight.year(),
            midnight.month() as u8 as i32,
            midnight.day() as i32,
        ));
        assert!(parse_date_param("2024-03-01T12:30:00Z").is_some());
    }
}
