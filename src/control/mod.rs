use crate::coupon::CouponRepository;
use crate::merchant::MerchantRepository;
use crate::sheet::SheetError;
use crate::tag::TagRepository;
use actix_web::http::StatusCode;
use actix_web::{get, web::Data, HttpResponse};
use derive_more::{Display, Error};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

pub mod coupons_api;
pub mod imports_api;
pub mod merchants_api;
pub mod tags_api;

pub type Response = Result<HttpResponse, ApiError>;

#[derive(Debug, Display, Error)]
pub enum ApiError {
    #[display("File is required")]
    MissingFile,
    #[display("Not found")]
    NotFound,
    #[display("{message}")]
    #[error(ignore)]
    BadRequest {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[display("Import failed")]
    #[error(ignore)]
    ImportFailed { details: serde_json::Value },
    #[display("Internal server error")]
    #[error(ignore)]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<SheetError> for ApiError {
    fn from(err: SheetError) -> Self {
        let details = match &err {
            SheetError::Validation { issues } => json!(issues),
            other => json!(other.to_string()),
        };
        Self::ImportFailed { details }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Every endpoint answers with this envelope: `data` on success,
/// `error` on failure, never both.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    data: Option<T>,
    error: Option<ErrorBody>,
}

pub fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        data: Some(data),
        error: None,
    })
}

pub fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(Envelope {
        data: Some(data),
        error: None,
    })
}

fn error_response(
    status: StatusCode,
    message: String,
    details: Option<serde_json::Value>,
) -> HttpResponse {
    HttpResponse::build(status).json(Envelope::<serde_json::Value> {
        data: None,
        error: Some(ErrorBody { message, details }),
    })
}

impl actix_web::error::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}");
        match self {
            ApiError::MissingFile => error_response(
                StatusCode::BAD_REQUEST,
                "File is required".to_string(),
                Some(json!("Missing multipart file field 'file'.")),
            ),
            ApiError::NotFound => {
                error_response(StatusCode::NOT_FOUND, "Not found".to_string(), None)
            }
            ApiError::BadRequest { message, details } => {
                error_response(StatusCode::BAD_REQUEST, message.clone(), details.clone())
            }
            ApiError::ImportFailed { details } => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Import failed".to_string(),
                Some(details.clone()),
            ),
            ApiError::Internal(err) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(json!(format!("{err:#}"))),
            ),
        }
    }
}

pub fn page_or_default(page: Option<usize>) -> usize {
    page.unwrap_or(1).max(1)
}

pub fn limit_or_default(limit: Option<usize>) -> usize {
    limit.unwrap_or(20).clamp(1, 50)
}

/// One page of a list endpoint, echoing the resolved paging values.
#[derive(Serialize)]
pub struct PageData<T: Serialize> {
    pub rows: Vec<T>,
    pub total: i64,
    pub page: usize,
    pub limit: usize,
}

#[derive(Serialize)]
struct DashboardSummary {
    total_stores: i64,
    published_coupons: i64,
    total_tags: i64,
}

#[get("/dashboard/summary")]
async fn dashboard_summary(
    merchants: Data<Arc<dyn MerchantRepository>>,
    coupons: Data<Arc<dyn CouponRepository>>,
    tags: Data<Arc<dyn TagRepository>>,
) -> Response {
    let (total_stores, published_coupons, total_tags) =
        futures::try_join!(merchants.count(), coupons.count_published(), tags.count())?;
    Ok(ok(DashboardSummary {
        total_stores,
        published_coupons,
        total_tags,
    }))
}
