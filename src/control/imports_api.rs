use super::{ok, ApiError, Response};
use crate::coupon::CouponRepository;
use crate::imports::{self, ImportOutcome, ImportStep};
use crate::merchant::MerchantRepository;
use crate::parse_boolean;
use crate::sheet::{parse_sheet, RowIssue};
use crate::tag::TagRepository;
use crate::tag_store::TagStoreRepository;
use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::web::{Data, Query};
use actix_web::post;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Every import step takes the same upload shape: one `file` part plus
/// an optional `dry_run` text part (the flag may also arrive as a query
/// parameter).
#[derive(MultipartForm)]
pub struct ImportUpload {
    file: Option<TempFile>,
    dry_run: Option<Text<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportQuery {
    #[serde(default)]
    dry_run: Option<String>,
}

#[derive(Serialize)]
pub struct ImportReport {
    inserted: usize,
    updated: usize,
    skipped: usize,
    failed: usize,
    total: usize,
    errors: Vec<RowIssue>,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ImportReport {
    fn from_outcome(outcome: ImportOutcome, dry_run: bool) -> Self {
        Self {
            inserted: outcome.inserted,
            updated: outcome.updated,
            skipped: outcome.skipped,
            failed: outcome.failed,
            total: outcome.total,
            errors: outcome.errors,
            dry_run,
            message: outcome.message,
        }
    }

    fn empty(dry_run: bool) -> Self {
        Self {
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            total: 0,
            errors: Vec::new(),
            dry_run,
            message: Some("No rows found.".to_string()),
        }
    }
}

fn dry_run_flag(form: &ImportUpload, query: &ImportQuery) -> bool {
    form.dry_run
        .as_ref()
        .map(|t| t.0.as_str())
        .or(query.dry_run.as_deref())
        .map(parse_boolean)
        .unwrap_or(false)
}

fn read_upload(form: &ImportUpload) -> Result<Vec<u8>, ApiError> {
    let file = form.file.as_ref().ok_or(ApiError::MissingFile)?;
    std::fs::read(file.file.path()).map_err(|err| ApiError::Internal(err.into()))
}

#[post("/imports/stores")]
async fn import_stores(
    form: MultipartForm<ImportUpload>,
    query: Query<ImportQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let form = form.into_inner();
    let dry_run = dry_run_flag(&form, &query);
    let data = read_upload(&form)?;
    let rows: Vec<imports::StoreRow> = parse_sheet(&data, &ImportStep::Stores.schema())?;
    if rows.is_empty() {
        return Ok(ok(ImportReport::empty(dry_run)));
    }
    let outcome = imports::import_stores(&rows, merchants.get_ref().as_ref(), dry_run).await;
    Ok(ok(ImportReport::from_outcome(outcome, dry_run)))
}

#[post("/imports/tag-store-relations")]
async fn import_tag_store_relations(
    form: MultipartForm<ImportUpload>,
    query: Query<ImportQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
    tags: Data<Arc<dyn TagRepository>>,
    relations: Data<Arc<dyn TagStoreRepository>>,
) -> Response {
    let form = form.into_inner();
    let dry_run = dry_run_flag(&form, &query);
    let data = read_upload(&form)?;
    let rows: Vec<imports::RelationRow> =
        parse_sheet(&data, &ImportStep::TagStoreRelations.schema())?;
    if rows.is_empty() {
        return Ok(ok(ImportReport::empty(dry_run)));
    }
    let outcome = imports::import_tag_store_relations(
        &rows,
        merchants.get_ref().as_ref(),
        tags.get_ref().as_ref(),
        relations.get_ref().as_ref(),
        dry_run,
    )
    .await;
    Ok(ok(ImportReport::from_outcome(outcome, dry_run)))
}

#[post("/imports/store-coupons-deals")]
async fn import_store_coupons_deals(
    form: MultipartForm<ImportUpload>,
    query: Query<ImportQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
    coupons: Data<Arc<dyn CouponRepository>>,
) -> Response {
    let form = form.into_inner();
    let dry_run = dry_run_flag(&form, &query);
    let data = read_upload(&form)?;
    let rows: Vec<imports::CouponRow> = parse_sheet(&data, &ImportStep::CouponsDeals.schema())?;
    if rows.is_empty() {
        return Ok(ok(ImportReport::empty(dry_run)));
    }
    let outcome = imports::import_coupons_deals(
        &rows,
        merchants.get_ref().as_ref(),
        coupons.get_ref().as_ref(),
        dry_run,
    )
    .await;
    Ok(ok(ImportReport::from_outcome(outcome, dry_run)))
}

#[post("/imports/store-first-paragraph")]
async fn import_store_first_paragraph(
    form: MultipartForm<ImportUpload>,
    query: Query<ImportQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let form = form.into_inner();
    let dry_run = dry_run_flag(&form, &query);
    let data = read_upload(&form)?;
    let rows: Vec<imports::ParagraphRow> =
        parse_sheet(&data, &ImportStep::FirstParagraph.schema())?;
    if rows.is_empty() {
        return Ok(ok(ImportReport::empty(dry_run)));
    }
    let outcome =
        imports::import_first_paragraphs(&rows, merchants.get_ref().as_ref(), dry_run).await;
    Ok(ok(ImportReport::from_outcome(outcome, dry_run)))
}

#[post("/imports/store-seo-desc-check")]
async fn import_store_seo_desc_check(
    form: MultipartForm<ImportUpload>,
    query: Query<ImportQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let form = form.into_inner();
    let dry_run = dry_run_flag(&form, &query);
    let data = read_upload(&form)?;
    let rows: Vec<imports::SeoRow> = parse_sheet(&data, &ImportStep::SeoDescCheck.schema())?;
    if rows.is_empty() {
        return Ok(ok(ImportReport::empty(dry_run)));
    }
    let outcome =
        imports::import_seo_descriptions(&rows, merchants.get_ref().as_ref(), dry_run).await;
    Ok(ok(ImportReport::from_outcome(outcome, dry_run)))
}

#[post("/imports/store-slugs-default-content")]
async fn import_store_slugs_default_content(
    form: MultipartForm<ImportUpload>,
    query: Query<ImportQuery>,
    merchants: Data<Arc<dyn MerchantRepository>>,
) -> Response {
    let form = form.into_inner();
    let dry_run = dry_run_flag(&form, &query);
    let data = read_upload(&form)?;
    let rows: Vec<imports::RenameRow> = parse_sheet(&data, &ImportStep::SlugRename.schema())?;
    if rows.is_empty() {
        return Ok(ok(ImportReport::empty(dry_run)));
    }
    let outcome = imports::import_slug_renames(&rows, merchants.get_ref().as_ref(), dry_run).await;
    Ok(ok(ImportReport::from_outcome(outcome, dry_run)))
}
