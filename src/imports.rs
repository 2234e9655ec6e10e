use crate::coupon::{CouponImport, CouponRepository, CouponType};
use crate::merchant::{MerchantImport, MerchantRepository, UpsertAction};
use crate::parse_boolean;
use crate::sheet::{RawRow, RowIssue, SheetRow, SheetSchema};
use crate::slug::slugify;
use crate::tag::TagRepository;
use crate::tag_store::TagStoreRepository;
use anyhow::anyhow;
use serde::Serialize;
use std::collections::HashSet;

/// The six spreadsheet import steps. Each kind carries its sheet schema;
/// the matching typed row shape is selected at the HTTP boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportStep {
    Stores,
    TagStoreRelations,
    CouponsDeals,
    FirstParagraph,
    SeoDescCheck,
    SlugRename,
}

impl ImportStep {
    pub fn schema(&self) -> SheetSchema {
        match self {
            ImportStep::Stores => SheetSchema {
                sheet_index: 0,
                headers: &[
                    "name",
                    "slug",
                    "h1keyword",
                    "web_url",
                    "aff_url",
                    "parent_slug",
                    "seo_title",
                    "seo_desc",
                ],
                // slug is derived from the name when blank
                required: &["name"],
            },
            ImportStep::TagStoreRelations => SheetSchema {
                sheet_index: 0,
                headers: &["store_slug", "tag_slug"],
                required: &["store_slug", "tag_slug"],
            },
            ImportStep::CouponsDeals => SheetSchema {
                sheet_index: 0,
                headers: &[
                    "slug",
                    "coupon_type",
                    "coupon_code",
                    "title",
                    "descp",
                    "type_text",
                    "is_editor",
                ],
                required: &["slug", "coupon_type", "title"],
            },
            ImportStep::FirstParagraph => SheetSchema {
                sheet_index: 0,
                headers: &["slug", "first_paragraph"],
                required: &["slug", "first_paragraph"],
            },
            ImportStep::SeoDescCheck => SheetSchema {
                sheet_index: 0,
                headers: &["slug", "seo_desc"],
                required: &["slug", "seo_desc"],
            },
            ImportStep::SlugRename => SheetSchema {
                sheet_index: 0,
                headers: &["old_slug", "new_slug"],
                required: &["old_slug", "new_slug"],
            },
        }
    }
}

/// Per-row outcome tally of one processor invocation. `failed` always
/// equals `errors.len()` and `total` the number of rows attempted.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ImportOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    pub errors: Vec<RowIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportOutcome {
    fn finish(mut self, total: usize) -> Self {
        self.failed = self.errors.len();
        self.total = total;
        self
    }

    fn row_error(&mut self, row: usize, message: impl Into<String>) {
        self.errors.push(RowIssue {
            row,
            message: message.into(),
        });
    }
}

// Rows are numbered from the spreadsheet's perspective: the header is
// row 1, so data row `i` reports as `i + 2`.
fn sheet_row(index: usize) -> usize {
    index + 2
}

#[derive(Clone, Debug, Default)]
pub struct StoreRow {
    pub name: String,
    pub slug: String,
    pub h1keyword: String,
    pub web_url: String,
    pub aff_url: String,
    pub parent_slug: String,
    pub seo_title: String,
    pub seo_desc: String,
}

impl SheetRow for StoreRow {
    fn from_raw(raw: &RawRow) -> Self {
        Self {
            name: raw.get("name").to_string(),
            slug: raw.get("slug").to_string(),
            h1keyword: raw.get("h1keyword").to_string(),
            web_url: raw.get("web_url").to_string(),
            aff_url: raw.get("aff_url").to_string(),
            parent_slug: raw.get("parent_slug").to_string(),
            seo_title: raw.get("seo_title").to_string(),
            seo_desc: raw.get("seo_desc").to_string(),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => Some(&self.name),
            "slug" => Some(&self.slug),
            "h1keyword" => Some(&self.h1keyword),
            "web_url" => Some(&self.web_url),
            "aff_url" => Some(&self.aff_url),
            "parent_slug" => Some(&self.parent_slug),
            "seo_title" => Some(&self.seo_title),
            "seo_desc" => Some(&self.seo_desc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RelationRow {
    pub store_slug: String,
    pub tag_slug: String,
}

impl SheetRow for RelationRow {
    fn from_raw(raw: &RawRow) -> Self {
        Self {
            store_slug: raw.get("store_slug").to_string(),
            tag_slug: raw.get("tag_slug").to_string(),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "store_slug" => Some(&self.store_slug),
            "tag_slug" => Some(&self.tag_slug),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CouponRow {
    pub slug: String,
    pub coupon_type: String,
    pub coupon_code: String,
    pub title: String,
    pub descp: String,
    pub type_text: String,
    pub is_editor: bool,
}

impl SheetRow for CouponRow {
    fn from_raw(raw: &RawRow) -> Self {
        Self {
            slug: raw.get("slug").to_string(),
            coupon_type: raw.get("coupon_type").to_string(),
            coupon_code: raw.get("coupon_code").to_string(),
            title: raw.get("title").to_string(),
            descp: raw.get("descp").to_string(),
            type_text: raw.get("type_text").to_string(),
            is_editor: parse_boolean(raw.get("is_editor")),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "slug" => Some(&self.slug),
            "coupon_type" => Some(&self.coupon_type),
            "coupon_code" => Some(&self.coupon_code),
            "title" => Some(&self.title),
            "descp" => Some(&self.descp),
            "type_text" => Some(&self.type_text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParagraphRow {
    pub slug: String,
    pub first_paragraph: String,
}

impl SheetRow for ParagraphRow {
    fn from_raw(raw: &RawRow) -> Self {
        Self {
            slug: raw.get("slug").to_string(),
            first_paragraph: raw.get("first_paragraph").to_string(),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "slug" => Some(&self.slug),
            "first_paragraph" => Some(&self.first_paragraph),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SeoRow {
    pub slug: String,
    pub seo_desc: String,
}

impl SheetRow for SeoRow {
    fn from_raw(raw: &RawRow) -> Self {
        Self {
            slug: raw.get("slug").to_string(),
            seo_desc: raw.get("seo_desc").to_string(),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "slug" => Some(&self.slug),
            "seo_desc" => Some(&self.seo_desc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RenameRow {
    pub old_slug: String,
    pub new_slug: String,
}

impl SheetRow for RenameRow {
    fn from_raw(raw: &RawRow) -> Self {
        Self {
            old_slug: raw.get("old_slug").to_string(),
            new_slug: raw.get("new_slug").to_string(),
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "old_slug" => Some(&self.old_slug),
            "new_slug" => Some(&self.new_slug),
            _ => None,
        }
    }
}

pub const SEO_DESC_MAX_LEN: usize = 220;

/// Step 1: stores. Derives the slug from the row's slug or name, rejects
/// duplicates within the same file, and upserts by slug. Rows are
/// processed in file order; every failure is recorded and skipped over.
pub async fn import_stores(
    rows: &[StoreRow],
    merchants: &dyn MerchantRepository,
    dry_run: bool,
) -> ImportOutcome {
    let mut out = ImportOutcome::default();
    let mut seen_slugs = HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let row_no = sheet_row(i);
        let slug = if row.slug.is_empty() {
            slugify(&row.name)
        } else {
            slugify(&row.slug)
        };
        if row.name.is_empty() || slug.is_empty() {
            out.row_error(row_no, "Missing required 'name' or unable to derive 'slug'.");
            continue;
        }
        if !seen_slugs.insert(slug.clone()) {
            out.row_error(row_no, format!("Duplicate slug in file: {slug}"));
            continue;
        }
        if dry_run {
            // Approximation: dry-run cannot know whether the slug would
            // insert or update without an extra lookup, so everything
            // valid tallies as an update intention.
            out.updated += 1;
            continue;
        }
        let import = MerchantImport {
            name: row.name.clone(),
            slug,
            h1keyword: row.h1keyword.clone(),
            web_url: row.web_url.clone(),
            aff_url: row.aff_url.clone(),
            meta_title: row.seo_title.clone(),
            meta_description: row.seo_desc.clone(),
        };
        match merchants.upsert_basic(import).await {
            Ok(UpsertAction::Inserted) => out.inserted += 1,
            Ok(UpsertAction::Updated) => out.updated += 1,
            Err(err) => out.row_error(row_no, format!("{err:#}")),
        }
    }

    out.finish(rows.len())
}

/// Step 2: tag–store relations. Lookup misses are row-level errors with
/// distinct messages; the relation insert is idempotent and tallies
/// `skipped` when the pair already exists.
pub async fn import_tag_store_relations(
    rows: &[RelationRow],
    merchants: &dyn MerchantRepository,
    tags: &dyn TagRepository,
    relations: &dyn TagStoreRepository,
    dry_run: bool,
) -> ImportOutcome {
    let mut out = ImportOutcome::default();

    for (i, row) in rows.iter().enumerate() {
        let row_no = sheet_row(i);
        let store_slug = slugify(&row.store_slug);
        let tag_slug = slugify(&row.tag_slug);
        if store_slug.is_empty() || tag_slug.is_empty() {
            out.row_error(row_no, "Invalid store_slug or tag_slug.");
            continue;
        }
        if dry_run {
            out.inserted += 1;
            continue;
        }
        let res = async {
            let merchant_id = merchants
                .find_id_by_slug(&store_slug)
                .await?
                .ok_or_else(|| anyhow!("Merchant not found for slug '{store_slug}'"))?;
            let tag_id = tags
                .find_id_by_slug(&tag_slug)
                .await?
                .ok_or_else(|| anyhow!("Tag not found for slug '{tag_slug}'"))?;
            relations.ensure(merchant_id, tag_id).await
        }
        .await;
        match res {
            Ok(true) => out.inserted += 1,
            Ok(false) => out.skipped += 1,
            Err(err) => out.row_error(row_no, format!("{err:#}")),
        }
    }

    out.finish(rows.len())
}

/// Step 3: coupons/deals. Validates the type enum and the
/// code-required-for-coupons rule, then upserts on the natural key.
pub async fn import_coupons_deals(
    rows: &[CouponRow],
    merchants: &dyn MerchantRepository,
    coupons: &dyn CouponRepository,
    dry_run: bool,
) -> ImportOutcome {
    let mut out = ImportOutcome::default();

    for (i, row) in rows.iter().enumerate() {
        let row_no = sheet_row(i);
        let store_slug = slugify(&row.slug);
        if store_slug.is_empty() {
            out.row_error(row_no, "Missing slug for merchant.");
            continue;
        }
        let Some(coupon_type) = CouponType::parse(&row.coupon_type) else {
            out.row_error(row_no, format!("Invalid coupon_type '{}'", row.coupon_type));
            continue;
        };
        if coupon_type == CouponType::Coupon && row.coupon_code.is_empty() {
            out.row_error(row_no, "coupon_code required for type=coupon");
            continue;
        }
        if row.title.is_empty() {
            out.row_error(row_no, "title is required");
            continue;
        }
        if dry_run {
            out.inserted += 1;
            continue;
        }
        let res = async {
            let merchant_id = merchants
                .find_id_by_slug(&store_slug)
                .await?
                .ok_or_else(|| anyhow!("Merchant not found for slug '{store_slug}'"))?;
            let import = CouponImport {
                coupon_type,
                coupon_code: row.coupon_code.clone(),
                title: row.title.clone(),
                description: row.descp.clone(),
                type_text: row.type_text.clone(),
                is_editor: row.is_editor,
            };
            coupons.upsert_by_natural_key(merchant_id, import).await
        }
        .await;
        match res {
            Ok(UpsertAction::Inserted) => out.inserted += 1,
            Ok(UpsertAction::Updated) => out.updated += 1,
            Err(err) => out.row_error(row_no, format!("{err:#}")),
        }
    }

    out.finish(rows.len())
}

/// Step 4: first paragraph. A field patch on an existing merchant; the
/// only failure modes are validation and a missing merchant.
pub async fn import_first_paragraphs(
    rows: &[ParagraphRow],
    merchants: &dyn MerchantRepository,
    dry_run: bool,
) -> ImportOutcome {
    let mut out = ImportOutcome::default();

    for (i, row) in rows.iter().enumerate() {
        let row_no = sheet_row(i);
        let store_slug = slugify(&row.slug);
        if store_slug.is_empty() || row.first_paragraph.is_empty() {
            out.row_error(row_no, "Missing slug or first_paragraph.");
            continue;
        }
        if dry_run {
            out.updated += 1;
            continue;
        }
        let res = async {
            merchants
                .find_id_by_slug(&store_slug)
                .await?
                .ok_or_else(|| anyhow!("Merchant not found for slug '{store_slug}'"))?;
            merchants
                .update_first_paragraph_by_slug(&store_slug, &row.first_paragraph)
                .await
        }
        .await;
        match res {
            Ok(_) => out.updated += 1,
            Err(err) => out.row_error(row_no, format!("{err:#}")),
        }
    }

    out.finish(rows.len())
}

/// Step 5: SEO description check. Descriptions over 220 characters are a
/// row-level validation error, not a hard stop.
pub async fn import_seo_descriptions(
    rows: &[SeoRow],
    merchants: &dyn MerchantRepository,
    dry_run: bool,
) -> ImportOutcome {
    let mut out = ImportOutcome::default();

    for (i, row) in rows.iter().enumerate() {
        let row_no = sheet_row(i);
        let store_slug = slugify(&row.slug);
        if store_slug.is_empty() || row.seo_desc.is_empty() {
            out.row_error(row_no, "Missing slug or seo_desc.");
            continue;
        }
        if row.seo_desc.chars().count() > SEO_DESC_MAX_LEN {
            out.row_error(row_no, format!("seo_desc too long (>{SEO_DESC_MAX_LEN} chars)"));
            continue;
        }
        if dry_run {
            out.updated += 1;
            continue;
        }
        let res = async {
            merchants
                .find_id_by_slug(&store_slug)
                .await?
                .ok_or_else(|| anyhow!("Merchant not found for slug '{store_slug}'"))?;
            merchants
                .update_seo_description_by_slug(&store_slug, &row.seo_desc)
                .await
        }
        .await;
        match res {
            Ok(_) => out.updated += 1,
            Err(err) => out.row_error(row_no, format!("{err:#}")),
        }
    }

    out.message = Some("SEO descriptions processed".to_string());
    out.finish(rows.len())
}

/// Step 6: slug rename. New-slug seeds must be unique within the file;
/// the repository probes for a collision-free final slug.
pub async fn import_slug_renames(
    rows: &[RenameRow],
    merchants: &dyn MerchantRepository,
    dry_run: bool,
) -> ImportOutcome {
    let mut out = ImportOutcome::default();
    let mut seen_new = HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let row_no = sheet_row(i);
        let old_slug = slugify(&row.old_slug);
        let new_seed = slugify(&row.new_slug);
        if old_slug.is_empty() || new_seed.is_empty() {
            out.row_error(row_no, "Invalid old_slug or new_slug.");
            continue;
        }
        if !seen_new.insert(new_seed.clone()) {
            out.row_error(row_no, format!("Duplicate new_slug in file: {new_seed}"));
            continue;
        }
        if dry_run {
            out.updated += 1;
            continue;
        }
        match merchants.rename_slug(&old_slug, &new_seed).await {
            Ok(_) => out.updated += 1,
            Err(err) => out.row_error(row_no, format!("{err:#}")),
        }
    }

    out.finish(rows.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::coupon::{Coupon, CouponFields, CouponFilter, CouponWithStore};
    use crate::merchant::{Merchant, MerchantFields};
    use crate::tag::{Tag, TagFields};
    use crate::tag_store::TaggedStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Debug, Default)]
    struct MemMerchant {
        id: i64,
        slug: String,
        name: String,
        meta_description: String,
        side_description_html: String,
    }

    #[derive(Default)]
    struct MemMerchants {
        state: Mutex<Vec<MemMerchant>>,
        fail_slug: Option<String>,
    }

    impl MemMerchants {
        fn with_slugs(slugs: &[&str]) -> Self {
            let rows = slugs
                .iter()
                .enumerate()
                .map(|(i, slug)| MemMerchant {
                    id: i as i64 + 1,
                    slug: slug.to_string(),
                    name: slug.to_string(),
                    ..Default::default()
                })
                .collect();
            Self {
                state: Mutex::new(rows),
                fail_slug: None,
            }
        }

        fn failing_on(slug: &str) -> Self {
            Self {
                fail_slug: Some(slug.to_string()),
                ..Default::default()
            }
        }

        fn stored(&self) -> Vec<MemMerchant> {
            self.state.lock().unwrap().clone()
        }

        fn slug_of(&self, id: i64) -> Option<String> {
            self.stored().iter().find(|m| m.id == id).map(|m| m.slug.clone())
        }
    }

    #[async_trait]
    impl MerchantRepository for MemMerchants {
        async fn find_id_by_slug(&self, slug: &str) -> anyhow::Result<Option<i64>> {
            let slug = slugify(slug);
            Ok(self
                .state
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.slug == slug)
                .map(|m| m.id))
        }

        async fn slug_taken(&self, slug: &str, exclude_id: Option<i64>) -> anyhow::Result<bool> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.slug == slug && Some(m.id) != exclude_id))
        }

        async fn set_slug(&self, id: i64, slug: &str) -> anyhow::Result<()> {
            let mut rows = self.state.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| anyhow!("no merchant {id}"))?;
            row.slug = slug.to_string();
            Ok(())
        }

        async fn upsert_basic(&self, import: MerchantImport) -> anyhow::Result<UpsertAction> {
            if self.fail_slug.as_deref() == Some(import.slug.as_str()) {
                anyhow::bail!("storage unavailable");
            }
            let mut rows = self.state.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|m| m.slug == import.slug) {
                row.name = import.name;
                row.meta_description = import.meta_description;
                Ok(UpsertAction::Updated)
            } else {
                let id = rows.iter().map(|m| m.id).max().unwrap_or(0) + 1;
                rows.push(MemMerchant {
                    id,
                    slug: import.slug,
                    name: import.name,
                    meta_description: import.meta_description,
                    side_description_html: String::new(),
                });
                Ok(UpsertAction::Inserted)
            }
        }

        async fn update_first_paragraph_by_slug(
            &self,
            slug: &str,
            html: &str,
        ) -> anyhow::Result<u64> {
            let slug = slugify(slug);
            let mut rows = self.state.lock().unwrap();
            match rows.iter_mut().find(|m| m.slug == slug) {
                Some(row) => {
                    row.side_description_html = html.to_string();
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        async fn update_seo_description_by_slug(
            &self,
            slug: &str,
            desc: &str,
        ) -> anyhow::Result<u64> {
            let slug = slugify(slug);
            let mut rows = self.state.lock().unwrap();
            match rows.iter_mut().find(|m| m.slug == slug) {
                Some(row) => {
                    row.meta_description = desc.to_string();
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        async fn list(
            &self,
            _search: &str,
            _page: usize,
            _limit: usize,
        ) -> anyhow::Result<(Vec<Merchant>, i64)> {
            unimplemented!()
        }

        async fn get(&self, _id: i64) -> anyhow::Result<Option<Merchant>> {
            unimplemented!()
        }

        async fn insert(&self, _fields: MerchantFields) -> anyhow::Result<Merchant> {
            unimplemented!()
        }

        async fn update(
            &self,
            _id: i64,
            _fields: MerchantFields,
        ) -> anyhow::Result<Option<Merchant>> {
            unimplemented!()
        }

        async fn set_active(&self, _id: i64, _active: bool) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn delete(&self, _id: i64) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn count(&self) -> anyhow::Result<i64> {
            Ok(self.state.lock().unwrap().len() as i64)
        }

        async fn search_by_name(&self, _query: &str, _limit: i64) -> anyhow::Result<Vec<Merchant>> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct MemTags {
        by_slug: HashMap<String, i64>,
    }

    impl MemTags {
        fn with_slugs(slugs: &[&str]) -> Self {
            Self {
                by_slug: slugs
                    .iter()
                    .enumerate()
                    .map(|(i, slug)| (slug.to_string(), i as i64 + 1))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl TagRepository for MemTags {
        async fn find_id_by_slug(&self, slug: &str) -> anyhow::Result<Option<i64>> {
            Ok(self.by_slug.get(&slugify(slug)).copied())
        }

        async fn slug_taken(&self, _slug: &str, _exclude_id: Option<i64>) -> anyhow::Result<bool> {
            unimplemented!()
        }

        async fn list(&self, _active_only: Option<bool>) -> anyhow::Result<Vec<Tag>> {
            unimplemented!()
        }

        async fn get(&self, _id: i64) -> anyhow::Result<Option<Tag>> {
            unimplemented!()
        }

        async fn insert(&self, _fields: TagFields) -> anyhow::Result<Tag> {
            unimplemented!()
        }

        async fn update(&self, _id: i64, _fields: TagFields) -> anyhow::Result<Option<Tag>> {
            unimplemented!()
        }

        async fn delete(&self, _id: i64) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn count(&self) -> anyhow::Result<i64> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct MemRelations {
        pairs: Mutex<std::collections::HashSet<(i64, i64)>>,
    }

    impl MemRelations {
        fn len(&self) -> usize {
            self.pairs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TagStoreRepository for MemRelations {
        async fn ensure(&self, merchant_id: i64, tag_id: i64) -> anyhow::Result<bool> {
            Ok(self.pairs.lock().unwrap().insert((merchant_id, tag_id)))
        }

        async fn stores_by_tag(&self, _tag_id: i64) -> anyhow::Result<Vec<TaggedStore>> {
            unimplemented!()
        }

        async fn remove(&self, _tag_id: i64, _merchant_id: i64) -> anyhow::Result<u64> {
            unimplemented!()
        }
    }

    #[derive(Clone, Debug)]
    struct MemCoupon {
        merchant_id: i64,
        coupon_type: CouponType,
        title: String,
        code: String,
        description: String,
    }

    #[derive(Default)]
    struct MemCoupons {
        rows: Mutex<Vec<MemCoupon>>,
    }

    impl MemCoupons {
        fn stored(&self) -> Vec<MemCoupon> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CouponRepository for MemCoupons {
        async fn upsert_by_natural_key(
            &self,
            merchant_id: i64,
            import: CouponImport,
        ) -> anyhow::Result<UpsertAction> {
            let code = match import.coupon_type {
                CouponType::Coupon => import.coupon_code.clone(),
                CouponType::Deal => String::new(),
            };
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|c| {
                c.merchant_id == merchant_id
                    && c.coupon_type == import.coupon_type
                    && c.title == import.title
                    && c.code == code
            }) {
                row.description = import.description;
                Ok(UpsertAction::Updated)
            } else {
                rows.push(MemCoupon {
                    merchant_id,
                    coupon_type: import.coupon_type,
                    title: import.title,
                    code,
                    description: import.description,
                });
                Ok(UpsertAction::Inserted)
            }
        }

        async fn list(
            &self,
            _filter: &CouponFilter,
        ) -> anyhow::Result<(Vec<CouponWithStore>, i64)> {
            unimplemented!()
        }

        async fn get(&self, _id: i64) -> anyhow::Result<Option<Coupon>> {
            unimplemented!()
        }

        async fn insert(&self, _merchant_id: i64, _fields: CouponFields) -> anyhow::Result<Coupon> {
            unimplemented!()
        }

        async fn update(&self, _id: i64, _fields: CouponFields) -> anyhow::Result<Option<Coupon>> {
            unimplemented!()
        }

        async fn set_publish(&self, _id: i64, _value: bool) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn set_editor(&self, _id: i64, _value: bool) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn delete(&self, _id: i64) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn count_published(&self) -> anyhow::Result<i64> {
            unimplemented!()
        }
    }

    fn store_row(name: &str, slug: &str) -> StoreRow {
        StoreRow {
            name: name.to_string(),
            slug: slug.to_string(),
            ..Default::default()
        }
    }

    fn relation_row(store: &str, tag: &str) -> RelationRow {
        RelationRow {
            store_slug: store.to_string(),
            tag_slug: tag.to_string(),
        }
    }

    fn coupon_row(slug: &str, coupon_type: &str, code: &str, title: &str) -> CouponRow {
        CouponRow {
            slug: slug.to_string(),
            coupon_type: coupon_type.to_string(),
            coupon_code: code.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn seo_row(slug: &str, desc: &str) -> SeoRow {
        SeoRow {
            slug: slug.to_string(),
            seo_desc: desc.to_string(),
        }
    }

    fn rename_row(old: &str, new: &str) -> RenameRow {
        RenameRow {
            old_slug: old.to_string(),
            new_slug: new.to_string(),
        }
    }

    #[tokio::test]
    async fn stores_reimport_is_idempotent() {
        let merchants = MemMerchants::default();
        let rows = vec![store_row("Amazon", ""), store_row("Best Buy", "best-buy")];

        let first = import_stores(&rows, &merchants, false).await;
        assert_eq!(2, first.inserted);
        assert_eq!(0, first.updated);
        assert_eq!(2, first.total);
        assert_eq!(0, first.failed);

        let second = import_stores(&rows, &merchants, false).await;
        assert_eq!(0, second.inserted);
        assert_eq!(2, second.updated);
        assert_eq!(2, merchants.stored().len());
    }

    #[tokio::test]
    async fn stores_flags_duplicate_slug_within_file() {
        let merchants = MemMerchants::default();
        let rows = vec![store_row("Foo Bar", ""), store_row("Foo  Bar!", "")];

        let out = import_stores(&rows, &merchants, false).await;
        assert_eq!(1, out.inserted);
        assert_eq!(1, out.failed);
        assert_eq!(3, out.errors[0].row);
        assert_eq!("Duplicate slug in file: foo-bar", out.errors[0].message);
        assert_eq!(1, merchants.stored().len());
    }

    #[tokio::test]
    async fn stores_dry_run_leaves_storage_untouched() {
        let merchants = MemMerchants::default();
        let rows = vec![store_row("Amazon", ""), store_row("Best Buy", "")];

        let out = import_stores(&rows, &merchants, true).await;
        assert_eq!(0, out.inserted);
        assert_eq!(2, out.updated);
        assert_eq!(2, out.total);
        assert!(merchants.stored().is_empty());
    }

    #[tokio::test]
    async fn stores_missing_name_or_underivable_slug_is_row_error() {
        let merchants = MemMerchants::default();
        let rows = vec![store_row("", "has-slug"), store_row("???", "")];

        let out = import_stores(&rows, &merchants, false).await;
        assert_eq!(2, out.failed);
        assert_eq!(0, out.inserted + out.updated);
        assert_eq!(
            "Missing required 'name' or unable to derive 'slug'.",
            out.errors[0].message
        );
    }

    #[tokio::test]
    async fn stores_storage_error_becomes_row_error_without_aborting() {
        let merchants = MemMerchants::failing_on("bad-store");
        let rows = vec![
            store_row("Good One", ""),
            store_row("Bad Store", ""),
            store_row("Good Two", ""),
        ];

        let out = import_stores(&rows, &merchants, false).await;
        assert_eq!(2, out.inserted);
        assert_eq!(1, out.failed);
        assert_eq!(3, out.errors[0].row);
        assert!(out.errors[0].message.contains("storage unavailable"));
    }

    #[tokio::test]
    async fn relations_report_distinct_lookup_miss_messages() {
        let merchants = MemMerchants::with_slugs(&["amazon"]);
        let tags = MemTags::with_slugs(&["electronics"]);
        let relations = MemRelations::default();
        let rows = vec![
            relation_row("amazon", "electronics"),
            relation_row("missing", "electronics"),
            relation_row("amazon", "nope"),
        ];

        let out =
            import_tag_store_relations(&rows, &merchants, &tags, &relations, false).await;
        assert_eq!(1, out.inserted);
        assert_eq!(2, out.failed);
        assert_eq!("Merchant not found for slug 'missing'", out.errors[0].message);
        assert_eq!("Tag not found for slug 'nope'", out.errors[1].message);
        assert_eq!(1, relations.len());
    }

    #[tokio::test]
    async fn relations_existing_pair_counts_as_skipped() {
        let merchants = MemMerchants::with_slugs(&["amazon"]);
        let tags = MemTags::with_slugs(&["electronics"]);
        let relations = MemRelations::default();
        let rows = vec![relation_row("amazon", "electronics")];

        let first =
            import_tag_store_relations(&rows, &merchants, &tags, &relations, false).await;
        assert_eq!(1, first.inserted);

        let second =
            import_tag_store_relations(&rows, &merchants, &tags, &relations, false).await;
        assert_eq!(0, second.inserted);
        assert_eq!(1, second.skipped);
        assert_eq!(1, relations.len());
    }

    #[tokio::test]
    async fn relations_dry_run_counts_without_lookups() {
        let merchants = MemMerchants::default();
        let tags = MemTags::default();
        let relations = MemRelations::default();
        let rows = vec![relation_row("anything", "at-all")];

        let out = import_tag_store_relations(&rows, &merchants, &tags, &relations, true).await;
        assert_eq!(1, out.inserted);
        assert_eq!(0, out.failed);
        assert_eq!(0, relations.len());
    }

    #[tokio::test]
    async fn coupons_validate_type_and_code_rules() {
        let merchants = MemMerchants::with_slugs(&["amazon"]);
        let coupons = MemCoupons::default();
        let rows = vec![
            coupon_row("amazon", "voucher", "X", "Bad type"),
            coupon_row("amazon", "coupon", "", "No code"),
            coupon_row("amazon", "deal", "", "Deals need no code"),
            coupon_row("amazon", "coupon", "SAVE10", ""),
        ];

        let out = import_coupons_deals(&rows, &merchants, &coupons, false).await;
        assert_eq!(1, out.inserted);
        assert_eq!(3, out.failed);
        assert_eq!("Invalid coupon_type 'voucher'", out.errors[0].message);
        assert_eq!("coupon_code required for type=coupon", out.errors[1].message);
        assert_eq!("title is required", out.errors[2].message);
    }

    #[tokio::test]
    async fn coupons_natural_key_reimport_updates_in_place() {
        let merchants = MemMerchants::with_slugs(&["amazon"]);
        let coupons = MemCoupons::default();
        let rows = vec![coupon_row("amazon", "coupon", "SAVE10", "10% off")];

        let first = import_coupons_deals(&rows, &merchants, &coupons, false).await;
        assert_eq!(1, first.inserted);

        let mut changed = rows.clone();
        changed[0].descp = "Fresh copy".to_string();
        let second = import_coupons_deals(&changed, &merchants, &coupons, false).await;
        assert_eq!(0, second.inserted);
        assert_eq!(1, second.updated);
        let stored = coupons.stored();
        assert_eq!(1, stored.len());
        assert_eq!("Fresh copy", stored[0].description);
    }

    #[tokio::test]
    async fn coupons_deal_codes_normalize_to_empty() {
        let merchants = MemMerchants::with_slugs(&["amazon"]);
        let coupons = MemCoupons::default();

        let first = import_coupons_deals(
            &[coupon_row("amazon", "deal", "IGNORED", "Free shipping")],
            &merchants,
            &coupons,
            false,
        )
        .await;
        assert_eq!(1, first.inserted);

        let second = import_coupons_deals(
            &[coupon_row("amazon", "DEAL", "", "Free shipping")],
            &merchants,
            &coupons,
            false,
        )
        .await;
        assert_eq!(1, second.updated);
        let stored = coupons.stored();
        assert_eq!(1, stored.len());
        assert_eq!("", stored[0].code);
    }

    #[tokio::test]
    async fn coupons_missing_merchant_is_row_error() {
        let merchants = MemMerchants::default();
        let coupons = MemCoupons::default();
        let rows = vec![coupon_row("ghost", "deal", "", "Nope")];

        let out = import_coupons_deals(&rows, &merchants, &coupons, false).await;
        assert_eq!(1, out.failed);
        assert_eq!("Merchant not found for slug 'ghost'", out.errors[0].message);
    }

    #[tokio::test]
    async fn first_paragraph_patches_existing_merchants_only() {
        let merchants = MemMerchants::with_slugs(&["amazon"]);
        let rows = vec![
            ParagraphRow {
                slug: "amazon".to_string(),
                first_paragraph: "<p>Welcome</p>".to_string(),
            },
            ParagraphRow {
                slug: "ghost".to_string(),
                first_paragraph: "<p>Lost</p>".to_string(),
            },
        ];

        let out = import_first_paragraphs(&rows, &merchants, false).await;
        assert_eq!(1, out.updated);
        assert_eq!(1, out.failed);
        assert_eq!("Merchant not found for slug 'ghost'", out.errors[0].message);
        assert_eq!(
            "<p>Welcome</p>",
            merchants.stored()[0].side_description_html
        );
    }

    #[tokio::test]
    async fn seo_desc_length_boundary_is_exactly_220() {
        let merchants = MemMerchants::with_slugs(&["amazon", "best-buy"]);
        let exactly = "a".repeat(220);
        let too_long = "a".repeat(221);
        let rows = vec![
            seo_row("amazon", &exactly),
            seo_row("amazon", &too_long),
            seo_row("best-buy", "short and sweet"),
        ];

        let out = import_seo_descriptions(&rows, &merchants, false).await;
        assert_eq!(2, out.updated);
        assert_eq!(1, out.failed);
        assert_eq!(3, out.errors[0].row);
        assert_eq!("seo_desc too long (>220 chars)", out.errors[0].message);
        assert_eq!(Some("SEO descriptions processed".to_string()), out.message);
    }

    #[tokio::test]
    async fn rename_probes_past_an_occupied_slug() {
        let merchants = MemMerchants::with_slugs(&["x", "y"]);
        let rows = vec![rename_row("x", "y")];

        let out = import_slug_renames(&rows, &merchants, false).await;
        assert_eq!(1, out.updated);
        assert_eq!(0, out.failed);
        assert_eq!(Some("y-1".to_string()), merchants.slug_of(1));
        assert_eq!(Some("y".to_string()), merchants.slug_of(2));
    }

    #[tokio::test]
    async fn rename_applies_free_seed_directly_and_is_stable_for_self() {
        let merchants = MemMerchants::with_slugs(&["x"]);

        let out = import_slug_renames(&[rename_row("x", "z")], &merchants, false).await;
        assert_eq!(1, out.updated);
        assert_eq!(Some("z".to_string()), merchants.slug_of(1));

        // Renaming to its own slug must not grow a suffix: the row itself
        // is excluded from the collision scan.
        let again = import_slug_renames(&[rename_row("z", "z")], &merchants, false).await;
        assert_eq!(1, again.updated);
        assert_eq!(Some("z".to_string()), merchants.slug_of(1));
    }

    #[tokio::test]
    async fn rename_rejects_duplicate_new_slug_within_file() {
        let merchants = MemMerchants::with_slugs(&["a", "b"]);
        let rows = vec![rename_row("a", "target"), rename_row("b", "target")];

        let out = import_slug_renames(&rows, &merchants, false).await;
        assert_eq!(1, out.updated);
        assert_eq!(1, out.failed);
        assert_eq!(3, out.errors[0].row);
        assert_eq!("Duplicate new_slug in file: target", out.errors[0].message);
    }

    #[tokio::test]
    async fn rename_missing_source_slug_is_row_error() {
        let merchants = MemMerchants::with_slugs(&["a"]);
        let rows = vec![rename_row("ghost", "anything"), rename_row("a", "fresh")];

        let out = import_slug_renames(&rows, &merchants, false).await;
        assert_eq!(1, out.updated);
        assert_eq!(1, out.failed);
        assert_eq!(2, out.errors[0].row);
        assert!(out.errors[0]
            .message
            .contains("Merchant not found for slug 'ghost'"));
    }

    #[tokio::test]
    async fn rename_dry_run_leaves_slugs_alone() {
        let merchants = MemMerchants::with_slugs(&["x"]);

        let out = import_slug_renames(&[rename_row("x", "y")], &merchants, true).await;
        assert_eq!(1, out.updated);
        assert_eq!(Some("x".to_string()), merchants.slug_of(1));
    }
}
