use actix_multipart::form::MultipartFormConfig;
use actix_web::middleware::{DefaultHeaders, TrailingSlash};
use actix_web::web::{Data, FormConfig};
use actix_web::{App, HttpServer};
use anyhow::Context as AnyhowContext;
use coupondesk::control;
use coupondesk::coupon::{CouponRepository, PostgresCouponRepository};
use coupondesk::merchant::{MerchantRepository, PostgresMerchantRepository};
use coupondesk::tag::{PostgresTagRepository, TagRepository};
use coupondesk::tag_store::{PostgresTagStoreRepository, TagStoreRepository};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    // DB config with sensible defaults for local/dev runs
    let postgres_password: String = std::env::var("POSTGRES_PASSWORD")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "postgres".to_string());
    let postgres_username: String = std::env::var("POSTGRES_USER")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "postgres".to_string());
    let mut postgres_host: String = std::env::var("POSTGRES_HOST")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    // Compose configs point at "db"; outside Docker that host won't resolve.
    if postgres_host == "db" && !std::path::Path::new("/.dockerenv").exists() {
        log::warn!("POSTGRES_HOST=db outside Docker, falling back to 127.0.0.1");
        postgres_host = "127.0.0.1".to_string();
    }
    let postgres_db: String = std::env::var("POSTGRES_DB")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| postgres_username.clone());

    log::info!(
        "Connecting to postgres host={} user={} db={}",
        postgres_host,
        postgres_username,
        postgres_db
    );
    let (mut client, connection) = tokio_postgres::connect(
        &format!(
            "host={postgres_host} user={postgres_username} dbname={postgres_db} password={postgres_password}"
        ),
        tokio_postgres::NoTls,
    )
    .await
    .context("Unable to connect to postgres db")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::error!("connection error: {}", e);
        }
    });

    coupondesk::migrations::runner()
        .run_async(&mut client)
        .await?;

    let client = Arc::new(client);
    let merchant_repo: Arc<dyn MerchantRepository> =
        Arc::new(PostgresMerchantRepository::new(client.clone()));
    let tag_repo: Arc<dyn TagRepository> = Arc::new(PostgresTagRepository::new(client.clone()));
    let relation_repo: Arc<dyn TagStoreRepository> =
        Arc::new(PostgresTagStoreRepository::new(client.clone()));
    let coupon_repo: Arc<dyn CouponRepository> =
        Arc::new(PostgresCouponRepository::new(client.clone()));

    HttpServer::new(move || {
        App::new()
            .app_data(FormConfig::default().limit(256 * 1024))
            .app_data(MultipartFormConfig::default().total_limit(20 * 1024 * 1024))
            .wrap(
                DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add((
                        "Access-Control-Allow-Methods",
                        "GET, POST, PUT, PATCH, DELETE, OPTIONS",
                    ))
                    .add(("Access-Control-Allow-Headers", "*")),
            )
            .wrap(actix_web::middleware::Compress::default())
            .wrap(actix_web::middleware::NormalizePath::new(
                TrailingSlash::Trim,
            ))
            .app_data(Data::new(merchant_repo.clone()))
            .app_data(Data::new(tag_repo.clone()))
            .app_data(Data::new(relation_repo.clone()))
            .app_data(Data::new(coupon_repo.clone()))
            .service(control::dashboard_summary)
            .service(control::imports_api::import_stores)
            .service(control::imports_api::import_tag_store_relations)
            .service(control::imports_api::import_store_coupons_deals)
            .service(control::imports_api::import_store_first_paragraph)
            .service(control::imports_api::import_store_seo_desc_check)
            .service(control::imports_api::import_store_slugs_default_content)
            .service(control::merchants_api::list_merchants)
            .service(control::merchants_api::search_stores)
            .service(control::merchants_api::get_merchant)
            .service(control::merchants_api::create_merchant)
            .service(control::merchants_api::update_merchant)
            .service(control::merchants_api::update_merchant_status)
            .service(control::merchants_api::delete_merchant)
            .service(control::tags_api::list_tags)
            .service(control::tags_api::get_tag)
            .service(control::tags_api::create_tag)
            .service(control::tags_api::update_tag)
            .service(control::tags_api::delete_tag)
            .service(control::tags_api::stores_by_tag)
            .service(control::tags_api::link_store_to_tag)
            .service(control::tags_api::unlink_store_from_tag)
            .service(control::coupons_api::list_coupons)
            .service(control::coupons_api::get_coupon)
            .service(control::coupons_api::create_coupon)
            .service(control::coupons_api::update_coupon)
            .service(control::coupons_api::toggle_publish)
            .service(control::coupons_api::toggle_editor_pick)
            .service(control::coupons_api::delete_coupon)
    })
    .bind(("0.0.0.0", 8080))
    .context("Failed to bind server to 0.0.0.0:8080. Is the port already in use?")?
    .run()
    .await?;
    Ok(())
}
