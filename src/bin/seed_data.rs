//! Seed data script - populates the database with demo pricing data
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - catalog items for one cleaning service
//! - an active sales tax rate
//! - a system promo template

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use tracing::info;
use uuid::Uuid;

use servicebook_api::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::commerce::{catalog_item, system_promo, tax_config, DiscountType},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("=== Servicebook Seed Data ===");

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://servicebook.db?mode=rwc".to_string());
    info!("Connecting to database: {}", database_url);
    let db = establish_connection_with_config(&DbConfig {
        url: database_url,
        max_connections: 2,
        ..Default::default()
    })
    .await?;
    run_migrations(&db).await?;

    let now = Utc::now();
    let service_id = Uuid::new_v4();

    info!("Creating catalog items for service {}", service_id);
    let items = [
        ("Standard clean (per room)", dec!(35.00)),
        ("Deep clean (per room)", dec!(55.00)),
        ("Oven clean", dec!(60.00)),
        ("Window clean (per pane)", dec!(4.50)),
    ];
    for (name, price) in items {
        let item = catalog_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            service_id: Set(service_id),
            name: Set(name.to_string()),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(now),
        }
        .insert(&db)
        .await?;
        info!("  {} {} @ {}", item.id, item.name, item.price);
    }

    info!("Creating tax rate...");
    tax_config::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("VAT".to_string()),
        percentage: Set(dec!(20.00)),
        is_active: Set(true),
        created_at: Set(now),
    }
    .insert(&db)
    .await?;

    info!("Creating system promo...");
    let promo = system_promo::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set("WELCOME10".to_string()),
        discount_type: Set(DiscountType::Percentage),
        discount_value: Set(dec!(10.00)),
        min_spend: Set(dec!(50.00)),
        max_use_per_user: Set(1),
        is_active: Set(true),
        created_at: Set(now),
    }
    .insert(&db)
    .await?;
    info!("  {} {}", promo.id, promo.code);

    info!("=== Seed Data Complete ===");
    info!("Explore interactively at: http://localhost:8080/swagger-ui");
    Ok(())
}
