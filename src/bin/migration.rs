//! Applies (or with `down`, reverts) the schema migrations.
//!
//! Run with: cargo run --bin migration [up|down]

use sea_orm_migration::MigratorTrait;
use servicebook_api::{
    db::{establish_connection_with_config, DbConfig},
    migrator::Migrator,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://servicebook.db?mode=rwc".to_string());
    let direction = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());

    info!("Connecting to database: {}", database_url);
    let db = establish_connection_with_config(&DbConfig {
        url: database_url,
        max_connections: 2,
        ..Default::default()
    })
    .await?;

    match direction.as_str() {
        "up" => Migrator::up(&db, None).await?,
        "down" => Migrator::down(&db, None).await?,
        other => anyhow::bail!("unknown direction '{}', expected up or down", other),
    }

    info!("Migration {} completed successfully", direction);
    Ok(())
}
