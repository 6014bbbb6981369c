use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

use crate::shared::error::{DeskError, DeskResult};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Build a pool from `DATABASE_URL`, loading `.env` first if present.
pub fn create_pool_from_env() -> DeskResult<DbPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| DeskError::Database("DATABASE_URL is not set".to_string()))?;
    create_pool(&database_url)
}

pub fn create_pool(database_url: &str) -> DeskResult<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .map_err(|e| DeskError::Database(e.to_string()))
}

/// Run embedded migrations. Call once at startup, before serving work.
pub fn run_migrations(pool: &DbPool) -> DeskResult<()> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DeskError::Database(format!("Migration error: {}", e)))?;
    Ok(())
}
