use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let migration_001 = include_str!("../migrations/001_initial.sql");
    sqlx::raw_sql(migration_001).execute(pool).await?;

    let migration_002 = include_str!("../migrations/002_tracked_links.sql");
    sqlx::raw_sql(migration_002).execute(pool).await?;

    let migration_003 = include_str!("../migrations/003_validate_hash.sql");
    sqlx::raw_sql(migration_003).execute(pool).await?;

    Ok(())
}
