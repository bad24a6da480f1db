use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// A scheduling pass holds one connection for the due-registration cursor while
/// reschedule and outcome writes use others.
const MIN_CONNECTIONS: u32 = 2;

/// Create a PostgreSQL connection pool.
///
/// `max_connections` is raised to at least 2; the logged value is the one in effect.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let max_connections = pool_size(max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

fn pool_size(requested: u32) -> u32 {
    requested.max(MIN_CONNECTIONS)
}
