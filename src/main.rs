//! payment_record bootstrap
//!
//! Loads `config/{env}.yaml`, installs logging, connects the store and
//! makes sure the payment tables exist.
//!
//! ```text
//! payment_record [--env|-e <env>]
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;

use payment_record::config::AppConfig;
use payment_record::payment::{PaymentService, Schema};
use payment_record::store::Database;
use payment_record::store::memory::MemoryDatabase;
use payment_record::store::postgres::PgDatabase;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

async fn connect(config: &AppConfig, schema: &Schema) -> Result<Arc<dyn Database>> {
    let Some(url) = config.database.postgres_url.as_deref() else {
        tracing::warn!("No postgres_url configured, using in-memory store");
        return Ok(Arc::new(MemoryDatabase::new()));
    };

    let db = PgDatabase::connect(&config.database, url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.ensure_schema(&schema.tables())
        .await
        .context("Failed to create payment tables")?;
    db.health_check()
        .await
        .context("PostgreSQL health check failed")?;
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).with_context(|| format!("Failed to load {} config", env))?;
    let _log_guard = payment_record::logging::init_logging(&app_config);

    tracing::info!("Starting payment_record in {} mode", env);

    let schema = Schema::new();
    let database = connect(&app_config, &schema).await?;
    let _service = PaymentService::new(&schema, database);

    tracing::info!(
        tables = ?schema.tables().map(|t| t.name),
        "Payment service ready"
    );
    Ok(())
}
