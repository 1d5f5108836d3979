//! MongoDB database module
//!
//! Collections: `agents`, `devices` (settings records) and
//! `outlet_readings` (written by the agent, watched for changes).

mod readings;
mod settings;

use mongodb::{Client, Database};

use crate::config::DatabaseConfig;

/// MongoDB database wrapper
#[derive(Clone)]
pub struct MongoDb {
    db: Database,
}

impl MongoDb {
    /// Connect to MongoDB database
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let url = config
            .mongodb_url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("MongoDB URL not configured"))?;

        tracing::info!("Connecting to MongoDB...");

        let client = Client::with_uri_str(url).await?;
        let db = client.database(&config.name);

        // Verify connection
        db.run_command(mongodb::bson::doc! { "ping": 1 }, None)
            .await?;

        tracing::info!("MongoDB connected successfully (database: {})", config.name);

        Ok(Self { db })
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }
}
