use super::DeadLetterSink;
use crate::error::InfrastructureError;
use crate::models::DeadLetterRecord;
use async_trait::async_trait;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client as MongoClient, Collection, Database, IndexModel,
};

const DUPLICATE_KEY: i32 = 11000;

/// Stores dead letters in the `dead_letters` collection, one document per event.
#[derive(Clone)]
pub struct MongoDeadLetterSink {
    client: MongoClient,
    db: Database,
}

impl MongoDeadLetterSink {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, InfrastructureError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            InfrastructureError::DeadLetter(e.to_string())
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), InfrastructureError> {
        let event_id_index = IndexModel::builder()
            .keys(doc! { "event_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("event_id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.dead_letters()
            .create_index(event_id_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create event_id index: {}", e);
                InfrastructureError::DeadLetter(e.to_string())
            })?;

        Ok(())
    }

    fn dead_letters(&self) -> Collection<DeadLetterRecord> {
        self.db.collection("dead_letters")
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl DeadLetterSink for MongoDeadLetterSink {
    async fn send(&self, record: &DeadLetterRecord) -> Result<(), InfrastructureError> {
        match self.dead_letters().insert_one(record, None).await {
            Ok(_) => Ok(()),
            // Written by an earlier attempt
            Err(e) if is_duplicate_key(&e) => Ok(()),
            Err(e) => {
                tracing::error!(event_id = %record.event_id, "Failed to insert dead letter: {}", e);
                Err(InfrastructureError::DeadLetter(e.to_string()))
            }
        }
    }

    async fn health_check(&self) -> Result<(), InfrastructureError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                InfrastructureError::DeadLetter(e.to_string())
            })?;
        Ok(())
    }
}
