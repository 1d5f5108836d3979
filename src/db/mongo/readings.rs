//! Change stream on `outlet_readings`
//!
//! The stream is re-opened after a back-off whenever it errors or ends,
//! until the subscription is cancelled.

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::{self, doc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration};

use super::MongoDb;
use crate::db::{ChangeEvent, ChangeFeed, Subscription, OUTLET_READINGS};
use crate::error::AppError;

const REOPEN_BACKOFF: Duration = Duration::from_secs(5);

#[async_trait]
impl ChangeFeed for MongoDb {
    async fn subscribe(&self) -> Result<Subscription, AppError> {
        let collection = self.db().collection::<bson::Document>(OUTLET_READINGS);
        let pipeline = vec![doc! {
            "$match": { "operationType": { "$in": ["insert", "update", "replace"] } }
        }];

        // Open once up front so a deployment without change streams fails here
        let first = collection
            .watch(pipeline.clone(), None)
            .await
            .map_err(|e| AppError::PersistenceError(format!("Watch {}: {}", OUTLET_READINGS, e)))?;

        let (tx, rx) = mpsc::channel(64);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let producer = tokio::spawn(async move {
            let mut stream = Some(first);

            loop {
                let mut current = match stream.take() {
                    Some(s) => s,
                    None => {
                        let reopened = tokio::select! {
                            _ = &mut cancel_rx => return,
                            opened = collection.watch(pipeline.clone(), None) => opened,
                        };
                        match reopened {
                            Ok(s) => {
                                tracing::info!("[ChangeFeed] Re-opened {} change stream", OUTLET_READINGS);
                                s
                            }
                            Err(e) => {
                                tracing::warn!("[ChangeFeed] Watch {} failed: {}", OUTLET_READINGS, e);
                                tokio::select! {
                                    _ = &mut cancel_rx => return,
                                    _ = time::sleep(REOPEN_BACKOFF) => continue,
                                }
                            }
                        }
                    }
                };

                loop {
                    tokio::select! {
                        _ = &mut cancel_rx => return,
                        next = current.next() => match next {
                            Some(Ok(event)) => {
                                let operation = format!("{:?}", event.operation_type).to_lowercase();
                                if tx.send(ChangeEvent::new(OUTLET_READINGS, &operation)).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                tracing::warn!("[ChangeFeed] {} change stream error: {}", OUTLET_READINGS, e);
                                break;
                            }
                            None => break,
                        },
                    }
                }

                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = time::sleep(REOPEN_BACKOFF) => {}
                }
            }
        });

        tracing::info!("[ChangeFeed] Subscribed to MongoDB {}", OUTLET_READINGS);
        Ok(Subscription::new("mongodb", rx, cancel_tx, producer))
    }
}
