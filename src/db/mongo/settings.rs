//! Agent and device records (MongoDB)

use async_trait::async_trait;
use mongodb::bson::{self, doc};
use mongodb::options::FindOneOptions;

use super::MongoDb;
use crate::db::{AgentRecord, DeviceRecord, SettingsRepository};
use crate::error::AppError;

const AGENTS: &str = "agents";
const DEVICES: &str = "devices";

fn persistence(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::PersistenceError(format!("{}: {}", context, e))
}

#[async_trait]
impl SettingsRepository for MongoDb {
    async fn find_agent(&self) -> Result<Option<AgentRecord>, AppError> {
        let collection = self.db().collection::<bson::Document>(AGENTS);
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();

        let found = collection
            .find_one(doc! {}, options)
            .await
            .map_err(|e| persistence("Find agent", e))?;

        match found {
            Some(d) => {
                let agent = bson::from_document(d).map_err(|e| persistence("Deserialize agent", e))?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    async fn insert_agent(&self, agent: &AgentRecord) -> Result<(), AppError> {
        let collection = self.db().collection::<bson::Document>(AGENTS);
        let bson_doc = bson::to_document(agent).map_err(|e| persistence("Serialize agent", e))?;

        collection
            .insert_one(bson_doc, None)
            .await
            .map_err(|e| persistence(&format!("Insert agent {}", agent.id), e))?;

        Ok(())
    }

    async fn update_agent(&self, agent: &AgentRecord) -> Result<(), AppError> {
        let collection = self.db().collection::<bson::Document>(AGENTS);
        let update = doc! {
            "$set": {
                "host": &agent.host,
                "port": agent.port,
                "status": &agent.status,
                "updated_at": &agent.updated_at,
            }
        };

        let result = collection
            .update_one(doc! { "id": &agent.id }, update, None)
            .await
            .map_err(|e| persistence(&format!("Update agent {}", agent.id), e))?;

        if result.matched_count == 0 {
            return Err(AppError::PersistenceError(format!(
                "Update agent {}: record no longer exists",
                agent.id
            )));
        }
        Ok(())
    }

    async fn find_device_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Option<DeviceRecord>, AppError> {
        let collection = self.db().collection::<bson::Document>(DEVICES);
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();

        let found = collection
            .find_one(doc! { "agent_id": agent_id }, options)
            .await
            .map_err(|e| persistence(&format!("Find device for agent {}", agent_id), e))?;

        match found {
            Some(d) => {
                let device =
                    bson::from_document(d).map_err(|e| persistence("Deserialize device", e))?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    async fn insert_device(&self, device: &DeviceRecord) -> Result<(), AppError> {
        let collection = self.db().collection::<bson::Document>(DEVICES);
        let bson_doc =
            bson::to_document(device).map_err(|e| persistence("Serialize device", e))?;

        collection
            .insert_one(bson_doc, None)
            .await
            .map_err(|e| persistence(&format!("Insert device {}", device.id), e))?;

        Ok(())
    }

    async fn update_device(&self, device: &DeviceRecord) -> Result<(), AppError> {
        let collection = self.db().collection::<bson::Document>(DEVICES);
        let update = doc! {
            "$set": {
                "host": &device.host,
                "snmp_community": &device.snmp_community,
                "snmp_version": &device.snmp_version,
                "updated_at": &device.updated_at,
            }
        };

        let result = collection
            .update_one(doc! { "id": &device.id }, update, None)
            .await
            .map_err(|e| persistence(&format!("Update device {}", device.id), e))?;

        if result.matched_count == 0 {
            return Err(AppError::PersistenceError(format!(
                "Update device {}: record no longer exists",
                device.id
            )));
        }
        Ok(())
    }
}
