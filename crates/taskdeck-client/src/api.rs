//! The subset of the center API the state store depends on.

use async_trait::async_trait;

use taskdeck_core::{
    CenterConfig, ConfigPatch, Instance, InstanceId, InstanceUpdate, NewInstance, StatsSnapshot,
};

use crate::error::ClientError;
use crate::http::{Ack, HttpClient};

/// Pull and mutation calls used to keep a local mirror of the center.
///
/// [`HttpClient`] is the production implementation; tests substitute a
/// scripted one.
#[async_trait]
pub trait CenterApi: Send + Sync + 'static {
    async fn get_stats(&self) -> Result<StatsSnapshot, ClientError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, ClientError>;

    async fn get_config(&self) -> Result<CenterConfig, ClientError>;

    async fn update_config(&self, patch: &ConfigPatch) -> Result<CenterConfig, ClientError>;

    async fn add_instance(&self, instance: &NewInstance) -> Result<Instance, ClientError>;

    async fn update_instance(
        &self,
        instance_id: &InstanceId,
        update: &InstanceUpdate,
    ) -> Result<Instance, ClientError>;

    async fn remove_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError>;

    async fn enable_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError>;

    async fn disable_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError>;
}

#[async_trait]
impl CenterApi for HttpClient {
    async fn get_stats(&self) -> Result<StatsSnapshot, ClientError> {
        HttpClient::get_stats(self).await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, ClientError> {
        HttpClient::list_instances(self).await
    }

    async fn get_config(&self) -> Result<CenterConfig, ClientError> {
        HttpClient::get_config(self).await
    }

    async fn update_config(&self, patch: &ConfigPatch) -> Result<CenterConfig, ClientError> {
        HttpClient::update_config(self, patch).await
    }

    async fn add_instance(&self, instance: &NewInstance) -> Result<Instance, ClientError> {
        HttpClient::add_instance(self, instance).await
    }

    async fn update_instance(
        &self,
        instance_id: &InstanceId,
        update: &InstanceUpdate,
    ) -> Result<Instance, ClientError> {
        HttpClient::update_instance(self, instance_id, update).await
    }

    async fn remove_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError> {
        HttpClient::remove_instance(self, instance_id).await
    }

    async fn enable_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError> {
        HttpClient::enable_instance(self, instance_id).await
    }

    async fn disable_instance(&self, instance_id: &InstanceId) -> Result<Ack, ClientError> {
        HttpClient::disable_instance(self, instance_id).await
    }
}
