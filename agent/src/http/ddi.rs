//! Provisioning protocol operations

use std::collections::BTreeMap;

use async_trait::async_trait;
use ddi_models::{
    ActionFeedback, BaseResource, CancelAction, ConfigData, DeploymentBase, Execution,
    FinishedResult, Progress,
};

use crate::errors::AgentError;
use crate::http::client::HttpClient;

/// Operations the agent needs from the update server
#[async_trait]
pub trait DdiClient: Send + Sync {
    /// Poll the base resource of the target
    async fn fetch_base(&self) -> Result<BaseResource, AgentError>;

    /// Send the target attributes
    async fn send_config_feedback(
        &self,
        execution: Execution,
        result: FinishedResult,
        data: &BTreeMap<String, String>,
    ) -> Result<(), AgentError>;

    async fn fetch_cancel_action(&self, id: &str) -> Result<CancelAction, AgentError>;

    async fn send_cancel_feedback(
        &self,
        id: &str,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
    ) -> Result<(), AgentError>;

    /// Fetch the descriptor of deployment `id`; `resource` is the `c` token
    /// of the advertised link
    async fn fetch_deployment(&self, id: &str, resource: &str)
        -> Result<DeploymentBase, AgentError>;

    async fn send_deployment_feedback(
        &self,
        id: &str,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
        progress: Option<Progress>,
    ) -> Result<(), AgentError>;
}

#[async_trait]
impl DdiClient for HttpClient {
    async fn fetch_base(&self) -> Result<BaseResource, AgentError> {
        self.get("").await
    }

    async fn send_config_feedback(
        &self,
        execution: Execution,
        result: FinishedResult,
        data: &BTreeMap<String, String>,
    ) -> Result<(), AgentError> {
        let body = ConfigData::new(execution, result, data.clone());
        self.put("/configData", &body).await
    }

    async fn fetch_cancel_action(&self, id: &str) -> Result<CancelAction, AgentError> {
        self.get(&format!("/cancelAction/{}", id)).await
    }

    async fn send_cancel_feedback(
        &self,
        id: &str,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
    ) -> Result<(), AgentError> {
        let body = ActionFeedback::new(id, execution, result, details, None);
        self.post(&format!("/cancelAction/{}/feedback", id), &body)
            .await
    }

    async fn fetch_deployment(
        &self,
        id: &str,
        resource: &str,
    ) -> Result<DeploymentBase, AgentError> {
        self.get(&format!("/deploymentBase/{}?c={}", id, resource))
            .await
    }

    async fn send_deployment_feedback(
        &self,
        id: &str,
        execution: Execution,
        result: FinishedResult,
        details: Vec<String>,
        progress: Option<Progress>,
    ) -> Result<(), AgentError> {
        let body = ActionFeedback::new(id, execution, result, details, progress);
        self.post(&format!("/deploymentBase/{}/feedback", id), &body)
            .await
    }
}
