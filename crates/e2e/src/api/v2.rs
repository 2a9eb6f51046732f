//! Typed helpers over `/api/v2/`

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use towerqa_common::types::*;

use super::connection::Connection;
use crate::error::E2eResult;
use crate::poll::poll_until;

pub const API_ROOT: &str = "/api/v2";

/// Build an `/api/v2/...` path from segments, always with a trailing slash
pub fn v2_path(segments: &[&str]) -> String {
    let mut path = String::from(API_ROOT);
    for segment in segments {
        path.push('/');
        path.push_str(segment.trim_matches('/'));
    }
    path.push('/');
    path
}

/// Body returned by the `launch/` endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: UnifiedJobKind,
}

/// Borrowed typed view of a [`Connection`]
#[derive(Clone, Copy)]
pub struct ApiV2<'a> {
    conn: &'a Connection,
}

impl<'a> ApiV2<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> E2eResult<T> {
        self.conn.get_query(path, query).await?.error_for_status()?.json()
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: Value) -> E2eResult<T> {
        self.conn.post(path, body).await?.error_for_status()?.json()
    }

    /// POST `{"id": N}` to a related collection
    async fn associate(&self, path: &str, id: i64) -> E2eResult<()> {
        self.conn.post(path, json!({ "id": id })).await?.error_for_status()?;
        Ok(())
    }

    pub async fn ping(&self) -> E2eResult<Value> {
        self.get_json(&v2_path(&["ping"]), &[]).await
    }

    pub async fn me(&self) -> E2eResult<Page<User>> {
        self.get_json(&v2_path(&["me"]), &[]).await
    }

    // settings

    pub async fn settings(&self, category: &str) -> E2eResult<Map<String, Value>> {
        self.get_json(&v2_path(&["settings", category]), &[]).await
    }

    pub async fn patch_settings(&self, category: &str, patch: Value) -> E2eResult<Map<String, Value>> {
        self.conn
            .patch(&v2_path(&["settings", category]), patch)
            .await?
            .error_for_status()?
            .json()
    }

    // organizations, users, teams

    pub async fn organizations(&self, query: &[(&str, String)]) -> E2eResult<Page<Organization>> {
        self.get_json(&v2_path(&["organizations"]), query).await
    }

    pub async fn create_organization(&self, body: Value) -> E2eResult<Organization> {
        self.post_json(&v2_path(&["organizations"]), body).await
    }

    pub async fn organization_add_user(&self, organization: i64, user: i64) -> E2eResult<()> {
        self.associate(&v2_path(&["organizations", &organization.to_string(), "users"]), user)
            .await
    }

    pub async fn create_user(&self, body: Value) -> E2eResult<User> {
        self.post_json(&v2_path(&["users"]), body).await
    }

    pub async fn users(&self, query: &[(&str, String)]) -> E2eResult<Page<User>> {
        self.get_json(&v2_path(&["users"]), query).await
    }

    pub async fn create_team(&self, body: Value) -> E2eResult<Team> {
        self.post_json(&v2_path(&["teams"]), body).await
    }

    // inventories and hosts

    pub async fn create_inventory(&self, body: Value) -> E2eResult<Inventory> {
        self.post_json(&v2_path(&["inventories"]), body).await
    }

    pub async fn create_host(&self, inventory: i64, body: Value) -> E2eResult<Host> {
        self.post_json(&v2_path(&["inventories", &inventory.to_string(), "hosts"]), body)
            .await
    }

    pub async fn inventory_hosts(&self, inventory: i64) -> E2eResult<Page<Host>> {
        self.get_json(
            &v2_path(&["inventories", &inventory.to_string(), "hosts"]),
            &[("order_by", "id".to_string())],
        )
        .await
    }

    pub async fn host_job_summaries(&self, host: i64) -> E2eResult<Page<JobHostSummary>> {
        self.get_json(&v2_path(&["hosts", &host.to_string(), "job_host_summaries"]), &[])
            .await
    }

    // projects and credentials

    pub async fn create_project(&self, body: Value) -> E2eResult<Project> {
        self.post_json(&v2_path(&["projects"]), body).await
    }

    pub async fn project(&self, id: i64) -> E2eResult<Project> {
        self.get_json(&v2_path(&["projects", &id.to_string()]), &[]).await
    }

    pub async fn credential_types(&self, query: &[(&str, String)]) -> E2eResult<Page<CredentialType>> {
        self.get_json(&v2_path(&["credential_types"]), query).await
    }

    pub async fn create_credential(&self, body: Value) -> E2eResult<Credential> {
        self.post_json(&v2_path(&["credentials"]), body).await
    }

    // job templates

    pub async fn create_job_template(&self, body: Value) -> E2eResult<JobTemplate> {
        self.post_json(&v2_path(&["job_templates"]), body).await
    }

    pub async fn job_template_add_credential(&self, template: i64, credential: i64) -> E2eResult<()> {
        self.associate(
            &v2_path(&["job_templates", &template.to_string(), "credentials"]),
            credential,
        )
        .await
    }

    pub async fn job_template_add_instance_group(&self, template: i64, group: i64) -> E2eResult<()> {
        self.associate(
            &v2_path(&["job_templates", &template.to_string(), "instance_groups"]),
            group,
        )
        .await
    }

    /// Launch a job template; a sharded template answers with a workflow job
    pub async fn launch_job_template(&self, template: i64, payload: Value) -> E2eResult<UnifiedJob> {
        let launched: LaunchResponse = self
            .post_json(&v2_path(&["job_templates", &template.to_string(), "launch"]), payload)
            .await?;
        info!("Launched job template {} as {:?} {}", template, launched.kind, launched.id);
        self.unified_job(launched.kind, launched.id).await
    }

    pub async fn create_schedule(&self, template: i64, body: Value) -> E2eResult<Schedule> {
        self.post_json(&v2_path(&["job_templates", &template.to_string(), "schedules"]), body)
            .await
    }

    pub async fn schedule_jobs(&self, schedule: i64) -> E2eResult<Page<UnifiedJob>> {
        self.get_json(&v2_path(&["schedules", &schedule.to_string(), "jobs"]), &[])
            .await
    }

    // workflows

    pub async fn create_workflow_job_template(&self, body: Value) -> E2eResult<WorkflowJobTemplate> {
        self.post_json(&v2_path(&["workflow_job_templates"]), body).await
    }

    pub async fn create_workflow_node(&self, workflow: i64, body: Value) -> E2eResult<WorkflowJobTemplateNode> {
        self.post_json(
            &v2_path(&["workflow_job_templates", &workflow.to_string(), "workflow_nodes"]),
            body,
        )
        .await
    }

    pub async fn launch_workflow_job_template(&self, workflow: i64) -> E2eResult<UnifiedJob> {
        let launched: LaunchResponse = self
            .post_json(
                &v2_path(&["workflow_job_templates", &workflow.to_string(), "launch"]),
                json!({}),
            )
            .await?;
        self.unified_job(launched.kind, launched.id).await
    }

    pub async fn workflow_job_nodes(
        &self,
        workflow_job: i64,
        query: &[(&str, String)],
    ) -> E2eResult<Page<WorkflowJobNode>> {
        self.get_json(
            &v2_path(&["workflow_jobs", &workflow_job.to_string(), "workflow_nodes"]),
            query,
        )
        .await
    }

    pub async fn workflow_job_node(&self, node: i64) -> E2eResult<WorkflowJobNode> {
        self.get_json(&v2_path(&["workflow_job_nodes", &node.to_string()]), &[])
            .await
    }

    pub async fn workflow_job_node_credentials(&self, node: i64) -> E2eResult<Page<Credential>> {
        self.get_json(
            &v2_path(&["workflow_job_nodes", &node.to_string(), "credentials"]),
            &[],
        )
        .await
    }

    // jobs

    pub async fn unified_job(&self, kind: UnifiedJobKind, id: i64) -> E2eResult<UnifiedJob> {
        self.get_json(&v2_path(&[kind.endpoint(), &id.to_string()]), &[])
            .await
    }

    pub async fn unified_jobs(&self, query: &[(&str, String)]) -> E2eResult<Page<UnifiedJob>> {
        self.get_json(&v2_path(&["unified_jobs"]), query).await
    }

    /// Jobs spawned by the nodes of a workflow job
    pub async fn workflow_child_jobs(&self, workflow_job: i64) -> E2eResult<Page<UnifiedJob>> {
        self.unified_jobs(&[
            ("unified_job_node__workflow_job", workflow_job.to_string()),
            ("order_by", "id".to_string()),
        ])
        .await
    }

    pub async fn job_credentials(&self, job: i64) -> E2eResult<Page<Credential>> {
        self.get_json(&v2_path(&["jobs", &job.to_string(), "credentials"]), &[])
            .await
    }

    pub async fn job_create_schedule(&self, job: i64) -> E2eResult<CreateSchedule> {
        self.get_json(&v2_path(&["jobs", &job.to_string(), "create_schedule"]), &[])
            .await
    }

    /// Poll a unified job until it reaches a terminal status
    pub async fn wait_until_completed(
        &self,
        job: &UnifiedJob,
        interval: Duration,
        timeout: Duration,
    ) -> E2eResult<UnifiedJob> {
        let description = format!("{:?} {} to complete", job.kind, job.id);
        let (kind, id) = (job.kind, job.id);
        let finished = poll_until(&description, interval, timeout, move || async move {
            let current = self.unified_job(kind, id).await?;
            debug!("{:?} {} is {}", kind, id, current.status);
            Ok(current.status.is_finished().then_some(current))
        })
        .await?;
        info!("{:?} {} finished: {}", finished.kind, finished.id, finished.status);
        Ok(finished)
    }

    // instances

    pub async fn instances(&self, query: &[(&str, String)]) -> E2eResult<Page<Instance>> {
        self.get_json(&v2_path(&["instances"]), query).await
    }

    pub async fn create_instance_group(&self, body: Value) -> E2eResult<InstanceGroup> {
        self.post_json(&v2_path(&["instance_groups"]), body).await
    }

    pub async fn instance_group_add_instance(&self, group: i64, instance: i64) -> E2eResult<()> {
        self.associate(
            &v2_path(&["instance_groups", &group.to_string(), "instances"]),
            instance,
        )
        .await
    }

    /// Delete any resource by path; a 404 counts as already gone
    pub async fn delete(&self, path: &str) -> E2eResult<()> {
        let response = self.conn.delete(path).await?;
        if response.is_success() || response.status_code() == 404 {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_path() {
        assert_eq!(v2_path(&["me"]), "/api/v2/me/");
        assert_eq!(v2_path(&["settings", "authentication"]), "/api/v2/settings/authentication/");
        assert_eq!(v2_path(&["jobs", "/12/", "credentials"]), "/api/v2/jobs/12/credentials/");
    }

    #[test]
    fn test_launch_response_kind() {
        let launched: LaunchResponse =
            serde_json::from_str(r#"{"id": 9, "type": "workflow_job", "workflow_job": 9}"#).unwrap();
        assert_eq!(launched.kind, UnifiedJobKind::WorkflowJob);
        assert_eq!(launched.kind.endpoint(), "workflow_jobs");
    }
}
