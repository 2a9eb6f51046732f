//! Representations of controller API resources
//!
//! These are read-only views of what `/api/v2/` returns. Only the fields the
//! suites assert on are modelled; everything else is ignored on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A paginated list endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn first(&self) -> Option<&T> {
        self.results.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub organization: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub id: i64,
    pub name: String,
    pub organization: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub inventory: i64,
    #[serde(default)]
    pub variables: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub scm_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialType {
    pub id: i64,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub name: String,
    pub credential_type: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub id: i64,
    pub name: String,
    pub inventory: Option<i64>,
    pub project: Option<i64>,
    #[serde(default)]
    pub playbook: String,
    #[serde(default = "default_shard_count")]
    pub job_shard_count: u32,
    #[serde(default)]
    pub allow_simultaneous: bool,
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default)]
    pub timeout: u64,
}

fn default_shard_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobTemplate {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobTemplateNode {
    pub id: i64,
    pub workflow_job_template: i64,
    pub unified_job_template: Option<i64>,
}

/// Lifecycle status of any unified job (job, workflow job, project update)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Pending,
    Waiting,
    Running,
    Successful,
    Failed,
    Error,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// The controller will not move a job out of a terminal status
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Error | JobStatus::Canceled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::New => "new",
            JobStatus::Pending => "pending",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Canceled => "canceled",
            JobStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Discriminates what kind of unified job a record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedJobKind {
    Job,
    WorkflowJob,
    ProjectUpdate,
    InventoryUpdate,
    SystemJob,
    AdHocCommand,
    #[serde(other)]
    Other,
}

impl UnifiedJobKind {
    /// Collection path under `/api/v2/` for this kind
    pub fn endpoint(&self) -> &'static str {
        match self {
            UnifiedJobKind::Job => "jobs",
            UnifiedJobKind::WorkflowJob => "workflow_jobs",
            UnifiedJobKind::ProjectUpdate => "project_updates",
            UnifiedJobKind::InventoryUpdate => "inventory_updates",
            UnifiedJobKind::SystemJob => "system_jobs",
            UnifiedJobKind::AdHocCommand => "ad_hoc_commands",
            UnifiedJobKind::Other => "unified_jobs",
        }
    }
}

/// A job, workflow job or update as returned by `/api/v2/unified_jobs/`
/// and the per-kind detail endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedJob {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: UnifiedJobKind,
    pub status: JobStatus,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub job_template: Option<i64>,
    #[serde(default)]
    pub host_status_counts: HashMap<String, u64>,
    #[serde(default)]
    pub verbosity: Option<u8>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl UnifiedJob {
    pub fn is_successful(&self) -> bool {
        self.status == JobStatus::Successful && !self.failed
    }

    /// Number of hosts the job finished `ok` on
    pub fn ok_hosts(&self) -> u64 {
        self.host_status_counts.get("ok").copied().unwrap_or(0)
    }

    /// Run interval, when both ends are known
    pub fn window(&self) -> crate::sharding::JobWindow {
        crate::sharding::JobWindow {
            id: self.id,
            started: self.started,
            finished: self.finished,
        }
    }
}

/// A node of a running workflow job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobNode {
    pub id: i64,
    pub workflow_job: Option<i64>,
    #[serde(default)]
    pub job: Option<i64>,
    #[serde(default)]
    pub verbosity: Option<u8>,
    #[serde(default)]
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub hostname: String,
    #[serde(default)]
    pub capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub capacity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub rrule: String,
    pub unified_job_template: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHostSummary {
    pub id: i64,
    pub host: Option<i64>,
    pub job: i64,
    #[serde(default)]
    pub ok: u64,
    #[serde(default)]
    pub failed: bool,
}

/// Body of `GET /api/v2/jobs/N/create_schedule/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchedule {
    #[serde(default)]
    pub can_schedule: bool,
    #[serde(default)]
    pub prompts: serde_json::Map<String, serde_json::Value>,
}
