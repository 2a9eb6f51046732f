//! Resource factories with automatic teardown
//!
//! Factories create uniquely named controller resources and remember each
//! one. [`Factories::teardown`] deletes them newest first so dependants go
//! before the things they depend on.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use towerqa_common::types::*;
use towerqa_common::QaConfig;

use crate::api::{v2_path, ApiV2, Connection};
use crate::error::{E2eError, E2eResult};
use crate::poll::poll_until;

pub const DEFAULT_SCM_URL: &str = "https://github.com/ansible/test-playbooks.git";
pub const DEFAULT_PLAYBOOK: &str = "ping.yml";

/// Random alphanumeric string of `len` characters
pub fn gen_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Unique resource name with a readable prefix
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, gen_alphanumeric(10))
}

/// iCal rule firing every minute from `start`
pub fn minutely_rrule(start: DateTime<Utc>) -> String {
    format!(
        "DTSTART:{} RRULE:FREQ=MINUTELY;INTERVAL=1",
        start.format("%Y%m%dT%H%M%SZ")
    )
}

/// A user created together with its password
#[derive(Debug, Clone)]
pub struct CreatedUser {
    pub user: User,
    pub password: String,
}

impl CreatedUser {
    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn id(&self) -> i64 {
        self.user.id
    }
}

/// Options for [`Factories::job_template`]
#[derive(Debug, Clone)]
pub struct JobTemplateOptions {
    pub name: Option<String>,
    pub shard_count: u32,
    /// Hosts to add to the template's inventory; defaults to `shard_count`
    pub host_count: Option<usize>,
    pub allow_simultaneous: bool,
    pub verbosity: Option<u8>,
    pub timeout: Option<u64>,
    pub ask_limit_on_launch: bool,
    pub ask_credential_on_launch: bool,
}

impl Default for JobTemplateOptions {
    fn default() -> Self {
        Self {
            name: None,
            shard_count: 1,
            host_count: None,
            allow_simultaneous: false,
            verbosity: None,
            timeout: None,
            ask_limit_on_launch: false,
            ask_credential_on_launch: false,
        }
    }
}

impl JobTemplateOptions {
    pub fn sharded(count: u32) -> Self {
        Self {
            shard_count: count,
            ..Default::default()
        }
    }

    pub fn hosts(mut self, count: usize) -> Self {
        self.host_count = Some(count);
        self
    }
}

/// A job template together with the dependencies created for it
#[derive(Debug, Clone)]
pub struct JobTemplateFixture {
    pub template: JobTemplate,
    pub organization: Organization,
    pub inventory: Inventory,
    pub hosts: Vec<Host>,
    pub project: Project,
    pub credential: Credential,
}

pub struct Factories<'a> {
    api: ApiV2<'a>,
    created: Mutex<Vec<String>>,
    poll_interval: Duration,
    project_timeout: Duration,
}

impl<'a> Factories<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            api: conn.v2(),
            created: Mutex::new(Vec::new()),
            poll_interval: Duration::from_secs(2),
            project_timeout: Duration::from_secs(300),
        }
    }

    pub fn from_config(conn: &'a Connection, config: &QaConfig) -> Self {
        Self {
            poll_interval: config.timeouts.poll_interval(),
            project_timeout: config.timeouts.job(),
            ..Self::new(conn)
        }
    }

    pub fn api(&self) -> ApiV2<'a> {
        self.api
    }

    fn track(&self, collection: &str, id: i64) {
        let path = v2_path(&[collection, &id.to_string()]);
        debug!("Tracking {} for teardown", path);
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path);
    }

    /// Resources created so far, oldest first
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn organization(&self) -> E2eResult<Organization> {
        let org = self
            .api
            .create_organization(json!({
                "name": unique_name("org"),
                "description": "created by towerqa",
            }))
            .await?;
        self.track("organizations", org.id);
        Ok(org)
    }

    pub async fn user(&self, organization: Option<&Organization>) -> E2eResult<CreatedUser> {
        let password = gen_alphanumeric(16);
        let user = self
            .api
            .create_user(json!({
                "username": unique_name("user"),
                "password": password,
                "email": "towerqa@example.com",
            }))
            .await?;
        self.track("users", user.id);

        if let Some(org) = organization {
            self.api.organization_add_user(org.id, user.id).await?;
        }
        Ok(CreatedUser { user, password })
    }

    pub async fn team(&self, organization: &Organization) -> E2eResult<Team> {
        let team = self
            .api
            .create_team(json!({
                "name": unique_name("team"),
                "organization": organization.id,
            }))
            .await?;
        self.track("teams", team.id);
        Ok(team)
    }

    pub async fn inventory(&self, organization: &Organization) -> E2eResult<Inventory> {
        let inventory = self
            .api
            .create_inventory(json!({
                "name": unique_name("inventory"),
                "organization": organization.id,
            }))
            .await?;
        self.track("inventories", inventory.id);
        Ok(inventory)
    }

    /// Host that runs on the execution node itself
    pub async fn local_host(&self, inventory: &Inventory, name: &str) -> E2eResult<Host> {
        let host = self
            .api
            .create_host(
                inventory.id,
                json!({ "name": name, "variables": "ansible_connection: local" }),
            )
            .await?;
        self.track("hosts", host.id);
        Ok(host)
    }

    /// Git project, returned once its initial update succeeded
    pub async fn project(&self, organization: &Organization) -> E2eResult<Project> {
        let project = self
            .api
            .create_project(json!({
                "name": unique_name("project"),
                "organization": organization.id,
                "scm_type": "git",
                "scm_url": DEFAULT_SCM_URL,
            }))
            .await?;
        self.track("projects", project.id);

        let api = self.api;
        let id = project.id;
        poll_until(
            &format!("project {} update", id),
            self.poll_interval,
            self.project_timeout,
            move || async move {
                let current = api.project(id).await?;
                match current.status.as_str() {
                    "successful" => Ok(Some(current)),
                    "failed" | "error" | "canceled" => Err(E2eError::AssertionFailed(format!(
                        "project {} update ended {}",
                        id, current.status
                    ))),
                    _ => Ok(None),
                }
            },
        )
        .await
    }

    async fn credential_type(&self, query: &[(&str, String)]) -> E2eResult<CredentialType> {
        let page = self.api.credential_types(query).await?;
        page.results.into_iter().next().ok_or_else(|| {
            E2eError::AssertionFailed(format!("no credential type matches {:?}", query))
        })
    }

    pub async fn credential(
        &self,
        credential_type: &CredentialType,
        organization: &Organization,
        inputs: Value,
    ) -> E2eResult<Credential> {
        let credential = self
            .api
            .create_credential(json!({
                "name": unique_name(&credential_type.kind),
                "credential_type": credential_type.id,
                "organization": organization.id,
                "inputs": inputs,
            }))
            .await?;
        self.track("credentials", credential.id);
        Ok(credential)
    }

    pub async fn machine_credential(&self, organization: &Organization) -> E2eResult<Credential> {
        let kind = self
            .credential_type(&[("kind", "ssh".to_string()), ("managed_by_tower", "true".to_string())])
            .await?;
        self.credential(&kind, organization, json!({ "username": "root" }))
            .await
    }

    /// Cloud credential of the managed type with `namespace` (e.g. `gce`)
    pub async fn cloud_credential(
        &self,
        namespace: &str,
        organization: &Organization,
        inputs: Value,
    ) -> E2eResult<Credential> {
        let kind = self
            .credential_type(&[("namespace", namespace.to_string()), ("kind", "cloud".to_string())])
            .await?;
        self.credential(&kind, organization, inputs).await
    }

    /// Job template over an inventory of local hosts `foo0..fooN`
    pub async fn job_template(&self, options: JobTemplateOptions) -> E2eResult<JobTemplateFixture> {
        let organization = self.organization().await?;
        let inventory = self.inventory(&organization).await?;

        let host_count = options.host_count.unwrap_or(options.shard_count as usize);
        let mut hosts = Vec::with_capacity(host_count);
        for i in 0..host_count {
            hosts.push(self.local_host(&inventory, &format!("foo{}", i)).await?);
        }

        let project = self.project(&organization).await?;
        let credential = self.machine_credential(&organization).await?;

        let mut body = json!({
            "name": options.name.clone().unwrap_or_else(|| unique_name("jt")),
            "inventory": inventory.id,
            "project": project.id,
            "playbook": DEFAULT_PLAYBOOK,
            "job_shard_count": options.shard_count,
            "allow_simultaneous": options.allow_simultaneous,
            "ask_limit_on_launch": options.ask_limit_on_launch,
            "ask_credential_on_launch": options.ask_credential_on_launch,
        });
        if let Some(verbosity) = options.verbosity {
            body["verbosity"] = json!(verbosity);
        }
        if let Some(timeout) = options.timeout {
            body["timeout"] = json!(timeout);
        }

        let template = self.api.create_job_template(body).await?;
        self.track("job_templates", template.id);
        self.api
            .job_template_add_credential(template.id, credential.id)
            .await?;

        info!(
            "Created job template {} ({} shard(s), {} host(s))",
            template.id, options.shard_count, host_count
        );

        Ok(JobTemplateFixture {
            template,
            organization,
            inventory,
            hosts,
            project,
            credential,
        })
    }

    pub async fn workflow_job_template(&self, organization: &Organization) -> E2eResult<WorkflowJobTemplate> {
        let workflow = self
            .api
            .create_workflow_job_template(json!({
                "name": unique_name("wfjt"),
                "organization": organization.id,
            }))
            .await?;
        self.track("workflow_job_templates", workflow.id);
        Ok(workflow)
    }

    pub async fn workflow_node(
        &self,
        workflow: &WorkflowJobTemplate,
        unified_job_template: i64,
    ) -> E2eResult<WorkflowJobTemplateNode> {
        let node = self
            .api
            .create_workflow_node(workflow.id, json!({ "unified_job_template": unified_job_template }))
            .await?;
        self.track("workflow_job_template_nodes", node.id);
        Ok(node)
    }

    pub async fn instance_group(&self) -> E2eResult<InstanceGroup> {
        let group = self
            .api
            .create_instance_group(json!({ "name": unique_name("ig") }))
            .await?;
        self.track("instance_groups", group.id);
        Ok(group)
    }

    pub async fn schedule(&self, template: &JobTemplate, rrule: &str) -> E2eResult<Schedule> {
        let schedule = self
            .api
            .create_schedule(template.id, json!({ "name": unique_name("schedule"), "rrule": rrule }))
            .await?;
        self.track("schedules", schedule.id);
        Ok(schedule)
    }

    /// Delete everything created, newest first. Failures are logged and
    /// counted, never raised, so one stuck resource does not leak the rest.
    pub async fn teardown(&self) -> usize {
        let paths: Vec<String> = {
            let mut created = self.created.lock().unwrap_or_else(|e| e.into_inner());
            created.drain(..).rev().collect()
        };

        let mut failures = 0;
        for path in paths {
            if let Err(e) = self.api.delete(&path).await {
                failures += 1;
                warn!("Teardown of {} failed: {}", path, e);
            }
        }
        if failures > 0 {
            warn!("Teardown finished with {} failure(s)", failures);
        }
        failures
    }
}
