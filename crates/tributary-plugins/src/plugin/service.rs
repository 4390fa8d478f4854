//! Command-style backends.
//!
//! Some engines take a command string, hand back an id and report a status
//! string for that id. [`ServiceClient`] is the contract for such engines;
//! [`CommandPlugin`] adapts any client to [`AsyncPlugin`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use tributary_core::{Phase, PhaseInfo, DEFAULT_PHASE_VERSION};

use super::{AsyncPlugin, Resource, ResourceMeta, TaskExecutionContext};
use crate::config::PluginConfig;
use crate::error::{Error, Result};

/// Engine-reported status of a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandStatus(pub String);

impl CommandStatus {
    /// Creates a status from the engine's string.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    /// Maps the status to a phase, ignoring case.
    ///
    /// Statuses the engine does not document map to [`Phase::Undefined`].
    #[must_use]
    pub fn to_phase(&self) -> Phase {
        match self.0.to_ascii_uppercase().as_str() {
            "WAITING" | "QUEUED" => Phase::Queued,
            "RUNNING" => Phase::Running,
            "FINISHED" | "DONE" | "SUCCEEDED" => Phase::Success,
            "FAILED" | "ERROR" | "CANCELED" | "CANCELLED" => Phase::PermanentFailure,
            _ => Phase::Undefined,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client for an engine that executes commands.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Submits `command` and returns the engine's response, which carries
    /// the command id.
    async fn execute_command(
        &self,
        command: &str,
        extra_args: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Stops a running command.
    async fn kill_command(&self, command_id: &str) -> Result<()>;

    /// Fetches a command's current status.
    async fn get_command_status(&self, command_id: &str) -> Result<CommandStatus>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandMeta {
    command_id: String,
}

/// [`AsyncPlugin`] over a [`ServiceClient`].
///
/// The task definition must carry the command under `"command"`; any other
/// fields are passed to the engine as extra arguments. The engine's response
/// must carry the id under `"id"`.
pub struct CommandPlugin {
    id: String,
    task_types: Vec<String>,
    client: Arc<dyn ServiceClient>,
    config: PluginConfig,
}

impl fmt::Debug for CommandPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPlugin")
            .field("id", &self.id)
            .field("task_types", &self.task_types)
            .finish_non_exhaustive()
    }
}

impl CommandPlugin {
    /// Creates a plugin serving `task_types` through `client`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        task_types: Vec<String>,
        client: Arc<dyn ServiceClient>,
        config: PluginConfig,
    ) -> Self {
        Self {
            id: id.into(),
            task_types,
            client,
            config,
        }
    }
}

#[async_trait]
impl AsyncPlugin for CommandPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn task_types(&self) -> Vec<String> {
        self.task_types.clone()
    }

    fn config(&self) -> &PluginConfig {
        &self.config
    }

    async fn create(&self, ctx: &TaskExecutionContext) -> Result<(ResourceMeta, Option<Resource>)> {
        let command = ctx
            .custom
            .get("command")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::user("task definition has no command"))?;

        let mut extra_args = ctx.custom.clone();
        if let Some(fields) = extra_args.as_object_mut() {
            fields.remove("command");
        }

        let response = self.client.execute_command(command, &extra_args).await?;
        let command_id = response
            .get("id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::system("engine response has no command id"))?
            .to_string();

        info!(command_id = %command_id, "command submitted");
        Ok((ResourceMeta::encode(&CommandMeta { command_id })?, None))
    }

    async fn get(&self, _ctx: &TaskExecutionContext, meta: &ResourceMeta) -> Result<Resource> {
        let meta: CommandMeta = meta.decode()?;
        let status = self.client.get_command_status(&meta.command_id).await?;
        Resource::encode(&status)
    }

    async fn delete(&self, _ctx: &TaskExecutionContext, meta: &ResourceMeta) -> Result<()> {
        let meta: CommandMeta = meta.decode()?;
        self.client.kill_command(&meta.command_id).await
    }

    fn status(
        &self,
        _ctx: &TaskExecutionContext,
        _meta: &ResourceMeta,
        resource: Option<&Resource>,
    ) -> Result<PhaseInfo> {
        let Some(resource) = resource else {
            return Ok(PhaseInfo::queued(None));
        };
        let status: CommandStatus = resource.decode()?;
        Ok(match status.to_phase() {
            Phase::Queued => PhaseInfo::queued(None),
            Phase::Running => PhaseInfo::running(DEFAULT_PHASE_VERSION, None),
            Phase::Success => PhaseInfo::success(None),
            Phase::PermanentFailure => PhaseInfo::permanent_failure(
                "CommandFailed",
                format!("command ended with status {status}"),
                None,
            ),
            _ => PhaseInfo::undefined().with_reason(format!("unknown command status {status}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tributary_core::ResourceNamespace;

    #[derive(Default)]
    struct FakeEngine {
        submitted: Mutex<Vec<(String, serde_json::Value)>>,
        killed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ServiceClient for FakeEngine {
        async fn execute_command(
            &self,
            command: &str,
            extra_args: &serde_json::Value,
        ) -> Result<serde_json::Value> {
            self.submitted
                .lock()
                .unwrap()
                .push((command.to_string(), extra_args.clone()));
            Ok(serde_json::json!({"id": "cmd-9"}))
        }

        async fn kill_command(&self, command_id: &str) -> Result<()> {
            self.killed.lock().unwrap().push(command_id.to_string());
            Ok(())
        }

        async fn get_command_status(&self, _command_id: &str) -> Result<CommandStatus> {
            Ok(CommandStatus::new("running"))
        }
    }

    fn plugin(engine: Arc<FakeEngine>) -> CommandPlugin {
        CommandPlugin::new("engine", vec!["sql".into()], engine, PluginConfig::default())
    }

    fn ctx(custom: serde_json::Value) -> TaskExecutionContext {
        TaskExecutionContext::new("exec-1", "sql", ResourceNamespace::new("p", "n").unwrap())
            .with_custom(custom)
    }

    #[test]
    fn status_strings_map_to_phases() {
        assert_eq!(CommandStatus::new("queued").to_phase(), Phase::Queued);
        assert_eq!(CommandStatus::new("FINISHED").to_phase(), Phase::Success);
        assert_eq!(CommandStatus::new("Canceled").to_phase(), Phase::PermanentFailure);
        assert_eq!(CommandStatus::new("paused").to_phase(), Phase::Undefined);
    }

    #[tokio::test]
    async fn lifecycle_goes_through_client() -> Result<()> {
        let engine = Arc::new(FakeEngine::default());
        let plugin = plugin(engine.clone());

        let ctx = ctx(serde_json::json!({"command": "select 1", "catalog": "hive"}));
        let (meta, resource) = plugin.create(&ctx).await?;
        assert!(resource.is_none());
        assert_eq!(
            engine.submitted.lock().unwrap()[0],
            ("select 1".to_string(), serde_json::json!({"catalog": "hive"}))
        );

        let resource = plugin.get(&ctx, &meta).await?;
        assert_eq!(
            plugin.status(&ctx, &meta, Some(&resource))?.phase,
            Phase::Running
        );

        plugin.delete(&ctx, &meta).await?;
        assert_eq!(*engine.killed.lock().unwrap(), vec!["cmd-9".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_command_is_user_error() {
        let plugin = plugin(Arc::new(FakeEngine::default()));
        let err = plugin.create(&ctx(serde_json::json!({}))).await.unwrap_err();
        assert_eq!(err.failure_kind(), tributary_core::FailureKind::User);
    }
}
