//! # Command Registry & Dispatcher
//!
//! A two-level mapping `module → cmd → constructor`. Backend modules hand in
//! their own [`CommandTable`] at initialization; nothing registers itself
//! behind the caller's back and there is no process-wide registry.
//!
//! Dispatching a [`CommandMessage`] looks up the constructor, stamps the
//! arrival time, constructs the typed command and performs it against the
//! given connection.

use crate::command::{CommandTable, Constructor};
use crate::error::BackendError;
use crate::protocol::CommandMessage;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, instrument};

pub struct CommandRegistry<C> {
    modules: HashMap<String, HashMap<String, Constructor<C>>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }
}

impl<C: Sync> CommandRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `constructor` under `module`/`cmd`.
    ///
    /// The first registration for a key wins; returns `false` when the key
    /// was already taken and nothing changed.
    pub fn register(&mut self, module: &str, cmd: &str, constructor: Constructor<C>) -> bool {
        let commands = self.modules.entry(module.to_string()).or_default();
        if commands.contains_key(cmd) {
            debug!(module, cmd, "Command already registered, keeping the first");
            return false;
        }
        commands.insert(cmd.to_string(), constructor);
        true
    }

    /// Registers every entry of a backend module's table.
    pub fn register_table(&mut self, module: &str, table: CommandTable<C>) {
        for (cmd, constructor) in table {
            self.register(module, cmd, constructor);
        }
    }

    pub fn contains(&self, module: &str, cmd: &str) -> bool {
        self.modules
            .get(module)
            .is_some_and(|commands| commands.contains_key(cmd))
    }

    /// Looks up, constructs and performs `message` against `conn`.
    #[instrument(skip(self, conn, message), fields(cmd = %message.cmd))]
    pub async fn dispatch(
        &self,
        module: &str,
        conn: &C,
        message: CommandMessage,
    ) -> Result<Value, BackendError> {
        let commands = self
            .modules
            .get(module)
            .ok_or_else(|| BackendError::UnknownBackendModule(module.to_string()))?;
        let constructor =
            commands
                .get(&message.cmd)
                .ok_or_else(|| BackendError::UnknownCommand {
                    module: module.to_string(),
                    cmd: message.cmd.clone(),
                })?;

        let arrival_time = Utc::now();
        let command = constructor(message.fields, arrival_time)?;
        debug!(%arrival_time, "Performing");
        command.perform(conn).await
    }
}

/// A registry bound to one selected backend module and its live connection.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Name of the bound backend module.
    fn module(&self) -> &str;

    async fn dispatch(&self, message: CommandMessage) -> Result<Value, BackendError>;
}

pub struct BoundDispatcher<C> {
    module: String,
    registry: CommandRegistry<C>,
    connection: C,
}

impl<C: Send + Sync> BoundDispatcher<C> {
    pub fn new(module: impl Into<String>, registry: CommandRegistry<C>, connection: C) -> Self {
        Self {
            module: module.into(),
            registry,
            connection,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}

#[async_trait]
impl<C: Send + Sync> Dispatch for BoundDispatcher<C> {
    fn module(&self) -> &str {
        &self.module
    }

    async fn dispatch(&self, message: CommandMessage) -> Result<Value, BackendError> {
        self.registry
            .dispatch(&self.module, &self.connection, message)
            .await
    }
}
