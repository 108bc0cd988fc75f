// src/router/table.rs

use std::fmt;
use std::sync::Arc;

use crate::errors::{Result, WardenError};
use crate::router::HandlerContext;
use crate::router::command::Command;

pub type Handler = Arc<dyn Fn(&mut HandlerContext<'_>, &Command) -> Result<()> + Send + Sync>;

/// One registered verb.
#[derive(Clone)]
pub struct CommandSpec {
    pub verb: &'static str,
    /// Shown after `Usage: ` when too few arguments are given.
    pub usage: &'static str,
    pub min_args: usize,
    pub help: &'static str,
    handler: Handler,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("verb", &self.verb)
            .field("usage", &self.usage)
            .field("min_args", &self.min_args)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    pub fn new<F>(
        verb: &'static str,
        usage: &'static str,
        min_args: usize,
        help: &'static str,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut HandlerContext<'_>, &Command) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            verb,
            usage,
            min_args,
            help,
            handler: Arc::new(handler),
        }
    }

    pub fn handler(&self) -> Handler {
        Arc::clone(&self.handler)
    }
}

/// Fixed verb table, registered once at startup. Lookup is case-insensitive;
/// iteration follows registration order.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: Vec<CommandSpec>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: CommandSpec) -> Result<()> {
        if self.get(spec.verb).is_some() {
            return Err(WardenError::ConfigError(format!(
                "verb '{}' registered twice",
                spec.verb
            )));
        }
        self.entries.push(spec);
        Ok(())
    }

    pub fn get(&self, verb: &str) -> Option<&CommandSpec> {
        self.entries
            .iter()
            .find(|spec| spec.verb.eq_ignore_ascii_case(verb))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
