//! Fakes shared by the unit tests of this crate

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::process::{CommandError, CommandOutput, CommandRunner, CommandSpec};

type Reply = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync>;

/// Records every command and answers from a list of pattern rules.
///
/// The first rule whose pattern occurs in the command line answers; commands
/// without a rule succeed with empty output.
#[derive(Default, Clone)]
pub(crate) struct ScriptedRunner {
    calls: Arc<Mutex<Vec<CommandSpec>>>,
    rules: Arc<Mutex<Vec<(String, Reply)>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, pattern: &str, reply: F) -> &Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Box::new(reply)));
        self
    }

    pub fn on_output(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.on(pattern, move |_| Ok(output.clone()))
    }

    pub fn on_timeout(&self, pattern: &str) -> &Self {
        self.on(pattern, |spec| {
            Err(CommandError::TimedOut {
                program: spec.program.clone(),
                timeout: Duration::from_secs(1),
            })
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines of every call, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.command_line()).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.command_line();
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(pattern, _)| line.contains(pattern.as_str())) {
            Some((_, reply)) => reply(spec),
            None => Ok(CommandOutput::ok("")),
        }
    }
}
