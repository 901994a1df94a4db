//! Activity logging for one instance

use std::sync::Arc;

use hw_core::{InstanceKey, LogEntry, LogLevel, LogSink};

/// Writes activity entries tagged with the instance key
#[derive(Clone)]
pub struct BotLogger {
    instance: InstanceKey,
    sink: Arc<dyn LogSink>,
}

impl BotLogger {
    pub fn new(instance: InstanceKey, sink: Arc<dyn LogSink>) -> Self {
        Self { instance, sink }
    }

    pub fn instance(&self) -> &InstanceKey {
        &self.instance
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink
            .log(&LogEntry::now(self.instance.clone(), level, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}
