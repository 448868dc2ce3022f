//! Log lines shared with every peer over the world topic

use log::info;

use crate::events::TableEvent;
use crate::MAX_LOG_LEN;

/// Builds [`TableEvent::Log`] records for one publisher, dropping a line
/// that repeats the previous one.
#[derive(Debug, Clone)]
pub struct NetLog {
    origin: String,
    last: Option<String>,
}

impl NetLog {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            last: None,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn line(&mut self, message: impl Into<String>) -> Option<TableEvent> {
        let mut message = message.into();
        if message.len() > MAX_LOG_LEN {
            let mut end = MAX_LOG_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        if self.last.as_deref() == Some(message.as_str()) {
            return None;
        }
        self.last = Some(message.clone());
        Some(TableEvent::Log {
            origin: self.origin.clone(),
            message,
        })
    }
}

/// Writes a received remote log line to the local log
pub fn echo(event: &TableEvent) {
    if let TableEvent::Log { origin, message } = event {
        info!("[{}] {}", origin, message);
    }
}
