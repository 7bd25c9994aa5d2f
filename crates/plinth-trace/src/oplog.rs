//! Administrative operation log
//!
//! Records every administrative operation (request + response) for the
//! audit trail. This is separate from the event log: the operation log
//! answers "who asked for what and what came back", the event log answers
//! "what actually changed".

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Monotonic operation entry identifier.
pub type OpId = u64;

/// Maximum number of entries to keep in memory
const MAX_OP_ENTRIES: usize = 10000;

/// One entry in the operation log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpEntry {
    /// Unique entry ID (monotonic)
    pub id: OpId,
    /// Timestamp in ticks
    pub timestamp: u64,
    /// Request or response payload
    pub kind: OpEntryKind,
}

/// Payload of an operation-log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OpEntryKind {
    /// An administrative request
    Request {
        /// Command name
        command: String,
        /// Argument vector
        argv: Vec<String>,
    },
    /// The response to a request
    Response {
        /// ID of the request this responds to
        request_id: OpId,
        /// Exit status (0 = success)
        status: i32,
    },
}

/// Append-only administrative audit log with monotonic IDs.
pub struct OpLog {
    entries: Vec<OpEntry>,
    next_id: OpId,
}

impl OpLog {
    /// Create a new empty OpLog.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Log an administrative request.
    ///
    /// Returns the entry ID for correlating with the response.
    pub fn log_request(&mut self, command: &str, argv: &[&str], timestamp: u64) -> OpId {
        let id = self.next_id;
        self.next_id += 1;

        self.entries.push(OpEntry {
            id,
            timestamp,
            kind: OpEntryKind::Request {
                command: command.to_string(),
                argv: argv.iter().map(|a| a.to_string()).collect(),
            },
        });

        self.trim_if_needed();
        id
    }

    /// Log the response to a request.
    pub fn log_response(&mut self, request_id: OpId, status: i32, timestamp: u64) {
        let id = self.next_id;
        self.next_id += 1;

        self.entries.push(OpEntry {
            id,
            timestamp,
            kind: OpEntryKind::Response { request_id, status },
        });

        self.trim_if_needed();
    }

    /// Get all entries.
    pub fn entries(&self) -> &[OpEntry] {
        &self.entries
    }

    /// Get the most recent N entries.
    pub fn recent(&self, count: usize) -> Vec<&OpEntry> {
        self.entries.iter().rev().take(count).collect()
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Trim old entries if exceeding max capacity.
    fn trim_if_needed(&mut self) {
        if self.entries.len() > MAX_OP_ENTRIES {
            let drain_count = self.entries.len() - MAX_OP_ENTRIES;
            self.entries.drain(0..drain_count);
        }
    }
}

impl Default for OpLog {
    fn default() -> Self {
        Self::new()
    }
}
