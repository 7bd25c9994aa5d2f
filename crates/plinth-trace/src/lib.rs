//! Plinth audit layer
//!
//! Two append-only logs record everything that changes hypervisor state:
//!
//! - [`OpLog`] records administrative operations (request + response) for
//!   the audit trail.
//! - [`EventLog`] records individual state mutations (domain created,
//!   frames allocated, domain reclaimed, ...) in a hash-chained sequence
//!   whose integrity can be verified after the fact.
//!
//! [`TraceGateway`] owns both and is the single entry point: every
//! administrative operation is bracketed by a request/response pair, and
//! the mutations it caused are appended between them. Mutations that do
//! not originate from an administrative call (timer-driven wakes, reclaim
//! inside dispatch) go through [`TraceGateway::append_internal`].

#![no_std]
extern crate alloc;

mod eventlog;
mod oplog;

pub use eventlog::{Event, EventId, EventLog, EventRecord};
pub use oplog::{OpEntry, OpEntryKind, OpId, OpLog};

use alloc::vec::Vec;

/// Gateway combining the operation audit log and the mutation event log.
pub struct TraceGateway {
    oplog: OpLog,
    eventlog: EventLog,
}

impl TraceGateway {
    /// Create a new gateway. `timestamp` is the boot time in ticks and
    /// seeds the event chain's genesis record.
    pub fn new(timestamp: u64) -> Self {
        Self {
            oplog: OpLog::new(),
            eventlog: EventLog::new(timestamp),
        }
    }

    /// Run an administrative operation through the audit trail.
    ///
    /// Logs the request, executes `op`, appends the events it produced,
    /// logs the response, and hands back the operation's result.
    pub fn admin_op<R, F>(
        &mut self,
        command: &str,
        argv: &[&str],
        timestamp: u64,
        op: F,
    ) -> (i32, R)
    where
        F: FnOnce() -> (i32, R, Vec<Event>),
    {
        let request_id = self.oplog.log_request(command, argv, timestamp);
        let (status, result, events) = op();
        for event in events {
            self.eventlog.append(event, Some(request_id), timestamp);
        }
        self.oplog.log_response(request_id, status, timestamp);
        (status, result)
    }

    /// Append an event that did not originate from an administrative
    /// call.
    pub fn append_internal(&mut self, event: Event, timestamp: u64) -> EventId {
        self.eventlog.append(event, None, timestamp)
    }

    /// Get the operation log.
    pub fn oplog(&self) -> &OpLog {
        &self.oplog
    }

    /// Get mutable reference to the operation log, for callers that
    /// bracket request and response around work they cannot run under
    /// the gateway's borrow.
    pub fn oplog_mut(&mut self) -> &mut OpLog {
        &mut self.oplog
    }

    /// Get the event log.
    pub fn eventlog(&self) -> &EventLog {
        &self.eventlog
    }

    /// Verify the event chain end to end.
    pub fn verify_integrity(&self) -> bool {
        self.eventlog.verify_integrity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn gateway_brackets_operations() {
        let mut gw = TraceGateway::new(0);

        let (status, id) = gw.admin_op("create", &["4096"], 100, || {
            (0, 5u32, vec![Event::DomainCreated { id: 5 }])
        });

        assert_eq!(status, 0);
        assert_eq!(id, 5);
        assert_eq!(gw.oplog().len(), 2); // request + response
        assert_eq!(gw.eventlog().len(), 2); // genesis + created
        assert!(gw.verify_integrity());
    }

    #[test]
    fn gateway_internal_events_skip_oplog() {
        let mut gw = TraceGateway::new(0);
        gw.append_internal(Event::DomainReclaimed { id: 3 }, 50);
        assert_eq!(gw.oplog().len(), 0);
        assert_eq!(gw.eventlog().len(), 2);
    }

    #[test]
    fn gateway_failed_op_still_audited() {
        let mut gw = TraceGateway::new(0);
        let (status, ()) = gw.admin_op("kill", &["99"], 10, || (1, (), vec![]));
        assert_eq!(status, 1);
        assert_eq!(gw.oplog().len(), 2);
        assert_eq!(gw.eventlog().len(), 1); // genesis only
    }
}
