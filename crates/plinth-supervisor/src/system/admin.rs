//! Administrative command surface
//!
//! The management-plane collaborator invokes named commands with an
//! argument vector and receives an integer status plus a captured output
//! stream. Transport is out of scope; this is the synchronous dispatch
//! behind it. Every invocation is bracketed into the operation audit
//! log.
//!
//! Commands:
//! - `create <memory_kb> [net_rings]` with the guest image as payload
//! - `kill <domain_id>`
//! - `list` (JSON array of `{id, state}`)

use alloc::string::String;
use alloc::vec::Vec;

use plinth_hal::Hal;
use serde::Serialize;

use super::Hypervisor;
use crate::error::HvError;
use plinth_core::DomainId;

/// Exit status for a malformed or unknown command.
pub const STATUS_USAGE: i32 = 2;

/// Result of an administrative invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminOutcome {
    /// 0 on success, 1 on operation failure, 2 on usage error
    pub status: i32,
    /// Captured output stream (stdout-equivalent)
    pub output: Vec<u8>,
}

impl AdminOutcome {
    fn ok(output: String) -> Self {
        Self {
            status: 0,
            output: output.into_bytes(),
        }
    }

    fn err(status: i32, output: String) -> Self {
        Self {
            status,
            output: output.into_bytes(),
        }
    }
}

#[derive(Serialize)]
struct ListEntry {
    id: u32,
    state: &'static str,
}

impl<H: Hal> Hypervisor<H> {
    /// Invoke a named administrative command.
    ///
    /// `payload` carries opaque request bytes - for `create`, the guest
    /// image. Never called from inside a locked scheduler section.
    pub fn invoke(&self, command: &str, argv: &[&str], payload: &[u8]) -> AdminOutcome {
        let ts = self.uptime_ticks();
        let request_id = self
            .with_trace(|trace| trace.oplog_mut().log_request(command, argv, ts));

        let outcome = match command {
            "create" => self.cmd_create(argv, payload),
            "kill" => self.cmd_kill(argv),
            "list" => self.cmd_list(),
            other => AdminOutcome::err(
                STATUS_USAGE,
                alloc::format!("unknown command: {}\n", other),
            ),
        };

        let ts = self.uptime_ticks();
        self.with_trace(|trace| trace.oplog_mut().log_response(request_id, outcome.status, ts));
        outcome
    }

    fn cmd_create(&self, argv: &[&str], payload: &[u8]) -> AdminOutcome {
        let memory_kb = match argv.first().and_then(|a| a.parse::<u64>().ok()) {
            Some(kb) => kb,
            None => {
                return AdminOutcome::err(
                    STATUS_USAGE,
                    String::from("usage: create <memory_kb> [net_rings]\n"),
                )
            }
        };
        let net_rings = match argv.get(1) {
            Some(a) => match a.parse::<usize>().ok() {
                Some(n) => n,
                None => {
                    return AdminOutcome::err(
                        STATUS_USAGE,
                        String::from("usage: create <memory_kb> [net_rings]\n"),
                    )
                }
            },
            None => 1,
        };

        match self.create_domain(memory_kb, payload, net_rings) {
            Ok(id) => AdminOutcome::ok(alloc::format!("domain {} created\n", id.0)),
            Err(e) => AdminOutcome::err(1, alloc::format!("create failed: {}\n", e.message())),
        }
    }

    fn cmd_kill(&self, argv: &[&str]) -> AdminOutcome {
        let id = match argv.first().and_then(|a| a.parse::<u32>().ok()) {
            Some(id) => DomainId(id),
            None => return AdminOutcome::err(STATUS_USAGE, String::from("usage: kill <domain_id>\n")),
        };
        match self.signal_kill(id) {
            Ok(()) => AdminOutcome::ok(alloc::format!("domain {} signalled\n", id.0)),
            Err(HvError::NotFound) => {
                AdminOutcome::err(1, alloc::format!("no such domain: {}\n", id.0))
            }
            Err(e) => AdminOutcome::err(1, alloc::format!("kill failed: {}\n", e.message())),
        }
    }

    fn cmd_list(&self) -> AdminOutcome {
        let entries: Vec<ListEntry> = self
            .registry()
            .list()
            .into_iter()
            .map(|(id, state)| ListEntry {
                id: id.0,
                state: state.name(),
            })
            .collect();
        match serde_json::to_vec(&entries) {
            Ok(mut output) => {
                output.push(b'\n');
                AdminOutcome { status: 0, output }
            }
            Err(_) => AdminOutcome::err(1, String::from("list failed\n")),
        }
    }
}
