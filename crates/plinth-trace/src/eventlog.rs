//! Hash-chained state-mutation log
//!
//! Every mutation of hypervisor state appends an [`Event`] to this log.
//! Each record's ID is a 64-bit FNV-1a digest over the previous record's
//! ID, the sequence number, the timestamp, and the event payload, so the
//! chain detects truncation and in-place edits.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Chained record identifier (FNV-1a digest).
pub type EventId = u64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// State mutations recorded by the control core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Chain genesis (initial state)
    Genesis,
    /// A domain descriptor was registered
    DomainCreated { id: u64 },
    /// Frames were moved from the free pool onto a domain's chain
    FramesAllocated { id: u64, count: u64 },
    /// A guest address space and boot info were built
    GuestBuilt { id: u64, pages: u64 },
    /// A terminate event was posted to a domain
    DomainKilled { id: u64 },
    /// A quiesced dying domain was torn down
    DomainReclaimed { id: u64 },
    /// Frames were returned to the free pool
    FramesReleased { id: u64, count: u64 },
    /// A negative timeout was rejected and the caller woken immediately
    TimeoutRejected { id: u64 },
}

impl Event {
    /// Fold the event payload into the running digest.
    fn fold(&self, mut h: u64) -> u64 {
        let (tag, a, b): (u8, u64, u64) = match *self {
            Event::Genesis => (0, 0, 0),
            Event::DomainCreated { id } => (1, id, 0),
            Event::FramesAllocated { id, count } => (2, id, count),
            Event::GuestBuilt { id, pages } => (3, id, pages),
            Event::DomainKilled { id } => (4, id, 0),
            Event::DomainReclaimed { id } => (5, id, 0),
            Event::FramesReleased { id, count } => (6, id, count),
            Event::TimeoutRejected { id } => (7, id, 0),
        };
        h = fnv_byte(h, tag);
        h = fnv_u64(h, a);
        fnv_u64(h, b)
    }
}

fn fnv_byte(h: u64, b: u8) -> u64 {
    (h ^ b as u64).wrapping_mul(FNV_PRIME)
}

fn fnv_u64(mut h: u64, v: u64) -> u64 {
    for b in v.to_le_bytes() {
        h = fnv_byte(h, b);
    }
    h
}

/// One chained record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    /// Chained digest of this record
    pub id: EventId,
    /// Digest of the previous record
    pub prev: EventId,
    /// Sequence number (0 = genesis)
    pub seq: u64,
    /// Timestamp in ticks
    pub timestamp: u64,
    /// The recorded mutation
    pub event: Event,
    /// Operation-log request that caused this mutation, if any
    pub caused_by: Option<u64>,
}

/// Append-only, hash-chained mutation log.
pub struct EventLog {
    records: Vec<EventRecord>,
    head: EventId,
    seq: u64,
}

impl EventLog {
    /// Create a new log seeded with a genesis record at `timestamp`.
    pub fn new(timestamp: u64) -> Self {
        let mut log = Self {
            records: Vec::new(),
            head: FNV_OFFSET,
            seq: 0,
        };
        log.push(Event::Genesis, None, timestamp);
        log
    }

    /// Append a mutation. Returns the new record's chained ID.
    pub fn append(&mut self, event: Event, caused_by: Option<u64>, timestamp: u64) -> EventId {
        self.push(event, caused_by, timestamp)
    }

    fn push(&mut self, event: Event, caused_by: Option<u64>, timestamp: u64) -> EventId {
        let id = Self::digest(self.head, self.seq, timestamp, &event);
        self.records.push(EventRecord {
            id,
            prev: self.head,
            seq: self.seq,
            timestamp,
            event,
            caused_by,
        });
        self.head = id;
        self.seq += 1;
        id
    }

    fn digest(prev: EventId, seq: u64, timestamp: u64, event: &Event) -> EventId {
        let mut h = FNV_OFFSET;
        h = fnv_u64(h, prev);
        h = fnv_u64(h, seq);
        h = fnv_u64(h, timestamp);
        event.fold(h)
    }

    /// Get all records.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Get the number of records (genesis included).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the log holds only the genesis record.
    pub fn is_empty(&self) -> bool {
        self.records.len() <= 1
    }

    /// Digest of the newest record.
    pub fn head(&self) -> EventId {
        self.head
    }

    /// Sequence number the next record will receive.
    pub fn current_seq(&self) -> u64 {
        self.seq
    }

    /// Recompute the chain and compare against the stored digests.
    pub fn verify_integrity(&self) -> bool {
        let mut prev = FNV_OFFSET;
        for (i, rec) in self.records.iter().enumerate() {
            if rec.seq != i as u64 || rec.prev != prev {
                return false;
            }
            let expect = Self::digest(prev, rec.seq, rec.timestamp, &rec.event);
            if rec.id != expect {
                return false;
            }
            prev = rec.id;
        }
        prev == self.head
    }
}
