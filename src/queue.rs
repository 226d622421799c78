// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! FIFO queue of unsatisfied `read`/`get` requests (component D).
//!
//! Implemented as a `slab` arena of request records plus an explicit
//! insertion-ordered key list, rather than a hand-rolled doubly-linked
//! list with owning back-pointers (see SPEC_FULL.md §9 on cyclic
//! references) — `VecDeque` already gives head-to-tail scan and O(1)
//! push/pop at the ends; unlinking a match from the middle is the only
//! O(n) operation and only ever touches the single matching slot.

use slab::Slab;
use std::collections::VecDeque;

use crate::matcher;

/// Whether a pending request is a destructive claim or a repeatable read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Read,
    Get,
}

/// Where to deliver a request's eventual match.
#[derive(Clone, Copy, Debug)]
pub struct Origin {
    pub host: u32,
    pub port: u16,
    pub cidport: u16,
    pub proc_id: i32,
}

/// A `read`/`get` that could not be satisfied when it arrived.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub expr: String,
    pub kind: RequestKind,
    pub origin: Origin,
}

/// The pending-request FIFO (component D).
#[derive(Default)]
pub struct PendingQueue {
    entries: Slab<PendingRequest>,
    order: VecDeque<usize>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, request: PendingRequest) {
        let key = self.entries.insert(request);
        self.order.push_back(key);
    }

    /// Scans head-to-tail for the first request whose expression matches
    /// `tuple_name`, unlinks it, and returns it.
    pub fn pop_first_matching(&mut self, tuple_name: &str) -> Option<PendingRequest> {
        let pos = self
            .order
            .iter()
            .position(|&key| matcher::matches(&self.entries[key].expr, tuple_name))?;
        let key = self.order.remove(pos).expect("position was just found");
        Some(self.entries.remove(key))
    }

    /// Drops every pending request, for use at shutdown.
    pub fn drain_all(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(port: u16) -> Origin {
        Origin {
            host: 0x7f000001,
            port,
            cidport: 0,
            proc_id: 1,
        }
    }

    #[test]
    fn fifo_head_wins_among_matching_requests() {
        let mut q = PendingQueue::new();
        q.push_back(PendingRequest {
            expr: "job".to_string(),
            kind: RequestKind::Get,
            origin: origin(1),
        });
        q.push_back(PendingRequest {
            expr: "job".to_string(),
            kind: RequestKind::Get,
            origin: origin(2),
        });
        let first = q.pop_first_matching("job").unwrap();
        assert_eq!(first.origin.port, 1);
        let second = q.pop_first_matching("job").unwrap();
        assert_eq!(second.origin.port, 2);
        assert!(q.pop_first_matching("job").is_none());
    }

    #[test]
    fn non_matching_requests_are_skipped_in_order() {
        let mut q = PendingQueue::new();
        q.push_back(PendingRequest {
            expr: "other".to_string(),
            kind: RequestKind::Read,
            origin: origin(1),
        });
        q.push_back(PendingRequest {
            expr: "job".to_string(),
            kind: RequestKind::Get,
            origin: origin(2),
        });
        let hit = q.pop_first_matching("job").unwrap();
        assert_eq!(hit.origin.port, 2);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let mut q = PendingQueue::new();
        q.push_back(PendingRequest {
            expr: "x".to_string(),
            kind: RequestKind::Read,
            origin: origin(1),
        });
        q.drain_all();
        assert!(q.is_empty());
    }
}
