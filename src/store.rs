// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! In-memory associative store of named, priority-tagged tuples.
//!
//! Tuple names are unique; a [`Store`] keeps a name-indexed map for O(1)
//! exact-name lookup (insertion/overwrite) alongside a `slab` arena that
//! preserves each tuple's original insertion sequence, so that priority
//! selection over wildcard expressions can still break ties in FIFO order
//! even after earlier tuples have been removed and their slots reused.

use slab::Slab;
use std::collections::HashMap;

use crate::matcher;

/// Opaque handle to a tuple held by a [`Store`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Handle(usize);

/// Outcome of [`Store::insert_or_replace`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
}

struct Entry {
    name: String,
    priority: u16,
    payload: Vec<u8>,
    seq: u64,
}

/// The tuple space's tuple store (component C).
#[derive(Default)]
pub struct Store {
    entries: Slab<Entry>,
    by_name: HashMap<String, usize>,
    next_seq: u64,
}

/// A borrowed view of a stored tuple, returned by [`Store::find_best`].
pub struct TupleView<'a> {
    pub handle: Handle,
    pub name: &'a str,
    pub priority: u16,
    pub payload: &'a [u8],
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new tuple or overwrites the existing one with this name.
    /// An overwrite keeps the original insertion sequence number, matching
    /// the original's "replacement is in place" semantics: overwriting a
    /// tuple does not let it jump the FIFO tie-break order.
    pub fn insert_or_replace(&mut self, name: &str, payload: Vec<u8>, priority: u16) -> PutOutcome {
        if let Some(&key) = self.by_name.get(name) {
            let entry = &mut self.entries[key];
            entry.payload = payload;
            entry.priority = priority;
            return PutOutcome::Replaced;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = self.entries.insert(Entry {
            name: name.to_string(),
            priority,
            payload,
            seq,
        });
        self.by_name.insert(name.to_string(), key);
        PutOutcome::Inserted
    }

    /// Finds the tuple matching `expr` with strictly highest priority;
    /// ties broken by earliest insertion. Does not remove the tuple.
    pub fn find_best(&self, expr: &str) -> Option<TupleView<'_>> {
        let mut best: Option<(usize, u16, u64)> = None;
        for (key, entry) in self.entries.iter() {
            if !matcher::matches(expr, &entry.name) {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, p, s)) => entry.priority > p || (entry.priority == p && entry.seq < s),
            };
            if better {
                best = Some((key, entry.priority, entry.seq));
            }
        }
        best.map(|(key, _, _)| {
            let entry = &self.entries[key];
            TupleView {
                handle: Handle(key),
                name: &entry.name,
                priority: entry.priority,
                payload: &entry.payload,
            }
        })
    }

    /// Removes the tuple behind `handle`, returning its name and payload.
    pub fn remove(&mut self, handle: Handle) -> (String, u16, Vec<u8>) {
        let entry = self.entries.remove(handle.0);
        self.by_name.remove(&entry.name);
        (entry.name, entry.priority, entry.payload)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
