// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Retained-delivery bookkeeping: for each (host, process id) pair that has
//! been served a destructive `get`, remember the last tuple delivered to
//! it, plus a `fault` flag.
//!
//! No code in this crate ever sets `fault`; the field and [`RetainTable::is_guarded`]
//! are kept as the structure's documented extension point (SPEC_FULL.md §9).

use std::collections::HashMap;

/// Identifies a requester across connections: its claimed host address and
/// process id, as carried on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ClientKey {
    pub host: u32,
    pub proc_id: i32,
}

/// The last tuple delivered to a client via a destructive `get`.
#[derive(Clone, Debug)]
pub struct RetainedDelivery {
    pub name: String,
    pub priority: u16,
    pub payload: Vec<u8>,
    pub fault: bool,
}

/// Component: retained-delivery table (SPEC_FULL.md §3).
#[derive(Default)]
pub struct RetainTable {
    records: HashMap<ClientKey, RetainedDelivery>,
}

impl RetainTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a destructive delivery to `key`, overwriting any prior
    /// record for the same client. Returns whether a record already
    /// existed (the PUT/GET handlers report `OVERWRITE` in that case).
    pub fn record_delivery(&mut self, key: ClientKey, delivery: RetainedDelivery) -> bool {
        self.records.insert(key, delivery).is_some()
    }

    /// The guard check performed before honoring a PUT/GET/READ: true if
    /// this client's retained record is marked faulty.
    pub fn is_guarded(&self, key: ClientKey) -> bool {
        self.records.get(&key).map_or(false, |r| r.fault)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
