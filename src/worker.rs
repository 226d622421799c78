// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Matrix-multiplication demonstrator worker (component G).
//!
//! Spawned by the master, claims `work_chunk_*` tuples destructively,
//! computes its assigned rows of `C = A * B`, and posts the results back.
//! See SPEC_FULL.md §4.G.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::chunk::ChunkSpan;
use crate::client::{Client, Fetch};
use crate::fail::Fail;
use crate::matrix::Matrix;
use crate::master::MATRIX_B_PATH;

/// A full pass over `[0, total_chunks)` claiming nothing this many times
/// in a row is this worker's signal to stop looking for more work.
const MISS_STREAK_LIMIT: u32 = 3;
/// Fraction of all chunks this worker must have personally completed
/// before it is allowed to post `all_work_complete` on giving up.
const COMPLETION_FRACTION_TO_SIGNAL: f64 = 0.6;
/// Hard lifetime cap regardless of progress.
const LIFETIME_CAP: Duration = Duration::from_secs(30);

pub struct WorkerConfig {
    pub port: u16,
    pub size: usize,
}

/// Runs the worker's claim loop until it gives up, is told the job is
/// done, or hits its lifetime cap.
pub fn run(config: WorkerConfig) -> Result<(), Fail> {
    let client = Client::new(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, config.port),
        std::process::id() as i32,
    );

    let b = Matrix::read_from(MATRIX_B_PATH).map_err(|e| Fail::Io { details: e.to_string() })?;

    let total_chunks = match client.read_async("total_chunks")? {
        Fetch::Found(t) if t.payload.len() == 4 => {
            i32::from_ne_bytes(t.payload[..4].try_into().expect("checked length")) as usize
        }
        _ => {
            warn!("total_chunks unavailable, falling back to a conservative estimate");
            config.size
        }
    };

    // Stands in for the original's SIGALRM-based lifetime cap: a
    // one-shot timer channel instead of a signal handler (SPEC_FULL.md §9).
    let expire = crossbeam_channel::after(LIFETIME_CAP);

    let mut miss_streak: u32 = 0;
    let mut chunks_completed: usize = 0;
    // Latched once the lifetime-cap channel fires: it only ever delivers
    // one message, so every later check must consult this instead of
    // re-polling an already-drained receiver.
    let mut expired = false;

    loop {
        if !expired && expire.try_recv().is_ok() {
            expired = true;
        }
        if expired {
            info!("worker hit its lifetime cap, exiting");
            break;
        }
        if matches!(client.read_async("all_work_complete")?, Fetch::Found(_)) {
            info!("saw all_work_complete, exiting");
            break;
        }

        let mut claimed_this_pass = false;
        for chunk_idx in 0..total_chunks {
            if !expired && expire.try_recv().is_ok() {
                expired = true;
            }
            if expired {
                break;
            }
            let claim = match client.get_async(&format!("work_chunk_{}", chunk_idx))? {
                Fetch::Found(t) => t,
                Fetch::NoTuple => continue,
            };
            let span = ChunkSpan::decode(&claim.payload)?;
            claimed_this_pass = true;
            miss_streak = 0;
            debug!("claimed work_chunk_{} ({:?})", chunk_idx, span);

            let rows: Vec<usize> = (span.start..span.start + span.rows).map(|r| r as usize).collect();

            // Up-front idempotence check against reissue: if every row in
            // this chunk already has a result, a peer finished it before
            // this reissued claim landed here, so there's nothing to do.
            let mut all_done = true;
            for &row in &rows {
                if !matches!(client.read(&format!("C_row_{}", row))?, Fetch::Found(_)) {
                    all_done = false;
                    break;
                }
            }
            if all_done {
                debug!("work_chunk_{} already fully computed, skipping", chunk_idx);
                chunks_completed += 1;
                continue;
            }

            for &row in &rows {
                // Per-row check immediately before computing: a peer may
                // have finished this specific row since the scan above.
                if matches!(client.read(&format!("C_row_{}", row))?, Fetch::Found(_)) {
                    continue;
                }
                let a_row = match client.read(&format!("A_row_{}", row))? {
                    Fetch::Found(t) => Matrix::decode_row(&t.payload)?,
                    Fetch::NoTuple => unreachable!("A_row_* is put before any work is issued"),
                };
                let c_row = multiply_row(&a_row, &b);
                client.put(&format!("C_row_{}", row), 1, &Matrix::encode_row(&c_row))?;
            }
            chunks_completed += 1;
        }

        if !claimed_this_pass {
            miss_streak += 1;
            if miss_streak >= MISS_STREAK_LIMIT {
                let did_enough = total_chunks > 0
                    && (chunks_completed as f64) >= COMPLETION_FRACTION_TO_SIGNAL * (total_chunks as f64);
                if did_enough {
                    info!("no work left after {} passes, signalling completion", miss_streak);
                    let _ = client.put("all_work_complete", 1, &[]);
                } else {
                    info!("no work left after {} passes, exiting quietly", miss_streak);
                }
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }

    Ok(())
}

/// `A_row * B` for a single row of `A`, independent of [`Matrix::multiply_row`]
/// so the worker does not need a full `Matrix` for its one row of `A`.
fn multiply_row(a_row: &[f64], b: &Matrix) -> Vec<f64> {
    let n = b.size;
    let mut out = vec![0.0; n];
    for (k, &a) in a_row.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        for j in 0..n {
            out[j] += a * b.get(k, j);
        }
    }
    out
}
