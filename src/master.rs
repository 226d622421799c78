// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Matrix-multiplication demonstrator master (component G).
//!
//! Generates A and B, hands out A's rows and chunked work tuples over the
//! tuple space, spawns worker processes, and collects `C_row_*` results,
//! reissuing stale chunks and giving up on stragglers. See SPEC_FULL.md
//! §4.G for the coordination pattern this implements.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::chunk::ChunkSpan;
use crate::client::{Client, Fetch};
use crate::fail::Fail;
use crate::matrix::Matrix;

/// The path B is persisted to for workers to read directly.
pub const MATRIX_B_PATH: &str = "matrix_b.dat";
/// Results CSV the master appends one line to per run.
const RESULTS_CSV_PATH: &str = "matrix_performance.csv";
/// Reissue threshold, in seconds: a chunk not completed within this long
/// since its last issue is considered stale.
const REISSUE_AFTER: Duration = Duration::from_secs(4);
/// Stall thresholds (§4.G.8): generous once most rows are in, tighter
/// bound regardless of progress.
const STALL_PARTIAL: Duration = Duration::from_secs(5);
const STALL_PARTIAL_FRACTION: f64 = 0.8;
const STALL_ABSOLUTE: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct MasterConfig {
    pub port: u16,
    pub size: usize,
    pub granularity: usize,
}

struct ChunkState {
    span: ChunkSpan,
    issued_at: Instant,
    attempts: u32,
    completed: bool,
}

/// The matrices a run produced: the two random operands and the result
/// assembled from worker output, in case a caller wants to check it
/// against a direct in-process multiply.
pub struct MasterResult {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    pub rows_collected: usize,
}

/// Runs the master end to end: generate, distribute, spawn, collect,
/// clean up, report. Returns once the multiplication is resolved (either
/// completed or given up on via the stall handler).
pub fn run(config: MasterConfig) -> Result<MasterResult, Fail> {
    let total_start = Instant::now();
    let client = Client::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, config.port), std::process::id() as i32);

    let n = config.size;
    let a = Matrix::random(n, 1);
    let b = Matrix::random(n, 2);
    b.write_to(MATRIX_B_PATH)
        .map_err(|e| Fail::Io { details: e.to_string() })?;

    for i in 0..n {
        client.put(&format!("A_row_{}", i), 1, &Matrix::encode_row(a.row(i)))?;
    }

    let mut chunks = Vec::new();
    let g = config.granularity.max(1);
    let mut start = 0usize;
    while start < n {
        let rows = g.min(n - start);
        chunks.push(ChunkState {
            span: ChunkSpan {
                start: start as i32,
                rows: rows as i32,
            },
            issued_at: Instant::now(),
            attempts: 0,
            completed: false,
        });
        start += rows;
    }
    for (k, chunk) in chunks.iter().enumerate() {
        client.put(&format!("work_chunk_{}", k), 1, &chunk.span.encode())?;
    }
    client.put("total_chunks", 1, &(chunks.len() as i32).to_ne_bytes())?;
    info!("distributed {} rows across {} chunks", n, chunks.len());

    let worker_count = chunks
        .len()
        .min(thread::available_parallelism().map(|p| p.get()).unwrap_or(1));
    let children = spawn_workers(config.port, n, worker_count)?;

    // Stands in for the original's SIGALRM: a dedicated ticking channel
    // instead of a signal handler (SPEC_FULL.md §9).
    let reissue_tick = crossbeam_channel::tick(REISSUE_AFTER / 2);

    let mult_start = Instant::now();
    let mut c = Matrix::zeros(n);
    let mut collected = vec![false; n];
    let mut collected_count = 0usize;
    let mut last_progress = Instant::now();

    loop {
        let mut progressed = false;
        for i in 0..n {
            if collected[i] {
                continue;
            }
            if let Fetch::Found(t) = client.read_async(&format!("C_row_{}", i))? {
                let row = Matrix::decode_row(&t.payload)?;
                for (j, v) in row.into_iter().enumerate() {
                    c.set(i, j, v);
                }
                collected[i] = true;
                collected_count += 1;
                progressed = true;
                let owning_chunk = i / g;
                if let Some(chunk) = chunks.get_mut(owning_chunk) {
                    let span = chunk.span;
                    let chunk_done = (span.start as usize..span.start as usize + span.rows as usize)
                        .all(|r| collected[r]);
                    chunk.completed = chunk_done;
                }
            }
        }
        if progressed {
            last_progress = Instant::now();
        }

        if collected_count == n {
            break;
        }

        if reissue_tick.try_recv().is_ok() {
            for (k, chunk) in chunks.iter_mut().enumerate() {
                if chunk.completed {
                    continue;
                }
                if chunk.issued_at.elapsed() >= REISSUE_AFTER {
                    chunk.attempts += 1;
                    chunk.issued_at = Instant::now();
                    let priority = 1 + chunk.attempts as u16;
                    client.put(&format!("work_chunk_{}", k), priority, &chunk.span.encode())?;
                    warn!("reissued work_chunk_{} at priority {}", k, priority);
                }
            }
        }

        let stalled_partial = last_progress.elapsed() >= STALL_PARTIAL
            && (collected_count as f64) >= STALL_PARTIAL_FRACTION * (n as f64);
        let stalled_absolute = last_progress.elapsed() >= STALL_ABSOLUTE;
        if stalled_partial || stalled_absolute {
            warn!(
                "stalled with {}/{} rows collected, zero-filling the rest",
                collected_count, n
            );
            break;
        }

        thread::sleep(POLL_INTERVAL);
    }
    let mult_time = mult_start.elapsed();

    for child in children {
        reap(child);
    }
    drain_tuple_space(&client, n, chunks.len());

    let total_time = total_start.elapsed();
    append_csv_record(config.size, config.granularity, total_time, mult_time)
        .map_err(|e| Fail::Io { details: e.to_string() })?;

    Ok(MasterResult {
        a,
        b,
        c,
        rows_collected: collected_count,
    })
}

fn spawn_workers(port: u16, size: usize, count: usize) -> Result<Vec<Child>, Fail> {
    let worker_exe = worker_binary_path()?;
    let mut children = Vec::with_capacity(count);
    for _ in 0..count {
        let child = Command::new(&worker_exe)
            .arg(port.to_string())
            .arg(size.to_string())
            .spawn()
            .map_err(Fail::from)?;
        children.push(child);
    }
    Ok(children)
}

/// Where to find the `matrix_worker` binary to spawn. Defaults to the
/// sibling of this process's own executable (how `cargo run`/`cargo
/// install` lay out the three bins); `TSH_WORKER_EXE` overrides this for
/// integration tests, whose test harness binary does not live next to
/// the package's other bin targets.
fn worker_binary_path() -> Result<std::path::PathBuf, Fail> {
    if let Ok(path) = std::env::var("TSH_WORKER_EXE") {
        return Ok(std::path::PathBuf::from(path));
    }
    let exe = std::env::current_exe().map_err(Fail::from)?;
    Ok(exe.with_file_name("matrix_worker"))
}

fn reap(mut child: Child) {
    match child.wait() {
        Ok(status) => info!("worker {} exited: {}", child.id(), status),
        Err(e) => warn!("failed to reap worker {}: {}", child.id(), e),
    }
}

/// Destructively drains every tuple name the master or its workers could
/// have created, including `B_row_*`, which this implementation never
/// actually populates (B is shared via [`MATRIX_B_PATH`] instead) but is
/// kept in the cleanup sweep for parity with the original's tuple names.
fn drain_tuple_space(client: &Client, rows: usize, chunk_count: usize) {
    for i in 0..rows {
        let _ = client.get_async(&format!("A_row_{}", i));
        let _ = client.get_async(&format!("B_row_{}", i));
        let _ = client.get_async(&format!("C_row_{}", i));
    }
    for k in 0..chunk_count {
        let _ = client.get_async(&format!("work_chunk_{}", k));
    }
    let _ = client.get_async("total_chunks");
    let _ = client.get_async("all_work_complete");
}

fn append_csv_record(size: usize, granularity: usize, total: Duration, mult: Duration) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(RESULTS_CSV_PATH)?;
    writeln!(
        file,
        "{},{},{:.6},{:.6}",
        size,
        granularity,
        total.as_secs_f64(),
        mult.as_secs_f64()
    )
}
