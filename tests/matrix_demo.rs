// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! S6: the matrix demonstrator, driven end to end. The master runs
//! in-process; its workers are real spawned `matrix_worker` processes,
//! talking to the master only through the tuple space over TCP
//! (SPEC_FULL.md §4.G). `TSH_WORKER_EXE` points the master at the
//! worker binary Cargo just built for this test, since a test
//! harness's own executable does not sit next to the package's bin
//! targets the way `cargo run`'s output does.

use std::env;
use std::thread;
use std::time::Duration;

use tsh::master::{self, MasterConfig};
use tsh::server::Server;

const N: usize = 128;
const GRANULARITY: usize = 16;
const TOLERANCE: f64 = 1e-9;

#[test]
fn s6_matrix_demonstrator_matches_direct_multiply() {
    env::set_var("TSH_WORKER_EXE", env!("CARGO_BIN_EXE_matrix_worker"));

    let mut server = Server::bind(0).expect("bind loopback port");
    let port = server.local_port();
    thread::spawn(move || {
        let _ = server.run();
    });
    thread::sleep(Duration::from_millis(20));

    let result = master::run(MasterConfig {
        port,
        size: N,
        granularity: GRANULARITY,
    })
    .expect("master run failed");

    assert_eq!(
        result.rows_collected, N,
        "every row should have been collected from the workers, not zero-filled"
    );

    let expected = result.a.multiply(&result.b);
    for i in 0..N {
        for j in 0..N {
            let got = result.c.get(i, j);
            let want = expected.get(i, j);
            assert!(
                (got - want).abs() <= TOLERANCE,
                "row {} col {}: got {}, want {}",
                i,
                j,
                got,
                want
            );
        }
    }
}
