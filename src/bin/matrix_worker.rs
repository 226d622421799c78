// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! `matrix_worker <port> <size>`: spawned by `matrix_master`, not
//! typically invoked by hand.

use std::process::ExitCode;

use flexi_logger::Logger;
use log::error;

use tsh::worker::{self, WorkerConfig};

fn main() -> ExitCode {
    Logger::try_with_env_or_str("info")
        .expect("invalid RUST_LOG filter")
        .start()
        .expect("failed to start logger");

    let mut args = std::env::args().skip(1);
    let (port, size) = match (args.next(), args.next()) {
        (Some(p), Some(s)) => match (p.parse(), s.parse()) {
            (Ok(p), Ok(s)) => (p, s),
            _ => {
                eprintln!("usage: matrix_worker <port> <size>");
                return ExitCode::FAILURE;
            }
        },
        _ => {
            eprintln!("usage: matrix_worker <port> <size>");
            return ExitCode::FAILURE;
        }
    };

    let config = WorkerConfig { port, size };
    if let Err(e) = worker::run(config) {
        error!("worker failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
