// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! `matrix_master <port> [size] [granularity]`: generates A and B,
//! distributes work over a running `tsh` server, and collects `C = A*B`.

use std::process::ExitCode;

use flexi_logger::Logger;
use log::error;

use tsh::master::{self, MasterConfig};

const DEFAULT_SIZE: usize = 8192;
const DEFAULT_GRANULARITY: usize = 1;

fn main() -> ExitCode {
    Logger::try_with_env_or_str("info")
        .expect("invalid RUST_LOG filter")
        .start()
        .expect("failed to start logger");

    let mut args = std::env::args().skip(1);
    let port: u16 = match args.next().and_then(|a| a.parse().ok()) {
        Some(p) => p,
        None => {
            eprintln!("usage: matrix_master <port> [size] [granularity]");
            return ExitCode::FAILURE;
        }
    };
    let size = args.next().and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_SIZE);
    let granularity = args
        .next()
        .and_then(|a| a.parse().ok())
        .unwrap_or(DEFAULT_GRANULARITY);

    let config = MasterConfig { port, size, granularity };
    match master::run(config) {
        Ok(result) => {
            log::info!("collected {} rows", result.rows_collected);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("master failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
