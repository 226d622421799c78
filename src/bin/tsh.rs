// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! `tsh <port>`: runs the tuple-space server until it receives an `EXIT`
//! operation.

use std::process::ExitCode;

use flexi_logger::Logger;
use log::error;

use tsh::server::Server;

fn main() -> ExitCode {
    Logger::try_with_env_or_str("info")
        .expect("invalid RUST_LOG filter")
        .start()
        .expect("failed to start logger");

    let port: u16 = match std::env::args().nth(1).and_then(|a| a.parse().ok()) {
        Some(p) => p,
        None => {
            eprintln!("usage: tsh <port>");
            return ExitCode::FAILURE;
        }
    };

    let mut server = match Server::bind(port) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to bind port {}: {}", port, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run() {
        error!("server loop exited with an error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
