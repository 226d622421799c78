// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! `tsh`: a Linda-style tuple-space coordination service, its wire
//! protocol and client library, and a master/worker matrix-multiplication
//! demonstrator built on top of it.

pub mod chunk;
pub mod client;
pub mod fail;
pub mod master;
pub mod matcher;
pub mod matrix;
pub mod protocol;
pub mod queue;
pub mod retain;
pub mod server;
pub mod store;
pub mod wire;
pub mod worker;
