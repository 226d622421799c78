// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use custom_error::custom_error;

use crate::protocol::ErrorCode;

custom_error! {
    /// Crate-wide error type. Every fallible operation in the server, the
    /// client transport and the demonstrator binaries reports failure
    /// through this type.
    pub Fail

    Io{details: String} = "I/O error: {details}",
    ShortRead{expected: usize, got: usize} = "short read: expected {expected} bytes, got {got}",
    ShortWrite{expected: usize, got: usize} = "short write: expected {expected} bytes, wrote {got}",
    NameTooLong{len: usize} = "tuple/expression name of {len} bytes exceeds the fixed field width",
    Protocol{code: ErrorCode} = "protocol failure: {code}",
    BadOpCode{code: u16} = "operation code {code} is outside the accepted range",
    NoMemory = "resource exhaustion (NOMEM)",
}

impl From<std::io::Error> for Fail {
    fn from(e: std::io::Error) -> Self {
        Fail::Io { details: e.to_string() }
    }
}
