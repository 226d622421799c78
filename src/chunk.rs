// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Wire encoding of a `work_chunk_*` tuple's payload: the contiguous row
//! range `[start, start + rows)` of matrix A a worker should claim.

use crate::fail::Fail;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkSpan {
    pub start: i32,
    pub rows: i32,
}

impl ChunkSpan {
    pub fn encode(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.start.to_ne_bytes());
        buf.extend_from_slice(&self.rows.to_ne_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Fail> {
        if bytes.len() != 8 {
            return Err(Fail::ShortRead {
                expected: 8,
                got: bytes.len(),
            });
        }
        let start = i32::from_ne_bytes(bytes[0..4].try_into().expect("checked length"));
        let rows = i32::from_ne_bytes(bytes[4..8].try_into().expect("checked length"));
        Ok(ChunkSpan { start, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let span = ChunkSpan { start: 16, rows: 4 };
        let encoded = span.encode();
        assert_eq!(ChunkSpan::decode(&encoded).unwrap(), span);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(ChunkSpan::decode(&[0u8; 4]).is_err());
    }
}
