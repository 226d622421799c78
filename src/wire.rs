// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Length-prefixed, big-endian framing for the tuple-space wire protocol.
//!
//! Every send is a full `write_all`; every receive is a full `read_exact`
//! of the exact structure size. A short read or write is treated as a
//! failed operation and the caller is expected to drop the connection.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::fail::Fail;
use crate::protocol::{
    ErrorCode, GetHeader, GetReply1, GetReply2, PutHeader, PutReply, Status, TUPLE_NAME_LEN,
};

/// Reads the exact number of bytes `buf` can hold, or fails.
pub fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), Fail> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Fail::ShortRead {
            expected: buf.len(),
            got: 0,
        },
        _ => Fail::from(e),
    })
}

/// Writes every byte in `buf`, or fails.
pub fn write_all<W: Write>(w: &mut W, buf: &[u8]) -> Result<(), Fail> {
    w.write_all(buf).map_err(Fail::from)
}

fn read_name<R: Read>(r: &mut R) -> Result<[u8; TUPLE_NAME_LEN], Fail> {
    let mut name = [0u8; TUPLE_NAME_LEN];
    read_exact(r, &mut name)?;
    Ok(name)
}

/// Reads the two-byte big-endian operation code that opens every
/// connection.
pub fn read_op_code<R: Read>(r: &mut R) -> Result<u16, Fail> {
    r.read_u16::<BigEndian>().map_err(Fail::from)
}

pub fn write_put_header<W: Write>(w: &mut W, h: &PutHeader) -> Result<(), Fail> {
    write_all(w, &h.name)?;
    w.write_u16::<BigEndian>(h.priority)?;
    w.write_u32::<BigEndian>(h.length)?;
    w.write_u32::<BigEndian>(h.host)?;
    w.write_u32::<BigEndian>(h.proc_id)?;
    Ok(())
}

pub fn read_put_header<R: Read>(r: &mut R) -> Result<PutHeader, Fail> {
    let name = read_name(r)?;
    let priority = r.read_u16::<BigEndian>()?;
    let length = r.read_u32::<BigEndian>()?;
    let host = r.read_u32::<BigEndian>()?;
    let proc_id = r.read_u32::<BigEndian>()?;
    Ok(PutHeader {
        name,
        priority,
        length,
        host,
        proc_id,
    })
}

pub fn write_put_reply<W: Write>(w: &mut W, reply: &PutReply) -> Result<(), Fail> {
    w.write_i16::<BigEndian>(reply.status.as_i16())?;
    w.write_i16::<BigEndian>(reply.error.as_i16())?;
    Ok(())
}

pub fn read_put_reply<R: Read>(r: &mut R) -> Result<PutReply, Fail> {
    let status = Status::from_i16(r.read_i16::<BigEndian>()?);
    let error = ErrorCode::from_i16(r.read_i16::<BigEndian>()?);
    Ok(PutReply { status, error })
}

pub fn write_get_header<W: Write>(w: &mut W, h: &GetHeader) -> Result<(), Fail> {
    write_all(w, &h.expr)?;
    w.write_u32::<BigEndian>(h.host)?;
    w.write_u16::<BigEndian>(h.port)?;
    w.write_u16::<BigEndian>(h.cidport)?;
    w.write_i32::<BigEndian>(h.proc_id)?;
    w.write_i32::<BigEndian>(h.len)?;
    Ok(())
}

pub fn read_get_header<R: Read>(r: &mut R) -> Result<GetHeader, Fail> {
    let expr = read_name(r)?;
    let host = r.read_u32::<BigEndian>()?;
    let port = r.read_u16::<BigEndian>()?;
    let cidport = r.read_u16::<BigEndian>()?;
    let proc_id = r.read_i32::<BigEndian>()?;
    let len = r.read_i32::<BigEndian>()?;
    Ok(GetHeader {
        expr,
        host,
        port,
        cidport,
        proc_id,
        len,
    })
}

pub fn write_get_reply1<W: Write>(w: &mut W, reply: &GetReply1) -> Result<(), Fail> {
    w.write_i16::<BigEndian>(reply.status.as_i16())?;
    w.write_i16::<BigEndian>(reply.error.as_i16())?;
    Ok(())
}

pub fn read_get_reply1<R: Read>(r: &mut R) -> Result<GetReply1, Fail> {
    let status = Status::from_i16(r.read_i16::<BigEndian>()?);
    let error = ErrorCode::from_i16(r.read_i16::<BigEndian>()?);
    Ok(GetReply1 { status, error })
}

pub fn write_get_reply2<W: Write>(w: &mut W, reply: &GetReply2) -> Result<(), Fail> {
    write_all(w, &reply.name)?;
    w.write_u32::<BigEndian>(reply.length)?;
    w.write_u16::<BigEndian>(reply.priority)?;
    Ok(())
}

pub fn read_get_reply2<R: Read>(r: &mut R) -> Result<GetReply2, Fail> {
    let name = read_name(r)?;
    let length = r.read_u32::<BigEndian>()?;
    let priority = r.read_u16::<BigEndian>()?;
    Ok(GetReply2 {
        name,
        length,
        priority,
    })
}
