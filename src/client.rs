// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Client transport (component F): `put`/`read`/`get` against a `tsh`
//! server, each using one short-lived connection.
//!
//! A non-async `read`/`get` binds a second, passive listening socket
//! eagerly, before the request is even sent, so its port can be named in
//! the request header and there's no race against the server's
//! connect-back; it only `accept()`s on that socket lazily, if and when
//! the server actually replies `NOTUPLE`. An async request (`len == -1`)
//! never binds one: a miss is final.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};

use log::debug;

use crate::fail::Fail;
use crate::protocol::{self, ErrorCode, GetHeader, GetReply2, OpCode, PutHeader, RequestLength, Status};
use crate::wire;

/// A tuple retrieved by `read` or `get`.
#[derive(Clone, Debug)]
pub struct Tuple {
    pub name: String,
    pub priority: u16,
    pub payload: Vec<u8>,
}

/// Outcome of a `read`/`get` call.
#[derive(Clone, Debug)]
pub enum Fetch {
    Found(Tuple),
    NoTuple,
}

/// Connects to a `tsh` server at `addr` as a named client (`proc_id`
/// distinguishes multiple clients on the same host for retained-delivery
/// bookkeeping and delayed-delivery routing).
pub struct Client {
    server: SocketAddrV4,
    host: u32,
    proc_id: i32,
}

impl Client {
    pub fn new(server: SocketAddrV4, proc_id: i32) -> Self {
        Self {
            server,
            host: u32::from(Ipv4Addr::LOCALHOST),
            proc_id,
        }
    }

    /// Overrides the host address reported to the server (used by the
    /// demonstrator's worker processes, which may run on a different host
    /// than the master).
    pub fn with_host(mut self, host: Ipv4Addr) -> Self {
        self.host = u32::from(host);
        self
    }

    fn connect(&self) -> Result<TcpStream, Fail> {
        TcpStream::connect(self.server).map_err(Fail::from)
    }

    /// Stores `payload` under `name` with the given `priority`. Returns
    /// whether this overwrote an existing tuple of the same name.
    pub fn put(&self, name: &str, priority: u16, payload: &[u8]) -> Result<bool, Fail> {
        let mut stream = self.connect()?;
        stream.write_all_op(OpCode::Put)?;
        let header = PutHeader {
            name: protocol::pack_name(name)?,
            priority,
            length: payload.len() as u32,
            host: self.host,
            proc_id: self.proc_id as u32,
        };
        wire::write_put_header(&mut stream, &header)?;
        wire::write_all(&mut stream, payload)?;
        let reply = wire::read_put_reply(&mut stream)?;
        debug!("put {} -> {:?}/{}", name, reply.status, reply.error);
        match reply.error {
            ErrorCode::Overwrite => Ok(true),
            _ => Ok(false),
        }
    }

    /// Non-destructive lookup: the tuple stays in the space.
    pub fn read(&self, expr: &str) -> Result<Fetch, Fail> {
        self.fetch(expr, OpCode::Read, RequestLength::Full)
    }

    /// Destructive lookup: the matching tuple is removed from the space.
    pub fn get(&self, expr: &str) -> Result<Fetch, Fail> {
        self.fetch(expr, OpCode::Get, RequestLength::Full)
    }

    /// A `get` that never blocks: a miss returns [`Fetch::NoTuple`]
    /// immediately instead of being queued for delayed delivery.
    pub fn get_async(&self, expr: &str) -> Result<Fetch, Fail> {
        self.fetch(expr, OpCode::Get, RequestLength::Async)
    }

    /// A `read` that never blocks: used by the demonstrator's poll loops,
    /// which need to check repeatedly rather than wait for delivery.
    pub fn read_async(&self, expr: &str) -> Result<Fetch, Fail> {
        self.fetch(expr, OpCode::Read, RequestLength::Async)
    }

    fn fetch(&self, expr: &str, op: OpCode, len: RequestLength) -> Result<Fetch, Fail> {
        let listener = match len {
            RequestLength::Async => None,
            _ => Some(TcpListener::bind(SocketAddrV4::new(self.host_addr(), 0))?),
        };
        let return_port = match &listener {
            Some(l) => l.local_addr()?.port(),
            None => 0,
        };

        let mut stream = self.connect()?;
        stream.write_all_op(op)?;
        let header = GetHeader {
            expr: protocol::pack_name(expr)?,
            host: self.host,
            port: return_port,
            cidport: 0,
            proc_id: self.proc_id,
            len: len.as_i32(),
        };
        wire::write_get_header(&mut stream, &header)?;
        let reply1 = wire::read_get_reply1(&mut stream)?;

        if matches!(reply1.status, Status::Failure) {
            debug!("{:?} {} missed: {}", op, expr, reply1.error);
            let listener = match listener {
                Some(l) => l,
                None => return Ok(Fetch::NoTuple),
            };
            // Queued on the server; block for delayed delivery on our
            // listening socket, then read the unsolicited GetReply2 frame.
            let (mut delivery, _) = listener.accept()?;
            let reply2 = wire::read_get_reply2(&mut delivery)?;
            let mut payload = vec![0u8; reply2.length as usize];
            wire::read_exact(&mut delivery, &mut payload)?;
            return Ok(Fetch::Found(Tuple {
                name: protocol::unpack_name(&reply2.name),
                priority: reply2.priority,
                payload,
            }));
        }

        let reply2 = wire::read_get_reply2(&mut stream)?;
        let mut payload = vec![0u8; reply2.length as usize];
        wire::read_exact(&mut stream, &mut payload)?;
        Ok(Fetch::Found(Tuple {
            name: protocol::unpack_name(&reply2.name),
            priority: reply2.priority,
            payload,
        }))
    }

    fn host_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.host)
    }

    /// Tells the server to drain and exit. Matching the wire protocol's
    /// `EXIT` op, this has no payload and expects the ordinary reply
    /// frame back before the connection closes.
    pub fn request_exit(&self) -> Result<(), Fail> {
        let mut stream = self.connect()?;
        stream.write_all_op(OpCode::Exit)?;
        wire::read_put_reply(&mut stream)?;
        Ok(())
    }
}

trait WriteOpCode {
    fn write_all_op(&mut self, op: OpCode) -> Result<(), Fail>;
}

impl WriteOpCode for TcpStream {
    fn write_all_op(&mut self, op: OpCode) -> Result<(), Fail> {
        wire::write_all(self, &op.as_u16().to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use std::thread;
    use std::time::Duration;

    fn spawn_server() -> u16 {
        let mut server = Server::bind(0).unwrap();
        let port = server.local_port();
        thread::spawn(move || {
            let _ = server.run();
        });
        port
    }

    fn client(port: u16, proc_id: i32) -> Client {
        Client::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), proc_id)
    }

    #[test]
    fn put_then_get_round_trips_payload() {
        let port = spawn_server();
        thread::sleep(Duration::from_millis(20));
        let c = client(port, 1);
        let overwrote = c.put("greeting", 3, b"hello").unwrap();
        assert!(!overwrote);

        match c.get("greeting").unwrap() {
            Fetch::Found(t) => {
                assert_eq!(t.payload, b"hello");
                assert_eq!(t.priority, 3);
            }
            Fetch::NoTuple => panic!("expected a tuple"),
        }
    }

    #[test]
    fn async_get_miss_returns_immediately() {
        let port = spawn_server();
        thread::sleep(Duration::from_millis(20));
        let c = client(port, 2);
        match c.get_async("nope").unwrap() {
            Fetch::NoTuple => {}
            Fetch::Found(_) => panic!("did not expect a tuple"),
        }
    }

    #[test]
    fn blocking_read_receives_a_later_put() {
        let port = spawn_server();
        thread::sleep(Duration::from_millis(20));
        let reader = client(port, 3);
        let writer_port = port;

        let reader_thread = thread::spawn(move || reader.read("late"));
        thread::sleep(Duration::from_millis(50));
        let writer = client(writer_port, 4);
        writer.put("late", 1, b"delayed").unwrap();

        match reader_thread.join().unwrap().unwrap() {
            Fetch::Found(t) => assert_eq!(t.payload, b"delayed"),
            Fetch::NoTuple => panic!("expected delayed delivery"),
        }
    }
}
