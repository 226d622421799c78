// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Request dispatcher (component E): the single-threaded accept loop plus
//! the PUT/GET/READ/EXIT handlers.
//!
//! One connection is served at a time, start to close, matching the
//! original's discipline (SPEC_FULL.md §5): the store, queue and retain
//! table are plain owned fields on [`Server`], not behind a mutex.

use std::io::{BufWriter, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};

use log::{debug, info, warn};

use crate::fail::Fail;
use crate::protocol::{
    self, ErrorCode, GetHeader, GetReply1, GetReply2, OpCode, PutHeader, PutReply, RequestLength,
    Status,
};
use crate::queue::{Origin, PendingQueue, PendingRequest, RequestKind};
use crate::retain::{ClientKey, RetainTable, RetainedDelivery};
use crate::store::Store;
use crate::wire;

/// Owns the tuple space: the store, the pending-request queue and the
/// retained-delivery bookkeeping.
#[derive(Default)]
struct Space {
    store: Store,
    queue: PendingQueue,
    retain: RetainTable,
}

/// What the accept loop should do after a connection closes.
enum ConnOutcome {
    Continue,
    Shutdown,
}

/// The tuple-space server.
pub struct Server {
    listener: TcpListener,
    space: Space,
}

impl Server {
    /// Binds `port` on all interfaces.
    pub fn bind(port: u16) -> Result<Self, Fail> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(addr)?;
        info!("tsh listening on port {}", listener.local_addr()?.port());
        Ok(Self {
            listener,
            space: Space::default(),
        })
    }

    /// The port actually bound, useful when [`Server::bind`] was given `0`.
    pub fn local_port(&self) -> u16 {
        self.listener
            .local_addr()
            .expect("bound listener always has a local address")
            .port()
    }

    /// Runs the accept loop until an `EXIT` operation or an I/O failure on
    /// the listener itself. Drains the store and queue before returning,
    /// matching `deleteSpace`/`deleteQueue` at shutdown.
    pub fn run(&mut self) -> Result<(), Fail> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return Err(Fail::from(e));
                }
            };
            debug!("accepted connection from {}", peer);
            match self.serve_connection(stream) {
                Ok(ConnOutcome::Continue) => continue,
                Ok(ConnOutcome::Shutdown) => break,
                Err(e) => {
                    debug!("connection from {} failed: {}", peer, e);
                    continue;
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Drains the store and pending queue, as on `SIGTERM`/`EXIT`.
    pub fn shutdown(&mut self) {
        info!("tsh shutting down, draining tuple space");
        self.space.queue.drain_all();
        while !self.space.store.is_empty() {
            if let Some(v) = self.space.store.find_best("*") {
                let handle = v.handle;
                self.space.store.remove(handle);
            } else {
                break;
            }
        }
    }

    fn serve_connection(&mut self, mut stream: TcpStream) -> Result<ConnOutcome, Fail> {
        let code = wire::read_op_code(&mut stream)?;
        let op = match OpCode::from_u16(code) {
            Some(op) => op,
            None => {
                debug!("rejecting out-of-range op code {}", code);
                return Ok(ConnOutcome::Continue);
            }
        };
        match op {
            OpCode::Put => {
                self.handle_put(&mut stream)?;
                Ok(ConnOutcome::Continue)
            }
            OpCode::Get => {
                self.handle_get(&mut stream, RequestKind::Get)?;
                Ok(ConnOutcome::Continue)
            }
            OpCode::Read => {
                self.handle_get(&mut stream, RequestKind::Read)?;
                Ok(ConnOutcome::Continue)
            }
            OpCode::Exit => {
                self.handle_exit(&mut stream)?;
                Ok(ConnOutcome::Shutdown)
            }
        }
    }

    fn handle_put(&mut self, stream: &mut TcpStream) -> Result<(), Fail> {
        let header = wire::read_put_header(stream)?;
        let name = protocol::unpack_name(&header.name);
        info!("storing tuple: {}", name);

        let key = ClientKey {
            host: header.host,
            proc_id: header.proc_id as i32,
        };
        if self.space.retain.is_guarded(key) {
            debug!("guard rejected put from {:?}", key);
            return Ok(());
        }

        let mut payload = vec![0u8; header.length as usize];
        wire::read_exact(stream, &mut payload)?;

        let reply = self.satisfy_or_store(&name, header.priority, payload);
        wire::write_put_reply(stream, &reply)
    }

    /// Attempts to satisfy one pending request with this tuple; if none
    /// consumes it, stores it. Mirrors `consumeTuple`/`storeTuple`.
    fn satisfy_or_store(&mut self, name: &str, priority: u16, payload: Vec<u8>) -> PutReply {
        loop {
            let request = match self.space.queue.pop_first_matching(name) {
                Some(r) => r,
                None => break,
            };
            let delivered = deliver(&request.origin, name, priority, &payload);
            if !delivered {
                warn!("delayed delivery to {:?} failed, tuple dropped", request.origin);
            }
            match request.kind {
                RequestKind::Get => {
                    let dest_key = ClientKey {
                        host: request.origin.host,
                        proc_id: request.origin.proc_id,
                    };
                    let overwritten = self.space.retain.record_delivery(
                        dest_key,
                        RetainedDelivery {
                            name: name.to_string(),
                            priority,
                            payload,
                            fault: false,
                        },
                    );
                    let error = if overwritten {
                        ErrorCode::Overwrite
                    } else {
                        ErrorCode::NoError
                    };
                    return PutReply {
                        status: Status::Success,
                        error,
                    };
                }
                RequestKind::Read => {
                    // READ does not consume: keep looking for further
                    // matching pending requests, then fall through to
                    // store the tuple once none remain.
                    continue;
                }
            }
        }
        let outcome = self.space.store.insert_or_replace(name, payload, priority);
        let error = match outcome {
            crate::store::PutOutcome::Inserted => ErrorCode::NoError,
            crate::store::PutOutcome::Replaced => ErrorCode::Overwrite,
        };
        PutReply {
            status: Status::Success,
            error,
        }
    }

    fn handle_get(&mut self, stream: &mut TcpStream, kind: RequestKind) -> Result<(), Fail> {
        let header = wire::read_get_header(stream)?;
        let expr = protocol::unpack_name(&header.expr);
        debug!("received {:?} request for: {}", kind, expr);

        let key = ClientKey {
            host: header.host,
            proc_id: header.proc_id,
        };
        if self.space.retain.is_guarded(key) {
            debug!("guard rejected {:?} from {:?}", kind, key);
            return Ok(());
        }

        let request_len = RequestLength::from_i32(header.len);
        let handle = self.space.store.find_best(&expr).map(|v| v.handle);

        let handle = match handle {
            None => {
                if !matches!(request_len, RequestLength::Async) {
                    self.space.queue.push_back(PendingRequest {
                        expr: expr.clone(),
                        kind,
                        origin: Origin {
                            host: header.host,
                            port: header.port,
                            cidport: header.cidport,
                            proc_id: header.proc_id,
                        },
                    });
                }
                wire::write_get_reply1(
                    stream,
                    &GetReply1 {
                        status: Status::Failure,
                        error: ErrorCode::NoTuple,
                    },
                )?;
                return Ok(());
            }
            Some(h) => h,
        };

        wire::write_get_reply1(
            stream,
            &GetReply1 {
                status: Status::Success,
                error: ErrorCode::NoError,
            },
        )?;

        let (name, priority, payload, full_len) = {
            let v = self.space.store.find_best(&expr).expect("handle just resolved");
            (
                v.name.to_string(),
                v.priority,
                v.payload.to_vec(),
                v.payload.len() as u32,
            )
        };
        let send_len = match request_len {
            RequestLength::Truncate(n) if n < full_len => n,
            _ => full_len,
        };
        wire::write_get_reply2(
            stream,
            &GetReply2 {
                name: protocol::pack_name(&name)?,
                length: send_len,
                priority,
            },
        )?;
        wire::write_all(stream, &payload[..send_len as usize])?;

        if matches!(kind, RequestKind::Get) {
            self.space.store.remove(handle);
            info!("deleted tuple: {}", name);
            self.space.retain.record_delivery(
                key,
                RetainedDelivery {
                    name,
                    priority,
                    payload,
                    fault: false,
                },
            );
        }
        Ok(())
    }

    fn handle_exit(&mut self, stream: &mut TcpStream) -> Result<(), Fail> {
        wire::write_put_reply(
            stream,
            &PutReply {
                status: Status::Success,
                error: ErrorCode::NoError,
            },
        )
    }
}

/// Connects back to a pending requester's listening socket and delivers
/// the tuple as an unsolicited frame (no leading status word). Returns
/// whether delivery succeeded; a failed delivery silently drops the
/// tuple, matching the original's documented fragility
/// (SPEC_FULL.md §9).
fn deliver(origin: &Origin, name: &str, priority: u16, payload: &[u8]) -> bool {
    let addr = SocketAddrV4::new(Ipv4Addr::from(origin.host), origin.port);
    let stream = match TcpStream::connect(addr) {
        Ok(s) => s,
        Err(e) => {
            warn!("could not connect to deliver tuple to {}: {}", addr, e);
            return false;
        }
    };
    let mut writer = BufWriter::new(stream);
    let packed_name = match protocol::pack_name(name) {
        Ok(n) => n,
        Err(_) => return false,
    };
    let reply = GetReply2 {
        name: packed_name,
        length: payload.len() as u32,
        priority,
    };
    if wire::write_get_reply2(&mut writer, &reply).is_err() {
        return false;
    }
    if wire::write_all(&mut writer, payload).is_err() {
        return false;
    }
    writer.flush().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;
    use std::io::{Read, Write};
    use std::net::TcpStream as StdStream;
    use std::thread;
    use std::time::Duration;

    fn spawn_server() -> (thread::JoinHandle<()>, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut server = Server {
            listener,
            space: Space::default(),
        };
        let handle = thread::spawn(move || {
            let _ = server.run();
        });
        (handle, port)
    }

    fn connect(port: u16) -> StdStream {
        for _ in 0..50 {
            if let Ok(s) = StdStream::connect(("127.0.0.1", port)) {
                return s;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("could not connect to test server");
    }

    fn send_put(port: u16, name: &str, priority: u16, payload: &[u8]) -> PutReply {
        let mut s = connect(port);
        s.write_all(&OpCode::Put.as_u16().to_be_bytes()).unwrap();
        let header = PutHeader {
            name: protocol::pack_name(name).unwrap(),
            priority,
            length: payload.len() as u32,
            host: u32::from(Ipv4Addr::LOCALHOST),
            proc_id: std::process::id(),
        };
        wire::write_put_header(&mut s, &header).unwrap();
        wire::write_all(&mut s, payload).unwrap();
        wire::read_put_reply(&mut s).unwrap()
    }

    fn send_get(port: u16, expr: &str, kind: RequestKind) -> Result<(GetReply2, Vec<u8>), ErrorCode> {
        let mut s = connect(port);
        let code = match kind {
            RequestKind::Get => OpCode::Get,
            RequestKind::Read => OpCode::Read,
        };
        s.write_all(&code.as_u16().to_be_bytes()).unwrap();
        let header = GetHeader {
            expr: protocol::pack_name(expr).unwrap(),
            host: u32::from(Ipv4Addr::LOCALHOST),
            port: 0,
            cidport: 0,
            proc_id: std::process::id() as i32,
            len: RequestLength::Async.as_i32(),
        };
        wire::write_get_header(&mut s, &header).unwrap();
        let reply1 = wire::read_get_reply1(&mut s).unwrap();
        if matches!(reply1.status, Status::Failure) {
            return Err(reply1.error);
        }
        let reply2 = wire::read_get_reply2(&mut s).unwrap();
        let mut payload = vec![0u8; reply2.length as usize];
        s.read_exact(&mut payload).unwrap();
        Ok((reply2, payload))
    }

    #[test]
    fn put_then_read_then_get_then_notuple() {
        let (_h, port) = spawn_server();
        let reply = send_put(port, "t", 10, b"hi");
        assert_eq!(reply.error, ErrorCode::NoError);

        let (_, payload) = send_get(port, "t", RequestKind::Read).unwrap();
        assert_eq!(payload, b"hi");

        let (_, payload) = send_get(port, "t", RequestKind::Get).unwrap();
        assert_eq!(payload, b"hi");

        let err = send_get(port, "t", RequestKind::Read).unwrap_err();
        assert_eq!(err, ErrorCode::NoTuple);
    }

    #[test]
    fn overwrite_reports_and_keeps_latest_value() {
        let (_h, port) = spawn_server();
        let first = send_put(port, "x", 1, b"A");
        assert_eq!(first.error, ErrorCode::NoError);
        let second = send_put(port, "x", 5, b"B");
        assert_eq!(second.error, ErrorCode::Overwrite);

        let (meta, payload) = send_get(port, "x", RequestKind::Get).unwrap();
        assert_eq!(payload, b"B");
        assert_eq!(meta.priority, 5);
    }

    #[test]
    fn priority_selection_across_distinct_names() {
        let (_h, port) = spawn_server();
        send_put(port, "a", 1, b"va");
        send_put(port, "b", 5, b"vb");
        let (_, payload) = send_get(port, "?", RequestKind::Read).unwrap();
        assert_eq!(payload, b"vb");
    }

    #[test]
    fn pending_delivery_reaches_a_listening_client() {
        let (_h, port) = spawn_server();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let return_port = listener.local_addr().unwrap().port();

        // Client A issues a synchronous (non-async) read that misses and
        // is queued, naming `return_port` as its delayed-delivery target.
        let reader = thread::spawn(move || {
            let mut s = connect(port);
            s.write_all(&OpCode::Read.as_u16().to_be_bytes()).unwrap();
            let header = GetHeader {
                expr: protocol::pack_name("late").unwrap(),
                host: u32::from(Ipv4Addr::LOCALHOST),
                port: return_port,
                cidport: 0,
                proc_id: 1,
                len: RequestLength::Full.as_i32(),
            };
            wire::write_get_header(&mut s, &header).unwrap();
            wire::read_get_reply1(&mut s).unwrap()
        });

        thread::sleep(Duration::from_millis(50));
        send_put(port, "late", 1, b"ok");

        let reply1 = reader.join().unwrap();
        assert_eq!(reply1.error, ErrorCode::NoTuple);

        let (delivery_stream, _) = listener.accept().unwrap();
        let mut delivery_stream = delivery_stream;
        let reply2 = wire::read_get_reply2(&mut delivery_stream).unwrap();
        let mut payload = vec![0u8; reply2.length as usize];
        delivery_stream.read_exact(&mut payload).unwrap();
        assert_eq!(payload, b"ok");
    }

    #[test]
    fn destructive_get_is_claimed_by_exactly_one_of_several_pending_getters() {
        let (_h, port) = spawn_server();
        let listeners: Vec<TcpListener> = (0..4)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let ports: Vec<u16> = listeners.iter().map(|l| l.local_addr().unwrap().port()).collect();

        let mut joins = Vec::new();
        for &p in &ports {
            joins.push(thread::spawn(move || {
                let mut s = connect(port);
                s.write_all(&OpCode::Get.as_u16().to_be_bytes()).unwrap();
                let header = GetHeader {
                    expr: protocol::pack_name("job").unwrap(),
                    host: u32::from(Ipv4Addr::LOCALHOST),
                    port: p,
                    cidport: 0,
                    proc_id: p as i32,
                    len: RequestLength::Full.as_i32(),
                };
                wire::write_get_header(&mut s, &header).unwrap();
                wire::read_get_reply1(&mut s).unwrap()
            }));
        }
        thread::sleep(Duration::from_millis(50));
        send_put(port, "job", 1, b"payload");

        let mut misses = 0;
        for j in joins {
            let reply1 = j.join().unwrap();
            if matches!(reply1.status, Status::Failure) {
                misses += 1;
            }
        }
        assert_eq!(misses, 3);

        let mut deliveries = 0;
        for l in listeners {
            l.set_nonblocking(true).unwrap();
            if l.accept().is_ok() {
                deliveries += 1;
            }
        }
        assert_eq!(deliveries, 1);
    }
}
