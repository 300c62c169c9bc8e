// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::endpoint::Endpoint;
use crate::packet::{PACKET_HEADER_SIZE, Packet, PacketHeader};
use crate::transport::Transport;
use soul_task::{Task, TaskScheduler};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};

/// Upper bound on a framed payload; larger length prefixes are treated as
/// corrupt and kill the frame.
const MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Reliable-stream transport in courier mode: every frame travels over its
/// own short-lived connection.
///
/// `bind` opens a non-blocking listener. A receive accepts at most one
/// pending connection, reads a single `[len][header][payload]` frame and
/// closes it; a send opens a fresh outbound connection, writes one frame
/// and closes. Partial reads or writes within a frame are fatal for that
/// frame only.
pub struct TcpTransport {
    scheduler: Arc<TaskScheduler>,
    listener: Mutex<Option<Arc<TcpListener>>>,
}

impl TcpTransport {
    #[must_use]
    pub fn new(scheduler: Arc<TaskScheduler>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            listener: Mutex::new(None),
        })
    }

    /// The listener's local endpoint. Useful with port-zero binds.
    #[must_use]
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        let listener = self.current_listener()?;
        match listener.local_addr() {
            Ok(SocketAddr::V4(addr)) => Some(Endpoint::from(addr)),
            _ => None,
        }
    }

    fn current_listener(&self) -> Option<Arc<TcpListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn send_frame(endpoint: &Endpoint, packet: &Packet) -> io::Result<()> {
    let mut stream = TcpStream::connect(endpoint.socket_addr())?;

    let payload_len = u32::try_from(packet.payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    stream.write_all(&payload_len.to_le_bytes())?;
    stream.write_all(&packet.header.encode())?;
    stream.write_all(&packet.payload)?;
    stream.flush()
}

fn receive_frame(listener: &TcpListener) -> Option<(Endpoint, Packet)> {
    // Zero-timeout poll: the listener is non-blocking, so an empty backlog
    // reports WouldBlock.
    let (stream, peer) = match listener.accept() {
        Ok(accepted) => accepted,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
        Err(err) => {
            tracing::trace!(%err, "tcp accept failed");
            return None;
        }
    };

    let SocketAddr::V4(peer) = peer else {
        return None;
    };

    match read_frame(stream) {
        Ok(packet) => Some((Endpoint::from(peer), packet)),
        Err(err) => {
            tracing::trace!(peer = %peer, %err, "tcp frame receive failed");
            None
        }
    }
}

fn read_frame(mut stream: TcpStream) -> io::Result<Packet> {
    // The accepted stream inherits the listener's non-blocking flag; the
    // frame read itself is blocking.
    stream.set_nonblocking(false)?;

    let mut len_bytes = [0_u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let payload_len = u32::from_le_bytes(len_bytes);
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length exceeds sanity cap",
        ));
    }

    let mut header_bytes = [0_u8; PACKET_HEADER_SIZE];
    stream.read_exact(&mut header_bytes)?;

    let mut payload = vec![0_u8; payload_len as usize];
    stream.read_exact(&mut payload)?;

    Ok(Packet {
        header: PacketHeader::decode(&header_bytes),
        payload,
    })
}

impl Transport for TcpTransport {
    fn bind(&self, endpoint: Endpoint) -> bool {
        let bound = TcpListener::bind(SocketAddrV4::new(endpoint.ip(), endpoint.port()))
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            });
        match bound {
            Ok(listener) => {
                *self
                    .listener
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
                true
            }
            Err(err) => {
                tracing::debug!(%endpoint, %err, "tcp bind failed");
                false
            }
        }
    }

    fn close(&self) {
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn send_now(&self, endpoint: &Endpoint, packet: &Packet) {
        if let Err(err) = send_frame(endpoint, packet) {
            tracing::trace!(%endpoint, %err, "tcp send failed");
        }
    }

    fn try_receive(&self) -> Option<(Endpoint, Packet)> {
        let listener = self.current_listener()?;
        receive_frame(&listener)
    }

    fn send_async(&self, endpoint: Endpoint, packet: Packet) -> Task<()> {
        self.scheduler.submit_async(move || {
            if let Err(err) = send_frame(&endpoint, &packet) {
                tracing::trace!(%endpoint, %err, "tcp send failed");
            }
        })
    }

    fn receive_async(&self) -> Task<Option<(Endpoint, Packet)>> {
        let listener = self.current_listener();
        self.scheduler
            .submit_async(move || listener.and_then(|listener| receive_frame(&listener)))
    }
}
