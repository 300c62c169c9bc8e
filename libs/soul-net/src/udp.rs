// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::endpoint::Endpoint;
use crate::packet::{MAX_DATAGRAM_SIZE, Packet};
use crate::transport::Transport;
use soul_task::{Task, TaskScheduler};
use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};

/// Datagram transport over one UDP socket.
///
/// The socket is non-blocking; an idle [`try_receive`][Transport::try_receive]
/// reports `None`. Sending without a prior [`bind`][Transport::bind]
/// implicitly binds to an ephemeral wildcard port.
pub struct UdpTransport {
    scheduler: Arc<TaskScheduler>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpTransport {
    #[must_use]
    pub fn new(scheduler: Arc<TaskScheduler>) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            socket: Mutex::new(None),
        })
    }

    /// The bound local endpoint, once a socket exists. Useful with
    /// port-zero binds.
    #[must_use]
    pub fn local_endpoint(&self) -> Option<Endpoint> {
        let socket = self.current_socket()?;
        match socket.local_addr() {
            Ok(SocketAddr::V4(addr)) => Some(Endpoint::from(addr)),
            _ => None,
        }
    }

    fn current_socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_socket(&self) -> Option<Arc<UdpSocket>> {
        let mut slot = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = slot.as_ref() {
            return Some(Arc::clone(socket));
        }

        match open_socket(Endpoint::unspecified(0)) {
            Ok(socket) => {
                let socket = Arc::new(socket);
                *slot = Some(Arc::clone(&socket));
                Some(socket)
            }
            Err(err) => {
                tracing::trace!(%err, "udp socket creation failed");
                None
            }
        }
    }
}

fn open_socket(endpoint: Endpoint) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(endpoint.ip(), endpoint.port()))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn receive_on(socket: &UdpSocket) -> Option<(Endpoint, Packet)> {
    let mut buffer = [0_u8; MAX_DATAGRAM_SIZE];
    let (received, from) = match socket.recv_from(&mut buffer) {
        Ok(result) => result,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
        Err(err) => {
            tracing::trace!(%err, "udp receive failed");
            return None;
        }
    };

    let SocketAddr::V4(from) = from else {
        return None;
    };
    // Datagrams too short for a header are dropped silently.
    let packet = Packet::from_datagram(&buffer[..received])?;
    Some((Endpoint::from(from), packet))
}

impl Transport for UdpTransport {
    fn bind(&self, endpoint: Endpoint) -> bool {
        match open_socket(endpoint) {
            Ok(socket) => {
                *self.socket.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::new(socket));
                true
            }
            Err(err) => {
                tracing::debug!(%endpoint, %err, "udp bind failed");
                false
            }
        }
    }

    fn close(&self) {
        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn send_now(&self, endpoint: &Endpoint, packet: &Packet) {
        let Some(socket) = self.ensure_socket() else {
            return;
        };
        if let Err(err) = socket.send_to(&packet.to_datagram(), endpoint.socket_addr()) {
            tracing::trace!(%endpoint, %err, "udp send failed");
        }
    }

    fn try_receive(&self) -> Option<(Endpoint, Packet)> {
        let socket = self.current_socket()?;
        receive_on(&socket)
    }

    fn send_async(&self, endpoint: Endpoint, packet: Packet) -> Task<()> {
        let socket = self.ensure_socket();
        self.scheduler.submit_async(move || {
            let Some(socket) = socket else { return };
            if let Err(err) = socket.send_to(&packet.to_datagram(), endpoint.socket_addr()) {
                tracing::trace!(%endpoint, %err, "udp send failed");
            }
        })
    }

    fn receive_async(&self) -> Task<Option<(Endpoint, Packet)>> {
        let socket = self.current_socket();
        self.scheduler
            .submit_async(move || socket.and_then(|socket| receive_on(&socket)))
    }
}
