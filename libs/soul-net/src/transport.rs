// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::endpoint::Endpoint;
use crate::packet::Packet;
use soul_task::Task;

/// Common contract of the datagram and reliable-stream socket adapters.
///
/// Transports never raise socket failures upward: a failed send degrades to
/// a no-op and a failed receive to `None` (the reliability layer above
/// papers over the gaps).
///
/// The blocking building blocks ([`send_now`][Self::send_now],
/// [`try_receive`][Self::try_receive]) exist so that a composite operation
/// such as [`NetworkManager::receive`][crate::NetworkManager::receive] can
/// run inside a *single* scheduler job. Nesting the task-returning
/// flavors inside another job would block one worker on another and
/// deadlock a single-worker pool.
pub trait Transport: Send + Sync {
    /// Binds the local socket. `false` when binding or socket creation
    /// failed.
    fn bind(&self, endpoint: Endpoint) -> bool;

    /// Releases the local socket. Subsequent receives report idle.
    fn close(&self);

    /// Transmits one packet from the calling thread, swallowing failures.
    fn send_now(&self, endpoint: &Endpoint, packet: &Packet);

    /// Polls for one inbound packet without blocking on an idle socket.
    fn try_receive(&self) -> Option<(Endpoint, Packet)>;

    /// Dispatches [`send_now`][Self::send_now] onto the worker pool.
    fn send_async(&self, endpoint: Endpoint, packet: Packet) -> Task<()>;

    /// Dispatches [`try_receive`][Self::try_receive] onto the worker pool.
    fn receive_async(&self) -> Task<Option<(Endpoint, Packet)>>;
}
