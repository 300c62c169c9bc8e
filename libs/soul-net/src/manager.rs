// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::endpoint::Endpoint;
use crate::packet::{DeliveryGuarantee, Packet, PacketFlags, PacketHeader};
use crate::transport::Transport;
use soul_task::{Task, TaskScheduler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// The selective-acknowledgement window: the mask covers the 32 sequences
/// immediately preceding the acknowledged one.
const ACK_WINDOW: u32 = 32;

const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(75);
const DEFAULT_MAX_ATTEMPTS: u8 = 5;

fn sequence_greater(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs).cast_signed() > 0
}

fn sequence_less_equal(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs).cast_signed() <= 0
}

/// Whether `sequence` is covered by an incoming `ack` + `mask` pair, in
/// wrap-safe sequence arithmetic.
fn is_sequence_acked(sequence: u32, ack: u32, mask: u32) -> bool {
    if sequence == ack {
        return true;
    }
    if !sequence_less_equal(sequence, ack) {
        return false;
    }
    let diff = ack.wrapping_sub(sequence);
    if diff > ACK_WINDOW {
        return false;
    }
    mask & (1 << (diff - 1)) != 0
}

struct PendingPacket {
    endpoint: Endpoint,
    packet: Packet,
    last_sent: Instant,
    attempts: u8,
}

#[derive(Default)]
struct ChannelState {
    next_outgoing_sequence: u32,
    last_received_sequence: u32,
    received_mask: u32,
    has_received: bool,
    pending: HashMap<u32, PendingPacket>,
    pending_ack: bool,
}

#[derive(Default)]
struct ConnectionState {
    channels: HashMap<u16, ChannelState>,
}

struct ReliabilityState {
    reliable_channels: HashMap<u16, bool>,
    connections: HashMap<u64, ConnectionState>,
    retransmit_interval: Duration,
    max_attempts: u8,
}

/// Fronts the datagram and reliable-stream transports and enforces
/// reliable-UDP semantics on the channels it was asked to.
///
/// Reliable packets on an enabled channel ride the datagram path with
/// sequence/ACK metadata and scheduler-driven retransmission; all other
/// traffic is routed to the matching transport as-is. One manager-wide
/// mutex guards the channel maps.
pub struct NetworkManager {
    scheduler: Arc<TaskScheduler>,
    reliable: Arc<dyn Transport>,
    datagram: Arc<dyn Transport>,
    state: Mutex<ReliabilityState>,
    weak_self: Weak<NetworkManager>,
}

impl NetworkManager {
    #[must_use]
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        reliable: Arc<dyn Transport>,
        datagram: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            scheduler,
            reliable,
            datagram,
            state: Mutex::new(ReliabilityState {
                reliable_channels: HashMap::new(),
                connections: HashMap::new(),
                retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            }),
            weak_self: weak_self.clone(),
        })
    }

    /// Toggles reliable-UDP handling for `channel`.
    pub fn enable_reliability(&self, channel: u16, enabled: bool) {
        self.lock().reliable_channels.insert(channel, enabled);
    }

    /// Stores the retransmission defaults. `max_attempts` counts the
    /// initial send and is clamped to at least one.
    pub fn configure_retransmission(&self, interval: Duration, max_attempts: u8) {
        let mut state = self.lock();
        state.retransmit_interval = interval;
        state.max_attempts = max_attempts.max(1);
    }

    /// Sends `packet` on the transport matching its delivery guarantee.
    ///
    /// Reliable packets on a reliability-enabled channel take the
    /// reliable-datagram path; other reliable packets go to the stream
    /// transport, unreliable ones to the datagram transport.
    pub fn send(&self, endpoint: Endpoint, packet: Packet) -> Task<()> {
        if packet.header.guarantee == DeliveryGuarantee::Reliable {
            if self.is_reliable_channel(packet.header.channel) {
                return self.send_reliable_datagram(endpoint, packet);
            }
            return self.reliable.send_async(endpoint, packet);
        }
        self.datagram.send_async(endpoint, packet)
    }

    /// Polls the transports for the next packet: the reliable-stream
    /// transport first, then the datagram transport with reliability
    /// processing (ack bookkeeping, dedup, ack emission).
    ///
    /// Ack-only and duplicate datagrams are consumed internally and report
    /// `None`.
    pub fn receive(&self) -> Task<Option<(Endpoint, Packet)>> {
        let manager = self.strong();
        self.scheduler
            .submit_async(move || manager.receive_blocking())
    }

    /// In-flight reliable datagrams for `(endpoint, channel)`. Diagnostic.
    #[must_use]
    pub fn pending_count(&self, endpoint: &Endpoint, channel: u16) -> usize {
        let state = self.lock();
        state
            .connections
            .get(&endpoint.connection_key())
            .and_then(|connection| connection.channels.get(&channel))
            .map_or(0, |channel_state| channel_state.pending.len())
    }

    fn lock(&self) -> MutexGuard<'_, ReliabilityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn strong(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("manager is alive")
    }

    fn is_reliable_channel(&self, channel: u16) -> bool {
        self.lock()
            .reliable_channels
            .get(&channel)
            .copied()
            .unwrap_or(false)
    }

    fn receive_blocking(&self) -> Option<(Endpoint, Packet)> {
        if let Some(framed) = self.reliable.try_receive() {
            return Some(framed);
        }

        let (endpoint, packet) = self.datagram.try_receive()?;

        if self.is_reliable_channel(packet.header.channel) {
            let ack_only =
                packet.header.flags.contains(PacketFlags::ACK) && packet.payload.is_empty();

            self.record_ack(&endpoint, &packet.header);

            let mut duplicate = false;
            if !ack_only {
                duplicate = self.handle_incoming_sequence(&endpoint, &packet.header);
                self.maybe_send_ack(endpoint, packet.header.channel);
            }

            if ack_only || duplicate {
                return None;
            }
        }

        Some((endpoint, packet))
    }

    fn send_reliable_datagram(&self, endpoint: Endpoint, mut packet: Packet) -> Task<()> {
        let channel = packet.header.channel;
        let sequence = {
            let mut state = self.lock();
            let channel_state = state.channel_mut(&endpoint, channel);

            channel_state.next_outgoing_sequence =
                channel_state.next_outgoing_sequence.wrapping_add(1);
            let sequence = channel_state.next_outgoing_sequence;

            packet.header.sequence = sequence;
            packet.header.acknowledgment = channel_state.last_received_sequence;
            packet.header.acknowledgment_mask = channel_state.received_mask;

            channel_state.pending.insert(
                sequence,
                PendingPacket {
                    endpoint,
                    packet: packet.clone(),
                    last_sent: Instant::now(),
                    attempts: 0,
                },
            );
            sequence
        };

        tracing::trace!(%endpoint, channel, sequence, "reliable datagram out");
        let task = self.datagram.send_async(endpoint, packet);
        self.schedule_retransmission(endpoint, channel, sequence);
        task
    }

    fn schedule_retransmission(&self, endpoint: Endpoint, channel: u16, sequence: u32) {
        let interval = self.lock().retransmit_interval;
        let manager = self.strong();

        // Detached: dropping the Task handle does not cancel the job.
        let _ = self.scheduler.submit_async(move || {
            std::thread::sleep(interval);
            manager.retransmit(endpoint, channel, sequence);
        });
    }

    fn retransmit(&self, endpoint: Endpoint, channel: u16, sequence: u32) {
        let resend = {
            let mut state = self.lock();
            let max_attempts = state.max_attempts;

            let Some(channel_state) = state.channel_lookup_mut(&endpoint, channel) else {
                return;
            };
            let Some(entry) = channel_state.pending.get_mut(&sequence) else {
                // Acknowledged in the meantime.
                return;
            };

            let next_attempt = entry.attempts + 1;
            if next_attempt >= max_attempts {
                channel_state.pending.remove(&sequence);
                tracing::debug!(
                    %endpoint,
                    channel,
                    sequence,
                    attempts = next_attempt,
                    "retransmission budget exhausted, dropping packet"
                );
                return;
            }

            entry.attempts = next_attempt;
            entry.last_sent = Instant::now();
            entry.packet.header.acknowledgment = channel_state.last_received_sequence;
            entry.packet.header.acknowledgment_mask = channel_state.received_mask;
            entry.packet.clone()
        };

        tracing::trace!(%endpoint, channel, sequence, "retransmitting");
        self.datagram.send_now(&endpoint, &resend);
        self.schedule_retransmission(endpoint, channel, sequence);
    }

    fn record_ack(&self, endpoint: &Endpoint, header: &PacketHeader) {
        let mut state = self.lock();
        let Some(channel_state) = state.channel_lookup_mut(endpoint, header.channel) else {
            return;
        };

        channel_state.pending.retain(|sequence, _| {
            let acked =
                is_sequence_acked(*sequence, header.acknowledgment, header.acknowledgment_mask);
            if acked {
                tracing::trace!(%endpoint, sequence, "pending datagram acknowledged");
            }
            !acked
        });
    }

    /// Updates the reception window for an incoming sequence; reports
    /// whether the datagram is a duplicate.
    fn handle_incoming_sequence(&self, endpoint: &Endpoint, header: &PacketHeader) -> bool {
        let mut state = self.lock();
        let channel_state = state.channel_mut(endpoint, header.channel);

        if !channel_state.has_received {
            channel_state.has_received = true;
            channel_state.last_received_sequence = header.sequence;
            channel_state.received_mask = 0;
            channel_state.pending_ack = true;
            return false;
        }

        if sequence_greater(header.sequence, channel_state.last_received_sequence) {
            let diff = header.sequence.wrapping_sub(channel_state.last_received_sequence);
            if diff >= ACK_WINDOW {
                channel_state.received_mask = 0;
            } else {
                // Shift the window forward and record the previous head so a
                // late copy of it is still recognized as a duplicate.
                channel_state.received_mask =
                    (channel_state.received_mask << diff) | (1 << (diff - 1));
            }
            channel_state.last_received_sequence = header.sequence;
            channel_state.pending_ack = true;
            return false;
        }

        let diff = channel_state.last_received_sequence.wrapping_sub(header.sequence);
        if diff == 0 || diff > ACK_WINDOW {
            // Same as last, or fell out of the window: duplicate either way.
            return true;
        }

        let bit = 1_u32 << (diff - 1);
        if channel_state.received_mask & bit != 0 {
            return true;
        }

        channel_state.received_mask |= bit;
        channel_state.pending_ack = true;
        false
    }

    fn maybe_send_ack(&self, endpoint: Endpoint, channel: u16) {
        let ack = {
            let mut state = self.lock();
            let Some(channel_state) = state.channel_lookup_mut(&endpoint, channel) else {
                return;
            };
            if !channel_state.pending_ack {
                return;
            }
            channel_state.pending_ack = false;

            Packet {
                header: PacketHeader {
                    sequence: 0,
                    acknowledgment: channel_state.last_received_sequence,
                    acknowledgment_mask: channel_state.received_mask,
                    guarantee: DeliveryGuarantee::Unreliable,
                    flags: PacketFlags::ACK,
                    channel,
                },
                payload: Vec::new(),
            }
        };

        tracing::trace!(%endpoint, channel, ack = ack.header.acknowledgment, "ack out");
        // Detached fire-and-forget, like any other unreliable send.
        let _ = self.datagram.send_async(endpoint, ack);
    }
}

impl ReliabilityState {
    fn channel_mut(&mut self, endpoint: &Endpoint, channel: u16) -> &mut ChannelState {
        self.connections
            .entry(endpoint.connection_key())
            .or_default()
            .channels
            .entry(channel)
            .or_default()
    }

    fn channel_lookup_mut(
        &mut self,
        endpoint: &Endpoint,
        channel: u16,
    ) -> Option<&mut ChannelState> {
        self.connections
            .get_mut(&endpoint.connection_key())
            .and_then(|connection| connection.channels.get_mut(&channel))
    }
}
