//! Datagram transport: one UDP socket, two logical channels per peer.
//!
//! The simulation core only ever sees typed [`Message`]s. This module owns
//! everything below that: peer admission, envelope encode/decode, and the
//! reliable-channel bookkeeping (sequence stamping, acknowledgments,
//! retransmission, receive-side de-duplication). The unreliable channel is
//! plain fire-and-forget.
//!
//! I/O runs on two spawned tasks: a receiver that decodes datagrams and
//! hands `(addr, Envelope)` pairs to the tick loop over an mpsc channel, and
//! a sender that drains an outgoing queue. Both tasks are stateless; every
//! per-peer table lives in [`PeerTable`], which only the tick loop touches.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use realm_shared::protocol::{decode, encode, ProtocolError};
use realm_shared::{Envelope, Message, ObjectId, NO_OBJECT};

/// How long an unacked reliable envelope waits before being resent.
const RESEND_INTERVAL: Duration = Duration::from_millis(100);

/// Resend attempts before the peer is declared gone.
const MAX_RESEND_ATTEMPTS: u32 = 10;

/// Per-peer dedup memory is pruned once it exceeds this many sequences.
const SEEN_SEQ_PRUNE_THRESHOLD: usize = 1024;

/// One encoded datagram ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDatagram {
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct PendingSend {
    bytes: Vec<u8>,
    last_sent: Instant,
    attempts: u32,
}

/// Connection state for one remote peer.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    /// Avatar the peer may author updates for; `NO_OBJECT` until bound.
    pub bound_object: ObjectId,
    next_reliable_seq: u32,
    pending: HashMap<u32, PendingSend>,
    seen_reliable: HashSet<u32>,
    highest_seen: u32,
}

impl Peer {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            bound_object: NO_OBJECT,
            next_reliable_seq: 1,
            pending: HashMap::new(),
            seen_reliable: HashSet::new(),
            highest_seen: 0,
        }
    }
}

/// All per-peer connection state, owned by the tick loop.
///
/// Every send-shaped method returns the encoded datagrams to put on the wire
/// rather than touching the socket itself, which keeps this table free of
/// I/O and directly testable.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<SocketAddr, Peer>,
    max_peers: usize,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            max_peers,
        }
    }

    /// Admits a peer. Returns false when the table is full.
    pub fn register(&mut self, addr: SocketAddr) -> bool {
        if self.peers.contains_key(&addr) {
            return true;
        }
        if self.peers.len() >= self.max_peers {
            return false;
        }
        self.peers.insert(addr, Peer::new(addr));
        true
    }

    pub fn remove(&mut self, addr: SocketAddr) -> Option<Peer> {
        self.peers.remove(&addr)
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.peers.contains_key(&addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Binds the avatar id this peer is allowed to author.
    pub fn bind_object(&mut self, addr: SocketAddr, id: ObjectId) {
        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.bound_object = id;
        }
    }

    pub fn bound_object(&self, addr: SocketAddr) -> Option<ObjectId> {
        self.peers.get(&addr).map(|p| p.bound_object)
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    /// Encodes a reliable envelope for one peer and tracks it for
    /// retransmission until acked.
    pub fn send_reliable(&mut self, addr: SocketAddr, message: &Message) -> Option<OutboundDatagram> {
        let peer = self.peers.get_mut(&addr)?;
        let seq = peer.next_reliable_seq;
        peer.next_reliable_seq += 1;

        let envelope = Envelope::reliable(seq, message.clone());
        let bytes = match encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode reliable message: {}", e);
                return None;
            }
        };
        peer.pending.insert(
            seq,
            PendingSend {
                bytes: bytes.clone(),
                last_sent: Instant::now(),
                attempts: 1,
            },
        );
        Some(OutboundDatagram { addr, bytes })
    }

    /// Encodes an unreliable envelope for one peer.
    pub fn send_unreliable(&self, addr: SocketAddr, message: &Message) -> Option<OutboundDatagram> {
        if !self.peers.contains_key(&addr) {
            return None;
        }
        match encode(&Envelope::unreliable(message.clone())) {
            Ok(bytes) => Some(OutboundDatagram { addr, bytes }),
            Err(e) => {
                error!("failed to encode unreliable message: {}", e);
                None
            }
        }
    }

    /// Reliable send to every connected peer.
    pub fn broadcast_reliable(&mut self, message: &Message) -> Vec<OutboundDatagram> {
        let mut addrs = self.addrs();
        addrs.sort_unstable();
        addrs
            .into_iter()
            .filter_map(|addr| self.send_reliable(addr, message))
            .collect()
    }

    /// Unreliable send to every connected peer.
    pub fn broadcast_unreliable(&self, message: &Message) -> Vec<OutboundDatagram> {
        let mut addrs = self.addrs();
        addrs.sort_unstable();
        addrs
            .into_iter()
            .filter_map(|addr| self.send_unreliable(addr, message))
            .collect()
    }

    /// Clears the retransmission entry the ack refers to.
    pub fn handle_ack(&mut self, addr: SocketAddr, seq: u32) {
        if let Some(peer) = self.peers.get_mut(&addr) {
            peer.pending.remove(&seq);
        }
    }

    /// Receive-side bookkeeping for a reliable envelope: always produces the
    /// ack to send back, and reports whether the payload is fresh (false
    /// for duplicates of already-delivered envelopes).
    pub fn accept_reliable(
        &mut self,
        addr: SocketAddr,
        seq: u32,
    ) -> (bool, Option<OutboundDatagram>) {
        let Some(peer) = self.peers.get_mut(&addr) else {
            return (false, None);
        };

        let ack = match encode(&Envelope::ack(seq)) {
            Ok(bytes) => Some(OutboundDatagram { addr, bytes }),
            Err(e) => {
                error!("failed to encode ack: {}", e);
                None
            }
        };

        let fresh = peer.seen_reliable.insert(seq);
        peer.highest_seen = peer.highest_seen.max(seq);
        if peer.seen_reliable.len() > SEEN_SEQ_PRUNE_THRESHOLD {
            let floor = peer.highest_seen.saturating_sub(SEEN_SEQ_PRUNE_THRESHOLD as u32 / 2);
            peer.seen_reliable.retain(|s| *s >= floor);
        }

        (fresh, ack)
    }

    /// Resends overdue reliable envelopes. Peers that exhausted their retry
    /// budget are removed and reported so the caller can drop their avatar.
    pub fn flush_retransmits(&mut self) -> (Vec<OutboundDatagram>, Vec<SocketAddr>) {
        let mut resends = Vec::new();
        let mut dead = Vec::new();

        for peer in self.peers.values_mut() {
            let mut exhausted = false;
            for pending in peer.pending.values_mut() {
                if pending.last_sent.elapsed() < RESEND_INTERVAL {
                    continue;
                }
                if pending.attempts >= MAX_RESEND_ATTEMPTS {
                    exhausted = true;
                    break;
                }
                pending.attempts += 1;
                pending.last_sent = Instant::now();
                resends.push(OutboundDatagram {
                    addr: peer.addr,
                    bytes: pending.bytes.clone(),
                });
            }
            if exhausted {
                dead.push(peer.addr);
            }
        }

        for addr in &dead {
            warn!("peer {} unresponsive, dropping", addr);
            self.peers.remove(addr);
        }

        (resends, dead)
    }

    #[cfg(test)]
    pub(crate) fn age_pending_for_tests(&mut self, addr: SocketAddr, by: Duration) {
        if let Some(peer) = self.peers.get_mut(&addr) {
            for pending in peer.pending.values_mut() {
                pending.last_sent -= by;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self, addr: SocketAddr) -> usize {
        self.peers.get(&addr).map_or(0, |p| p.pending.len())
    }
}

/// Socket half of the transport: bind once, then push datagrams into the
/// sender task and receive decoded envelopes from the receiver task.
#[derive(Debug)]
pub struct Transport {
    outgoing_tx: mpsc::UnboundedSender<OutboundDatagram>,
}

impl Transport {
    /// Binds the UDP socket and spawns the receiver and sender tasks.
    /// Returns the transport handle and the inbound envelope stream the
    /// tick loop drains.
    pub async fn bind(
        addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<(SocketAddr, Envelope)>), std::io::Error> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        log::info!("transport listening on {}", socket.local_addr()?);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<OutboundDatagram>();

        let recv_socket = Arc::clone(&socket);
        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            loop {
                match recv_socket.recv_from(&mut buffer).await {
                    Ok((len, from)) => match decode(&buffer[..len]) {
                        Ok(envelope) => {
                            if inbound_tx.send((from, envelope)).is_err() {
                                break; // tick loop is gone
                            }
                        }
                        Err(ProtocolError::VersionMismatch { got, expected }) => {
                            warn!(
                                "dropping datagram from {}: version {} (expected {})",
                                from, got, expected
                            );
                        }
                        Err(e) => {
                            warn!("dropping malformed datagram from {}: {}", from, e);
                        }
                    },
                    Err(e) => {
                        error!("error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(datagram) = outgoing_rx.recv().await {
                if let Err(e) = socket.send_to(&datagram.bytes, datagram.addr).await {
                    debug!("failed to send to {}: {}", datagram.addr, e);
                }
            }
        });

        Ok((Self { outgoing_tx }, inbound_rx))
    }

    /// Queues one datagram for the sender task.
    pub fn send(&self, datagram: OutboundDatagram) {
        if self.outgoing_tx.send(datagram).is_err() {
            error!("transport sender task is gone");
        }
    }

    /// Queues a batch of datagrams.
    pub fn send_all(&self, datagrams: Vec<OutboundDatagram>) {
        for datagram in datagrams {
            self.send(datagram);
        }
    }
}
