//! Client connection tracking and the per-client reliable event stream

use log::{debug, info, warn};
use shared::{Envelope, PlayerId};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Silence after which a client is dropped
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on envelopes packed into one `Events` datagram
pub const MAX_ENVELOPES_PER_PACKET: usize = 32;

/// Connected client and its position in the event stream
#[derive(Debug, Clone)]
pub struct Client {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    /// Highest sequence the client reported as applied
    pub acked: u64,
    /// Highest sequence sent at least once
    pub sent_through: u64,
    pub last_resend: Instant,
}

impl Client {
    /// Creates a client whose state already reflects everything up to `base`
    pub fn new(id: PlayerId, addr: SocketAddr, base: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            last_seen: now,
            acked: base,
            sent_through: base,
            last_resend: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Records an acknowledgement; acks never move backwards
    pub fn acknowledge(&mut self, sequence: u64) {
        if sequence > self.acked {
            self.acked = sequence;
            self.sent_through = self.sent_through.max(sequence);
        }
    }

    /// Restarts the stream after the client was sent a snapshot at `base`
    pub fn resync(&mut self, base: u64) {
        self.acked = base;
        self.sent_through = base;
        self.last_resend = Instant::now();
    }

    pub fn has_unacked(&self) -> bool {
        self.sent_through > self.acked
    }
}

/// Envelopes kept for retransmission until every client acknowledged them
#[derive(Debug, Default)]
pub struct RetainedLog {
    envelopes: VecDeque<Envelope>,
}

impl RetainedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, envelopes: Vec<Envelope>) {
        self.envelopes.extend(envelopes);
    }

    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.envelopes.front().map(|e| e.sequence)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.envelopes.back().map(|e| e.sequence)
    }

    /// Envelopes with `after < sequence <= through`
    pub fn range(&self, after: u64, through: u64) -> Vec<Envelope> {
        self.envelopes
            .iter()
            .filter(|e| e.sequence > after && e.sequence <= through)
            .cloned()
            .collect()
    }

    /// Drops every envelope at or below `floor`
    pub fn trim(&mut self, floor: u64) -> usize {
        let before = self.envelopes.len();
        while self
            .envelopes
            .front()
            .is_some_and(|e| e.sequence <= floor)
        {
            self.envelopes.pop_front();
        }
        before - self.envelopes.len()
    }
}

/// What the send side must do for one client this tick
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Envelopes {
        addr: SocketAddr,
        envelopes: Vec<Envelope>,
    },
    /// The client fell behind the retained window and needs a snapshot
    Resync { id: PlayerId, addr: SocketAddr },
}

/// Manages client connections and their reliable streams
#[derive(Debug)]
pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Adds a new client, returning its id or None when full.
    ///
    /// `base` is the sequence of the snapshot the client is about to receive.
    pub fn add_client(&mut self, addr: SocketAddr, base: u64) -> Option<PlayerId> {
        if self.clients.len() >= self.max_clients {
            warn!("Rejecting {}: server full ({} clients)", addr, self.max_clients);
            return None;
        }

        let id = PlayerId(self.next_client_id);
        self.next_client_id += 1;
        self.clients.insert(id, Client::new(id, addr, base));
        info!("{} connected from {}", id, addr);
        Some(id)
    }

    /// Removes a client, returning whether it existed
    pub fn remove_client(&mut self, id: &PlayerId) -> bool {
        match self.clients.remove(id) {
            Some(client) => {
                info!("{} disconnected from {}", id, client.addr);
                true
            }
            None => false,
        }
    }

    /// Finds client id by socket address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Refreshes the liveness timestamp of the client at `addr`
    pub fn touch(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        let client = self.clients.values_mut().find(|c| c.addr == addr)?;
        client.touch();
        Some(client.id)
    }

    pub fn acknowledge(&mut self, id: PlayerId, sequence: u64) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.acknowledge(sequence);
        }
    }

    pub fn resync(&mut self, id: PlayerId, base: u64) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.resync(base);
        }
    }

    /// Removes timed out clients and returns their ids
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for id in &timed_out {
            self.clients.remove(id);
            info!("{} timed out", id);
        }

        timed_out
    }

    /// Lowest acknowledgement over all clients
    pub fn lowest_ack(&self) -> Option<u64> {
        self.clients.values().map(|client| client.acked).min()
    }

    /// Decides what each client is sent this tick.
    ///
    /// Every client gets the envelopes it has not been sent yet. Envelopes
    /// still unacknowledged after `resend_after` are sent again. A client
    /// whose next needed envelope is no longer retained is resynced.
    pub fn collect_deliveries(&mut self, log: &RetainedLog, resend_after: Duration) -> Vec<Delivery> {
        let Some(newest) = log.last_sequence() else {
            return Vec::new();
        };
        let oldest = log.first_sequence().unwrap_or(newest);

        let mut deliveries = Vec::new();
        for client in self.clients.values_mut() {
            if client.acked < newest && client.acked + 1 < oldest {
                debug!(
                    "{} is behind the retained window ({} < {})",
                    client.id, client.acked, oldest
                );
                deliveries.push(Delivery::Resync {
                    id: client.id,
                    addr: client.addr,
                });
                continue;
            }

            let mut envelopes = Vec::new();
            if client.has_unacked() && client.last_resend.elapsed() >= resend_after {
                envelopes.extend(log.range(client.acked, client.sent_through));
                client.last_resend = Instant::now();
            }
            if newest > client.sent_through {
                envelopes.extend(log.range(client.sent_through, newest));
                if !client.has_unacked() {
                    client.last_resend = Instant::now();
                }
                client.sent_through = newest;
            }

            for chunk in envelopes.chunks(MAX_ENVELOPES_PER_PACKET) {
                deliveries.push(Delivery::Envelopes {
                    addr: client.addr,
                    envelopes: chunk.to_vec(),
                });
            }
        }
        deliveries
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
