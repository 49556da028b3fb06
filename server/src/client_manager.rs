//! Client sessions, faction membership and leadership
//!
//! This module handles the server-side management of connected clients, including:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Faction membership and the single leader each faction has
//! - Leader promotion when the current leader leaves
//! - Client capacity management and address tracking
//!
//! Only a faction's leader may place or demolish structures, so every
//! request is checked against the `Requester` this manager hands out.

use log::info;
use shared::{ClientId, FactionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identity and authority of the client behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub client_id: ClientId,
    pub faction: FactionId,
    pub is_leader: bool,
}

/// A faction's leader changed; `None` when the faction emptied out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderChange {
    pub faction: FactionId,
    pub leader: Option<ClientId>,
}

/// Represents a connected client
///
/// Each client maintains:
/// - Connection metadata (ID, address, last activity)
/// - The faction it joined and when it joined, which orders promotion
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: ClientId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Faction the client plays for
    pub faction: FactionId,
    /// When the client connected
    pub joined_at: Instant,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    /// Creates a new client with the given ID, address and faction
    ///
    /// The client is marked as recently active.
    pub fn new(id: ClientId, addr: SocketAddr, faction: FactionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            faction,
            joined_at: now,
            last_seen: now,
        }
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have been received from this client
    /// within the specified timeout duration, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// A removed client and the leadership change its departure caused
#[derive(Debug)]
pub struct Departure {
    pub client: Client,
    pub leader_change: Option<LeaderChange>,
}

/// Manages all connected clients and the leader of every faction
///
/// The ClientManager enforces server capacity limits and keeps exactly one
/// leader per non-empty faction. The first client to join a faction leads
/// it; when the leader leaves, the longest-connected remaining member takes
/// over.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<ClientId, Client>,
    /// Current leader of each faction with members
    leaders: HashMap<FactionId, ClientId>,
    /// Next available client ID for new connections
    next_client_id: ClientId,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
    /// Silence after which a client is considered gone
    timeout: Duration,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            leaders: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    /// A client joining a faction without a leader becomes its leader.
    pub fn add_client(&mut self, addr: SocketAddr, faction: FactionId) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr, faction);
        info!(
            "Client {} connected from {} for faction {}",
            client_id, addr, faction
        );
        self.clients.insert(client_id, client);

        if !self.leaders.contains_key(&faction) {
            info!("Client {} leads faction {}", client_id, faction);
            self.leaders.insert(faction, client_id);
        }

        Some(client_id)
    }

    /// Removes a client from the server
    ///
    /// Returns None if the client was already gone. If the client led its
    /// faction, the longest-connected remaining member is promoted and the
    /// change is reported in the departure.
    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Departure> {
        let client = self.clients.remove(client_id)?;
        info!("Client {} disconnected", client.id);

        let mut leader_change = None;
        if self.leaders.get(&client.faction) == Some(client_id) {
            let successor = self
                .clients
                .values()
                .filter(|other| other.faction == client.faction)
                .min_by_key(|other| (other.joined_at, other.id))
                .map(|other| other.id);

            match successor {
                Some(next) => {
                    info!("Client {} now leads faction {}", next, client.faction);
                    self.leaders.insert(client.faction, next);
                }
                None => {
                    self.leaders.remove(&client.faction);
                }
            }
            leader_change = Some(LeaderChange {
                faction: client.faction,
                leader: successor,
            });
        }

        Some(Departure {
            client,
            leader_change,
        })
    }

    /// Finds a client ID by their network address
    ///
    /// Used to associate incoming packets with existing client connections.
    /// Returns None if no client is connected from the given address.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Records activity from a client. Returns false for unknown IDs.
    pub fn touch(&mut self, client_id: ClientId) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    /// Builds the authority record used to vet a client's requests
    pub fn requester(&self, client_id: ClientId) -> Option<Requester> {
        let client = self.clients.get(&client_id)?;
        Some(Requester {
            client_id,
            faction: client.faction,
            is_leader: self.leaders.get(&client.faction) == Some(&client_id),
        })
    }

    pub fn leader_of(&self, faction: FactionId) -> Option<ClientId> {
        self.leaders.get(&faction).copied()
    }

    /// Clients that have been silent longer than the timeout
    ///
    /// Nothing is removed here; the caller disconnects each returned client
    /// so that leadership changes reach the rest of the faction.
    pub fn timed_out_clients(&self) -> Vec<ClientId> {
        let mut timed_out: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(self.timeout))
            .map(|(id, _)| *id)
            .collect();
        timed_out.sort_unstable();
        timed_out
    }

    /// Gets all client IDs and their network addresses
    ///
    /// Used for broadcasting updates to all connected clients.
    pub fn get_client_addrs(&self) -> Vec<(ClientId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
