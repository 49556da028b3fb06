//! Server network layer handling UDP communications and game loop coordination

use crate::client_manager::ClientManager;
use crate::error::ServerError;
use crate::game::{GameState, Outbound, Recipient};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ClientId, FactionId, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Receive buffer size; larger datagrams are truncated and fail to decode.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: ClientId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<ClientId>,
    },
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,
    started: Instant,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        game_state: GameState,
    ) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let client_timeout = game_state.engine().rules().client_timeout;

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, client_timeout))),
            game_state,
            tick_duration,
            started: Instant::now(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let clients_guard = clients.read().await;
                    clients_guard.timed_out_clients()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn broadcast_packet(&self, packet: &Packet, exclude: Option<ClientId>) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket {
            packet: packet.clone(),
            exclude,
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Turns a world message into a transport message. Messages for clients
    /// that have already left are dropped.
    fn route(outbound: Outbound, clients: &ClientManager) -> Option<GameMessage> {
        match outbound.to {
            Recipient::Client(client_id) => {
                let addr = clients.get(&client_id)?.addr;
                Some(GameMessage::SendPacket {
                    packet: outbound.packet,
                    addr,
                })
            }
            Recipient::All => Some(GameMessage::BroadcastPacket {
                packet: outbound.packet,
                exclude: None,
            }),
            Recipient::AllExcept(client_id) => Some(GameMessage::BroadcastPacket {
                packet: outbound.packet,
                exclude: Some(client_id),
            }),
        }
    }

    async fn dispatch(&self, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }
        let clients = self.clients.read().await;
        for message in outbound {
            if let Some(message) = Self::route(message, &clients) {
                if let Err(e) = self.game_tx.send(message) {
                    error!("Failed to queue outbound packet: {}", e);
                }
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Removes a client everywhere and announces any leadership change
    async fn disconnect_client(&mut self, client_id: ClientId) {
        let departure = {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id)
        };

        let Some(departure) = departure else {
            return;
        };
        self.game_state.remove_player(&client_id);

        if let Some(change) = departure.leader_change {
            let packet = Packet::LeaderChanged {
                faction: change.faction,
                leader: change.leader,
            };
            self.broadcast_packet(&packet, None).await;
        }
    }

    async fn connect_client(&mut self, addr: SocketAddr, client_version: u32, faction: FactionId) {
        info!(
            "Client connecting from {} (version: {}, faction: {})",
            addr, client_version, faction
        );

        if client_version != PROTOCOL_VERSION {
            let response = Packet::Disconnected {
                reason: "Protocol version mismatch".to_string(),
            };
            self.send_packet(&response, addr).await;
            return;
        }

        // Remove existing connection if present
        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };

        // The unit follows the address so a reconnect cannot re-seed its position
        let carried_unit = match existing_client_id {
            Some(existing_id) => {
                info!("Removing existing client {} from {}", existing_id, addr);
                let unit = self.game_state.take_unit(existing_id);
                self.disconnect_client(existing_id).await;
                unit
            }
            None => None,
        };

        // Try to add new client
        let requester = {
            let mut clients = self.clients.write().await;
            clients
                .add_client(addr, faction)
                .and_then(|client_id| clients.requester(client_id))
        };

        let Some(requester) = requester else {
            let response = Packet::Disconnected {
                reason: "Server full".to_string(),
            };
            self.send_packet(&response, addr).await;
            return;
        };

        let response = Packet::Connected {
            client_id: requester.client_id,
            faction,
            is_leader: requester.is_leader,
        };
        self.send_packet(&response, addr).await;

        if requester.is_leader {
            let packet = Packet::LeaderChanged {
                faction,
                leader: Some(requester.client_id),
            };
            self.broadcast_packet(&packet, None).await;
        }

        if let Some(unit) = carried_unit {
            self.game_state.restore_unit(requester.client_id, faction, unit);
        }

        let replay = self.game_state.add_player(requester.client_id, faction);
        self.dispatch(replay).await;
    }

    /// Processes incoming packets and updates game state
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                faction,
            } => {
                self.connect_client(addr, client_version, faction).await;
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.disconnect_client(client_id).await;
                }
            }

            packet => {
                let requester = {
                    let mut clients = self.clients.write().await;
                    clients.find_client_by_addr(addr).and_then(|client_id| {
                        clients.touch(client_id);
                        clients.requester(client_id)
                    })
                };

                let Some(requester) = requester else {
                    debug!("Dropping packet from unknown address {}", addr);
                    return;
                };

                if matches!(packet, Packet::Heartbeat) {
                    return;
                }

                let outbound = self.game_state.handle_request(&requester, packet);
                self.dispatch(outbound).await;
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.disconnect_client(client_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let now = self.now_ms();
                    let outbound = self.game_state.advance(now);
                    self.dispatch(outbound).await;

                    // Periodic monitoring
                    if self.game_state.tick % 60 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };

                        if client_count > 0 {
                            debug!("Tick {}: {} clients, {} structures",
                                   self.game_state.tick, client_count,
                                   self.game_state.engine().structures().len());
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
