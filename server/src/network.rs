//! Server network layer: UDP transport in front of a shard

use crate::client_manager::ClientManager;
use crate::connection::{Connection, ConnectionId, ShardEvent};
use crate::shard::Shard;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use snake_shared::{Packet, Player, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// Messages sent from the shard side to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Connection handle given to the shard for one UDP peer
pub struct UdpConnection {
    id: ConnectionId,
    addr: SocketAddr,
    game_tx: mpsc::UnboundedSender<GameMessage>,
}

impl UdpConnection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        game_tx: mpsc::UnboundedSender<GameMessage>,
    ) -> Self {
        Self { id, addr, game_tx }
    }
}

impl Connection for UdpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet,
            addr: self.addr,
        }) {
            debug!("Dropping packet for client {}: {}", self.id, e);
        }
    }
}

/// Main server coordinating the socket and the shard loop
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    shard: Option<Shard>,

    // Communication channels
    shard_tx: mpsc::UnboundedSender<ShardEvent>,
    shard_rx: Option<mpsc::UnboundedReceiver<ShardEvent>>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        shard: Shard,
        max_clients: usize,
        timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (shard_tx, shard_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, timeout))),
            shard: Some(shard),
            shard_tx,
            shard_rx: Some(shard_rx),
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for injecting events, such as [`ShardEvent::Shutdown`]
    pub fn events(&self) -> mpsc::UnboundedSender<ShardEvent> {
        self.shard_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let shard_tx = self.shard_tx.clone();
        let game_tx = self.game_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; 65536];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[0..len]) {
                        Ok(packet) => {
                            if !Self::route_packet(packet, addr, &clients, &shard_tx, &game_tx)
                                .await
                            {
                                error!("Shard loop is gone, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to deserialize packet from {}: {}", addr, e);
                        }
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Resolves a datagram to a connection and forwards it to the shard.
    /// Returns false once the shard side has hung up.
    async fn route_packet(
        packet: Packet,
        addr: SocketAddr,
        clients: &RwLock<ClientManager>,
        shard_tx: &mpsc::UnboundedSender<ShardEvent>,
        game_tx: &mpsc::UnboundedSender<GameMessage>,
    ) -> bool {
        let event = match packet {
            Packet::Connect {
                client_version,
                resume,
            } => {
                return Self::handle_connect(
                    client_version,
                    resume,
                    addr,
                    clients,
                    shard_tx,
                    game_tx,
                )
                .await;
            }

            Packet::Disconnect => {
                let client_id = {
                    let mut clients = clients.write().await;
                    let client_id = clients.find_client_by_addr(addr);
                    if let Some(id) = client_id {
                        clients.remove_client(&id);
                    }
                    client_id
                };

                match client_id {
                    Some(id) => ShardEvent::Disconnected { id },
                    None => return true,
                }
            }

            packet => {
                let client_id = {
                    let mut clients = clients.write().await;
                    let client_id = clients.find_client_by_addr(addr);
                    if let Some(id) = client_id {
                        clients.touch(id);
                    }
                    client_id
                };

                match client_id {
                    Some(id) => ShardEvent::Packet { id, packet },
                    None => {
                        debug!("Ignoring packet from unknown address {}", addr);
                        return true;
                    }
                }
            }
        };

        shard_tx.send(event).is_ok()
    }

    async fn handle_connect(
        client_version: u32,
        resume: Option<Player>,
        addr: SocketAddr,
        clients: &RwLock<ClientManager>,
        shard_tx: &mpsc::UnboundedSender<ShardEvent>,
        game_tx: &mpsc::UnboundedSender<GameMessage>,
    ) -> bool {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        let reply = |packet: Packet| {
            if let Err(e) = game_tx.send(GameMessage::SendPacket { packet, addr }) {
                error!("Failed to queue packet for sending: {}", e);
            }
        };

        if client_version != PROTOCOL_VERSION {
            warn!(
                "Rejecting {}: protocol {} does not match {}",
                addr, client_version, PROTOCOL_VERSION
            );
            reply(Packet::Disconnected {
                reason: format!("Unsupported protocol version {}", client_version),
            });
            return true;
        }

        let (existing_id, client_id) = {
            let mut clients = clients.write().await;
            let existing_id = clients.find_client_by_addr(addr);
            if let Some(existing_id) = existing_id {
                info!("Removing existing client {} from {}", existing_id, addr);
                clients.remove_client(&existing_id);
            }
            (existing_id, clients.add_client(addr))
        };

        if let Some(id) = existing_id {
            if shard_tx.send(ShardEvent::Disconnected { id }).is_err() {
                return false;
            }
        }

        match client_id {
            Some(client_id) => {
                reply(Packet::Connected { client_id });
                let connection = UdpConnection::new(client_id, addr, game_tx.clone());
                shard_tx
                    .send(ShardEvent::Joined {
                        connection: Box::new(connection),
                        resume,
                    })
                    .is_ok()
            }
            None => {
                reply(Packet::Disconnected {
                    reason: "Server full".to_string(),
                });
                true
            }
        }
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) -> Option<JoinHandle<()>> {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = self.game_rx.take()?;

        Some(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        }))
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let clients = Arc::clone(&self.clients);
        let shard_tx = self.shard_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for id in timed_out {
                    info!("Client {} timed out", id);
                    if let Err(e) = shard_tx.send(ShardEvent::Error {
                        id,
                        reason: "timed out".to_string(),
                    }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        })
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Runs until a [`ShardEvent::Shutdown`] arrives, then tells every client
    /// and hands the shard back.
    pub async fn run(&mut self) -> Result<Shard, Box<dyn std::error::Error>> {
        let shard = self.shard.take().ok_or("server is already running")?;
        let events = self.shard_rx.take().ok_or("server is already running")?;

        let mut tasks = vec![self.spawn_network_receiver(), self.spawn_timeout_checker()];
        tasks.extend(self.spawn_network_sender());

        info!("Server started successfully");
        let result = shard.run(events).await;

        // Say goodbye directly so the message is not lost behind the queue.
        let client_addrs = self.clients.read().await.get_client_addrs();
        let goodbye = Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        };
        for (client_id, addr) in client_addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &goodbye, addr).await {
                warn!("Failed to notify client {}: {}", client_id, e);
            }
        }

        for task in tasks {
            task.abort();
        }

        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snake_shared::ShardConfig;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9090)
    }

    #[test]
    fn test_udp_connection_queues_packets() {
        let (game_tx, mut game_rx) = mpsc::unbounded_channel();
        let connection = UdpConnection::new(7, test_addr(), game_tx);

        assert_eq!(connection.id(), 7);
        connection.send(Packet::Die { score: 5 });

        let GameMessage::SendPacket { packet, addr } = game_rx.try_recv().unwrap();
        assert_eq!(addr, test_addr());
        assert!(matches!(packet, Packet::Die { score: 5 }));
    }

    #[test]
    fn test_udp_connection_survives_closed_channel() {
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        drop(game_rx);

        let connection = UdpConnection::new(1, test_addr(), game_tx);
        connection.send(Packet::Restart);
    }

    async fn connect(
        clients: &RwLock<ClientManager>,
        version: u32,
    ) -> (Vec<Packet>, Vec<ShardEvent>) {
        let (shard_tx, mut shard_rx) = mpsc::unbounded_channel();
        let (game_tx, mut game_rx) = mpsc::unbounded_channel();

        let packet = Packet::Connect {
            client_version: version,
            resume: None,
        };
        assert!(Server::route_packet(packet, test_addr(), clients, &shard_tx, &game_tx).await);

        let mut replies = Vec::new();
        while let Ok(GameMessage::SendPacket { packet, .. }) = game_rx.try_recv() {
            replies.push(packet);
        }
        let mut events = Vec::new();
        while let Ok(event) = shard_rx.try_recv() {
            events.push(event);
        }
        (replies, events)
    }

    #[tokio::test]
    async fn test_connect_registers_client() {
        let clients = RwLock::new(ClientManager::new(4, Duration::from_secs(5)));

        let (replies, events) = connect(&clients, PROTOCOL_VERSION).await;
        assert!(matches!(replies[..], [Packet::Connected { client_id: 1 }]));
        assert!(matches!(events[..], [ShardEvent::Joined { .. }]));

        // Reconnecting from the same address replaces the old client.
        let (replies, events) = connect(&clients, PROTOCOL_VERSION).await;
        assert!(matches!(replies[..], [Packet::Connected { client_id: 2 }]));
        assert!(matches!(
            events[..],
            [ShardEvent::Disconnected { id: 1 }, ShardEvent::Joined { .. }]
        ));
        assert_eq!(clients.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_wrong_version() {
        let clients = RwLock::new(ClientManager::new(4, Duration::from_secs(5)));

        let (replies, events) = connect(&clients, PROTOCOL_VERSION + 1).await;
        assert!(matches!(replies[..], [Packet::Disconnected { .. }]));
        assert!(events.is_empty());
        assert!(clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_when_full() {
        let clients = RwLock::new(ClientManager::new(0, Duration::from_secs(5)));

        let (replies, events) = connect(&clients, PROTOCOL_VERSION).await;
        match &replies[..] {
            [Packet::Disconnected { reason }] => assert_eq!(reason, "Server full"),
            other => panic!("Unexpected replies: {:?}", other),
        }
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_packets_from_unknown_addresses_are_dropped() {
        let clients = RwLock::new(ClientManager::new(4, Duration::from_secs(5)));
        let (shard_tx, mut shard_rx) = mpsc::unbounded_channel();
        let (game_tx, _game_rx) = mpsc::unbounded_channel();

        let packet = Packet::Eat { x: 1, y: 1 };
        assert!(Server::route_packet(packet, test_addr(), &clients, &shard_tx, &game_tx).await);
        assert!(shard_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut shard = Shard::with_seed(ShardConfig::default(), 1);
        shard.setup().unwrap();

        let mut server = Server::new("127.0.0.1:0", shard, 4, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(server.local_addr().unwrap().port() > 0);

        server.events().send(ShardEvent::Shutdown).unwrap();
        let shard = server.run().await.unwrap();
        assert_eq!(shard.player_count(), 0);

        assert!(server.run().await.is_err());
    }
}
