use crate::input::RandomBot;
use crate::predictor::{Predictor, PredictorConfig};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use snake_shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Knobs for a headless client session.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub predictor: PredictorConfig,
    /// Local ticks per second; should match the shard.
    pub tick_rate: u32,
    /// How often the bot considers turning.
    pub bot_interval: Duration,
    /// Chance that the bot turns when it is asked.
    pub turn_chance: f64,
    /// Simulated latency, split evenly between sending and receiving.
    pub fake_ping_ms: u64,
    /// Ask for a new snake after dying.
    pub respawn: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            predictor: PredictorConfig::default(),
            tick_rate: 8,
            bot_interval: Duration::from_millis(200),
            turn_chance: 0.3,
            fake_ping_ms: 0,
            respawn: false,
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,

    predictor: Predictor,
    bot: RandomBot,

    tick_duration: Duration,
    bot_interval: Duration,
    fake_ping_ms: u64,
    respawn: bool,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        settings: ClientSettings,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            predictor: Predictor::new(settings.predictor),
            bot: RandomBot::new(settings.turn_chance),
            tick_duration: Duration::from_secs_f64(1.0 / settings.tick_rate.max(1) as f64),
            bot_interval: settings.bot_interval,
            fake_ping_ms: settings.fake_ping_ms,
            respawn: settings.respawn,
        })
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            resume: self.predictor.resume_state(),
        };
        self.send_packet(&packet).await?;

        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match &packet {
            Packet::Connected { .. } => self.connected = true,
            Packet::Disconnected { .. } => self.connected = false,
            Packet::Die { .. } if self.respawn => {
                if let Err(e) = self.send_packet(&Packet::Restart).await {
                    error!("Error requesting restart: {}", e);
                }
            }
            _ => {}
        }

        self.predictor.receive(packet);
    }

    fn drive_bot(&mut self) {
        let Some(direction) = self
            .predictor
            .player()
            .filter(|player| player.is_alive)
            .map(|player| player.direction)
        else {
            return;
        };

        if let Some(turn) = self.bot.choose(direction) {
            debug!("Bot turning {:?}", turn);
            self.predictor.queue_direction(turn);
        }
    }

    /// Plays until the server disconnects us, Ctrl+C, or `duration` elapses.
    pub async fn run(
        &mut self,
        duration: Option<Duration>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut bot_interval = interval(self.bot_interval);

        let deadline = async {
            match duration {
                Some(duration) => sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut buffer = vec![0u8; 65536];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    let closed = matches!(packet, Packet::Disconnected { .. });
                                    self.handle_packet(packet).await;
                                    if closed {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    if !self.connected {
                        continue;
                    }
                    for packet in self.predictor.local_tick() {
                        if let Err(e) = self.send_packet(&packet).await {
                            error!("Error sending packet: {}", e);
                        }
                    }
                },

                _ = bot_interval.tick() => self.drive_bot(),

                _ = &mut deadline => {
                    info!("Session time is up");
                    break;
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
            self.connected = false;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snake_shared::{Bounds, Coord, Direction, Player, Snapshot};

    #[tokio::test]
    async fn test_client_creation() {
        let client = tokio_test::assert_ok!(
            Client::new("127.0.0.1:8080", ClientSettings::default()).await
        );

        assert!(!client.is_connected());
        assert_eq!(client.tick_duration, Duration::from_millis(125));
        assert!(client.predictor().client_id().is_none());
    }

    #[tokio::test]
    async fn test_invalid_server_address() {
        assert!(Client::new("not an address", ClientSettings::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_handle_packet_tracks_connection() {
        let mut client = Client::new("127.0.0.1:8080", ClientSettings::default())
            .await
            .unwrap();

        client.handle_packet(Packet::Connected { client_id: 4 }).await;
        assert!(client.is_connected());
        assert_eq!(client.predictor().client_id(), Some(4));

        client
            .handle_packet(Packet::Disconnected {
                reason: "Server full".to_string(),
            })
            .await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_bot_queues_turns_for_living_snake() {
        let settings = ClientSettings {
            turn_chance: 1.0,
            ..ClientSettings::default()
        };
        let mut client = Client::new("127.0.0.1:8080", settings).await.unwrap();
        client.drive_bot();

        let mut grid = vec![vec![snake_shared::Cell::Empty; 5]; 5];
        grid[0][0] = snake_shared::Cell::Blocked;
        let snapshot = Snapshot {
            player: Player::new(1, Coord::new(2, 2), Direction::East),
            players: Vec::new(),
            grid,
            bounds: Bounds {
                x: 0,
                y: 0,
                width: 5,
                height: 5,
            },
            width: 5,
            height: 5,
            tick: 0,
            is_forced: true,
        };
        client.handle_packet(Packet::Start(snapshot)).await;
        client.drive_bot();

        let packets = client.predictor.local_tick();
        match &packets[..] {
            [Packet::Direct { direction, .. }] => assert!(
                *direction == Direction::North.as_u8() || *direction == Direction::South.as_u8()
            ),
            other => panic!("Expected a direct packet, got {:?}", other),
        }
    }
}
