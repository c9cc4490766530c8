use std::{sync::Arc, time::Duration};

use anyhow::Context;
use grid_world_core::{
    config::{ConfigError, GameConfig},
    environment::Environment,
    protocol::{Command, Snapshot},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
};
use tracing::{debug, info, warn};

/// What the connection should do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionReply {
    /// Send these snapshots, in order, and keep reading.
    Send(Vec<Snapshot>),
    /// The peer asked to quit.
    Close,
}

/// One connection's game: owns its environment and resets it between episodes.
#[derive(Debug)]
pub struct Session {
    config: Arc<GameConfig>,
    environment: Environment,
    episodes: u64,
}

impl Session {
    pub fn new(config: Arc<GameConfig>) -> Result<Self, ConfigError> {
        let environment = Environment::reset(&config)?;
        Ok(Session {
            config,
            environment,
            episodes: 0,
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.environment.snapshot()
    }

    /// Completed episodes on this connection.
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    /// Applies one command. When the step ends the episode, a fresh environment
    /// is built and its initial snapshot follows the terminal one.
    pub fn handle_command(&mut self, command: Command) -> Result<SessionReply, ConfigError> {
        let action = match command {
            Command::Quit => return Ok(SessionReply::Close),
            Command::Move(action) => Some(action),
            Command::Noop => None,
        };

        let snapshot = self.environment.step_action(action);
        if !snapshot.end {
            return Ok(SessionReply::Send(vec![snapshot]));
        }

        self.episodes += 1;
        self.environment = Environment::reset(&self.config)?;
        debug!(episodes = self.episodes, "Episode ended, world reset");
        Ok(SessionReply::Send(vec![snapshot, self.environment.snapshot()]))
    }
}

/// Accepts connections forever, one task and one independent session each.
pub async fn serve(
    listener: TcpListener,
    config: Arc<GameConfig>,
    step_delay: Duration,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("Accept failed: {err}");
                continue;
            }
        };
        info!(%peer, "Client connected");

        let config = config.clone();
        tokio::spawn(async move {
            match run_session(stream, config, step_delay).await {
                Ok(episodes) => info!(%peer, episodes, "Client disconnected"),
                Err(err) => warn!(%peer, "Session ended: {err:#}"),
            }
        });
    }
}

/// Drives one session over a stream until the peer quits or disconnects.
/// Returns the number of completed episodes.
pub async fn run_session<S>(
    stream: S,
    config: Arc<GameConfig>,
    step_delay: Duration,
) -> anyhow::Result<u64>
where
    S: AsyncRead + AsyncWrite,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    let mut session = Session::new(config).context("Failed to build the world")?;
    send_snapshot(&mut write, &session.snapshot()).await?;

    while let Some(line) = lines.next_line().await.context("Failed to read command")? {
        let command = Command::parse(&line);
        debug!(token = ?line, ?command, "Received");

        if command != Command::Quit && !step_delay.is_zero() {
            tokio::time::sleep(step_delay).await;
        }

        match session.handle_command(command)? {
            SessionReply::Close => break,
            SessionReply::Send(snapshots) => {
                for snapshot in &snapshots {
                    send_snapshot(&mut write, snapshot).await?;
                }
            }
        }
    }
    Ok(session.episodes())
}

async fn send_snapshot<W>(write: &mut W, snapshot: &Snapshot) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = snapshot.to_line()?;
    debug!(message = line.trim_end(), "Sending");
    write
        .write_all(line.as_bytes())
        .await
        .context("Failed to send snapshot")?;
    write.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use grid_world_core::Action;
    use tokio::io::Lines;

    use super::*;

    const CONFIG: &str = r#"{
        "world": { "size_x": 4, "size_y": 3, "reward": -1 },
        "objects": {
            "character": { "x": 1, "y": 1, "icon": "W" },
            "goal": { "x": 3, "y": 1, "icon": "X", "consumable": true, "ends_game": true, "reward": 50 }
        },
        "max_steps": 5
    }"#;

    fn config() -> Arc<GameConfig> {
        Arc::new(GameConfig::from_json_str(CONFIG).unwrap())
    }

    #[test]
    fn terminal_step_is_followed_by_a_fresh_world() {
        let mut session = Session::new(config()).unwrap();
        let start = session.snapshot();
        assert_eq!(start.current_character_position, 5);

        let reply = session.handle_command(Command::Move(Action::Right)).unwrap();
        assert_eq!(reply, SessionReply::Send(vec![session.snapshot()]));
        assert_eq!(session.snapshot().current_character_position, 6);

        let SessionReply::Send(snapshots) = session
            .handle_command(Command::Move(Action::Right))
            .unwrap()
        else {
            panic!("expected snapshots");
        };
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].end);
        assert_eq!(snapshots[0].reward, 50.0);
        assert!(!snapshots[1].end);
        assert_eq!(snapshots[1], start);
        assert_eq!(session.episodes(), 1);
    }

    #[test]
    fn budget_exhaustion_resets_the_world() {
        let mut session = Session::new(config()).unwrap();
        for _ in 0..4 {
            match session.handle_command(Command::Noop).unwrap() {
                SessionReply::Send(snapshots) => assert_eq!(snapshots.len(), 1),
                SessionReply::Close => panic!("unexpected close"),
            }
        }
        match session.handle_command(Command::Noop).unwrap() {
            SessionReply::Send(snapshots) => {
                assert_eq!(snapshots.len(), 2);
                assert!(snapshots[0].end);
                assert_eq!(snapshots[0].reward, -1.0);
            }
            SessionReply::Close => panic!("unexpected close"),
        }
    }

    #[test]
    fn quit_closes_the_session() {
        let mut session = Session::new(config()).unwrap();
        assert_eq!(
            session.handle_command(Command::Quit).unwrap(),
            SessionReply::Close
        );
    }

    async fn next_snapshot<R>(lines: &mut Lines<BufReader<R>>) -> Snapshot
    where
        R: AsyncRead + Unpin,
    {
        let line = lines.next_line().await.unwrap().expect("snapshot line");
        Snapshot::from_line(&line).unwrap()
    }

    #[tokio::test]
    async fn session_loop_over_a_stream() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(run_session(server, config(), Duration::ZERO));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        assert_eq!(next_snapshot(&mut lines).await.current_character_position, 5);

        write.write_all(b"UP\n").await.unwrap();
        assert_eq!(next_snapshot(&mut lines).await.current_character_position, 1);

        write.write_all(b" \nRIGHT\nRIGHT\n").await.unwrap();
        assert_eq!(next_snapshot(&mut lines).await.current_character_position, 1);
        assert_eq!(next_snapshot(&mut lines).await.current_character_position, 2);
        assert_eq!(next_snapshot(&mut lines).await.current_character_position, 3);

        write.write_all(b"DOWN\n").await.unwrap();
        let terminal = next_snapshot(&mut lines).await;
        assert!(terminal.end);
        let fresh = next_snapshot(&mut lines).await;
        assert!(!fresh.end);
        assert_eq!(fresh.current_character_position, 5);

        write.write_all(b"q\n").await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn disconnect_ends_only_that_session() {
        let config = config();
        let (first, first_server) = tokio::io::duplex(4096);
        let (second, second_server) = tokio::io::duplex(4096);
        let first_task = tokio::spawn(run_session(first_server, config.clone(), Duration::ZERO));
        let second_task = tokio::spawn(run_session(second_server, config, Duration::ZERO));

        let (first_read, first_write) = tokio::io::split(first);
        let mut first_lines = BufReader::new(first_read).lines();
        next_snapshot(&mut first_lines).await;
        drop(first_lines);
        drop(first_write);
        assert_eq!(first_task.await.unwrap().unwrap(), 0);

        let (read, mut write) = tokio::io::split(second);
        let mut lines = BufReader::new(read).lines();
        next_snapshot(&mut lines).await;
        write.write_all(b"LEFT\n").await.unwrap();
        assert_eq!(next_snapshot(&mut lines).await.current_character_position, 4);
        write.write_all(b"q\n").await.unwrap();
        assert_eq!(second_task.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_bytes_end_the_session_with_an_error() {
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(run_session(server, config(), Duration::ZERO));
        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();
        next_snapshot(&mut lines).await;
        write.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        assert!(task.await.unwrap().is_err());
    }
}
