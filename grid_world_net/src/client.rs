use anyhow::{Context, anyhow};
use grid_world_core::{
    agent::{Agent, Transition},
    protocol::{Command, Snapshot},
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines},
    sync::watch,
};
use tracing::{debug, info};

/// Totals of one agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub episodes: u64,
    pub steps: u64,
}

/// Plays against a session server until `episode_limit` episodes are done or
/// `stop` turns true, then sends the quit token and closes the writer.
///
/// Each step is strictly sequential: act, send, wait for the reply, learn.
pub async fn run_agent<R, W, A>(
    reader: R,
    mut writer: W,
    agent: &mut A,
    episode_limit: Option<u64>,
    stop: watch::Receiver<bool>,
) -> anyhow::Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    A: Agent + ?Sized,
{
    let mut lines = reader.lines();
    let mut summary = RunSummary::default();
    let mut snapshot = read_snapshot(&mut lines).await?;

    loop {
        if *stop.borrow() {
            info!("Stop requested");
            break;
        }
        if episode_limit.is_some_and(|limit| summary.episodes >= limit) {
            info!(episodes = summary.episodes, "Episode limit reached");
            break;
        }

        let state = snapshot.current_character_position;
        let action = agent.act(state);
        send_command(&mut writer, Command::from(action)).await?;

        let next = read_snapshot(&mut lines).await?;
        summary.steps += 1;
        if let Some(action) = action {
            agent.learn(&Transition {
                state,
                action,
                reward: next.reward,
                next_state: next.current_character_position,
            });
        }

        if next.end {
            agent.end_episode();
            summary.episodes += 1;
            // The server follows a terminal snapshot with the reset world.
            snapshot = read_snapshot(&mut lines).await?;
        } else {
            snapshot = next;
        }
    }

    send_command(&mut writer, Command::Quit).await?;
    writer.shutdown().await?;
    Ok(summary)
}

async fn read_snapshot<R>(lines: &mut Lines<R>) -> anyhow::Result<Snapshot>
where
    R: AsyncBufRead + Unpin,
{
    let line = lines
        .next_line()
        .await
        .context("Failed to read from server")?
        .ok_or_else(|| anyhow!("Server closed the connection"))?;
    let snapshot = Snapshot::from_line(&line).context("Malformed snapshot")?;
    debug!(
        position = snapshot.current_character_position,
        reward = snapshot.reward,
        end = snapshot.end,
        "Received"
    );
    Ok(snapshot)
}

async fn send_command<W>(writer: &mut W, command: Command) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!(token = command.token(), "Sending");
    writer
        .write_all(command.to_line().as_bytes())
        .await
        .context("Failed to send command")?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use grid_world_core::{
        Action, StateIndex,
        agent::{GreedyAgent, QLearningAgent},
        config::GameConfig,
        q_table::{LevelKey, LevelTables},
    };
    use tokio::io::BufReader;

    use super::*;
    use crate::session::run_session;

    const CONFIG: &str = r#"{
        "world": { "size_x": 3, "size_y": 1, "reward": -1 },
        "objects": {
            "character": { "x": 0, "y": 0, "icon": "W" },
            "goal": { "x": 2, "y": 0, "icon": "X", "consumable": true, "ends_game": true, "reward": 5 }
        },
        "max_steps": 6,
        "eval_every_n_episodes": 0
    }"#;

    fn config() -> Arc<GameConfig> {
        Arc::new(GameConfig::from_json_str(CONFIG).unwrap())
    }

    /// Records every callback; always moves right.
    #[derive(Default)]
    struct Recorder {
        transitions: Vec<Transition>,
        episodes: u64,
    }

    impl Agent for Recorder {
        fn act(&mut self, _state: StateIndex) -> Option<Action> {
            Some(Action::Right)
        }

        fn learn(&mut self, transition: &Transition) {
            self.transitions.push(*transition);
        }

        fn end_episode(&mut self) {
            self.episodes += 1;
        }
    }

    async fn play<A: Agent>(agent: &mut A, limit: u64) -> RunSummary {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let session = tokio::spawn(run_session(server, config(), Duration::ZERO));
        let (read, write) = tokio::io::split(client);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let summary = run_agent(BufReader::new(read), write, agent, Some(limit), stop_rx)
            .await
            .unwrap();
        assert_eq!(session.await.unwrap().unwrap(), limit);
        summary
    }

    #[tokio::test]
    async fn transitions_follow_the_snapshots() {
        let mut agent = Recorder::default();
        let summary = play(&mut agent, 2).await;
        assert_eq!(summary, RunSummary { episodes: 2, steps: 4 });
        assert_eq!(agent.episodes, 2);
        assert_eq!(
            agent.transitions[0],
            Transition {
                state: 0,
                action: Action::Right,
                reward: -1.0,
                next_state: 1,
            }
        );
        assert_eq!(
            agent.transitions[1],
            Transition {
                state: 1,
                action: Action::Right,
                reward: 5.0,
                next_state: 2,
            }
        );
        // The second episode starts from the reset world.
        assert_eq!(agent.transitions[2].state, 0);
    }

    #[tokio::test]
    async fn failed_actions_become_noops() {
        // Tables sized for a different world: every lookup fails.
        let mut agent = GreedyAgent::new(LevelTables::new(0));
        let summary = play(&mut agent, 1).await;
        assert_eq!(summary, RunSummary { episodes: 1, steps: 6 });
        assert!(agent.current_level().is_ground());
    }

    #[tokio::test]
    async fn q_learning_agent_trains_over_the_wire() {
        let config = config();
        let mut agent = QLearningAgent::new(&config.agent, config.num_states(), Some(5));
        let summary = play(&mut agent, 20).await;
        assert_eq!(summary.episodes, 20);
        assert_eq!(agent.episode_count(), 20);
        let ground = agent.tables().get(&LevelKey::ground()).unwrap();
        assert!(ground.rows().iter().any(|row| row.iter().any(|v| *v != 0.0)));
    }

    #[tokio::test]
    async fn stop_signal_sends_quit() {
        let (client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(run_session(server, config(), Duration::ZERO));
        let (read, write) = tokio::io::split(client);
        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();
        let mut agent = Recorder::default();
        let summary = run_agent(BufReader::new(read), write, &mut agent, None, stop_rx)
            .await
            .unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(session.await.unwrap().unwrap(), 0);
    }
}
