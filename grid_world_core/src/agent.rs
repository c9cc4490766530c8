use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, error, info, trace, warn};

use crate::{
    Action, StateIndex,
    checkpoint::{Checkpointer, EVAL_PREFIX, TARGET_PREFIX},
    config::AgentConfig,
    q_table::{LevelKey, LevelTables, QTableError, argmax_first, argmax_random},
};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Table(#[from] QTableError),
}

/// One observed step: the action taken in `state` and what came back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: StateIndex,
    pub action: Action,
    pub reward: f64,
    pub next_state: StateIndex,
}

/// Trait defining the behavior of an agent driving the environment.
///
/// Failures inside `act` and `learn` are logged by the implementation and never
/// propagate; `act` returning `None` means "send a no-op".
pub trait Agent {
    /// Picks the next move for the character at `state`.
    fn act(&mut self, state: StateIndex) -> Option<Action>;

    /// Consumes the result of the last action.
    fn learn(&mut self, transition: &Transition);

    /// Called once the environment reported `end = true`.
    fn end_episode(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Epsilon-greedy exploration, values are updated.
    Training,
    /// Deterministic greedy play, values are read-only.
    Evaluation,
}

/// Running sum of episode scores between two reports.
#[derive(Debug, Clone, Copy, Default)]
struct ScoreWindow {
    total: f64,
    episodes: u64,
}

impl ScoreWindow {
    fn push(&mut self, score: f64) {
        self.total += score;
        self.episodes += 1;
    }

    fn mean(&self) -> f64 {
        if self.episodes == 0 {
            0.0
        } else {
            self.total / self.episodes as f64
        }
    }

    fn reset(&mut self) {
        *self = ScoreWindow::default();
    }
}

/// Tabular Q-learning agent with level-scoped tables and a periodic
/// train / checkpoint / evaluate cycle.
#[derive(Debug)]
pub struct QLearningAgent {
    config: AgentConfig,
    tables: LevelTables,
    current_level: LevelKey,
    mode: AgentMode,
    /// Finished training episodes; drives epsilon decay and the checkpoint cycle.
    episode_count: u64,
    eval_episode_count: u64,
    episode_score: f64,
    train_window: ScoreWindow,
    eval_window: ScoreWindow,
    rng: StdRng,
    checkpointer: Option<Checkpointer>,
}

impl QLearningAgent {
    pub fn new(config: &AgentConfig, num_states: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        QLearningAgent {
            config: config.clone(),
            tables: LevelTables::new(num_states),
            current_level: LevelKey::ground(),
            mode: AgentMode::Training,
            episode_count: 0,
            eval_episode_count: 0,
            episode_score: 0.0,
            train_window: ScoreWindow::default(),
            eval_window: ScoreWindow::default(),
            rng,
            checkpointer: None,
        }
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn tables(&self) -> &LevelTables {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut LevelTables {
        &mut self.tables
    }

    pub fn into_tables(self) -> LevelTables {
        self.tables
    }

    pub fn current_level(&self) -> &LevelKey {
        &self.current_level
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn episode_count(&self) -> u64 {
        self.episode_count
    }

    pub fn eval_episode_count(&self) -> u64 {
        self.eval_episode_count
    }

    /// Exploration rate, decaying linearly from `epsilon_start` to `epsilon_end`
    /// over `epsilon_max_episodes` training episodes.
    pub fn epsilon(&self) -> f64 {
        let AgentConfig {
            epsilon_start,
            epsilon_end,
            epsilon_max_episodes,
            ..
        } = self.config;
        if epsilon_max_episodes == 0 {
            return epsilon_end.max(0.0);
        }
        let max = epsilon_max_episodes as f64;
        let remaining = ((max - self.episode_count as f64) / max).max(0.0);
        ((epsilon_start - epsilon_end) * remaining + epsilon_end).max(0.0)
    }

    /// Selects an action for `state`, logging and returning `None` on failure.
    pub fn choose_action(&mut self, state: StateIndex) -> Option<Action> {
        match self.try_choose_action(state) {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(state, level = %self.current_level, "choose_action failed: {err}");
                None
            }
        }
    }

    /// Greedy with first-index ties while evaluating; epsilon-greedy with
    /// random ties while training.
    pub fn try_choose_action(&mut self, state: StateIndex) -> Result<Action, AgentError> {
        let row = *self.tables.get_or_insert(&self.current_level).row(state)?;
        let index = match self.mode {
            AgentMode::Evaluation => argmax_first(&row),
            AgentMode::Training => {
                let epsilon = self.epsilon();
                if self.rng.random::<f64>() <= epsilon {
                    self.rng.random_range(0..Action::COUNT)
                } else {
                    argmax_random(&row, &mut self.rng)
                }
            }
        };
        Ok(Action::ALL[index])
    }

    /// One-step Q update on the active level, then the level switch on a
    /// positive reward. The value update is skipped while evaluating.
    pub fn try_learn(&mut self, transition: &Transition) -> Result<(), AgentError> {
        self.episode_score += transition.reward;

        if self.mode == AgentMode::Training {
            let (learning_rate, gamma) = (self.config.learning_rate, self.config.gamma);
            let table = self.tables.get_or_insert(&self.current_level);
            let next_row = *table.row(transition.next_state)?;
            let best_next = argmax_random(&next_row, &mut self.rng);
            let target = transition.reward + gamma * next_row[best_next];

            let value = &mut table.row_mut(transition.state)?[transition.action.index()];
            *value += learning_rate * (target - *value);
            trace!(
                level = %self.current_level,
                state = transition.state,
                action = ?transition.action,
                best_next,
                value = *value,
                "Q updated"
            );
        }

        if transition.reward > 0.0 {
            let level = LevelKey::from_state(transition.next_state);
            self.tables.get_or_insert(&level);
            debug!(from = %self.current_level, to = %level, "Switching level");
            self.current_level = level;
        }
        Ok(())
    }

    /// Advances the train / evaluate cycle and resets per-episode state.
    pub fn on_episode_end(&mut self) {
        let score = self.episode_score;
        match self.mode {
            AgentMode::Training => {
                self.episode_count += 1;
                self.train_window.push(score);
                info!(
                    episode = self.episode_count,
                    score,
                    epsilon = self.epsilon(),
                    levels = self.tables.len(),
                    "Training episode finished"
                );

                let every = self.config.eval_every_n_episodes;
                if every > 0 && self.episode_count % every == 0 {
                    info!(
                        episode = self.episode_count,
                        average = self.train_window.mean(),
                        window = self.train_window.episodes,
                        "Average training score"
                    );
                    self.save_checkpoint(TARGET_PREFIX);
                    self.train_window.reset();
                    if self.config.n_episodes_evaluate > 0 {
                        info!(
                            episodes = self.config.n_episodes_evaluate,
                            "Starting evaluation"
                        );
                        self.mode = AgentMode::Evaluation;
                        self.eval_episode_count = 0;
                        self.eval_window.reset();
                    }
                }
            }
            AgentMode::Evaluation => {
                self.eval_episode_count += 1;
                self.eval_window.push(score);
                info!(
                    eval_episode = self.eval_episode_count,
                    score, "Evaluation episode finished"
                );
                if self.eval_episode_count >= self.config.n_episodes_evaluate {
                    info!(
                        after_episode = self.episode_count,
                        average = self.eval_window.mean(),
                        "Average evaluation score"
                    );
                    self.save_checkpoint(EVAL_PREFIX);
                    self.eval_episode_count = 0;
                    self.eval_window.reset();
                    self.mode = AgentMode::Training;
                }
            }
        }
        self.current_level = LevelKey::ground();
        self.episode_score = 0.0;
    }

    fn save_checkpoint(&self, prefix: &str) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        match checkpointer.save(prefix, &self.tables) {
            Ok(paths) => info!(
                binary = %paths.binary.display(),
                text = %paths.text.display(),
                "Checkpoint saved"
            ),
            Err(err) => error!(prefix, "Checkpoint failed: {err}"),
        }
    }
}

impl Agent for QLearningAgent {
    fn act(&mut self, state: StateIndex) -> Option<Action> {
        self.choose_action(state)
    }

    fn learn(&mut self, transition: &Transition) {
        if let Err(err) = self.try_learn(transition) {
            warn!(?transition, level = %self.current_level, "Update skipped: {err}");
        }
    }

    fn end_episode(&mut self) {
        self.on_episode_end();
    }
}

/// Plays a pre-trained table set greedily. Never explores, never updates values.
#[derive(Debug)]
pub struct GreedyAgent {
    tables: LevelTables,
    current_level: LevelKey,
    episode_count: u64,
    episode_score: f64,
}

impl GreedyAgent {
    pub fn new(tables: LevelTables) -> Self {
        GreedyAgent {
            tables,
            current_level: LevelKey::ground(),
            episode_count: 0,
            episode_score: 0.0,
        }
    }

    pub fn tables(&self) -> &LevelTables {
        &self.tables
    }

    pub fn current_level(&self) -> &LevelKey {
        &self.current_level
    }

    pub fn episode_count(&self) -> u64 {
        self.episode_count
    }

    fn try_act(&mut self, state: StateIndex) -> Result<Action, AgentError> {
        let row = self.tables.get_or_insert(&self.current_level).row(state)?;
        Ok(Action::ALL[argmax_first(row)])
    }
}

impl Agent for GreedyAgent {
    fn act(&mut self, state: StateIndex) -> Option<Action> {
        match self.try_act(state) {
            Ok(action) => Some(action),
            Err(err) => {
                warn!(state, level = %self.current_level, "choose_action failed: {err}");
                None
            }
        }
    }

    fn learn(&mut self, transition: &Transition) {
        self.episode_score += transition.reward;
        if transition.reward > 0.0 {
            let level = LevelKey::from_state(transition.next_state);
            self.tables.get_or_insert(&level);
            self.current_level = level;
        }
    }

    fn end_episode(&mut self) {
        self.episode_count += 1;
        info!(
            episode = self.episode_count,
            score = self.episode_score,
            "Replay episode finished"
        );
        self.current_level = LevelKey::ground();
        self.episode_score = 0.0;
    }
}
