use tracing::{debug, warn};

use crate::{
    Action, Position, StateIndex,
    config::{CHARACTER_NAME, ConfigError, GameConfig, ObjectConfig},
    map::Grid,
    protocol::Snapshot,
};

/// Lifecycle of one episode. `Ended` is terminal for an `Environment` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Running,
    Ended,
}

/// An object placed in the world, other than the character.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub name: String,
    pub position: Position,
    pub icon: String,
    pub solid: bool,
    pub consumable: bool,
    pub ends_game: bool,
    pub reward: Option<f64>,
    pub taken: bool,
}

impl WorldObject {
    fn from_config(name: &str, config: &ObjectConfig) -> Self {
        WorldObject {
            name: name.to_string(),
            position: Position::new(config.x, config.y),
            icon: config.icon.clone(),
            solid: config.solid,
            consumable: config.consumable,
            ends_game: config.ends_game,
            reward: config.reward,
            taken: false,
        }
    }

    /// Whether the object is still drawn and can still be collided with.
    pub fn is_present(&self) -> bool {
        !(self.consumable && self.taken)
    }
}

/// The mutable state of one episode.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub positions: Grid<String>,
    pub steps_remaining: u32,
    /// Reward of the last step.
    pub reward: f64,
    pub end: bool,
    pub character: Position,
}

impl World {
    pub fn size_x(&self) -> usize {
        self.positions.width()
    }

    pub fn size_y(&self) -> usize {
        self.positions.height()
    }

    /// Linear index of the character, `x + y * size_x`.
    pub fn current_character_position(&self) -> StateIndex {
        self.character.x + self.character.y * self.size_x()
    }
}

/// Owns one episode's world and applies moves to it. No I/O.
#[derive(Debug, Clone)]
pub struct Environment {
    world: World,
    objects: Vec<WorldObject>,
    character_icon: String,
    background: String,
    move_penalty: f64,
    state: EpisodeState,
}

impl Environment {
    /// Builds a fresh episode from the configuration: every object placed,
    /// nothing taken, the full step budget available.
    pub fn reset(config: &GameConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let character = config.character()?;
        let background = config.world.background.clone();
        let positions =
            Grid::filled(config.world.size_x, config.world.size_y, background.clone())?;

        let objects = config
            .objects
            .iter()
            .filter(|(name, _)| name.as_str() != CHARACTER_NAME)
            .map(|(name, object)| WorldObject::from_config(name, object))
            .collect();

        let mut environment = Environment {
            world: World {
                positions,
                steps_remaining: config.max_steps,
                reward: 0.0,
                end: false,
                character: Position::new(character.x, character.y),
            },
            objects,
            character_icon: character.icon.clone(),
            background,
            move_penalty: config.world.reward,
            state: EpisodeState::Running,
        };
        environment.put_fixed_items();
        environment.put_character();
        Ok(environment)
    }

    /// Applies a raw wire token. Unrecognized tokens are a no-op move that
    /// still costs a step and the move penalty.
    pub fn step(&mut self, action_token: &str) -> Snapshot {
        self.step_action(Action::from_token(action_token))
    }

    /// Applies one move (`None` = stay in place) and returns the new snapshot.
    pub fn step_action(&mut self, action: Option<Action>) -> Snapshot {
        if self.state == EpisodeState::Ended {
            warn!("Step requested on an ended episode; world left unchanged");
            return self.snapshot();
        }

        let old = self.world.character;
        let (dx, dy) = action.map(Action::delta).unwrap_or((0, 0));
        let proposed = (old.x as isize + dx, old.y as isize + dy);

        let blocked = self.objects.iter().any(|object| {
            object.solid
                && object.is_present()
                && (object.position.x as isize, object.position.y as isize) == proposed
        });
        let (target_x, target_y) = if blocked {
            (old.x as isize, old.y as isize)
        } else {
            proposed
        };
        let new = self.world.positions.clamp(target_x, target_y);

        self.world.steps_remaining = self.world.steps_remaining.saturating_sub(1);

        self.world.reward = self.move_penalty;
        for object in self.objects.iter_mut() {
            if object.solid || object.position != new || !object.is_present() {
                continue;
            }
            if let Some(reward) = object.reward {
                self.world.reward = reward;
            }
            object.taken = true;
            debug!(object = %object.name, reward = self.world.reward, "Object taken");
        }

        self.world.end = self.world.steps_remaining == 0
            || self.objects.iter().any(|object| object.ends_game && object.taken);
        if self.world.end {
            self.state = EpisodeState::Ended;
        }

        // Redraw: old character cell, then objects, then the character on top.
        self.world.positions[old] = self.background.clone();
        self.put_fixed_items();
        self.world.character = new;
        self.put_character();

        self.snapshot()
    }

    /// Read-only view of the world.
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn objects(&self) -> &[WorldObject] {
        &self.objects
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    /// Projects the world into its wire form. No side effects.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            size: format!("{}x{}", self.world.size_x(), self.world.size_y()),
            positions: self.world.positions.as_slice().to_vec(),
            reward: self.world.reward,
            end: self.world.end,
            current_character_position: self.world.current_character_position(),
        }
    }

    /// Draws every object that is still present.
    fn put_fixed_items(&mut self) {
        for object in self.objects.iter().filter(|object| object.is_present()) {
            self.world.positions[object.position] = object.icon.clone();
        }
    }

    fn put_character(&mut self) {
        self.world.positions[self.world.character] = self.character_icon.clone();
    }
}
