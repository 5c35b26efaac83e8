//! Persistence boundary. The engine fixes the meaning of the data; the
//! store decides durability and format.

use thiserror::Error;

use engine_contracts::TurnTransition;

use crate::world::WorldState;

/// Input-side persistence interface.
pub trait Store {
    type Error: std::error::Error;

    fn load_world(&mut self) -> Result<WorldState, Self::Error>;
    fn persist_transition(&mut self, transition: &TurnTransition) -> Result<(), Self::Error>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("no world has been stored")]
    Empty,
}

/// Keeps everything in memory; the store used by the test suites.
#[derive(Debug, Default)]
pub struct MemoryStore {
    world: Option<WorldState>,
    pub transitions: Vec<TurnTransition>,
}

impl MemoryStore {
    pub fn new(world: WorldState) -> Self {
        Self {
            world: Some(world),
            transitions: Vec::new(),
        }
    }

    pub fn put_world(&mut self, world: WorldState) {
        self.world = Some(world);
    }
}

impl Store for MemoryStore {
    type Error = MemoryStoreError;

    fn load_world(&mut self) -> Result<WorldState, Self::Error> {
        self.world.clone().ok_or(MemoryStoreError::Empty)
    }

    fn persist_transition(&mut self, transition: &TurnTransition) -> Result<(), Self::Error> {
        self.transitions.push(transition.clone());
        Ok(())
    }
}
