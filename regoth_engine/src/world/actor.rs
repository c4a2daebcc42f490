use std::collections::VecDeque;
use std::fmt;

use regoth_script::{Instance, InstanceRef, SymbolIndex};
use serde::{Deserialize, Serialize};

use super::inventory::Inventory;
use super::message::Message;
use super::state_machine::{AiStateEntry, AiStateStack, ProgramState, StateRoutine};

/// Stable actor identity; never reused within a world.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActorHandle(pub u32);

impl ActorHandle {
    pub fn instance_ref(self) -> InstanceRef {
        InstanceRef(self.0)
    }

    pub fn from_instance(reference: InstanceRef) -> Self {
        ActorHandle(reference.0)
    }
}

impl fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub(crate) handle: ActorHandle,
    pub(crate) name: String,
    pub(crate) instance_symbol: SymbolIndex,
    pub(crate) instance: Instance,
    pub(crate) inventory: Inventory,
    pub(crate) states: AiStateStack,
    pub(crate) queue: VecDeque<Message>,
    pub(crate) current_message: Option<Message>,
    pub(crate) position: [f32; 3],
    pub(crate) player: bool,
    pub(crate) pending_despawn: bool,
}

impl Actor {
    pub(crate) fn new(
        handle: ActorHandle,
        name: String,
        instance: Instance,
        idle: StateRoutine,
    ) -> Self {
        Actor {
            handle,
            name,
            instance_symbol: instance.symbol(),
            instance,
            inventory: Inventory::new(),
            states: AiStateStack::new(AiStateEntry::new(idle)),
            queue: VecDeque::new(),
            current_message: None,
            position: [0.0; 3],
            player: false,
            pending_despawn: false,
        }
    }

    pub fn handle(&self) -> ActorHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_symbol(&self) -> SymbolIndex {
        self.instance_symbol
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    pub fn states(&self) -> &AiStateStack {
        &self.states
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn current_message(&self) -> Option<&Message> {
        self.current_message.as_ref()
    }

    pub fn position(&self) -> [f32; 3] {
        self.position
    }

    pub fn set_position(&mut self, position: [f32; 3]) {
        self.position = position;
    }

    pub fn is_player(&self) -> bool {
        self.player
    }

    pub fn is_alive(&self) -> bool {
        !self.pending_despawn
    }

    pub fn is_dead(&self) -> bool {
        self.states.top().program() == Some(ProgramState::Dead)
    }

    pub fn is_unconscious(&self) -> bool {
        self.states.top().program() == Some(ProgramState::Unconscious)
    }
}
