use regoth_script::SymbolIndex;
use serde::{Deserialize, Serialize};

use super::actor::ActorHandle;
use super::state_machine::ProgramState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    StartState,
    EndState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Give,
    Remove,
    Use,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    /// Start a script state (the message's function) or a program state.
    State {
        change: StateChange,
        program: Option<ProgramState>,
    },
    Damage {
        amount: i32,
    },
    Conversation {
        line: String,
    },
    Item {
        action: ItemAction,
        item: SymbolIndex,
        count: u32,
    },
    Custom {
        kind: i32,
    },
}

impl MessagePayload {
    /// Kind code reported to scripts by `EM_GetMessageKind`.
    pub fn kind_code(&self) -> i32 {
        match self {
            MessagePayload::State { .. } => 1,
            MessagePayload::Damage { .. } => 2,
            MessagePayload::Conversation { .. } => 3,
            MessagePayload::Item { .. } => 4,
            MessagePayload::Custom { .. } => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessagePayload::State {
                change: StateChange::StartState,
                ..
            } => "start_state",
            MessagePayload::State {
                change: StateChange::EndState,
                ..
            } => "end_state",
            MessagePayload::Damage { .. } => "damage",
            MessagePayload::Conversation { .. } => "conversation",
            MessagePayload::Item { .. } => "item",
            MessagePayload::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub target: ActorHandle,
    pub source: Option<ActorHandle>,
    /// Function to invoke on delivery, or the state to start.
    pub function: Option<SymbolIndex>,
    pub payload: MessagePayload,
    /// Tick during which the message was posted; set by the dispatcher.
    pub posted_tick: u64,
}

impl Message {
    pub fn new(target: ActorHandle, payload: MessagePayload) -> Self {
        Message {
            target,
            source: None,
            function: None,
            payload,
            posted_tick: 0,
        }
    }

    pub fn start_state(target: ActorHandle, state: SymbolIndex) -> Self {
        Message {
            function: Some(state),
            ..Message::new(
                target,
                MessagePayload::State {
                    change: StateChange::StartState,
                    program: None,
                },
            )
        }
    }

    pub fn program_state(target: ActorHandle, program: ProgramState) -> Self {
        Message::new(
            target,
            MessagePayload::State {
                change: StateChange::StartState,
                program: Some(program),
            },
        )
    }

    pub fn end_state(target: ActorHandle) -> Self {
        Message::new(
            target,
            MessagePayload::State {
                change: StateChange::EndState,
                program: None,
            },
        )
    }

    pub fn damage(target: ActorHandle, source: Option<ActorHandle>, amount: i32) -> Self {
        Message {
            source,
            ..Message::new(target, MessagePayload::Damage { amount })
        }
    }

    pub fn item(target: ActorHandle, action: ItemAction, item: SymbolIndex, count: u32) -> Self {
        Message::new(
            target,
            MessagePayload::Item {
                action,
                item,
                count,
            },
        )
    }

    pub fn with_source(mut self, source: ActorHandle) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_function(mut self, function: SymbolIndex) -> Self {
        self.function = Some(function);
        self
    }
}
