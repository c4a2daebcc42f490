use std::fmt;
use std::iter;
use std::mem;

use log::warn;
use regoth_formats::SymbolKind;
use regoth_script::{SymbolIndex, SymbolTable};
use serde::{Deserialize, Serialize};

use super::actor::ActorHandle;
use super::message::Message;
use super::World;

/// Loop return value that ends the current state.
pub const LOOP_END: i32 = 1;

/// Engine-implemented states with no script functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramState {
    Idle,
    Dead,
    Unconscious,
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProgramState::Idle => "idle",
            ProgramState::Dead => "dead",
            ProgramState::Unconscious => "unconscious",
        };
        f.write_str(label)
    }
}

/// Script functions making up one AI state, resolved once at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFunctions {
    pub enter: SymbolIndex,
    pub looping: Option<SymbolIndex>,
    pub exit: Option<SymbolIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRoutine {
    Script(StateFunctions),
    Program(ProgramState),
}

impl StateRoutine {
    /// Script states report their enter function's name.
    pub fn name(&self, symbols: &SymbolTable) -> String {
        match self {
            StateRoutine::Script(functions) => symbols.name(functions.enter).to_string(),
            StateRoutine::Program(state) => state.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiStateEntry {
    pub routine: StateRoutine,
    pub entered: bool,
    pub ended: bool,
    /// Last value returned by the loop function.
    pub cursor: i32,
    /// Seconds spent in this state.
    pub elapsed: f32,
}

impl AiStateEntry {
    pub fn new(routine: StateRoutine) -> Self {
        AiStateEntry {
            routine,
            entered: false,
            ended: false,
            cursor: 0,
            elapsed: 0.0,
        }
    }

    pub fn program(&self) -> Option<ProgramState> {
        match self.routine {
            StateRoutine::Program(state) => Some(state),
            StateRoutine::Script(_) => None,
        }
    }
}

/// State stack of one actor. Never empty: the top always exists.
#[derive(Debug, Clone, PartialEq)]
pub struct AiStateStack {
    top: AiStateEntry,
    below: Vec<AiStateEntry>,
}

impl AiStateStack {
    pub fn new(top: AiStateEntry) -> Self {
        AiStateStack {
            top,
            below: Vec::new(),
        }
    }

    /// Rebuild a stack from entries listed bottom first.
    pub fn from_entries(entries: Vec<AiStateEntry>) -> Option<Self> {
        let mut below = entries;
        let top = below.pop()?;
        Some(AiStateStack { top, below })
    }

    pub fn top(&self) -> &AiStateEntry {
        &self.top
    }

    pub fn top_mut(&mut self) -> &mut AiStateEntry {
        &mut self.top
    }

    pub fn push(&mut self, entry: AiStateEntry) {
        let suspended = mem::replace(&mut self.top, entry);
        self.below.push(suspended);
    }

    /// Remove the top entry; a fresh `idle` takes its place when nothing is
    /// left underneath.
    pub fn pop_or(&mut self, idle: StateRoutine) -> AiStateEntry {
        let next = self
            .below
            .pop()
            .unwrap_or_else(|| AiStateEntry::new(idle));
        mem::replace(&mut self.top, next)
    }

    pub fn reset(&mut self, idle: StateRoutine) {
        self.below.clear();
        self.top = AiStateEntry::new(idle);
    }

    pub fn len(&self) -> usize {
        self.below.len() + 1
    }

    /// Bottom first.
    pub fn iter(&self) -> impl Iterator<Item = &AiStateEntry> {
        self.below.iter().chain(iter::once(&self.top))
    }
}

/// Find `NAME`, `NAME_LOOP` and `NAME_END` for a state base name.
pub fn resolve_state(symbols: &SymbolTable, name: &str) -> Option<StateFunctions> {
    let enter = symbols.find(name)?;
    state_functions(symbols, enter)
}

/// Complete the state whose enter function is `enter`.
pub fn state_functions(symbols: &SymbolTable, enter: SymbolIndex) -> Option<StateFunctions> {
    let function = |index: SymbolIndex| symbols.symbol(index).kind == SymbolKind::Function;
    if !function(enter) {
        return None;
    }
    let base = symbols.name(enter);
    let looping = symbols
        .find(&format!("{base}_LOOP"))
        .filter(|index| function(*index));
    let exit = symbols
        .find(&format!("{base}_END"))
        .filter(|index| function(*index));
    Some(StateFunctions {
        enter,
        looping,
        exit,
    })
}

impl World {
    /// Preempting pushes suspend the current top and enter the new state now;
    /// otherwise the change is queued for the next tick.
    pub fn push_state(&mut self, handle: ActorHandle, routine: StateRoutine, preempt: bool) -> bool {
        if !preempt {
            let message = match routine {
                StateRoutine::Script(functions) => Message::start_state(handle, functions.enter),
                StateRoutine::Program(state) => Message::program_state(handle, state),
            };
            return self.state.post_message(message);
        }
        if !self.state.is_live(handle) {
            return false;
        }
        let label = routine.name(self.symbols());
        if let Some(actor) = self.state.actor_mut(handle) {
            actor.states.push(AiStateEntry::new(routine));
            let line = format!("state.push {} {label}", actor.name);
            self.state.log_event(line);
        }
        self.enter_top(handle);
        true
    }

    /// Push the state called `name`. An unknown state puts the actor into
    /// idle instead and returns false.
    pub fn push_state_by_name(&mut self, handle: ActorHandle, name: &str, preempt: bool) -> bool {
        match resolve_state(self.symbols(), name) {
            Some(functions) => self.push_state(handle, StateRoutine::Script(functions), preempt),
            None => {
                self.report_missing_state(handle, name);
                false
            }
        }
    }

    /// Start the state whose enter function is `enter`, falling back to idle.
    pub(crate) fn start_state_symbol(&mut self, handle: ActorHandle, enter: SymbolIndex) -> bool {
        match state_functions(self.symbols(), enter) {
            Some(functions) => self.push_state(handle, StateRoutine::Script(functions), true),
            None => {
                let name = self.symbols().name(enter).to_string();
                self.report_missing_state(handle, &name);
                false
            }
        }
    }

    fn report_missing_state(&mut self, handle: ActorHandle, name: &str) {
        warn!("actor {handle}: no state function named {name}; falling back to idle");
        self.state.log_event(format!("state.missing {name} ({handle})"));
        let idle = self.idle;
        self.push_state(handle, idle, true);
    }

    /// Pop the top state and run its exit function.
    pub fn pop_state(&mut self, handle: ActorHandle) -> bool {
        let idle = self.idle;
        let Some(actor) = self.state.actor_mut(handle) else {
            return false;
        };
        let popped = actor.states.pop_or(idle);
        let line = format!(
            "state.pop {} {}",
            actor.name,
            popped.routine.name(self.script.symbols())
        );
        self.state.log_event(line);
        if let (true, StateRoutine::Script(functions)) = (popped.entered, popped.routine) {
            if let Some(exit) = functions.exit {
                self.script
                    .invoke(&mut self.state, exit, &[], Some(handle), None);
            }
        }
        true
    }

    fn enter_top(&mut self, handle: ActorHandle) {
        let Some(actor) = self.state.actor_mut(handle) else {
            return;
        };
        let top = actor.states.top_mut();
        if top.entered {
            return;
        }
        top.entered = true;
        let routine = top.routine;
        if let StateRoutine::Script(functions) = routine {
            self.script
                .invoke(&mut self.state, functions.enter, &[], Some(handle), None);
        }
    }

    /// Run one step of the actor's current state.
    pub fn tick_actor(&mut self, handle: ActorHandle, dt: f32) {
        let Some(actor) = self.state.actor(handle) else {
            return;
        };
        if !actor.states.top().entered {
            self.enter_top(handle);
        }
        let Some(actor) = self.state.actor(handle) else {
            return;
        };
        let depth = actor.states.len();
        let routine = actor.states.top().routine;
        let elapsed = actor.states.top().elapsed;
        let ended = match routine {
            StateRoutine::Script(functions) => match functions.looping {
                Some(looping) => {
                    let result = self
                        .script
                        .invoke(&mut self.state, looping, &[], Some(handle), None);
                    let cursor = result.as_int().unwrap_or(0);
                    if let Some(actor) = self.state.actor_mut(handle) {
                        if actor.states.len() == depth {
                            actor.states.top_mut().cursor = cursor;
                        }
                    }
                    cursor == LOOP_END
                }
                None => false,
            },
            StateRoutine::Program(ProgramState::Unconscious) => {
                elapsed + dt >= self.unconscious_seconds
            }
            StateRoutine::Program(ProgramState::Idle | ProgramState::Dead) => false,
        };

        let Some(actor) = self.state.actor_mut(handle) else {
            return;
        };
        let top = actor.states.top_mut();
        top.elapsed += dt;
        if ended {
            top.ended = true;
            self.pop_state(handle);
        }
    }

    /// Drop all pending messages and restart from a fresh idle state.
    pub fn interrupt(&mut self, handle: ActorHandle) -> bool {
        let idle = self.idle;
        let Some(actor) = self.state.actor_mut(handle) else {
            return false;
        };
        actor.queue.clear();
        actor.current_message = None;
        actor.states.reset(idle);
        let line = format!("state.interrupt {}", actor.name);
        self.state.log_event(line);
        true
    }

    /// Zero hit points and enter the dead state now.
    pub fn kill(&mut self, handle: ActorHandle) -> bool {
        let Some(actor) = self.state.actor(handle) else {
            return false;
        };
        if actor.is_dead() {
            return true;
        }
        self.state.set_hitpoints(handle, 0);
        self.push_state(handle, StateRoutine::Program(ProgramState::Dead), true)
    }

    /// Queue the unconscious state for the next tick.
    pub fn knock_out(&mut self, handle: ActorHandle) -> bool {
        self.push_state(handle, StateRoutine::Program(ProgramState::Unconscious), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(enter: u32) -> StateRoutine {
        StateRoutine::Script(StateFunctions {
            enter: SymbolIndex(enter),
            looping: None,
            exit: None,
        })
    }

    #[test]
    fn stack_never_runs_empty() {
        let idle = StateRoutine::Program(ProgramState::Idle);
        let mut stack = AiStateStack::new(AiStateEntry::new(idle));
        stack.push(AiStateEntry::new(script(4)));
        assert_eq!(stack.len(), 2);

        let popped = stack.pop_or(idle);
        assert_eq!(popped.routine, script(4));
        let popped = stack.pop_or(idle);
        assert_eq!(popped.program(), Some(ProgramState::Idle));
        assert_eq!(stack.len(), 1);
        assert!(!stack.top().entered);
    }

    #[test]
    fn entries_rebuild_bottom_first() {
        let idle = StateRoutine::Program(ProgramState::Idle);
        let entries = vec![AiStateEntry::new(idle), AiStateEntry::new(script(9))];
        let stack = AiStateStack::from_entries(entries).expect("non-empty");
        assert_eq!(stack.top().routine, script(9));
        let order: Vec<_> = stack.iter().map(|entry| entry.routine).collect();
        assert_eq!(order, vec![idle, script(9)]);
        assert!(AiStateStack::from_entries(Vec::new()).is_none());
    }
}
