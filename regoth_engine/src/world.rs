use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regoth_formats::SymbolKind;
use regoth_script::{
    ExternalTable, Instance, InstanceRef, ScriptHost, SymbolIndex, SymbolTable, Value, Vm,
    VmError, VmLimits,
};

mod actor;
mod dispatcher;
mod inventory;
mod message;
mod state_machine;

pub use actor::{Actor, ActorHandle};
pub use inventory::{Inventory, ItemStack};
pub use message::{ItemAction, Message, MessagePayload, StateChange};
pub use state_machine::{
    resolve_state, state_functions, AiStateEntry, AiStateStack, ProgramState, StateFunctions,
    StateRoutine, LOOP_END,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event_log::EventLog;
use crate::presentation::{ActorFrame, FrameSnapshot};

/// First handle handed out in a fresh world.
pub const FIRST_HANDLE: u32 = 1100;

/// Rounds of deferred spawning applied after a tick before giving up.
const MAX_SPAWN_ROUNDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRequest {
    pub instance: SymbolIndex,
    pub position: [f32; 3],
}

/// Spawns and despawns requested while scripts run; applied after the tick.
#[derive(Debug, Default)]
pub struct Outbox {
    pub spawns: Vec<SpawnRequest>,
    pub despawns: Vec<ActorHandle>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.despawns.is_empty()
    }
}

/// Everything scripts can observe or change through traps: the actor
/// registry and world-scoped globals. Hosts the VM's instances.
#[derive(Debug)]
pub struct WorldState {
    pub(crate) zen: String,
    pub(crate) tick: u64,
    pub(crate) actors: BTreeMap<ActorHandle, Actor>,
    pub(crate) next_handle: u32,
    pub(crate) player: Option<ActorHandle>,
    pub(crate) outbox: Outbox,
    pub(crate) events: EventLog,
    pub(crate) rng: StdRng,
    pub(crate) in_tick: bool,
    pub(crate) hitpoints: Option<SymbolIndex>,
    pub(crate) name_member: Option<SymbolIndex>,
    pub(crate) symbols: Arc<SymbolTable>,
}

impl WorldState {
    fn new(symbols: Arc<SymbolTable>, config: &EngineConfig, zen: &str) -> Self {
        let hitpoints = member_symbol(&symbols, &config.hitpoints_member);
        let name_member = member_symbol(&symbols, &config.name_member);
        WorldState {
            zen: zen.to_string(),
            tick: 0,
            actors: BTreeMap::new(),
            next_handle: FIRST_HANDLE,
            player: None,
            outbox: Outbox::default(),
            events: EventLog::new(config.event_log_lines),
            rng: StdRng::seed_from_u64(config.random_seed),
            in_tick: false,
            hitpoints,
            name_member,
            symbols,
        }
    }

    pub fn zen(&self) -> &str {
        &self.zen
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn player(&self) -> Option<ActorHandle> {
        self.player
    }

    pub fn actor(&self, handle: ActorHandle) -> Option<&Actor> {
        self.actors.get(&handle)
    }

    pub fn actor_mut(&mut self, handle: ActorHandle) -> Option<&mut Actor> {
        self.actors.get_mut(&handle)
    }

    /// Live actors in handle order.
    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values().filter(|actor| actor.is_alive())
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn log_event(&mut self, event: impl Into<String>) {
        self.events.push(event);
    }

    pub fn is_live(&self, handle: ActorHandle) -> bool {
        self.actors.get(&handle).is_some_and(Actor::is_alive)
    }

    /// Append `message` to its target's queue, stamped with the current tick.
    /// Returns false (and drops the message) when the target is gone.
    pub fn post_message(&mut self, mut message: Message) -> bool {
        let tick = self.tick;
        match self.actors.get_mut(&message.target) {
            Some(actor) if actor.is_alive() => {
                message.posted_tick = tick;
                actor.queue.push_back(message);
                true
            }
            _ => {
                log::debug!(
                    "dropping {} message for missing actor {}",
                    message.payload.label(),
                    message.target
                );
                false
            }
        }
    }

    pub fn request_spawn(&mut self, instance: SymbolIndex, position: [f32; 3]) {
        self.outbox.spawns.push(SpawnRequest { instance, position });
    }

    /// Marks the actor gone immediately; removal happens after the tick.
    pub fn request_despawn(&mut self, handle: ActorHandle) -> bool {
        match self.actors.get_mut(&handle) {
            Some(actor) if actor.is_alive() => {
                actor.pending_despawn = true;
                self.outbox.despawns.push(handle);
                true
            }
            _ => false,
        }
    }

    pub fn hitpoints(&self, handle: ActorHandle) -> Option<i32> {
        let member = self.hitpoints?;
        self.actors
            .get(&handle)?
            .instance
            .get(&self.symbols, member, 0)?
            .as_int()
    }

    pub fn set_hitpoints(&mut self, handle: ActorHandle, value: i32) -> bool {
        let Some(member) = self.hitpoints else {
            return false;
        };
        let Some(actor) = self.actors.get_mut(&handle) else {
            return false;
        };
        actor
            .instance
            .member_mut(&self.symbols, member)
            .is_some_and(|slots| slots.set(0, Value::Int(value)).is_ok())
    }

    /// Uniform in `0..max`; 0 when `max` is not positive.
    pub fn random(&mut self, max: i32) -> i32 {
        if max <= 0 {
            0
        } else {
            self.rng.gen_range(0..max)
        }
    }

    fn allocate_handle(&mut self) -> ActorHandle {
        let handle = ActorHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    fn script_name(&self, instance: &Instance) -> Option<String> {
        let member = self.name_member?;
        instance
            .get(&self.symbols, member, 0)?
            .as_str()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

impl ScriptHost for WorldState {
    fn instance(&self, reference: InstanceRef) -> Option<&Instance> {
        self.actors
            .get(&ActorHandle::from_instance(reference))
            .map(|actor| &actor.instance)
    }

    fn instance_mut(&mut self, reference: InstanceRef) -> Option<&mut Instance> {
        self.actors
            .get_mut(&ActorHandle::from_instance(reference))
            .map(|actor| &mut actor.instance)
    }

    /// The player wins when several actors share the instance symbol.
    fn resolve_instance_symbol(&self, symbol: SymbolIndex) -> Option<InstanceRef> {
        if let Some(player) = self.player.and_then(|handle| self.actors.get(&handle)) {
            if player.instance_symbol == symbol {
                return Some(player.handle.instance_ref());
            }
        }
        self.actors()
            .find(|actor| actor.instance_symbol == symbol)
            .map(|actor| actor.handle.instance_ref())
    }
}

fn member_symbol(symbols: &SymbolTable, name: &str) -> Option<SymbolIndex> {
    let index = symbols.find(name)?;
    if symbols.symbol(index).is_member() {
        Some(index)
    } else {
        warn!("configured member {name} is not a class member; ignoring it");
        None
    }
}

/// The symbol table and the VM running against it.
pub struct ScriptEngine {
    symbols: Arc<SymbolTable>,
    vm: Vm<WorldState>,
    self_var: Option<SymbolIndex>,
    other_var: Option<SymbolIndex>,
}

impl ScriptEngine {
    pub fn new(
        symbols: Arc<SymbolTable>,
        externals: Rc<ExternalTable<WorldState>>,
        limits: VmLimits,
    ) -> Self {
        let vm = Vm::with_limits(Arc::clone(&symbols), externals, limits);
        let self_var = symbols.find("SELF");
        let other_var = symbols.find("OTHER");
        ScriptEngine {
            symbols,
            vm,
            self_var,
            other_var,
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn vm(&self) -> &Vm<WorldState> {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm<WorldState> {
        &mut self.vm
    }

    /// Point the SELF/OTHER globals at the actors involved in a call.
    fn bind_actors(&mut self, actor: Option<ActorHandle>, other: Option<ActorHandle>) {
        let globals = self.vm.globals_mut();
        if let Some(symbol) = self.self_var {
            globals.set(symbol, 0, Value::Instance(actor.map(ActorHandle::instance_ref)));
        }
        if let Some(symbol) = self.other_var {
            globals.set(symbol, 0, Value::Instance(other.map(ActorHandle::instance_ref)));
        }
    }

    pub fn call(
        &mut self,
        state: &mut WorldState,
        function: SymbolIndex,
        args: &[Value],
        actor: Option<ActorHandle>,
        other: Option<ActorHandle>,
    ) -> Result<Value, VmError> {
        self.bind_actors(actor, other);
        self.vm
            .call(state, function, args, actor.map(ActorHandle::instance_ref))
    }

    /// Like [`call`](Self::call), but failures are reported and yield the
    /// neutral value so a broken script cannot halt the simulation.
    pub fn invoke(
        &mut self,
        state: &mut WorldState,
        function: SymbolIndex,
        args: &[Value],
        actor: Option<ActorHandle>,
        other: Option<ActorHandle>,
    ) -> Value {
        match self.call(state, function, args, actor, other) {
            Ok(value) => value,
            Err(err) => {
                let name = self.symbols.name(function);
                warn!("script call {name} failed: {err}");
                state.log_event(format!("vm.error {name}: {err}"));
                Value::default()
            }
        }
    }
}

/// One loaded world: its scripts, actors and globals.
pub struct World {
    pub(crate) script: ScriptEngine,
    pub(crate) state: WorldState,
    pub(crate) idle: StateRoutine,
    pub(crate) unconscious_seconds: f32,
}

impl World {
    pub fn new(
        symbols: Arc<SymbolTable>,
        externals: Rc<ExternalTable<WorldState>>,
        config: &EngineConfig,
        zen: &str,
    ) -> Self {
        let script = ScriptEngine::new(Arc::clone(&symbols), externals, config.vm_limits());
        let state = WorldState::new(Arc::clone(&symbols), config, zen);
        let idle = match state_machine::resolve_state(&symbols, &config.idle_state) {
            Some(functions) => StateRoutine::Script(functions),
            None => StateRoutine::Program(ProgramState::Idle),
        };
        let world = World {
            script,
            state,
            idle,
            unconscious_seconds: config.unconscious_seconds,
        };
        for name in world.script.vm().unresolved_externals() {
            warn!("world {zen}: external {name} is unresolved");
        }
        world
    }

    pub fn zen(&self) -> &str {
        &self.state.zen
    }

    pub fn current_tick(&self) -> u64 {
        self.state.tick
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        self.script.symbols()
    }

    pub fn script(&self) -> &ScriptEngine {
        &self.script
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WorldState {
        &mut self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.state.events
    }

    pub fn idle_routine(&self) -> StateRoutine {
        self.idle
    }

    pub fn actor(&self, handle: ActorHandle) -> Option<&Actor> {
        self.state.actor(handle)
    }

    pub fn actor_mut(&mut self, handle: ActorHandle) -> Option<&mut Actor> {
        self.state.actor_mut(handle)
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.state.actors()
    }

    pub fn player(&self) -> Option<ActorHandle> {
        self.state.player
    }

    pub fn set_player(&mut self, handle: ActorHandle) -> Result<(), EngineError> {
        if !self.state.is_live(handle) {
            return Err(EngineError::NoSuchActor(handle));
        }
        for actor in self.state.actors.values_mut() {
            actor.player = actor.handle == handle;
        }
        self.state.player = Some(handle);
        Ok(())
    }

    /// Case-insensitive scan by display name. Console boundary only.
    pub fn find_actor_by_name(&self, name: &str) -> Option<ActorHandle> {
        let wanted = name.to_lowercase();
        self.actors()
            .find(|actor| actor.name.to_lowercase() == wanted)
            .map(Actor::handle)
    }

    pub fn spawn_actor(&mut self, instance_name: &str) -> Result<ActorHandle, EngineError> {
        let symbol = self.symbols().lookup(instance_name)?;
        self.spawn_instance(symbol)
    }

    /// Create an actor from an instance symbol and run its constructors.
    pub fn spawn_instance(&mut self, symbol: SymbolIndex) -> Result<ActorHandle, EngineError> {
        let symbols = Arc::clone(self.symbols());
        let entry = symbols.symbol(symbol);
        if entry.kind != SymbolKind::Instance {
            return Err(EngineError::NotAnInstance {
                name: entry.name.clone(),
            });
        }
        let instance = Instance::new(&symbols, symbol).ok_or_else(|| EngineError::NotAnInstance {
            name: entry.name.clone(),
        })?;

        let handle = self.state.allocate_handle();
        let actor = Actor::new(handle, entry.name.clone(), instance, self.idle);
        self.state.actors.insert(handle, actor);

        for owner in symbols.constructor_chain(symbol) {
            self.script
                .invoke(&mut self.state, owner, &[], Some(handle), None);
        }

        let name = self
            .state
            .actor(handle)
            .and_then(|actor| self.state.script_name(&actor.instance));
        if let (Some(name), Some(actor)) = (name, self.state.actor_mut(handle)) {
            actor.name = name;
        }
        let label = self.state.actor(handle).map_or("", |actor| actor.name.as_str()).to_string();
        self.state
            .log_event(format!("actor.spawn {label} ({handle})"));
        Ok(handle)
    }

    /// Remove an actor. Inside a tick the removal is deferred to its end.
    pub fn despawn_actor(&mut self, handle: ActorHandle) -> bool {
        if self.state.in_tick {
            return self.state.request_despawn(handle);
        }
        self.remove_actor(handle)
    }

    fn remove_actor(&mut self, handle: ActorHandle) -> bool {
        let Some(actor) = self.state.actors.remove(&handle) else {
            return false;
        };
        if self.state.player == Some(handle) {
            self.state.player = None;
        }
        self.state
            .log_event(format!("actor.despawn {} ({handle})", actor.name));
        true
    }

    /// Call a script function by name with `actor` bound as SELF.
    pub fn call_function(
        &mut self,
        name: &str,
        actor: Option<ActorHandle>,
    ) -> Result<Value, EngineError> {
        let function = self.symbols().lookup(name)?;
        if self.symbols().symbol(function).kind != SymbolKind::Function {
            return Err(EngineError::NotAFunction {
                name: name.to_string(),
            });
        }
        self.script
            .call(&mut self.state, function, &[], actor, None)
            .map_err(|source| EngineError::Vm {
                function: self.symbols().name(function).to_string(),
                source,
            })
    }

    /// Run `STARTUP_<ZEN STEM>` if the scripts define it, then apply the
    /// spawns it requested.
    pub fn run_startup(&mut self) -> bool {
        let stem = zen_stem(&self.state.zen).to_ascii_uppercase();
        let Some(function) = self.symbols().find(&format!("STARTUP_{stem}")) else {
            return false;
        };
        info!("running startup script for {}", self.state.zen);
        self.script
            .invoke(&mut self.state, function, &[], None, None);
        self.apply_deferred();
        true
    }

    /// Advance the simulation by one fixed step.
    pub fn tick(&mut self, dt: f32) -> FrameSnapshot {
        self.state.tick += 1;
        self.state.in_tick = true;

        let handles: Vec<ActorHandle> = self.state.actors.keys().copied().collect();
        for handle in &handles {
            if self.state.is_live(*handle) {
                self.deliver_due(*handle);
            }
        }
        for handle in &handles {
            if self.state.is_live(*handle) {
                self.tick_actor(*handle, dt);
            }
        }

        self.state.in_tick = false;
        self.apply_deferred();
        self.snapshot()
    }

    /// Apply despawns and spawns requested by scripts.
    pub fn apply_deferred(&mut self) {
        for _ in 0..MAX_SPAWN_ROUNDS {
            if self.state.outbox.is_empty() {
                return;
            }
            let outbox = std::mem::take(&mut self.state.outbox);
            for handle in outbox.despawns {
                self.remove_actor(handle);
            }
            for request in outbox.spawns {
                match self.spawn_instance(request.instance) {
                    Ok(handle) => {
                        if let Some(actor) = self.state.actor_mut(handle) {
                            actor.position = request.position;
                        }
                    }
                    Err(err) => {
                        warn!("deferred spawn failed: {err}");
                        self.state.log_event(format!("actor.spawn_failed {err}"));
                    }
                }
            }
        }
        if !self.state.outbox.is_empty() {
            warn!("spawn chain did not settle after {MAX_SPAWN_ROUNDS} rounds; dropping the rest");
            self.state.outbox = Outbox::default();
        }
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        let symbols = self.symbols();
        FrameSnapshot {
            tick: self.state.tick,
            zen: self.state.zen.clone(),
            actors: self
                .actors()
                .map(|actor| ActorFrame {
                    handle: actor.handle,
                    name: actor.name.clone(),
                    position: actor.position,
                    state: actor.states.top().routine.name(symbols),
                    player: actor.player,
                    dead: actor.is_dead(),
                    unconscious: actor.is_unconscious(),
                })
                .collect(),
        }
    }
}

/// `NEWWORLD.ZEN` -> `NEWWORLD`.
pub fn zen_stem(zen: &str) -> &str {
    let file = zen.rsplit(['/', '\\']).next().unwrap_or(zen);
    match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zen_stem_strips_directories_and_extension() {
        assert_eq!(zen_stem("NEWWORLD.ZEN"), "NEWWORLD");
        assert_eq!(zen_stem("worlds/oldmine.zen"), "oldmine");
        assert_eq!(zen_stem("plain"), "plain");
    }
}
