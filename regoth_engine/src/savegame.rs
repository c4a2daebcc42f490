//! World documents: the JSON savegame and hero export format.
//!
//! Records name symbols, never indices, so a document stays valid across
//! rebuilds of the script image as long as the names survive.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use regoth_script::{Instance, InstanceRef, SlotValues, SymbolIndex, SymbolTable};
use serde::{Deserialize, Serialize};

use crate::error::SerializeError;
use crate::world::{
    resolve_state, Actor, ActorHandle, AiStateEntry, AiStateStack, ItemAction, Message,
    MessagePayload, Outbox, ProgramState, StateChange, StateRoutine, World, FIRST_HANDLE,
};

/// Newest document revision this build writes and reads.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldDocument {
    pub format_version: u32,
    pub meta: WorldMeta,
    pub globals: Vec<SlotRecord>,
    pub actors: Vec<ActorRecord>,
}

impl WorldDocument {
    pub fn player_record(&self) -> Option<&ActorRecord> {
        self.actors
            .iter()
            .find(|record| record.player)
            .or(match self.actors.as_slice() {
                [only] => Some(only),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldMeta {
    pub zen: String,
    pub tick: u64,
    pub next_handle: u32,
    pub player: Option<ActorHandle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub name: String,
    pub values: SlotRecordValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SlotRecordValues {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Str(Vec<String>),
    Instance(Vec<Option<ActorHandle>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item: String,
    pub count: u32,
}

/// One state stack entry. Program states carry `program`; script states
/// are named by their enter function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateRecord {
    pub state: String,
    pub program: Option<ProgramState>,
    pub entered: bool,
    pub cursor: i32,
    pub elapsed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadRecord {
    StartState { program: Option<ProgramState> },
    EndState,
    Damage { amount: i32 },
    Conversation { line: String },
    Item { action: ItemAction, item: String, count: u32 },
    Custom { kind: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub payload: PayloadRecord,
    #[serde(default)]
    pub source: Option<ActorHandle>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub posted_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub handle: ActorHandle,
    pub instance: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub player: bool,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default)]
    pub members: Vec<SlotRecord>,
    #[serde(default)]
    pub inventory: Vec<ItemRecord>,
    /// Bottom first.
    #[serde(default)]
    pub states: Vec<StateRecord>,
    #[serde(default)]
    pub queue: Vec<MessageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Replace every actor, the globals, the player and the tick.
    Full,
    /// Restore only the player record into the world's existing player.
    Merge,
}

/// What an import restored and what it had to leave out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub actors: usize,
    pub skipped_members: Vec<String>,
    pub skipped_items: Vec<String>,
    pub skipped_globals: Vec<String>,
    pub downgraded_states: Vec<String>,
}

pub fn export_world(world: &World) -> WorldDocument {
    let symbols = world.symbols();
    let globals = world
        .script()
        .vm()
        .globals()
        .variables(symbols)
        .map(|(symbol, slots)| slot_record(symbols, symbol, slots))
        .collect();
    let actors = world
        .actors()
        .filter_map(|actor| export_actor(world, actor.handle()))
        .collect();
    WorldDocument {
        format_version: FORMAT_VERSION,
        meta: WorldMeta {
            zen: world.zen().to_string(),
            tick: world.current_tick(),
            next_handle: world.state().next_handle,
            player: world.player(),
        },
        globals,
        actors,
    }
}

pub fn export_actor(world: &World, handle: ActorHandle) -> Option<ActorRecord> {
    let symbols = world.symbols();
    let actor = world.actor(handle).filter(|actor| actor.is_alive())?;
    Some(ActorRecord {
        handle,
        instance: symbols.name(actor.instance_symbol()).to_string(),
        name: actor.name().to_string(),
        player: actor.is_player(),
        position: actor.position(),
        members: actor
            .instance()
            .iter(symbols)
            .map(|(member, slots)| slot_record(symbols, member, slots))
            .collect(),
        inventory: actor
            .inventory()
            .iter()
            .map(|stack| ItemRecord {
                item: symbols.name(stack.item).to_string(),
                count: stack.count,
            })
            .collect(),
        states: actor
            .states()
            .iter()
            .map(|entry| StateRecord {
                state: entry.routine.name(symbols),
                program: entry.program(),
                entered: entry.entered,
                cursor: entry.cursor,
                elapsed: entry.elapsed,
            })
            .collect(),
        queue: actor
            .queue
            .iter()
            .map(|message| message_record(symbols, message))
            .collect(),
    })
}

/// A document holding just the player record, as written by hero export.
pub fn export_player(world: &World) -> Option<WorldDocument> {
    let player = export_actor(world, world.player()?)?;
    Some(WorldDocument {
        format_version: FORMAT_VERSION,
        meta: WorldMeta {
            zen: world.zen().to_string(),
            tick: world.current_tick(),
            next_handle: 0,
            player: Some(player.handle),
        },
        globals: Vec::new(),
        actors: vec![player],
    })
}

pub fn import_world(
    document: &WorldDocument,
    world: &mut World,
    mode: ImportMode,
) -> Result<ImportReport, SerializeError> {
    if document.format_version > FORMAT_VERSION {
        return Err(SerializeError::MalformedDocument(format!(
            "format version {} is newer than {FORMAT_VERSION}",
            document.format_version
        )));
    }
    let report = match mode {
        ImportMode::Full => import_full(document, world)?,
        ImportMode::Merge => import_merge(document, world)?,
    };
    world.state.log_event(format!(
        "savegame.import {mode:?} {} actor(s)",
        report.actors
    ));
    Ok(report)
}

/// Stage every actor first; the world is only touched once all records
/// have been restored.
fn import_full(
    document: &WorldDocument,
    world: &mut World,
) -> Result<ImportReport, SerializeError> {
    let symbols = Arc::clone(world.symbols());
    let idle = world.idle;
    let mut report = ImportReport::default();

    let mut staged = BTreeMap::new();
    for record in &document.actors {
        let actor = restore_actor(&symbols, idle, record)?;
        if staged.insert(record.handle, actor).is_some() {
            return Err(SerializeError::MalformedDocument(format!(
                "actor handle {} appears twice",
                record.handle
            )));
        }
    }

    let mut globals = Vec::new();
    let store = world.script.vm().globals();
    for record in &document.globals {
        let Some((symbol, current)) = symbols
            .find(&record.name)
            .and_then(|symbol| store.slots(symbol).map(|slots| (symbol, slots)))
        else {
            report.skipped_globals.push(record.name.clone());
            continue;
        };
        let values = slot_values(&record.values, Some);
        if values.value_type() != current.value_type() {
            return Err(SerializeError::MalformedDocument(format!(
                "global {} holds {} values, document has {}",
                record.name,
                current.value_type().name(),
                values.value_type().name()
            )));
        }
        globals.push((symbol, values));
    }

    let player = document
        .meta
        .player
        .filter(|handle| staged.contains_key(handle))
        .or_else(|| {
            staged
                .values()
                .find(|actor: &&Actor| actor.player)
                .map(Actor::handle)
        });
    for actor in staged.values_mut() {
        actor.player = Some(actor.handle) == player;
    }
    let next_handle = staged
        .keys()
        .next_back()
        .map_or(FIRST_HANDLE, |handle: &ActorHandle| handle.0.saturating_add(1))
        .max(document.meta.next_handle);

    if !document.meta.zen.is_empty() && !document.meta.zen.eq_ignore_ascii_case(world.zen()) {
        warn!(
            "importing a savegame of {} into {}",
            document.meta.zen,
            world.zen()
        );
    }

    report.actors = staged.len();
    let state = &mut world.state;
    state.actors = staged;
    state.player = player;
    state.tick = document.meta.tick;
    state.next_handle = next_handle;
    state.outbox = Outbox::default();

    let store = world.script.vm_mut().globals_mut();
    for (symbol, values) in globals {
        if let Some(slots) = store.slots_mut(symbol) {
            slots.overwrite_prefix(&values);
        }
    }
    info!("restored {} actor(s) into {}", report.actors, world.zen());
    Ok(report)
}

/// Whatever the destination scripts do not know is skipped and reported.
fn import_merge(
    document: &WorldDocument,
    world: &mut World,
) -> Result<ImportReport, SerializeError> {
    let record = document.player_record().ok_or_else(|| {
        SerializeError::MalformedDocument("document has no player record".to_string())
    })?;
    let handle = world.player().ok_or(SerializeError::NoPlayer)?;
    let symbols = Arc::clone(world.symbols());
    let idle = world.idle;
    let actor = world
        .state
        .actors
        .get_mut(&handle)
        .ok_or(SerializeError::NoPlayer)?;
    let mut report = ImportReport {
        actors: 1,
        ..ImportReport::default()
    };

    let remap = |old: ActorHandle| (old == record.handle).then_some(handle);
    for slot in &record.members {
        let restored = symbols.find(&slot.name).is_some_and(|member| {
            actor
                .instance
                .member_mut(&symbols, member)
                .is_some_and(|target| target.overwrite_prefix(&slot_values(&slot.values, remap)))
        });
        if !restored {
            report.skipped_members.push(slot.name.clone());
        }
    }
    if !record.name.is_empty() {
        actor.name = record.name.clone();
    }

    for item in &record.inventory {
        match symbols.find(&item.item) {
            Some(symbol) => {
                actor.inventory.add(symbol, item.count);
            }
            None => report.skipped_items.push(item.item.clone()),
        }
    }

    let entries = record
        .states
        .iter()
        .map(|state| {
            restore_state(&symbols, state).unwrap_or_else(|| {
                report.downgraded_states.push(state.state.clone());
                AiStateEntry::new(idle)
            })
        })
        .collect();
    if let Some(stack) = AiStateStack::from_entries(entries) {
        actor.states = stack;
    }
    actor.queue.clear();
    actor.current_message = None;
    Ok(report)
}

fn restore_actor(
    symbols: &SymbolTable,
    idle: StateRoutine,
    record: &ActorRecord,
) -> Result<Actor, SerializeError> {
    let instance_symbol = known(symbols, &record.instance)?;
    let mut instance = Instance::new(symbols, instance_symbol).ok_or_else(|| {
        SerializeError::MalformedDocument(format!("{} is not an instance", record.instance))
    })?;
    for slot in &record.members {
        let member = known(symbols, &slot.name)?;
        let target = instance.member_mut(symbols, member).ok_or_else(|| {
            SerializeError::MalformedDocument(format!(
                "{} is not a member of {}",
                slot.name, record.instance
            ))
        })?;
        if !target.overwrite_prefix(&slot_values(&slot.values, Some)) {
            return Err(SerializeError::MalformedDocument(format!(
                "member {} has the wrong value type",
                slot.name
            )));
        }
    }

    let mut actor = Actor::new(record.handle, record.name.clone(), instance, idle);
    actor.player = record.player;
    actor.position = record.position;
    for item in &record.inventory {
        actor.inventory.add(known(symbols, &item.item)?, item.count);
    }

    let mut entries = Vec::with_capacity(record.states.len());
    for state in &record.states {
        let entry = restore_state(symbols, state)
            .ok_or_else(|| SerializeError::UnknownSymbolName(state.state.clone()))?;
        entries.push(entry);
    }
    if let Some(stack) = AiStateStack::from_entries(entries) {
        actor.states = stack;
    }

    for message in &record.queue {
        actor
            .queue
            .push_back(restore_message(symbols, record.handle, message)?);
    }
    Ok(actor)
}

fn restore_state(symbols: &SymbolTable, record: &StateRecord) -> Option<AiStateEntry> {
    let routine = match record.program {
        Some(state) => StateRoutine::Program(state),
        None => StateRoutine::Script(resolve_state(symbols, &record.state)?),
    };
    Some(AiStateEntry {
        routine,
        entered: record.entered,
        ended: false,
        cursor: record.cursor,
        elapsed: record.elapsed,
    })
}

fn message_record(symbols: &SymbolTable, message: &Message) -> MessageRecord {
    let payload = match &message.payload {
        MessagePayload::State {
            change: StateChange::StartState,
            program,
        } => PayloadRecord::StartState { program: *program },
        MessagePayload::State {
            change: StateChange::EndState,
            ..
        } => PayloadRecord::EndState,
        MessagePayload::Damage { amount } => PayloadRecord::Damage { amount: *amount },
        MessagePayload::Conversation { line } => PayloadRecord::Conversation { line: line.clone() },
        MessagePayload::Item {
            action,
            item,
            count,
        } => PayloadRecord::Item {
            action: *action,
            item: symbols.name(*item).to_string(),
            count: *count,
        },
        MessagePayload::Custom { kind } => PayloadRecord::Custom { kind: *kind },
    };
    MessageRecord {
        payload,
        source: message.source,
        function: message
            .function
            .map(|function| symbols.name(function).to_string()),
        posted_tick: message.posted_tick,
    }
}

fn restore_message(
    symbols: &SymbolTable,
    target: ActorHandle,
    record: &MessageRecord,
) -> Result<Message, SerializeError> {
    let payload = match &record.payload {
        PayloadRecord::StartState { program } => MessagePayload::State {
            change: StateChange::StartState,
            program: *program,
        },
        PayloadRecord::EndState => MessagePayload::State {
            change: StateChange::EndState,
            program: None,
        },
        PayloadRecord::Damage { amount } => MessagePayload::Damage { amount: *amount },
        PayloadRecord::Conversation { line } => MessagePayload::Conversation { line: line.clone() },
        PayloadRecord::Item {
            action,
            item,
            count,
        } => MessagePayload::Item {
            action: *action,
            item: known(symbols, item)?,
            count: *count,
        },
        PayloadRecord::Custom { kind } => MessagePayload::Custom { kind: *kind },
    };
    let function = record
        .function
        .as_deref()
        .map(|name| known(symbols, name))
        .transpose()?;
    Ok(Message {
        target,
        source: record.source,
        function,
        payload,
        posted_tick: record.posted_tick,
    })
}

fn known(symbols: &SymbolTable, name: &str) -> Result<SymbolIndex, SerializeError> {
    symbols
        .find(name)
        .ok_or_else(|| SerializeError::UnknownSymbolName(name.to_string()))
}

fn slot_record(symbols: &SymbolTable, symbol: SymbolIndex, slots: &SlotValues) -> SlotRecord {
    let values = match slots {
        SlotValues::Int(values) => SlotRecordValues::Int(values.clone()),
        SlotValues::Float(values) => SlotRecordValues::Float(values.clone()),
        SlotValues::Str(values) => SlotRecordValues::Str(values.clone()),
        SlotValues::Instance(values) => SlotRecordValues::Instance(
            values
                .iter()
                .map(|value| value.map(ActorHandle::from_instance))
                .collect(),
        ),
    };
    SlotRecord {
        name: symbols.name(symbol).to_string(),
        values,
    }
}

/// Instance references go through `remap`; unmapped ones become null.
fn slot_values(
    values: &SlotRecordValues,
    remap: impl Fn(ActorHandle) -> Option<ActorHandle>,
) -> SlotValues {
    match values {
        SlotRecordValues::Int(values) => SlotValues::Int(values.clone()),
        SlotRecordValues::Float(values) => SlotValues::Float(values.clone()),
        SlotRecordValues::Str(values) => SlotValues::Str(values.clone()),
        SlotRecordValues::Instance(values) => SlotValues::Instance(
            values
                .iter()
                .map(|value| {
                    value
                        .and_then(&remap)
                        .map(|handle| InstanceRef(handle.0))
                })
                .collect(),
        ),
    }
}

pub fn to_json(document: &WorldDocument) -> Result<String, SerializeError> {
    Ok(serde_json::to_string_pretty(document)?)
}

pub fn from_json(raw: &str) -> Result<WorldDocument, SerializeError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn write_document(path: &Path, document: &WorldDocument) -> Result<()> {
    let json = to_json(document)?;
    fs::write(path, json)
        .with_context(|| format!("failed to write world document: {}", path.display()))
}

pub fn read_document(path: &Path) -> Result<WorldDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read world document: {}", path.display()))?;
    from_json(&raw).with_context(|| format!("failed to parse world document: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{
            "format_version": 1,
            "actors": [{ "handle": 1100, "instance": "PC_HERO", "extra": true }],
            "unknown_top_level": 3
        }"#;
        let document = from_json(raw).expect("parse");
        assert_eq!(document.actors.len(), 1);
        let record = &document.actors[0];
        assert_eq!(record.handle, ActorHandle(1100));
        assert!(record.states.is_empty());
        assert!(!record.player);
        assert_eq!(document.player_record().map(|r| r.handle), Some(ActorHandle(1100)));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = from_json("{ not json").unwrap_err();
        assert!(matches!(err, SerializeError::MalformedDocument(_)));
    }

    #[test]
    fn slot_values_drop_unmapped_references() {
        let record = SlotRecordValues::Instance(vec![Some(ActorHandle(1100)), Some(ActorHandle(7)), None]);
        let remap = |old: ActorHandle| (old == ActorHandle(1100)).then_some(ActorHandle(1200));
        assert_eq!(
            slot_values(&record, remap),
            SlotValues::Instance(vec![Some(InstanceRef(1200)), None, None])
        );
    }
}
