use log::{debug, info};
use regoth_formats::SymbolKind;
use regoth_script::{
    ExternalTable, ScriptHost, Signature, SymbolIndex, TrapContext, TrapError, Value, ValueType,
};

use crate::world::{Actor, ActorHandle, ItemAction, Message, MessagePayload, WorldState};

type Ctx<'a> = TrapContext<'a, WorldState>;

/// Native functions scripts may call, keyed by their external symbol names.
pub fn register_traps(table: &mut ExternalTable<WorldState>) {
    use ValueType::{Float, Instance, Int, Str};

    table.register(
        "Wld_InsertNpc",
        Signature::new(&[Int, Str], None),
        |ctx| {
            let symbol = symbol_arg(ctx, 0, SymbolKind::Instance)?;
            let spawnpoint = ctx.str(1)?.to_string();
            debug!("Wld_InsertNpc {} at {spawnpoint}", ctx.symbols.name(symbol));
            ctx.host.request_spawn(symbol, [0.0; 3]);
            Ok(Value::default())
        },
    );
    table.register("Wld_RemoveNpc", Signature::new(&[Int], None), |ctx| {
        let symbol = symbol_arg(ctx, 0, SymbolKind::Instance)?;
        if let Some(reference) = ctx.host.resolve_instance_symbol(symbol) {
            ctx.host.request_despawn(ActorHandle::from_instance(reference));
        }
        Ok(Value::default())
    });

    table.register(
        "Npc_GetName",
        Signature::new(&[Instance], Some(Str)),
        |ctx| Ok(Value::Str(actor(ctx, 0)?.name().to_string())),
    );
    table.register(
        "Npc_IsPlayer",
        Signature::new(&[Instance], Some(Int)),
        |ctx| Ok(flag(actor(ctx, 0)?.is_player())),
    );
    table.register(
        "Npc_IsDead",
        Signature::new(&[Instance], Some(Int)),
        |ctx| Ok(flag(actor(ctx, 0)?.is_dead())),
    );
    table.register(
        "Hlp_IsValidNpc",
        Signature::new(&[Instance], Some(Int)),
        |ctx| {
            let valid = ctx
                .instance_arg(0)?
                .is_some_and(|reference| ctx.host.is_live(ActorHandle::from_instance(reference)));
            Ok(flag(valid))
        },
    );
    table.register(
        "Npc_GetStateTime",
        Signature::new(&[Instance], Some(Int)),
        |ctx| Ok(Value::Int(actor(ctx, 0)?.states().top().elapsed as i32)),
    );
    table.register(
        "Npc_SetPosition",
        Signature::new(&[Instance, Float, Float, Float], None),
        |ctx| {
            let handle = actor(ctx, 0)?.handle();
            let position = [ctx.float(1)?, ctx.float(2)?, ctx.float(3)?];
            if let Some(actor) = ctx.host.actor_mut(handle) {
                actor.set_position(position);
            }
            Ok(Value::default())
        },
    );

    table.register(
        "Npc_HasItems",
        Signature::new(&[Instance, Int], Some(Int)),
        |ctx| {
            let item = symbol_arg(ctx, 1, SymbolKind::Instance)?;
            let count = actor(ctx, 0)?.inventory().count(item);
            Ok(Value::Int(i32::try_from(count).unwrap_or(i32::MAX)))
        },
    );
    table.register(
        "CreateInvItems",
        Signature::new(&[Instance, Int, Int], None),
        |ctx| change_items(ctx, ItemAction::Give),
    );
    table.register(
        "Npc_RemoveInvItems",
        Signature::new(&[Instance, Int, Int], None),
        |ctx| change_items(ctx, ItemAction::Remove),
    );

    table.register(
        "AI_StartState",
        Signature::new(&[Instance, Int, Int], None),
        |ctx| {
            let handle = actor(ctx, 0)?.handle();
            let state = symbol_arg(ctx, 1, SymbolKind::Function)?;
            let mut message = Message::start_state(handle, state);
            if let Some(caller) = ctx.instance {
                message = message.with_source(ActorHandle::from_instance(caller));
            }
            ctx.host.post_message(message);
            Ok(Value::default())
        },
    );
    table.register(
        "Npc_SendDamage",
        Signature::new(&[Instance, Instance, Int], None),
        |ctx| {
            let target = actor(ctx, 0)?.handle();
            let attacker = ctx
                .instance_arg(1)?
                .map(ActorHandle::from_instance);
            let amount = ctx.int(2)?;
            ctx.host.post_message(Message::damage(target, attacker, amount));
            Ok(Value::default())
        },
    );
    table.register(
        "EM_GetMessageKind",
        Signature::new(&[Instance], Some(Int)),
        |ctx| {
            let kind = actor(ctx, 0)?
                .current_message()
                .map_or(0, |message| message.payload.kind_code());
            Ok(Value::Int(kind))
        },
    );
    table.register(
        "EM_GetDamage",
        Signature::new(&[Instance], Some(Int)),
        |ctx| {
            let amount = match actor(ctx, 0)?.current_message().map(|message| &message.payload) {
                Some(MessagePayload::Damage { amount }) => *amount,
                _ => 0,
            };
            Ok(Value::Int(amount))
        },
    );

    table.register("Print", Signature::new(&[Str], None), |ctx| {
        let text = ctx.str(0)?.to_string();
        info!("{text}");
        ctx.host.log_event(format!("print {text}"));
        Ok(Value::default())
    });
    table.register("PrintDebug", Signature::new(&[Str], None), |ctx| {
        debug!("script: {}", ctx.str(0)?);
        Ok(Value::default())
    });
    table.register(
        "IntToString",
        Signature::new(&[Int], Some(Str)),
        |ctx| Ok(Value::Str(ctx.int(0)?.to_string())),
    );
    table.register(
        "FloatToString",
        Signature::new(&[Float], Some(Str)),
        |ctx| Ok(Value::Str(ctx.float(0)?.to_string())),
    );
    table.register(
        "Hlp_Random",
        Signature::new(&[Int], Some(Int)),
        |ctx| {
            let max = ctx.int(0)?;
            Ok(Value::Int(ctx.host.random(max)))
        },
    );
}

fn flag(value: bool) -> Value {
    Value::Int(i32::from(value))
}

fn actor<'c>(ctx: &'c Ctx<'_>, index: usize) -> Result<&'c Actor, TrapError> {
    let reference = ctx.live_instance(index)?;
    ctx.host
        .actor(ActorHandle::from_instance(reference))
        .filter(|actor| actor.is_alive())
        .ok_or(TrapError::NoSuchActor)
}

/// An integer argument naming a symbol of the given kind.
fn symbol_arg(ctx: &Ctx<'_>, index: usize, kind: SymbolKind) -> Result<SymbolIndex, TrapError> {
    let raw = ctx.int(index)?;
    let symbol = u32::try_from(raw)
        .ok()
        .map(SymbolIndex)
        .filter(|symbol| ctx.symbols.get(*symbol).is_some_and(|entry| entry.kind == kind));
    symbol.ok_or_else(|| TrapError::Failed(format!("symbol #{raw} is not a {kind:?}")))
}

/// Items change in place for the calling actor; anyone else gets a message.
fn change_items(ctx: &mut Ctx<'_>, action: ItemAction) -> Result<Value, TrapError> {
    let target = actor(ctx, 0)?.handle();
    let item = symbol_arg(ctx, 1, SymbolKind::Instance)?;
    let count = u32::try_from(ctx.int(2)?).unwrap_or(0);
    let caller = ctx.instance.map(ActorHandle::from_instance);
    if caller == Some(target) {
        if let Some(actor) = ctx.host.actor_mut(target) {
            match action {
                ItemAction::Give => {
                    actor.inventory_mut().add(item, count);
                }
                ItemAction::Remove => {
                    actor.inventory_mut().remove(item, count);
                }
                ItemAction::Use => {}
            }
        }
    } else {
        let mut message = Message::item(target, action, item, count);
        if let Some(caller) = caller {
            message = message.with_source(caller);
        }
        ctx.host.post_message(message);
    }
    Ok(Value::default())
}
