mod common;

use anyhow::Result;
use regoth_engine::savegame::{self, ItemRecord, StateRecord};
use regoth_engine::world::Message;
use regoth_engine::{
    export_world, import_world, EngineConfig, ImportMode, SerializeError, WorldDocument,
};
use regoth_script::Value;

use common::{populated_world, world, NEW_WORLD, OLD_MINE};

/// A world that has seen a few ticks: Bert is mid-talk and has mail.
fn busy_world(config: &EngineConfig) -> Result<regoth_engine::World> {
    let (mut world, hero, bert) = populated_world(config)?;
    world.call_function("Give_Gold", Some(hero))?;
    world.call_function("Bert_StartTalk", Some(bert))?;
    world.tick(config.tick_seconds);
    world.state_mut().post_message(Message::damage(bert, Some(hero), 3));
    world.state_mut().post_message(Message::damage(bert, Some(hero), 4));
    world.tick(config.tick_seconds);
    Ok(world)
}

#[test]
fn full_import_reproduces_the_export() -> Result<()> {
    let config = EngineConfig::default();
    let source = busy_world(&config)?;
    let document = export_world(&source);
    assert_eq!(document.actors.len(), 2);
    assert!(document.actors.iter().any(|actor| !actor.queue.is_empty()));

    let raw = savegame::to_json(&document)?;
    let parsed = savegame::from_json(&raw)?;
    assert_eq!(parsed, document);

    let mut restored = world(&config, NEW_WORLD)?;
    let report = import_world(&parsed, &mut restored, ImportMode::Full)?;
    assert_eq!(report.actors, 2);
    assert!(report.skipped_globals.is_empty());
    assert_eq!(export_world(&restored), document);
    assert_eq!(restored.player(), source.player());
    Ok(())
}

#[test]
fn restored_world_keeps_simulating() -> Result<()> {
    let config = EngineConfig::default();
    let mut source = busy_world(&config)?;
    let document = export_world(&source);
    let mut restored = world(&config, NEW_WORLD)?;
    import_world(&document, &mut restored, ImportMode::Full)?;

    for _ in 0..3 {
        source.tick(config.tick_seconds);
        restored.tick(config.tick_seconds);
    }
    assert_eq!(export_world(&restored), export_world(&source));

    let spawned = restored.spawn_actor("NPC_BERT")?;
    assert!(spawned.0 >= document.meta.next_handle);
    Ok(())
}

#[test]
fn failed_full_import_leaves_the_world_alone() -> Result<()> {
    let config = EngineConfig::default();
    let mut target = busy_world(&config)?;
    let before = export_world(&target);

    let mut document = before.clone();
    document.actors[1].instance = "NPC_GHOST".to_string();
    document.actors[0].inventory.clear();
    let err = import_world(&document, &mut target, ImportMode::Full).unwrap_err();
    assert_eq!(err, SerializeError::UnknownSymbolName("NPC_GHOST".to_string()));
    assert_eq!(export_world(&target), before);

    let mut document = before.clone();
    document.actors[0].states[0].state = "ZS_FLY".to_string();
    let err = import_world(&document, &mut target, ImportMode::Full).unwrap_err();
    assert_eq!(err, SerializeError::UnknownSymbolName("ZS_FLY".to_string()));

    let newer = WorldDocument {
        format_version: savegame::FORMAT_VERSION + 1,
        ..before.clone()
    };
    let err = import_world(&newer, &mut target, ImportMode::Full).unwrap_err();
    assert!(matches!(err, SerializeError::MalformedDocument(_)));
    assert_eq!(export_world(&target), before);
    Ok(())
}

#[test]
fn merge_is_lenient_and_additive() -> Result<()> {
    let config = EngineConfig::default();
    let (mut source, source_hero, _) = populated_world(&config)?;
    source.call_function("Give_Gold", Some(source_hero))?;
    source.state_mut().set_hitpoints(source_hero, 12);
    let mut document = savegame::export_player(&source).expect("player document");
    {
        let hero = &mut document.actors[0];
        hero.inventory.push(ItemRecord {
            item: "ITMW_SWORD".to_string(),
            count: 1,
        });
        hero.states.push(StateRecord {
            state: "ZS_FLY".to_string(),
            ..StateRecord::default()
        });
        hero.position = [100.0, 0.0, 0.0];
    }

    let mut destination = world(&config, OLD_MINE)?;
    let hero = destination.spawn_actor("PC_HERO")?;
    destination.set_player(hero)?;
    destination.call_function("Give_Gold", Some(hero))?;

    let report = import_world(&document, &mut destination, ImportMode::Merge)?;
    assert_eq!(report.skipped_items, vec!["ITMW_SWORD".to_string()]);
    assert_eq!(report.downgraded_states, vec!["ZS_FLY".to_string()]);
    assert_eq!(destination.call_function("Count_Gold", Some(hero))?, Value::Int(10));
    assert_eq!(destination.state().hitpoints(hero), Some(12));

    let actor = destination.actor(hero).expect("hero");
    assert_eq!(actor.position(), [0.0, 0.0, 0.0]);
    assert_eq!(actor.states().top().routine, destination.idle_routine());
    Ok(())
}

#[test]
fn merge_needs_a_player() -> Result<()> {
    let config = EngineConfig::default();
    let (source, _, _) = populated_world(&config)?;
    let document = savegame::export_player(&source).expect("player document");

    let mut destination = world(&config, OLD_MINE)?;
    destination.spawn_actor("NPC_BERT")?;
    let err = import_world(&document, &mut destination, ImportMode::Merge).unwrap_err();
    assert_eq!(err, SerializeError::NoPlayer);
    Ok(())
}
