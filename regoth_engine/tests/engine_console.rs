mod common;

use anyhow::{Context, Result};
use regoth_engine::{Console, EngineConfig, GameEngine};
use regoth_script::Value;
use tempfile::tempdir;

use common::{files, NEW_WORLD, OLD_MINE};

fn engine(save_dir: &std::path::Path) -> Result<GameEngine> {
    let config = EngineConfig {
        save_dir: save_dir.to_path_buf(),
        ..EngineConfig::default()
    };
    Ok(GameEngine::new(Box::new(files()?), config))
}

fn gold(engine: &mut GameEngine) -> Result<Value> {
    let world = engine.world_mut().context("no world")?;
    let hero = world.player().context("no player")?;
    Ok(world.call_function("Count_Gold", Some(hero))?)
}

#[test]
fn loading_a_world_runs_its_startup_script() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = engine(dir.path())?;
    let console = Console::new();

    assert_eq!(
        console.execute(&mut engine, "load NOWHERE.ZEN"),
        "File 'NOWHERE.ZEN' not found."
    );
    assert_eq!(
        console.execute(&mut engine, &format!("load {NEW_WORLD}")),
        "Successfully loaded world: NEWWORLD.ZEN"
    );
    let world = engine.world().context("world")?;
    assert_eq!(world.actors().count(), 2);
    assert!(world.find_actor_by_name("Bert").is_some());
    assert_eq!(
        world.player().and_then(|hero| world.actor(hero)).map(|hero| hero.name()),
        Some("Hero")
    );
    Ok(())
}

#[test]
fn save_and_load_restore_the_world() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = engine(dir.path())?;
    let console = Console::new();
    console.execute(&mut engine, &format!("load {NEW_WORLD}"));

    assert_eq!(console.execute(&mut engine, "kill bert"), "Bert is now in DEAD state");
    assert_eq!(
        console.execute(&mut engine, "tick 3"),
        "Advanced 3 tick(s), now at tick 3"
    );
    let saved = console.execute(&mut engine, "save slot1.json");
    assert!(saved.starts_with("World saved to file:"), "{saved}");
    assert!(dir.path().join("slot1.json").is_file());

    console.execute(&mut engine, &format!("load {NEW_WORLD}"));
    let world = engine.world().context("world")?;
    let bert = world.find_actor_by_name("Bert").context("bert")?;
    assert!(!world.actor(bert).is_some_and(|actor| actor.is_dead()));

    assert_eq!(
        console.execute(&mut engine, "load NEWWORLD.ZEN missing.json"),
        "File 'missing.json' not found."
    );
    assert_eq!(
        console.execute(&mut engine, "load NEWWORLD.ZEN slot1.json"),
        "Successfully loaded savegame: slot1.json"
    );
    let world = engine.world().context("world")?;
    assert_eq!(world.current_tick(), 3);
    let bert = world.find_actor_by_name("Bert").context("bert")?;
    assert!(world.actor(bert).is_some_and(|actor| actor.is_dead()));
    Ok(())
}

#[test]
fn switching_levels_carries_the_hero() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = engine(dir.path())?;
    let console = Console::new();
    console.execute(&mut engine, &format!("load {NEW_WORLD}"));
    {
        let world = engine.world_mut().context("world")?;
        let hero = world.player().context("player")?;
        world.call_function("Give_Gold", Some(hero))?;
    }
    console.execute(&mut engine, "kill Bert");

    assert_eq!(
        console.execute(&mut engine, &format!("switchlevel {OLD_MINE}")),
        "Successfully switched world to: OLDMINE.ZEN"
    );
    assert!(dir.path().join("NEWWORLD.ZEN.json").is_file());
    assert_eq!(engine.world().map(|world| world.zen()), Some(OLD_MINE));
    assert_eq!(engine.world().map(|world| world.actors().count()), Some(1));
    assert_eq!(gold(&mut engine)?, Value::Int(5));

    assert_eq!(
        console.execute(&mut engine, &format!("switchlevel {NEW_WORLD}")),
        "Successfully switched world to: NEWWORLD.ZEN"
    );
    assert!(dir.path().join("OLDMINE.ZEN.json").is_file());
    let world = engine.world().context("world")?;
    let bert = world.find_actor_by_name("Bert").context("bert")?;
    assert!(world.actor(bert).is_some_and(|actor| actor.is_dead()));
    // Item counts merge additively into the hero already in the save.
    assert_eq!(gold(&mut engine)?, Value::Int(10));
    Ok(())
}

#[test]
fn hero_export_and_import() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = engine(dir.path())?;
    let console = Console::new();
    console.execute(&mut engine, &format!("load {NEW_WORLD}"));
    {
        let world = engine.world_mut().context("world")?;
        let hero = world.player().context("player")?;
        world.call_function("Give_Gold", Some(hero))?;
        assert!(world.state_mut().set_hitpoints(hero, 17));
    }

    assert_eq!(
        console.execute(&mut engine, "heroexport"),
        "Hero successfully exported to: hero.json"
    );
    assert!(dir.path().join("hero.json").is_file());

    console.execute(&mut engine, &format!("load {OLD_MINE}"));
    assert_eq!(gold(&mut engine)?, Value::Int(0));
    let hitpoints = |engine: &GameEngine| -> Result<Option<i32>> {
        let world = engine.world().context("world")?;
        let hero = world.player().context("player")?;
        Ok(world.state().hitpoints(hero))
    };
    assert_eq!(hitpoints(&engine)?, Some(40));
    assert_eq!(
        console.execute(&mut engine, "heroimport"),
        "Hero successfully imported from: hero.json"
    );
    assert_eq!(gold(&mut engine)?, Value::Int(5));
    assert_eq!(hitpoints(&engine)?, Some(17));

    let failed = console.execute(&mut engine, "heroimport nobody.json");
    assert!(failed.starts_with("Failed to import hero:"), "{failed}");
    Ok(())
}

#[test]
fn knockout_and_interrupt_default_to_the_hero() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = engine(dir.path())?;
    let console = Console::new();
    console.execute(&mut engine, &format!("load {NEW_WORLD}"));

    assert_eq!(
        console.execute(&mut engine, "knockout"),
        "Hero is now in UNCONSCIOUS state"
    );
    assert_eq!(console.execute(&mut engine, "knockout Nobody"), "Invalid NPC");
    console.execute(&mut engine, "tick");
    let world = engine.world().context("world")?;
    let hero = world.player().context("player")?;
    assert!(world.actor(hero).is_some_and(|actor| actor.is_unconscious()));

    assert_eq!(
        console.execute(&mut engine, "interrupt"),
        "Interrupted player, cleared EM"
    );
    let world = engine.world().context("world")?;
    assert!(!world.actor(hero).is_some_and(|actor| actor.is_unconscious()));
    assert_eq!(
        console.execute(&mut engine, "tick many"),
        "Invalid argument. Usage: tick [n]"
    );
    Ok(())
}
