#![allow(dead_code)]

use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use regoth_engine::file_index::MemoryIndex;
use regoth_engine::traps::register_traps;
use regoth_engine::{ActorHandle, EngineConfig, World, WorldState};
use regoth_formats::{Instruction, ScriptImage, ScriptImageBuilder, SlotData, SlotType};
use regoth_script::{ExternalTable, SymbolTable};

pub const SCRIPT_IMAGE: &str = "GOTHIC.DAT";
pub const NEW_WORLD: &str = "NEWWORLD.ZEN";
pub const OLD_MINE: &str = "OLDMINE.ZEN";

/// A small game: a hero, Bert, two items and a handful of AI states.
pub fn script_image() -> Result<ScriptImage> {
    use SlotType::{Instance, Int, String as Str};

    let mut builder = ScriptImageBuilder::new();
    builder.class("C_Npc", &[("name", Str, 1), ("attribute", Int, 2)]);
    builder.class("C_Item", &[("name", Str, 1)]);
    builder.variable("self", SlotData::Instance(1));
    builder.variable("other", SlotData::Instance(1));
    builder.variable("talk_ticks", SlotData::Int(vec![0]));
    builder.variable("last_roll", SlotData::Int(vec![0]));

    builder.external("Print", &[Str], SlotType::None);
    builder.external("AI_StartState", &[Instance, Int, Int], SlotType::None);
    builder.external("Npc_SendDamage", &[Instance, Instance, Int], SlotType::None);
    builder.external("Wld_InsertNpc", &[Int, Str], SlotType::None);
    builder.external("CreateInvItems", &[Instance, Int, Int], SlotType::None);
    builder.external("Npc_HasItems", &[Instance, Int], Int);
    builder.external("Hlp_Random", &[Int], Int);
    builder.external("EM_GetDamage", &[Instance], Int);
    builder.external("Wld_PlayEffect", &[Str], SlotType::None);

    builder.prototype("Npc_Default", "C_Npc", |body| {
        body.int(40).store_element("C_NPC.ATTRIBUTE", 0).ret();
    });
    builder.instance("PC_Hero", "Npc_Default", |body| {
        body.string("Hero").store("C_NPC.NAME").ret();
    });
    let bert = builder.instance("NPC_Bert", "Npc_Default", |body| {
        body.string("Bert").store("C_NPC.NAME").ret();
    });
    let gold = builder.instance("ItMi_Gold", "C_Item", |body| {
        body.string("Gold").store("C_ITEM.NAME").ret();
    });
    builder.instance("ItFo_Apple", "C_Item", |body| {
        body.string("Apple").store("C_ITEM.NAME").ret();
    });

    builder.function("ZS_Idle", &[], SlotType::None, |body| {
        body.ret();
    });
    builder.function("ZS_Idle_Loop", &[], Int, |body| {
        body.int(0).ret();
    });

    let talk = builder.function("ZS_Talk", &[], SlotType::None, |body| {
        body.string("talk begins").call_external("Print").ret();
    });
    builder.function("ZS_Talk_Loop", &[], Int, |body| {
        body.load("talk_ticks")
            .int(1)
            .emit(Instruction::Add)
            .store("talk_ticks")
            .load("talk_ticks")
            .int(2)
            .emit(Instruction::Less)
            .jump_if_zero("done")
            .int(0)
            .ret()
            .label("done")
            .int(1)
            .ret();
    });
    builder.function("ZS_Talk_End", &[], SlotType::None, |body| {
        body.string("talk ends").call_external("Print").ret();
    });

    let attack = builder.function("ZS_Attack", &[], SlotType::None, |body| {
        body.push_instance("NPC_BERT")
            .push_instance("SELF")
            .int(1)
            .call_external("Npc_SendDamage")
            .ret();
    });

    builder.function("Bert_StartTalk", &[], SlotType::None, |body| {
        body.push_instance("SELF")
            .int(talk as i32)
            .int(0)
            .call_external("AI_StartState")
            .ret();
    });
    builder.function("Hero_Attack", &[], SlotType::None, |body| {
        body.push_instance("SELF")
            .int(attack as i32)
            .int(0)
            .call_external("AI_StartState")
            .ret();
    });
    builder.function("Give_Gold", &[], SlotType::None, |body| {
        body.push_instance("SELF")
            .int(gold as i32)
            .int(5)
            .call_external("CreateInvItems")
            .ret();
    });
    builder.function("Count_Gold", &[], Int, |body| {
        body.push_instance("SELF")
            .int(gold as i32)
            .call_external("Npc_HasItems")
            .ret();
    });
    builder.function("Remember_Damage", &[], SlotType::None, |body| {
        body.push_instance("SELF")
            .call_external("EM_GetDamage")
            .store("last_roll")
            .ret();
    });
    builder.function("Roll", &[], Int, |body| {
        body.int(1000).call_external("Hlp_Random").ret();
    });
    builder.function("Sparkle", &[], SlotType::None, |body| {
        body.string("spark").call_external("Wld_PlayEffect").ret();
    });
    builder.function("Startup_NewWorld", &[], SlotType::None, |body| {
        body.int(bert as i32)
            .string("WP_TAVERN")
            .call_external("Wld_InsertNpc")
            .ret();
    });

    builder.build().context("building fixture script image")
}

pub fn symbols() -> Result<Arc<SymbolTable>> {
    let bytes = script_image()?.to_bytes();
    Ok(Arc::new(
        SymbolTable::from_bytes(&bytes).context("loading fixture script image")?,
    ))
}

pub fn externals() -> Rc<ExternalTable<WorldState>> {
    let mut table = ExternalTable::new();
    register_traps(&mut table);
    Rc::new(table)
}

pub fn world(config: &EngineConfig, zen: &str) -> Result<World> {
    Ok(World::new(symbols()?, externals(), config, zen))
}

/// A world with the hero as player and Bert spawned next to him.
pub fn populated_world(config: &EngineConfig) -> Result<(World, ActorHandle, ActorHandle)> {
    let mut world = world(config, NEW_WORLD)?;
    let hero = world.spawn_actor("PC_HERO")?;
    world.set_player(hero)?;
    let bert = world.spawn_actor("NPC_BERT")?;
    Ok((world, hero, bert))
}

pub fn files() -> Result<MemoryIndex> {
    Ok(MemoryIndex::new()
        .with_file(SCRIPT_IMAGE, script_image()?.to_bytes())
        .with_file(NEW_WORLD, b"zen".to_vec())
        .with_file(OLD_MINE, b"zen".to_vec()))
}
