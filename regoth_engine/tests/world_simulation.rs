mod common;

use anyhow::Result;
use regoth_engine::world::{Message, MessagePayload, ProgramState, StateRoutine};
use regoth_engine::{EngineConfig, EngineError};
use regoth_script::{Value, VmError};

use common::populated_world;

fn top_state(world: &regoth_engine::World, handle: regoth_engine::ActorHandle) -> String {
    world
        .actor(handle)
        .map(|actor| actor.states().top().routine.name(world.symbols()))
        .unwrap_or_default()
}

#[test]
fn spawning_runs_the_constructor_chain() -> Result<()> {
    let (world, hero, bert) = populated_world(&EngineConfig::default())?;
    assert_eq!(hero.0, 1100);
    assert_eq!(bert.0, 1101);
    assert_eq!(world.actor(bert).map(|actor| actor.name()), Some("Bert"));
    assert_eq!(world.state().hitpoints(bert), Some(40));
    assert_eq!(world.player(), Some(hero));
    assert_eq!(world.find_actor_by_name("bert"), Some(bert));
    assert_eq!(top_state(&world, bert), "ZS_IDLE");
    Ok(())
}

#[test]
fn talk_state_runs_enter_loop_and_exit_across_ticks() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, _hero, bert) = populated_world(&config)?;

    world.call_function("Bert_StartTalk", Some(bert))?;
    assert_eq!(top_state(&world, bert), "ZS_IDLE");
    assert_eq!(world.actor(bert).map(|actor| actor.queued_messages()), Some(1));

    world.tick(config.tick_seconds);
    assert_eq!(top_state(&world, bert), "ZS_TALK");
    assert_eq!(world.actor(bert).map(|actor| actor.states().len()), Some(2));
    assert!(world.events().contains("print talk begins"));
    assert!(!world.events().contains("print talk ends"));

    let frame = world.tick(config.tick_seconds);
    assert_eq!(top_state(&world, bert), "ZS_IDLE");
    assert_eq!(world.actor(bert).map(|actor| actor.states().len()), Some(1));
    assert!(world.events().contains("print talk ends"));
    assert_eq!(frame.tick, 2);
    assert_eq!(frame.actor(bert).map(|actor| actor.state.as_str()), Some("ZS_IDLE"));
    Ok(())
}

#[test]
fn messages_posted_mid_tick_wait_for_the_next_tick() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, hero, bert) = populated_world(&config)?;

    world.call_function("Hero_Attack", Some(hero))?;
    world.tick(config.tick_seconds);
    assert_eq!(top_state(&world, hero), "ZS_ATTACK");
    assert_eq!(world.state().hitpoints(bert), Some(40));
    assert_eq!(world.actor(bert).map(|actor| actor.queued_messages()), Some(1));

    world.tick(config.tick_seconds);
    assert_eq!(world.state().hitpoints(bert), Some(39));
    let current = world.actor(bert).and_then(|actor| actor.current_message());
    assert_eq!(current.map(|message| message.source), Some(Some(hero)));
    assert_eq!(
        current.map(|message| &message.payload),
        Some(&MessagePayload::Damage { amount: 1 })
    );
    Ok(())
}

#[test]
fn one_message_per_tick_in_fifo_order() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, _hero, bert) = populated_world(&config)?;

    assert!(world.state_mut().post_message(Message::damage(bert, None, 5)));
    assert!(world.state_mut().post_message(Message::damage(bert, None, 10)));

    world.tick(config.tick_seconds);
    assert_eq!(world.state().hitpoints(bert), Some(35));
    world.tick(config.tick_seconds);
    assert_eq!(world.state().hitpoints(bert), Some(25));
    world.tick(config.tick_seconds);
    assert!(world
        .actor(bert)
        .is_some_and(|actor| actor.current_message().is_none()));
    Ok(())
}

#[test]
fn lethal_damage_pushes_the_dead_state() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, _hero, bert) = populated_world(&config)?;

    world.state_mut().post_message(Message::damage(bert, None, 100));
    let frame = world.tick(config.tick_seconds);
    assert_eq!(world.state().hitpoints(bert), Some(0));
    assert!(world.actor(bert).is_some_and(|actor| actor.is_dead()));
    assert!(frame.actor(bert).is_some_and(|actor| actor.dead));
    Ok(())
}

#[test]
fn knock_out_wears_off() -> Result<()> {
    let config = EngineConfig {
        unconscious_seconds: 0.25,
        ..EngineConfig::default()
    };
    let (mut world, _hero, bert) = populated_world(&config)?;

    assert!(world.knock_out(bert));
    assert!(!world.actor(bert).is_some_and(|actor| actor.is_unconscious()));
    world.tick(0.1);
    assert!(world.actor(bert).is_some_and(|actor| actor.is_unconscious()));
    world.tick(0.1);
    assert!(world.actor(bert).is_some_and(|actor| actor.is_unconscious()));
    world.tick(0.1);
    assert!(!world.actor(bert).is_some_and(|actor| actor.is_unconscious()));
    assert_eq!(top_state(&world, bert), "ZS_IDLE");
    Ok(())
}

#[test]
fn unknown_state_falls_back_to_idle() -> Result<()> {
    let (mut world, _hero, bert) = populated_world(&EngineConfig::default())?;
    world.push_state_by_name(bert, "ZS_TALK", true);
    assert!(!world.push_state_by_name(bert, "ZS_NOSUCHSTATE", true));
    assert_eq!(top_state(&world, bert), "ZS_IDLE");
    assert!(world.events().contains("state.missing ZS_NOSUCHSTATE"));
    Ok(())
}

#[test]
fn state_stack_is_never_empty() -> Result<()> {
    let (mut world, _hero, bert) = populated_world(&EngineConfig::default())?;
    world.push_state(bert, StateRoutine::Program(ProgramState::Dead), true);
    for _ in 0..4 {
        assert!(world.pop_state(bert));
        assert_eq!(world.actor(bert).map(|actor| actor.states().len()), Some(1));
    }
    let top = world.actor(bert).map(|actor| actor.states().top().clone());
    assert_eq!(top.map(|entry| entry.routine), Some(world.idle_routine()));
    Ok(())
}

#[test]
fn interrupt_clears_messages_and_states() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, hero, _bert) = populated_world(&config)?;
    world.push_state_by_name(hero, "ZS_TALK", true);
    world.state_mut().post_message(Message::damage(hero, None, 1));

    assert!(world.interrupt(hero));
    let actor = world.actor(hero).expect("hero");
    assert_eq!(actor.queued_messages(), 0);
    assert_eq!(actor.states().len(), 1);
    assert!(!actor.states().top().entered);
    world.tick(config.tick_seconds);
    assert_eq!(world.state().hitpoints(hero), Some(40));
    Ok(())
}

#[test]
fn item_traps_change_the_callers_inventory() -> Result<()> {
    let (mut world, hero, bert) = populated_world(&EngineConfig::default())?;
    world.call_function("Give_Gold", Some(hero))?;
    world.call_function("Give_Gold", Some(hero))?;
    assert_eq!(world.call_function("Count_Gold", Some(hero))?, Value::Int(10));
    assert_eq!(world.call_function("Count_Gold", Some(bert))?, Value::Int(0));
    Ok(())
}

#[test]
fn unresolved_externals_fail_the_call_but_not_the_world() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, _hero, _bert) = populated_world(&config)?;
    assert!(world
        .script()
        .vm()
        .unresolved_externals()
        .contains(&"WLD_PLAYEFFECT"));

    let err = world.call_function("Sparkle", None).unwrap_err();
    match err {
        EngineError::Vm { function, source } => {
            assert_eq!(function, "SPARKLE");
            assert!(matches!(source, VmError::UnresolvedExternal { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(world.script().vm().depth(), 0);
    world.tick(config.tick_seconds);
    Ok(())
}

#[test]
fn random_rolls_repeat_for_the_same_seed() -> Result<()> {
    let config = EngineConfig::default();
    let (mut first, _, _) = populated_world(&config)?;
    let (mut second, _, _) = populated_world(&config)?;
    for _ in 0..5 {
        let a = first.call_function("Roll", None)?;
        let b = second.call_function("Roll", None)?;
        assert_eq!(a, b);
        assert!(a.as_int().is_some_and(|roll| (0..1000).contains(&roll)));
    }
    Ok(())
}

#[test]
fn despawn_requests_apply_after_the_tick() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, _hero, bert) = populated_world(&config)?;
    assert!(world.state_mut().request_despawn(bert));
    assert!(world.find_actor_by_name("Bert").is_none());
    assert!(!world.state_mut().post_message(Message::damage(bert, None, 1)));

    world.tick(config.tick_seconds);
    assert!(world.actor(bert).is_none());
    assert_eq!(world.actors().count(), 1);
    Ok(())
}

#[test]
fn calling_a_non_function_is_reported() -> Result<()> {
    let (mut world, _hero, _bert) = populated_world(&EngineConfig::default())?;
    let err = world.call_function("TALK_TICKS", None).unwrap_err();
    assert!(matches!(err, EngineError::NotAFunction { .. }));
    let err = world.call_function("NO_SUCH_THING", None).unwrap_err();
    assert!(matches!(err, EngineError::Script(_)));
    Ok(())
}

#[test]
fn delivery_runs_the_message_function_with_the_payload_visible() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, hero, bert) = populated_world(&config)?;
    let remember = world.symbols().lookup("Remember_Damage")?;
    let last_roll = world.symbols().lookup("last_roll")?;
    let message = Message::damage(bert, Some(hero), 7).with_function(remember);
    world.state_mut().post_message(message);

    world.tick(config.tick_seconds);
    assert_eq!(world.state().hitpoints(bert), Some(33));
    assert_eq!(world.script().vm().globals().get(last_roll, 0), Some(Value::Int(7)));
    Ok(())
}

#[test]
fn end_state_messages_pop_the_current_state() -> Result<()> {
    let config = EngineConfig::default();
    let (mut world, _hero, bert) = populated_world(&config)?;
    world.push_state_by_name(bert, "ZS_TALK", true);
    world.state_mut().post_message(Message::end_state(bert));

    world.tick(config.tick_seconds);
    assert_eq!(top_state(&world, bert), "ZS_IDLE");
    assert!(world.events().contains("print talk ends"));
    Ok(())
}
