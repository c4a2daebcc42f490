use log::warn;

use super::actor::ActorHandle;
use super::message::{ItemAction, Message, MessagePayload, StateChange};
use super::state_machine::StateRoutine;
use super::World;

impl World {
    /// Deliver the oldest message posted before the current tick, if any.
    /// Returns whether a message was delivered.
    pub fn deliver_due(&mut self, handle: ActorHandle) -> bool {
        let tick = self.state.tick;
        let Some(actor) = self.state.actor_mut(handle) else {
            return false;
        };
        actor.current_message = None;
        if !actor
            .queue
            .front()
            .is_some_and(|message| message.posted_tick < tick)
        {
            return false;
        }
        let Some(message) = actor.queue.pop_front() else {
            return false;
        };
        let line = format!("message.deliver {} {}", actor.name, message.payload.label());
        self.state.log_event(line);

        match message.payload {
            MessagePayload::State {
                change: StateChange::StartState,
                program,
            } => {
                match (program, message.function) {
                    (Some(state), _) => {
                        self.push_state(handle, StateRoutine::Program(state), true);
                    }
                    (None, Some(enter)) => {
                        self.start_state_symbol(handle, enter);
                    }
                    (None, None) => warn!("start-state message for {handle} names no state"),
                }
                return true;
            }
            MessagePayload::State {
                change: StateChange::EndState,
                ..
            } => {
                self.pop_state(handle);
                return true;
            }
            MessagePayload::Damage { amount } => self.apply_damage(handle, amount),
            MessagePayload::Item {
                action,
                item,
                count,
            } => {
                if let Some(actor) = self.state.actor_mut(handle) {
                    match action {
                        ItemAction::Give => {
                            actor.inventory.add(item, count);
                        }
                        ItemAction::Remove => {
                            actor.inventory.remove(item, count);
                        }
                        ItemAction::Use => {}
                    }
                }
            }
            MessagePayload::Conversation { .. } | MessagePayload::Custom { .. } => {}
        }

        self.make_current(handle, message);
        true
    }

    fn make_current(&mut self, handle: ActorHandle, message: Message) {
        let function = message.function;
        let source = message.source.filter(|source| self.state.is_live(*source));
        if let Some(actor) = self.state.actor_mut(handle) {
            actor.current_message = Some(message);
        }
        if let Some(function) = function {
            self.script
                .invoke(&mut self.state, function, &[], Some(handle), source);
        }
    }

    fn apply_damage(&mut self, handle: ActorHandle, amount: i32) {
        let Some(hitpoints) = self.state.hitpoints(handle) else {
            return;
        };
        let remaining = hitpoints.saturating_sub(amount);
        self.state.set_hitpoints(handle, remaining);
        self.state
            .log_event(format!("actor.damage {handle} {amount} -> {remaining}"));
        if remaining <= 0 {
            self.kill(handle);
        }
    }
}
