use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::world::ActorHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorFrame {
    pub handle: ActorHandle,
    pub name: String,
    pub position: [f32; 3],
    /// Name of the top AI state.
    pub state: String,
    pub player: bool,
    pub dead: bool,
    pub unconscious: bool,
}

/// Frozen view of the world after a tick. Presenters only ever see this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub tick: u64,
    pub zen: String,
    pub actors: Vec<ActorFrame>,
}

impl FrameSnapshot {
    pub fn actor(&self, handle: ActorHandle) -> Option<&ActorFrame> {
        self.actors.iter().find(|frame| frame.handle == handle)
    }
}

/// Whatever draws the world and the debug overlay.
pub trait Presenter {
    fn present(&mut self, frame: &FrameSnapshot);

    fn overlay_text(&mut self, _lines: &[String]) {}
}

impl fmt::Debug for dyn Presenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Presenter")
    }
}

/// Writes frames through the `log` facade instead of drawing them.
#[derive(Debug, Default)]
pub struct LogPresenter {
    frames: u64,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Presenter for LogPresenter {
    fn present(&mut self, frame: &FrameSnapshot) {
        self.frames += 1;
        info!(
            "[{}] tick {}: {} actor(s)",
            frame.zen,
            frame.tick,
            frame.actors.len()
        );
        for actor in &frame.actors {
            let flag = if actor.dead {
                " dead"
            } else if actor.unconscious {
                " unconscious"
            } else {
                ""
            };
            let marker = if actor.player { "*" } else { " " };
            log::debug!(
                "{marker}{} {} [{}]{flag} at ({:.1}, {:.1}, {:.1})",
                actor.handle,
                actor.name,
                actor.state,
                actor.position[0],
                actor.position[1],
                actor.position[2]
            );
        }
    }

    fn overlay_text(&mut self, lines: &[String]) {
        for line in lines {
            info!("overlay: {line}");
        }
    }
}
