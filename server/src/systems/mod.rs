//! Systems and the per-mode manifest that wires them
//!
//! A system is a named, fixed list of `(event kind, handler)` pairs. Systems
//! keep no state of their own; everything lives in the [`Context`]. The
//! manifest instantiates systems once, in a documented order, and freezes
//! them into a [`Dispatcher`]. Registration order is invocation order for
//! events with several listeners.
//!
//! Base order: `connections`, `login`, `timeouts`, `chat`, `players`,
//! `horizon`, `maintenance`. Capture-the-flag appends `teams`.
//!
//! [`Context`]: crate::game::Context

pub mod chat;
pub mod connections;
pub mod horizon;
pub mod login;
pub mod maintenance;
pub mod players;
pub mod teams;
pub mod timeouts;

use crate::config::GameMode;
use crate::events::{handler, Dispatcher, Event, EventKind, Handler};
use crate::game::Context;
use log::debug;

pub struct System {
    pub name: &'static str,
    handlers: Vec<(EventKind, Handler)>,
}

impl System {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Vec::new(),
        }
    }

    pub fn on(mut self, kind: EventKind, f: fn(&mut Context, &Dispatcher, &Event)) -> Self {
        self.handlers.push((kind, handler(f)));
        self
    }

    pub fn handles(&self) -> Vec<EventKind> {
        self.handlers.iter().map(|(kind, _)| *kind).collect()
    }
}

/// Composition root for one game mode.
pub struct Manifest {
    systems: Vec<System>,
}

impl Manifest {
    /// Systems every mode runs.
    pub fn base() -> Self {
        Self {
            systems: vec![
                connections::system(),
                login::system(),
                timeouts::system(),
                chat::system(),
                players::system(),
                horizon::system(),
                maintenance::system(),
            ],
        }
    }

    pub fn for_mode(mode: GameMode) -> Self {
        match mode {
            GameMode::Ffa => Self::base(),
            GameMode::Ctf => Self::base().with(teams::system()),
        }
    }

    /// Appends a system after everything already in the manifest.
    pub fn with(mut self, system: System) -> Self {
        self.systems.push(system);
        self
    }

    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(|s| s.name).collect()
    }

    pub fn build(self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        for system in self.systems {
            debug!("Registering system {}", system.name);
            for (kind, handler) in system.handlers {
                dispatcher.register(system.name, kind, handler);
            }
        }
        dispatcher
    }
}
