//! Two-team balancing for capture-the-flag

use super::System;
use crate::events::{Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::world::components::Team;
use crate::world::EntityKind;
use log::debug;

pub const BLUE: u16 = 1;
pub const RED: u16 = 2;

pub fn system() -> System {
    System::new("teams").on(EventKind::PlayerJoining, assign_team)
}

/// Puts the joining player on the smaller team, blue on a tie.
fn assign_team(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerJoining { player } = event else {
        return;
    };
    let (mut blue, mut red) = (0usize, 0usize);
    for id in ctx.world.ids_of(EntityKind::Player) {
        if id == *player {
            continue;
        }
        match ctx.world.component::<Team>(id) {
            Some(Team(BLUE)) => blue += 1,
            Some(Team(RED)) => red += 1,
            _ => {}
        }
    }
    let team = if red < blue { RED } else { BLUE };
    if ctx.world.attach(*player, Team(team)).is_ok() {
        debug!("Player {} joins team {} ({} blue, {} red)", player, team, blue, red);
    }
}
