//! Periodic housekeeping driven by the calendar markers

use super::System;
use crate::events::{Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::outbox::Recipients;
use crate::world::components::Score;
use crate::world::EntityKind;
use log::{debug, info};
use shared::ServerPacket;

pub fn system() -> System {
    System::new("maintenance")
        .on(EventKind::Second, score_board)
        .on(EventKind::Minute, sweep)
        .on(EventKind::Hour, report)
}

/// Sends the score board, best first, to each player's backup connection
/// when it has one and to its main connection otherwise.
fn score_board(ctx: &mut Context, _: &Dispatcher, _: &Event) {
    let interval_ms = ctx.config.world.score_board_interval_secs * 1000;
    if ctx
        .stats
        .last_score_board_ms
        .is_some_and(|last| ctx.now_ms.saturating_sub(last) < interval_ms)
    {
        return;
    }
    ctx.stats.last_score_board_ms = Some(ctx.now_ms);

    let players = ctx.world.ids_of(EntityKind::Player);
    if players.is_empty() {
        return;
    }
    let mut entries: Vec<(u32, u32)> = players
        .iter()
        .map(|id| {
            let score = ctx.world.component::<Score>(*id).map_or(0, |s| s.value);
            (id.0, score)
        })
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let recipients = players
        .iter()
        .filter_map(|id| ctx.connections.backup_of(*id).or_else(|| ctx.connections.main_of(*id)))
        .collect();
    ctx.outbox
        .send(Recipients::Many(recipients), ServerPacket::ScoreBoard { entries });
}

fn sweep(ctx: &mut Context, _: &Dispatcher, _: &Event) {
    let names = ctx
        .history
        .sweep(ctx.now_ms, ctx.config.world.name_retention_ms);
    let ids = ctx.world.reclaim_ids(ctx.now_ms);
    debug!("Swept {} names, reclaimed {} ids", names, ids);
}

fn report(ctx: &mut Context, _: &Dispatcher, _: &Event) {
    let stats = ctx.stats;
    let latency = ctx
        .connections
        .average_latency_ms()
        .map_or_else(|| "n/a".to_string(), |ms| format!("{}ms", ms));
    info!(
        "Hourly: {} players, {} connections, {} logins, {} kicks, {} breaks, peak {}, latency {}",
        ctx.player_count(),
        ctx.connections.len(),
        stats.logins,
        stats.kicks,
        stats.breaks,
        stats.peak_players,
        latency
    );
}
