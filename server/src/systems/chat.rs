//! Chat routing, the flood guard and vote-mutes
//!
//! Every chat-like request passes the guard first. Each message adds
//! `weight` to the connection's counter; reaching `threshold` drops the
//! message and counts a violation, and enough violations mute the player.
//! The counter decays every second and violations reset once it is back
//! at zero.

use super::System;
use crate::connection_registry::ConnectionId;
use crate::events::{Dispatcher, Event, EventKind};
use crate::game::Context;
use crate::outbox::Recipients;
use crate::world::components::{MuteVotes, Team};
use crate::world::{EntityId, EntityKind};
use log::{debug, info};
use shared::{ErrorKind, ServerPacket, ShipType, MAX_CHAT_SEGMENT, SERVER_PLAYER_ID};

pub fn system() -> System {
    System::new("chat")
        .on(EventKind::Chat, on_chat)
        .on(EventKind::TeamChat, on_team_chat)
        .on(EventKind::Whisper, on_whisper)
        .on(EventKind::VoteMute, on_vote_mute)
        .on(EventKind::Command, on_command)
        .on(EventKind::ServerChat, on_server_chat)
        .on(EventKind::Second, decay)
        .on(EventKind::PlayerDestroyed, forget_votes)
}

/// What a guarded request is. Mutes only silence chat; commands still
/// count towards the flood limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Chat,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pass,
    Muted,
    Throttled,
    AutoMuted,
}

/// Runs the flood guard for one message from `conn`. Returns the sending
/// player when the message may go through.
fn guard(ctx: &mut Context, conn: ConnectionId, request: Request) -> Option<EntityId> {
    let now = ctx.now_ms;
    let cfg = ctx.config.chat.clone();
    let connection = ctx.connections.get_mut(conn)?;
    let player = connection.player?;
    if !connection.is_main() || connection.is_closing() {
        return None;
    }

    let verdict = if request == Request::Chat && connection.mute.is_muted(now) {
        Verdict::Muted
    } else {
        connection.limits.chat = connection.limits.chat.saturating_add(cfg.weight);
        if connection.limits.chat < cfg.threshold {
            Verdict::Pass
        } else {
            connection.limits.violations += 1;
            if connection.limits.violations >= cfg.mute_after_violations {
                connection.limits.violations = 0;
                connection.mute.until_ms = Some(now + cfg.mute_duration_ms);
                Verdict::AutoMuted
            } else {
                Verdict::Throttled
            }
        }
    };

    match verdict {
        Verdict::Pass => return Some(player),
        Verdict::Muted => ctx.send(conn, ServerPacket::Error { kind: ErrorKind::ChatMuted }),
        Verdict::Throttled => ctx.send(conn, ServerPacket::Error { kind: ErrorKind::ChatThrottled }),
        Verdict::AutoMuted => {
            info!("Player {} muted for flooding", player);
            ctx.send(conn, ServerPacket::Error { kind: ErrorKind::ChatMuted });
        }
    }
    debug!("Dropped {:?} from {} ({:?})", request, conn, verdict);
    None
}

/// First `MAX_CHAT_SEGMENT` characters, trimmed. None if nothing is left.
fn clip(text: &str) -> Option<String> {
    let text: String = text.chars().take(MAX_CHAT_SEGMENT).collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Splits `text` into consecutive pieces of at most `limit` characters.
/// Never cuts inside a character.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

fn on_chat(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::Chat { conn, text } = event else {
        return;
    };
    let Some(player) = guard(ctx, *conn, Request::Chat) else {
        return;
    };
    if let Some(text) = clip(text) {
        ctx.broadcast(ServerPacket::ChatPublic { id: player.0, text });
    }
}

fn on_team_chat(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::TeamChat { conn, text } = event else {
        return;
    };
    let Some(player) = guard(ctx, *conn, Request::Chat) else {
        return;
    };
    let (Some(text), Some(Team(team))) = (clip(text), ctx.world.component::<Team>(player).copied()) else {
        return;
    };
    let recipients = ctx.team_connections(team);
    ctx.outbox.send(
        Recipients::Many(recipients),
        ServerPacket::ChatTeam { id: player.0, text },
    );
}

fn on_whisper(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::Whisper { conn, target, text } = event else {
        return;
    };
    let Some(player) = guard(ctx, *conn, Request::Chat) else {
        return;
    };
    let Some(target_conn) = ctx.connections.main_of(*target) else {
        notify_departed(ctx, *conn, *target);
        return;
    };
    let Some(text) = clip(text) else {
        return;
    };
    ctx.outbox.send(
        Recipients::Many(vec![target_conn, *conn]),
        ServerPacket::ChatWhisper {
            from: player.0,
            to: target.0,
            text,
        },
    );
}

/// Tells `conn` that `target` has left, if the id still names a recent player.
fn notify_departed(ctx: &mut Context, conn: ConnectionId, target: EntityId) {
    let Some(text) = ctx.history.name_of(target).map(|name| format!("{} has left", name)) else {
        return;
    };
    ctx.send(conn, ServerPacket::ChatPublic { id: SERVER_PLAYER_ID, text });
}

/// Votes needed to mute someone with `players` online.
pub fn votes_needed(min_votes: usize, players: usize) -> usize {
    min_votes.max((players as f64).sqrt().ceil() as usize)
}

fn on_vote_mute(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::VoteMute { conn, target } = event else {
        return;
    };
    let Some(voter) = guard(ctx, *conn, Request::Chat) else {
        return;
    };
    if voter == *target {
        return;
    }
    if ctx.world.kind_of(*target) != Some(EntityKind::Player) {
        notify_departed(ctx, *conn, *target);
        return;
    }

    let votes = match ctx.world.component_mut::<MuteVotes>(*target) {
        Some(votes) => {
            votes.0.insert(voter);
            votes.0.len()
        }
        None => return,
    };
    let needed = votes_needed(ctx.config.chat.votemute_min_votes, ctx.player_count());
    if votes < needed {
        return;
    }

    let Some(target_conn) = ctx.connections.main_of(*target) else {
        return;
    };
    let Some(connection) = ctx.connections.get_mut(target_conn) else {
        return;
    };
    if connection.mute.by_vote {
        return;
    }
    connection.mute.by_vote = true;
    info!("Player {} muted by {} votes", target, votes);
    ctx.send(target_conn, ServerPacket::ChatVoteMutePassed { id: target.0 });
}

fn on_command(ctx: &mut Context, bus: &Dispatcher, event: &Event) {
    let Event::Command { conn, com, data } = event else {
        return;
    };
    let Some(player) = guard(ctx, *conn, Request::Command) else {
        return;
    };

    match com.as_str() {
        "respawn" => {
            let ship = data.trim().parse::<u8>().ok().and_then(ShipType::from_id);
            bus.emit(ctx, Event::PlayerRespawn { player, ship });
        }
        "spectate" => {
            let target = data.trim().parse::<u32>().ok().map(EntityId);
            bus.emit(ctx, Event::PlayerSpectate { player, target });
        }
        _ => {
            debug!("Unknown command {:?} from {}", com, conn);
            ctx.send(*conn, ServerPacket::Error { kind: ErrorKind::UnknownCommand });
        }
    }
}

fn on_server_chat(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::ServerChat { recipients, text } = event else {
        return;
    };
    for chunk in split_text(text, MAX_CHAT_SEGMENT) {
        ctx.outbox.send(
            recipients.clone(),
            ServerPacket::ChatPublic {
                id: SERVER_PLAYER_ID,
                text: chunk,
            },
        );
    }
}

fn decay(ctx: &mut Context, _: &Dispatcher, _: &Event) {
    let step = ctx.config.chat.decay_per_second;
    let now = ctx.now_ms;
    for connection in ctx.connections.iter_mut() {
        let limits = &mut connection.limits;
        limits.chat = limits.chat.saturating_sub(step);
        if limits.chat == 0 {
            limits.violations = 0;
        }
        if connection.mute.until_ms.is_some_and(|until| until <= now) {
            connection.mute.until_ms = None;
        }
    }
}

fn forget_votes(ctx: &mut Context, _: &Dispatcher, event: &Event) {
    let Event::PlayerDestroyed { player } = event else {
        return;
    };
    for id in ctx.world.ids_with::<MuteVotes>() {
        if let Some(votes) = ctx.world.component_mut::<MuteVotes>(id) {
            votes.0.remove(player);
        }
    }
}
