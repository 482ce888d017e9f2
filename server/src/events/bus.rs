//! Immediate and delayed event dispatch

use super::{Event, EventKind};
use crate::game::Context;
use log::trace;
use std::collections::{HashMap, VecDeque};

/// A system's reaction to one event kind.
///
/// Handlers receive the dispatcher so they can emit follow-up events
/// synchronously; delayed follow-ups go through `ctx.channels`.
pub type Handler = Box<dyn Fn(&mut Context, &Dispatcher, &Event) + Send + Sync>;

pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Context, &Dispatcher, &Event) + Send + Sync + 'static,
{
    Box::new(f)
}

/// Lookup table from event kind to handlers, frozen once the manifest is built.
#[derive(Default)]
pub struct Dispatcher {
    table: HashMap<EventKind, Vec<(&'static str, Handler)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, system: &'static str, kind: EventKind, handler: Handler) {
        self.table.entry(kind).or_default().push((system, handler));
    }

    /// Runs every handler for the event's kind, in registration order,
    /// before returning. Events nobody listens to are dropped.
    pub fn emit(&self, ctx: &mut Context, event: Event) {
        let Some(handlers) = self.table.get(&event.kind()) else {
            return;
        };
        for (system, handler) in handlers {
            trace!("{:?} -> {}", event.kind(), system);
            handler(ctx, self, &event);
        }
    }

    /// Emits the events that were queued on `channel` when the flush started.
    /// Anything delayed while flushing waits for the next flush.
    pub fn flush(&self, ctx: &mut Context, channel: Channel) -> usize {
        let batch = ctx.channels.take(channel);
        let count = batch.len();
        for event in batch {
            self.emit(ctx, event);
        }
        count
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.table.get(&kind).map_or(0, Vec::len)
    }

    /// Names of the systems listening to `kind`, in invocation order.
    pub fn listeners(&self, kind: EventKind) -> Vec<&'static str> {
        self.table
            .get(&kind)
            .map(|handlers| handlers.iter().map(|(system, _)| *system).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Player lifecycle announcements, flushed at the end of each tick.
    Players,
    /// Left-horizon notices, flushed once all viewports are recomputed.
    Horizon,
}

#[derive(Debug, Default)]
pub struct Channels {
    queues: HashMap<Channel, VecDeque<Event>>,
}

impl Channels {
    pub fn delay(&mut self, channel: Channel, event: Event) {
        self.queues.entry(channel).or_default().push_back(event);
    }

    pub fn take(&mut self, channel: Channel) -> VecDeque<Event> {
        self.queues.remove(&channel).unwrap_or_default()
    }

    pub fn pending(&self, channel: Channel) -> usize {
        self.queues.get(&channel).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::connection_registry::ConnectionId;
    use crate::outbox::Recipients;
    use shared::ServerPacket;

    fn record(ctx: &mut Context, tag: u32) {
        ctx.outbox
            .send(Recipients::All, ServerPacket::PlayerLeave { id: tag });
    }

    fn recorded(ctx: &Context) -> Vec<u32> {
        ctx.outbox
            .items()
            .iter()
            .filter_map(|item| match item {
                crate::outbox::Outgoing::Packet {
                    packet: ServerPacket::PlayerLeave { id },
                    ..
                } => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn ack(n: u64) -> Event {
        Event::Ack {
            conn: ConnectionId(n),
        }
    }

    fn conn_of(event: &Event) -> u32 {
        match event {
            Event::Ack { conn } => conn.0 as u32,
            _ => 0,
        }
    }

    #[test]
    fn test_emit_runs_handlers_in_registration_order() {
        let mut bus = Dispatcher::new();
        bus.register("first", EventKind::Ack, handler(|ctx, _, _| record(ctx, 1)));
        bus.register("second", EventKind::Ack, handler(|ctx, _, _| record(ctx, 2)));
        let mut ctx = Context::new(ServerConfig::default());

        bus.emit(&mut ctx, ack(1));

        assert_eq!(recorded(&ctx), vec![1, 2]);
        assert_eq!(bus.listeners(EventKind::Ack), vec!["first", "second"]);
    }

    #[test]
    fn test_emit_without_handlers_is_noop() {
        let bus = Dispatcher::new();
        let mut ctx = Context::new(ServerConfig::default());

        bus.emit(&mut ctx, Event::Second);

        assert!(ctx.outbox.is_empty());
        assert_eq!(bus.handler_count(EventKind::Second), 0);
    }

    #[test]
    fn test_nested_emit_completes_before_outer_continues() {
        let mut bus = Dispatcher::new();
        bus.register(
            "outer",
            EventKind::Ack,
            handler(|ctx, bus, _| {
                record(ctx, 1);
                bus.emit(ctx, Event::Second);
                record(ctx, 3);
            }),
        );
        bus.register("inner", EventKind::Second, handler(|ctx, _, _| record(ctx, 2)));
        let mut ctx = Context::new(ServerConfig::default());

        bus.emit(&mut ctx, ack(1));

        assert_eq!(recorded(&ctx), vec![1, 2, 3]);
    }

    #[test]
    fn test_flush_preserves_order_exactly_once() {
        let mut bus = Dispatcher::new();
        bus.register(
            "recorder",
            EventKind::Ack,
            handler(|ctx, _, event| record(ctx, conn_of(event))),
        );
        let mut ctx = Context::new(ServerConfig::default());

        for n in 1..=5 {
            ctx.channels.delay(Channel::Players, ack(n));
        }
        assert!(ctx.outbox.is_empty());

        assert_eq!(bus.flush(&mut ctx, Channel::Players), 5);
        assert_eq!(bus.flush(&mut ctx, Channel::Players), 0);
        assert_eq!(recorded(&ctx), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_events_delayed_during_flush_wait_for_next_flush() {
        let mut bus = Dispatcher::new();
        bus.register(
            "requeue",
            EventKind::Ack,
            handler(|ctx, _, event| {
                let n = conn_of(event);
                record(ctx, n);
                if n < 100 {
                    ctx.channels.delay(Channel::Players, ack(n as u64 + 100));
                }
            }),
        );
        let mut ctx = Context::new(ServerConfig::default());
        ctx.channels.delay(Channel::Players, ack(1));
        ctx.channels.delay(Channel::Players, ack(2));

        assert_eq!(bus.flush(&mut ctx, Channel::Players), 2);
        assert_eq!(recorded(&ctx), vec![1, 2]);
        assert_eq!(ctx.channels.pending(Channel::Players), 2);

        assert_eq!(bus.flush(&mut ctx, Channel::Players), 2);
        assert_eq!(recorded(&ctx), vec![1, 2, 101, 102]);
        assert_eq!(ctx.channels.pending(Channel::Players), 0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut bus = Dispatcher::new();
        bus.register(
            "recorder",
            EventKind::Ack,
            handler(|ctx, _, event| record(ctx, conn_of(event))),
        );
        let mut ctx = Context::new(ServerConfig::default());
        ctx.channels.delay(Channel::Players, ack(1));
        ctx.channels.delay(Channel::Horizon, ack(2));

        bus.flush(&mut ctx, Channel::Horizon);

        assert_eq!(recorded(&ctx), vec![2]);
        assert_eq!(ctx.channels.pending(Channel::Players), 1);
    }
}
