//! Simulation clock: frame counting, stall detection and calendar markers

use log::warn;

/// Upper bound for the per-tick speed factor handed to the simulation.
pub const MAX_FRAME_FACTOR: f32 = 4.0;

const SECOND_MS: u64 = 1000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    pub frame: u64,
    /// Elapsed time measured in ticks; 1.0 when the loop is on schedule.
    pub frame_factor: f32,
    pub elapsed_ms: u64,
    pub skipped_frames: u64,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Second,
    Minute,
    Hour,
}

#[derive(Debug)]
pub struct Clock {
    tick_ms: u64,
    frame: u64,
    last_ms: u64,
    seconds: u64,
    minutes: u64,
    hours: u64,
}

impl Clock {
    pub fn new(tick_ms: u64, start_ms: u64) -> Self {
        Self {
            tick_ms: tick_ms.max(1),
            frame: 0,
            last_ms: start_ms,
            seconds: start_ms / SECOND_MS,
            minutes: start_ms / MINUTE_MS,
            hours: start_ms / HOUR_MS,
        }
    }

    /// Advances to `now_ms`.
    ///
    /// A loop that fell behind jumps the frame counter over the missed
    /// frames instead of replaying them. Calendar markers come out once per
    /// boundary crossed since the previous call, coarsest last.
    pub fn advance(&mut self, now_ms: u64) -> (TickInfo, Vec<Calendar>) {
        let now_ms = now_ms.max(self.last_ms);
        let elapsed_ms = now_ms - self.last_ms;
        self.last_ms = now_ms;

        let behind = elapsed_ms / self.tick_ms;
        let skipped_frames = behind.saturating_sub(1);
        self.frame += 1 + skipped_frames;

        let mut frame_factor = elapsed_ms as f32 / self.tick_ms as f32;
        if frame_factor > MAX_FRAME_FACTOR {
            warn!(
                "Large tick delay detected ({}ms), capping frame factor {:.2} to {:.2}",
                elapsed_ms, frame_factor, MAX_FRAME_FACTOR
            );
            frame_factor = MAX_FRAME_FACTOR;
        }

        let mut calendar = Vec::new();
        Self::cross(&mut self.seconds, now_ms / SECOND_MS, Calendar::Second, &mut calendar);
        Self::cross(&mut self.minutes, now_ms / MINUTE_MS, Calendar::Minute, &mut calendar);
        Self::cross(&mut self.hours, now_ms / HOUR_MS, Calendar::Hour, &mut calendar);

        let info = TickInfo {
            frame: self.frame,
            frame_factor,
            elapsed_ms,
            skipped_frames,
            time_ms: now_ms,
        };
        (info, calendar)
    }

    fn cross(seen: &mut u64, current: u64, marker: Calendar, out: &mut Vec<Calendar>) {
        while *seen < current {
            *seen += 1;
            out.push(marker);
        }
    }
}
