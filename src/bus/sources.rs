//! Internally generated event sources: interval timers and daily timings.

use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use log::debug;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::BusError;
use crate::types::{paths, Event, EventPayload, TimerTick, TimingTick};

/// Format an interval for use in a `/timer/<d>` path: `60s` or `1500ms`.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Path on which a timer with this interval emits.
pub fn timer_path(duration: Duration) -> String {
    format!("{}/{}", paths::TIMER, format_duration(duration))
}

/// Spawn a source emitting a [`TimerTick`] every `duration`, starting one
/// interval from now. Returns the emitted path and the source.
///
/// The interval must be a positive whole number of milliseconds.
pub fn timer_source(duration: Duration) -> Result<(String, mpsc::Receiver<Event>), BusError> {
    if duration.is_zero() || duration.subsec_nanos() % 1_000_000 != 0 {
        return Err(BusError::InvalidDuration);
    }
    let path = timer_path(duration);
    let (tx, rx) = mpsc::channel(1);
    let emit_path = path.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + duration, duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut count = 0u64;
        loop {
            interval.tick().await;
            count += 1;
            let event = Event::new(
                emit_path.clone(),
                EventPayload::TimerTick(TimerTick { duration, count }),
            );
            if tx.send(event).await.is_err() {
                debug!("timer {emit_path} stopped");
                break;
            }
        }
    });

    Ok((path, rx))
}

/// A wall-clock time of day at which a timing source fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTime {
    time: NaiveTime,
}

impl DailyTime {
    /// Parse `H:MM` or `HH:MM`.
    pub fn parse(hm: &str) -> Result<Self, BusError> {
        let invalid = || BusError::InvalidTiming(hm.to_string());
        let (hour, minute) = hm.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
        Ok(Self { time })
    }

    /// Canonical `HH:MM` rendering.
    pub fn label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    /// Path on which this timing emits.
    pub fn path(&self) -> String {
        format!("{}/{}", paths::TIMING, self.label())
    }

    /// The first occurrence strictly after `now`.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let today = now.date_naive();
        for offset in 0..=2u64 {
            let Some(day) = today.checked_add_days(Days::new(offset)) else {
                break;
            };
            if let Some(candidate) = tz.from_local_datetime(&day.and_time(self.time)).earliest() {
                if candidate > *now {
                    return candidate;
                }
            }
        }
        now.clone() + chrono::Duration::days(1)
    }
}

/// Spawn a source emitting a [`TimingTick`] every day at `hm` local time.
/// Returns the emitted path and the source.
pub fn timing_source(hm: &str) -> Result<(String, mpsc::Receiver<Event>), BusError> {
    let daily = DailyTime::parse(hm)?;
    let path = daily.path();
    let (tx, rx) = mpsc::channel(1);
    let emit_path = path.clone();

    tokio::spawn(async move {
        let mut count = 0u64;
        let mut target = daily.next_after(&Local::now());
        loop {
            let wait = (target.clone() - Local::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            count += 1;
            let event = Event::new(emit_path.clone(), EventPayload::TimingTick(TimingTick { count }));
            if tx.send(event).await.is_err() {
                debug!("timing {emit_path} stopped");
                break;
            }
            let now = Local::now();
            target = daily.next_after(if now > target { &now } else { &target });
        }
    });

    Ok((path, rx))
}
