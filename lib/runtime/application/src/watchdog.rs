//! Stall detection with a single bounded remediation.
//!
//! A probe reports whether a component is stuck in a known undesired state.
//! The first sighting arms a per-component timer; once the timer has run for
//! its threshold the probe's remediation fires exactly once and the timer is
//! cleared, so a new stall episode gets a fresh grace period. Timers live in
//! memory only: after a restart the next sighting simply arms a new one.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::component::ComponentContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallTimer {
    started: Option<DateTime<Utc>>,
    threshold: Duration,
}

impl StallTimer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            started: None,
            threshold,
        }
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn is_set(&self) -> bool {
        self.started.is_some()
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started = Some(now);
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started
            .map(|started| (now - started).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.elapsed(now)
            .is_some_and(|elapsed| elapsed >= self.threshold)
    }

    pub fn reset(&mut self) {
        self.started = None;
    }
}

/// Stall timers for every component of one platform key.
#[derive(Debug, Clone, Default)]
pub struct StallTimers {
    timers: BTreeMap<String, StallTimer>,
}

impl StallTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer(&mut self, component: &str, threshold: Duration) -> &mut StallTimer {
        let timer = self
            .timers
            .entry(component.to_string())
            .or_insert_with(|| StallTimer::new(threshold));
        timer.threshold = threshold;
        timer
    }

    pub fn get(&self, component: &str) -> Option<&StallTimer> {
        self.timers.get(component)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    Applied(String),
    Unavailable(String),
}

#[async_trait]
pub trait StallProbe: Send + Sync {
    /// True when the undesired state is observed right now.
    async fn is_stalled(&self, ctx: &ComponentContext<'_>) -> Result<bool>;

    async fn remediate(&self, ctx: &ComponentContext<'_>) -> Result<Remediation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Nothing undesired seen on this poll. An armed timer stays armed.
    Clear,
    /// First sighting; the grace period starts now.
    Armed,
    Waiting { elapsed: Duration },
    Remediated,
    NoRemedy,
}

pub struct Watchdog<P> {
    probe: P,
}

impl<P: StallProbe> Watchdog<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub async fn poll(&self, ctx: &mut ComponentContext<'_>) -> Result<WatchdogOutcome> {
        if !self.probe.is_stalled(ctx).await? {
            return Ok(WatchdogOutcome::Clear);
        }

        let component = ctx.component().to_string();
        let now = ctx.clock().now();
        let timer = ctx.stall_timer();
        if !timer.is_set() {
            timer.start(now);
            debug!("Stall observed for {component}, waiting {:?} before repair", timer.threshold());
            return Ok(WatchdogOutcome::Armed);
        }
        if !timer.is_expired(now) {
            let elapsed = timer.elapsed(now).unwrap_or(Duration::ZERO);
            debug!("{component} stalled for {elapsed:?}, repair not due yet");
            return Ok(WatchdogOutcome::Waiting { elapsed });
        }

        match self.probe.remediate(ctx).await? {
            Remediation::Applied(action) => {
                info!("Repaired stalled component {component}: {action}");
                ctx.stall_timer().reset();
                Ok(WatchdogOutcome::Remediated)
            }
            Remediation::Unavailable(reason) => {
                warn!("{component} is stalled but no repair is available: {reason}");
                Ok(WatchdogOutcome::NoRemedy)
            }
        }
    }
}
