//! Alert rate limiting for notification channels (email, Arduino, MQTT).
//!
//! The gate holds its own cooldown state and reads time through an injected
//! [`Clock`], so it can be tested without sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::compliance::{AlertType, ComplianceResult};

pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now_s(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_s(&self) -> u64 {
        crate::pipeline::now_s().unwrap_or(0)
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_s: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_s)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_s(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// An alert that passed the gate and should be delivered.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertDecision {
    pub channel: String,
    pub alert_type: AlertType,
    pub compliance_rate: f32,
    pub total_persons: u32,
    pub fired_at: u64,
    pub subject: String,
}

pub struct AlertGate<C: Clock = SystemClock> {
    clock: C,
    cooldown: Duration,
    last_fired: HashMap<(String, AlertType), u64>,
}

impl AlertGate<SystemClock> {
    pub fn new(cooldown: Duration) -> Self {
        Self::with_clock(cooldown, SystemClock)
    }
}

impl<C: Clock> AlertGate<C> {
    pub fn with_clock(cooldown: Duration, clock: C) -> Self {
        Self {
            clock,
            cooldown,
            last_fired: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether `result` should raise an alert on `channel`.
    ///
    /// Each (channel, alert type) pair fires at most once per cooldown window,
    /// so an escalation from warning to critical is never held back.
    pub fn evaluate(&mut self, channel: &str, result: &ComplianceResult) -> Option<AlertDecision> {
        let now = self.clock.now_s();
        self.evaluate_at(channel, result, now)
    }

    /// Like [`AlertGate::evaluate`], with `now` (unix seconds) supplied by the
    /// caller, e.g. the capture time of a report read back from storage.
    pub fn evaluate_at(
        &mut self,
        channel: &str,
        result: &ComplianceResult,
        now: u64,
    ) -> Option<AlertDecision> {
        if result.alert_type == AlertType::Aucune {
            return None;
        }

        let key = (channel.to_string(), result.alert_type);
        if let Some(last) = self.last_fired.get(&key) {
            if now.saturating_sub(*last) < self.cooldown.as_secs() {
                log::debug!(
                    "{} alert on {} suppressed by cooldown",
                    result.alert_type,
                    channel
                );
                return None;
            }
        }
        self.last_fired.insert(key, now);

        Some(AlertDecision {
            channel: channel.to_string(),
            alert_type: result.alert_type,
            compliance_rate: result.compliance_rate,
            total_persons: result.total_persons,
            fired_at: now,
            subject: subject_line(result),
        })
    }

    /// Forget cooldown state for a channel, e.g. after an operator acknowledgement.
    pub fn reset(&mut self, channel: &str) {
        self.last_fired.retain(|(c, _), _| c != channel);
    }

    /// When each alert type last fired on `channel`, ordered by alert type.
    pub fn last_fired(&self, channel: &str) -> Vec<(AlertType, u64)> {
        let mut fired: Vec<(AlertType, u64)> = self
            .last_fired
            .iter()
            .filter(|((c, _), _)| c == channel)
            .map(|((_, alert_type), at)| (*alert_type, *at))
            .collect();
        fired.sort();
        fired
    }

    /// Restore cooldown state saved from an earlier run.
    pub fn record_fired(&mut self, channel: &str, alert_type: AlertType, at: u64) {
        let entry = self
            .last_fired
            .entry((channel.to_string(), alert_type))
            .or_insert(at);
        *entry = (*entry).max(at);
    }
}

fn subject_line(result: &ComplianceResult) -> String {
    let missing: Vec<&str> = result
        .missing_equipment
        .iter()
        .map(|class| class.label())
        .collect();
    if result.total_persons == 0 {
        return format!("{}: no person detected (0%)", result.alert_type);
    }
    if missing.is_empty() {
        format!("{}: compliance {:.0}%", result.alert_type, result.compliance_rate)
    } else {
        format!(
            "{}: compliance {:.0}%, missing {}",
            result.alert_type,
            result.compliance_rate,
            missing.join(", ")
        )
    }
}
