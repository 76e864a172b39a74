//! Authentication risk assessment: generalizes the adaptive rolling-score
//! engine this codebase already uses for key-lifecycle threat posture into a
//! per-login risk score over authentication-specific factors.

use crate::types::{now, UserId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        match score as u32 {
            0..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=79 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskFactor {
    NewIp,
    NewCountry,
    ImpossibleTravel,
    HighVelocity,
    KnownBadIp,
    UnseenDeviceFingerprint,
    TimeOfDayAnomaly,
}

impl RiskFactor {
    fn weight(&self) -> f64 {
        match self {
            RiskFactor::NewIp => 10.0,
            RiskFactor::NewCountry => 20.0,
            RiskFactor::ImpossibleTravel => 40.0,
            RiskFactor::HighVelocity => 25.0,
            RiskFactor::KnownBadIp => 50.0,
            RiskFactor::UnseenDeviceFingerprint => 15.0,
            RiskFactor::TimeOfDayAnomaly => 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone)]
struct LoginObservation {
    at: DateTime<Utc>,
    ip: String,
    country: Option<String>,
    device_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LoginContext {
    pub ip: String,
    pub country: Option<String>,
    pub device_fingerprint: Option<String>,
    pub hour_of_day_utc: u32,
    pub known_bad_ip: bool,
}

const VELOCITY_WINDOW: ChronoDuration = ChronoDuration::minutes(5);
const VELOCITY_THRESHOLD: usize = 5;
const IMPOSSIBLE_TRAVEL_WINDOW: ChronoDuration = ChronoDuration::minutes(10);
const TYPICAL_HOUR_RANGE: std::ops::Range<u32> = 6..23;

/// Per-user rolling login history backing the risk factors that need
/// context (velocity, impossible travel, "seen before").
pub struct RiskEngine {
    history: Mutex<HashMap<UserId, VecDeque<LoginObservation>>>,
    max_history_per_user: usize,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self { history: Mutex::new(HashMap::new()), max_history_per_user: 50 }
    }

    pub fn assess(&self, user_id: UserId, ctx: &LoginContext) -> RiskAssessment {
        let mut history = self.history.lock().unwrap();
        let entries = history.entry(user_id).or_default();

        let mut factors = Vec::new();

        let is_new_ip = !entries.iter().any(|o| o.ip == ctx.ip);
        if is_new_ip {
            factors.push(RiskFactor::NewIp);
        }

        if let Some(country) = &ctx.country {
            let is_new_country = !entries.iter().any(|o| o.country.as_deref() == Some(country.as_str()));
            if is_new_country {
                factors.push(RiskFactor::NewCountry);
            }
        }

        if let Some(last) = entries.back() {
            let elapsed = now().signed_duration_since(last.at);
            if elapsed < IMPOSSIBLE_TRAVEL_WINDOW && last.country != ctx.country && ctx.country.is_some() {
                factors.push(RiskFactor::ImpossibleTravel);
            }
        }

        let recent_count = entries.iter().filter(|o| now().signed_duration_since(o.at) < VELOCITY_WINDOW).count();
        if recent_count >= VELOCITY_THRESHOLD {
            factors.push(RiskFactor::HighVelocity);
        }

        if ctx.known_bad_ip {
            factors.push(RiskFactor::KnownBadIp);
        }

        if let Some(fp) = &ctx.device_fingerprint {
            let seen = entries.iter().any(|o| o.device_fingerprint.as_deref() == Some(fp.as_str()));
            if !seen {
                factors.push(RiskFactor::UnseenDeviceFingerprint);
            }
        }

        if !TYPICAL_HOUR_RANGE.contains(&ctx.hour_of_day_utc) {
            factors.push(RiskFactor::TimeOfDayAnomaly);
        }

        let score: f64 = factors.iter().map(|f| f.weight()).sum();
        let score = score.min(100.0);

        entries.push_back(LoginObservation {
            at: now(),
            ip: ctx.ip.clone(),
            country: ctx.country.clone(),
            device_fingerprint: ctx.device_fingerprint.clone(),
        });
        while entries.len() > self.max_history_per_user {
            entries.pop_front();
        }

        RiskAssessment { score: score as u32, level: RiskLevel::from_score(score), factors }
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(ip: &str) -> LoginContext {
        LoginContext { ip: ip.into(), country: Some("US".into()), device_fingerprint: Some("fp-1".into()), hour_of_day_utc: 12, known_bad_ip: false }
    }

    #[test]
    fn first_login_flags_new_ip_and_device() {
        let engine = RiskEngine::new();
        let assessment = engine.assess(UserId::new(), &ctx("1.2.3.4"));
        assert!(assessment.factors.contains(&RiskFactor::NewIp));
        assert!(assessment.factors.contains(&RiskFactor::UnseenDeviceFingerprint));
    }

    #[test]
    fn repeated_login_from_same_ip_has_lower_score() {
        let engine = RiskEngine::new();
        let user = UserId::new();
        let first = engine.assess(user, &ctx("1.2.3.4"));
        let second = engine.assess(user, &ctx("1.2.3.4"));
        assert!(second.score <= first.score);
    }

    #[test]
    fn known_bad_ip_is_critical() {
        let engine = RiskEngine::new();
        let mut c = ctx("6.6.6.6");
        c.known_bad_ip = true;
        let assessment = engine.assess(UserId::new(), &c);
        assert!(assessment.factors.contains(&RiskFactor::KnownBadIp));
    }

    #[test]
    fn off_hours_login_flagged() {
        let engine = RiskEngine::new();
        let mut c = ctx("1.2.3.4");
        c.hour_of_day_utc = 3;
        let assessment = engine.assess(UserId::new(), &c);
        assert!(assessment.factors.contains(&RiskFactor::TimeOfDayAnomaly));
    }
}
