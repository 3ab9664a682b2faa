//! Application-level configuration loading, including the scoring policy knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_DUEL_CONFIG_PATH";

const DEFAULT_POINTS_PER_QUESTION: u32 = 2;
const DEFAULT_SURRENDER_BONUS: u32 = 20;
const DEFAULT_QUESTION_LIMIT: u32 = 10;
const DEFAULT_MAX_QUESTION_LIMIT: u32 = 50;
const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(1_500);
const DEFAULT_QUESTION_CACHE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// How the remaining player of a disconnected match is compensated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectAward {
    /// Half of the maximum score reachable in the match.
    HalfOfMaximum,
    /// A fixed number of points.
    Flat {
        /// Points credited to each remaining participant.
        points: u32,
    },
    /// Whatever the remaining player had scored so far.
    ActualScore,
}

/// Point values used by the turn machine and the settlement engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringPolicy {
    /// Points added for each correct answer.
    pub points_per_question: u32,
    /// Flat award for the participant left behind by a surrender.
    pub surrender_bonus: u32,
    /// Award for the participant left behind by a disconnect.
    pub disconnect_award: DisconnectAward,
}

impl ScoringPolicy {
    /// Points owed to a remaining participant after the opponent disconnected.
    pub fn disconnect_points(&self, question_limit: u32, actual_score: u32) -> u32 {
        match self.disconnect_award {
            DisconnectAward::HalfOfMaximum => {
                question_limit.saturating_mul(self.points_per_question) / 2
            }
            DisconnectAward::Flat { points } => points,
            DisconnectAward::ActualScore => actual_score,
        }
    }
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            points_per_question: DEFAULT_POINTS_PER_QUESTION,
            surrender_bonus: DEFAULT_SURRENDER_BONUS,
            disconnect_award: DisconnectAward::HalfOfMaximum,
        }
    }
}

/// Bounded retry applied to writes against the match store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, the first one included.
    pub attempts: u32,
    /// Base pause, multiplied by the attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Point values applied at settlement.
    pub scoring: ScoringPolicy,
    /// Question count used when a match does not carry its own limit.
    pub default_question_limit: u32,
    /// Upper bound accepted at match creation.
    pub max_question_limit: u32,
    /// Pause between the local answer reveal and persisting the round.
    pub reveal_delay: Duration,
    /// How long a loaded question bank is reused.
    pub question_cache_ttl: Duration,
    /// Retry applied to transient storage failures.
    pub write_retry: RetryPolicy,
    /// Upper bound on one answer submission, reveal delay included.
    pub transition_timeout: Option<Duration>,
    /// Optional JSON question bank loaded into the in-memory store.
    pub question_bank_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        points_per_question = app_config.scoring.points_per_question,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Clamp a requested question count into the configured bounds.
    pub fn effective_question_limit(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(limit) if limit > 0 => limit.min(self.max_question_limit),
            _ => self.default_question_limit,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            default_question_limit: DEFAULT_QUESTION_LIMIT,
            max_question_limit: DEFAULT_MAX_QUESTION_LIMIT,
            reveal_delay: DEFAULT_REVEAL_DELAY,
            question_cache_ttl: DEFAULT_QUESTION_CACHE_TTL,
            write_retry: RetryPolicy::default(),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
            question_bank_path: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    scoring: RawScoring,
    default_question_limit: Option<u32>,
    max_question_limit: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "reveal_delay_ms")]
    reveal_delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "question_cache_ttl_ms")]
    question_cache_ttl: Option<Duration>,
    #[serde(default)]
    write_retry: RawRetry,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "transition_timeout_ms")]
    transition_timeout: Option<Duration>,
    question_bank_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawScoring {
    points_per_question: Option<u32>,
    surrender_bonus: Option<u32>,
    disconnect_award: Option<DisconnectAward>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
struct RawRetry {
    attempts: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "backoff_ms")]
    backoff: Option<Duration>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let scoring = ScoringPolicy {
            points_per_question: value
                .scoring
                .points_per_question
                .unwrap_or(defaults.scoring.points_per_question),
            surrender_bonus: value
                .scoring
                .surrender_bonus
                .unwrap_or(defaults.scoring.surrender_bonus),
            disconnect_award: value
                .scoring
                .disconnect_award
                .unwrap_or(defaults.scoring.disconnect_award),
        };
        let max_question_limit = value
            .max_question_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(defaults.max_question_limit);
        let default_question_limit = value
            .default_question_limit
            .filter(|limit| *limit > 0)
            .unwrap_or(defaults.default_question_limit)
            .min(max_question_limit);

        Self {
            scoring,
            default_question_limit,
            max_question_limit,
            reveal_delay: value.reveal_delay.unwrap_or(defaults.reveal_delay),
            question_cache_ttl: value
                .question_cache_ttl
                .unwrap_or(defaults.question_cache_ttl),
            write_retry: RetryPolicy {
                attempts: value
                    .write_retry
                    .attempts
                    .unwrap_or(defaults.write_retry.attempts)
                    .max(1),
                backoff: value
                    .write_retry
                    .backoff
                    .unwrap_or(defaults.write_retry.backoff),
            },
            transition_timeout: value
                .transition_timeout
                .or(defaults.transition_timeout)
                .filter(|limit| !limit.is_zero()),
            question_bank_path: value.question_bank_path,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.scoring, ScoringPolicy::default());
        assert_eq!(config.default_question_limit, 10);
        assert_eq!(config.reveal_delay, Duration::from_millis(1_500));
    }

    #[test]
    fn scoring_knobs_are_read() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "scoring": {
                    "points_per_question": 3,
                    "surrender_bonus": 5,
                    "disconnect_award": { "kind": "flat", "points": 7 }
                },
                "reveal_delay_ms": 0,
                "write_retry": { "attempts": 0, "backoff_ms": 5 }
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.scoring.points_per_question, 3);
        assert_eq!(config.scoring.surrender_bonus, 5);
        assert_eq!(
            config.scoring.disconnect_award,
            DisconnectAward::Flat { points: 7 }
        );
        assert_eq!(config.reveal_delay, Duration::ZERO);
        assert_eq!(config.write_retry.attempts, 1);
        assert_eq!(config.write_retry.backoff, Duration::from_millis(5));
    }

    #[test]
    fn disconnect_award_variants() {
        let mut policy = ScoringPolicy::default();
        assert_eq!(policy.disconnect_points(10, 4), 10);

        policy.disconnect_award = DisconnectAward::Flat { points: 3 };
        assert_eq!(policy.disconnect_points(10, 4), 3);

        policy.disconnect_award = DisconnectAward::ActualScore;
        assert_eq!(policy.disconnect_points(10, 4), 4);
    }

    #[test]
    fn question_limit_is_clamped() {
        let config = AppConfig::default();
        assert_eq!(config.effective_question_limit(None), 10);
        assert_eq!(config.effective_question_limit(Some(0)), 10);
        assert_eq!(config.effective_question_limit(Some(5)), 5);
        assert_eq!(config.effective_question_limit(Some(500)), 50);
    }
}
