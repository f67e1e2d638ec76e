//! Configuration constants and runtime settings for the relay.
//!
//! ## Key Concepts
//! - **Pool size**: number of worker-addressable request channels per family.
//!   Channels are handed out round-robin.
//! - **Lock TTL**: how long a client is barred from issuing another request of
//!   the same family. Question generation runs longer than explanation
//!   generation, so its default TTL is longer.
//! - **Channel TTL**: how long a client's channel assignment is remembered for
//!   queue estimates.
//! - **Timeouts**: every backbone round trip is bounded; no relay operation
//!   blocks indefinitely.

use core::time::Duration;
use quizrelay_core::{Error, Family, Result};

/// Default number of question workers (and `QuestionRequest{i}` channels).
pub const DEFAULT_QUESTION_WORKERS: usize = 1;

/// Default number of explanation workers (and `ExplanationRequest{i}`
/// channels).
pub const DEFAULT_EXPLANATION_WORKERS: usize = 1;

/// Default duplicate-request lock TTL for question generation.
pub const DEFAULT_QUESTION_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default duplicate-request lock TTL for explanation generation.
pub const DEFAULT_EXPLANATION_LOCK_TTL: Duration = Duration::from_secs(45);

/// Default lifetime of a stored question channel assignment.
pub const DEFAULT_QUESTION_CHANNEL_TTL: Duration = Duration::from_secs(60);

/// Default lifetime of a stored explanation channel assignment.
pub const DEFAULT_EXPLANATION_CHANNEL_TTL: Duration = Duration::from_secs(70);

/// Consumer group shared by every relay instance of a deployment.
pub const DEFAULT_GROUP_ID: &str = "quizrelay";

/// Upper bound on waiting for a publish acknowledgement.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a commit-position query against the backbone admin API.
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Sessions idle for longer than this are destroyed by the sweeper.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// How often the idle-session sweeper runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long shutdown waits for listener tasks to exit.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-family settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyConfig {
    /// Number of request channels (one per worker).
    pub pool_size: usize,
    /// Duplicate-request lock lifetime.
    pub lock_ttl: Duration,
    /// Lifetime of a client's stored channel assignment.
    pub channel_ttl: Duration,
}

/// Runtime configuration of a [`Relay`](crate::Relay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub question: FamilyConfig,
    pub explanation: FamilyConfig,
    /// Consumer group used for response listeners and queue estimates.
    pub group_id: String,
    pub publish_timeout: Duration,
    pub admin_timeout: Duration,
    /// Release the duplicate-request lock as soon as a response is delivered
    /// instead of waiting for it to expire.
    pub release_on_delivery: bool,
    pub session_idle_ttl: Duration,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            question: FamilyConfig {
                pool_size: DEFAULT_QUESTION_WORKERS,
                lock_ttl: DEFAULT_QUESTION_LOCK_TTL,
                channel_ttl: DEFAULT_QUESTION_CHANNEL_TTL,
            },
            explanation: FamilyConfig {
                pool_size: DEFAULT_EXPLANATION_WORKERS,
                lock_ttl: DEFAULT_EXPLANATION_LOCK_TTL,
                channel_ttl: DEFAULT_EXPLANATION_CHANNEL_TTL,
            },
            group_id: DEFAULT_GROUP_ID.to_string(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            admin_timeout: DEFAULT_ADMIN_TIMEOUT,
            release_on_delivery: false,
            session_idle_ttl: DEFAULT_SESSION_IDLE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl RelayConfig {
    pub const fn family(&self, family: Family) -> &FamilyConfig {
        match family {
            Family::Question => &self.question,
            Family::Explanation => &self.explanation,
        }
    }

    /// Rejects settings the relay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a pool is empty, a TTL or timeout is
    /// zero, or the group id is blank.
    pub fn validate(&self) -> Result<()> {
        for family in Family::ALL {
            let cfg = self.family(family);
            if cfg.pool_size == 0 {
                return Err(invalid(format!("{family} pool size must be at least 1")));
            }
            if cfg.lock_ttl.is_zero() {
                return Err(invalid(format!("{family} lock TTL must be non-zero")));
            }
            if cfg.channel_ttl.is_zero() {
                return Err(invalid(format!("{family} channel TTL must be non-zero")));
            }
        }

        if self.group_id.trim().is_empty() {
            return Err(invalid("group id must not be empty".to_string()));
        }

        let timeouts = [
            ("publish timeout", self.publish_timeout),
            ("admin timeout", self.admin_timeout),
            ("session idle TTL", self.session_idle_ttl),
            ("sweep interval", self.sweep_interval),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return Err(invalid(format!("{name} must be non-zero")));
        }

        Ok(())
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidConfig { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert!(config.question.lock_ttl > config.explanation.lock_ttl);
    }

    #[test]
    fn empty_pool_is_rejected() {
        let mut config = RelayConfig::default();
        config.explanation.pool_size = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfig {
                reason: "explanation pool size must be at least 1".to_string()
            }
        );
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut config = RelayConfig::default();
        config.publish_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { reason }) if reason.contains("publish timeout")
        ));
    }

    #[test]
    fn blank_group_id_is_rejected() {
        let config = RelayConfig {
            group_id: "  ".to_string(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
