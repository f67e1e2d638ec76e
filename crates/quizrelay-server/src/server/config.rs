use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use quizrelay::{FamilyConfig, RelayConfig};

/// Runtime configuration for the `quizrelay-server` binary.
///
/// Every value can be given as a CLI flag or through the environment (a
/// `.env` file in the working directory is loaded first). Defaults match the
/// library's [`RelayConfig::default`].
#[derive(Parser, Debug, Clone)]
#[command(
    name = "quizrelay-server",
    version,
    about = "Request/response correlation for question and explanation workers"
)]
pub struct CliArgs {
    /// Number of question workers, i.e. `QuestionRequest{i}` channels.
    ///
    /// Environment variable: `QUESTION_WORKERS`
    #[arg(long, env = "QUESTION_WORKERS", default_value_t = quizrelay::DEFAULT_QUESTION_WORKERS)]
    pub question_workers: usize,

    /// Number of explanation workers, i.e. `ExplanationRequest{i}` channels.
    ///
    /// Environment variable: `EXPLANATION_WORKERS`
    #[arg(long, env = "EXPLANATION_WORKERS", default_value_t = quizrelay::DEFAULT_EXPLANATION_WORKERS)]
    pub explanation_workers: usize,

    /// Seconds a client is barred from issuing another question request.
    ///
    /// Environment variable: `QUESTION_LOCK_TTL_SECS`
    #[arg(long, env = "QUESTION_LOCK_TTL_SECS", default_value_t = 60)]
    pub question_lock_ttl_secs: u64,

    /// Seconds a client is barred from issuing another explanation request.
    ///
    /// Environment variable: `EXPLANATION_LOCK_TTL_SECS`
    #[arg(long, env = "EXPLANATION_LOCK_TTL_SECS", default_value_t = 45)]
    pub explanation_lock_ttl_secs: u64,

    /// Seconds a question channel assignment is remembered.
    ///
    /// Environment variable: `QUESTION_CHANNEL_TTL_SECS`
    #[arg(long, env = "QUESTION_CHANNEL_TTL_SECS", default_value_t = 60)]
    pub question_channel_ttl_secs: u64,

    /// Seconds an explanation channel assignment is remembered.
    ///
    /// Environment variable: `EXPLANATION_CHANNEL_TTL_SECS`
    #[arg(long, env = "EXPLANATION_CHANNEL_TTL_SECS", default_value_t = 70)]
    pub explanation_channel_ttl_secs: u64,

    /// Consumer group shared by the relay and the workers.
    ///
    /// Environment variable: `GROUP_ID`
    #[arg(long, env = "GROUP_ID", default_value_t = String::from(quizrelay::DEFAULT_GROUP_ID))]
    pub group_id: String,

    /// Milliseconds to wait for a publish acknowledgement.
    ///
    /// Environment variable: `PUBLISH_TIMEOUT_MS`
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value_t = 5_000)]
    pub publish_timeout_ms: u64,

    /// Milliseconds to wait for a commit-position query.
    ///
    /// Environment variable: `ADMIN_TIMEOUT_MS`
    #[arg(long, env = "ADMIN_TIMEOUT_MS", default_value_t = 3_000)]
    pub admin_timeout_ms: u64,

    /// Release a client's request lock as soon as its response is delivered.
    ///
    /// Environment variable: `RELEASE_ON_DELIVERY`
    #[arg(long, env = "RELEASE_ON_DELIVERY", default_value_t = false)]
    pub release_on_delivery: bool,

    /// Seconds of inactivity after which a session is destroyed.
    ///
    /// Environment variable: `SESSION_IDLE_TTL_SECS`
    #[arg(long, env = "SESSION_IDLE_TTL_SECS", default_value_t = 30 * 60)]
    pub session_idle_ttl_secs: u64,

    /// Seconds between idle-session sweeps.
    ///
    /// Environment variable: `SWEEP_INTERVAL_SECS`
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Seconds to wait for background tasks on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,

    /// Run in-process stand-in workers that answer every request.
    #[arg(short, long, env = "LOOPBACK", default_value_t = false)]
    pub loopback: bool,

    /// Simulated generation latency of the loopback workers, in milliseconds.
    ///
    /// Environment variable: `LOOPBACK_LATENCY_MS`
    #[arg(long, env = "LOOPBACK_LATENCY_MS", default_value_t = 500)]
    pub loopback_latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub relay: RelayConfig,
    /// Latency of the loopback workers, when enabled.
    pub loopback: Option<Duration>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.question_workers == 0 {
            bail!("QUESTION_WORKERS must be greater than 0");
        }

        if args.explanation_workers == 0 {
            bail!("EXPLANATION_WORKERS must be greater than 0");
        }

        let relay = RelayConfig {
            question: FamilyConfig {
                pool_size: args.question_workers,
                lock_ttl: Duration::from_secs(args.question_lock_ttl_secs),
                channel_ttl: Duration::from_secs(args.question_channel_ttl_secs),
            },
            explanation: FamilyConfig {
                pool_size: args.explanation_workers,
                lock_ttl: Duration::from_secs(args.explanation_lock_ttl_secs),
                channel_ttl: Duration::from_secs(args.explanation_channel_ttl_secs),
            },
            group_id: args.group_id,
            publish_timeout: Duration::from_millis(args.publish_timeout_ms),
            admin_timeout: Duration::from_millis(args.admin_timeout_ms),
            release_on_delivery: args.release_on_delivery,
            session_idle_ttl: Duration::from_secs(args.session_idle_ttl_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        };
        relay.validate()?;

        Ok(Self {
            relay,
            loopback: args
                .loopback
                .then(|| Duration::from_millis(args.loopback_latency_ms)),
        })
    }
}
