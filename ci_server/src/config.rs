//! Auto-fix server configuration: loaded from environment variables.

use std::time::Duration;

/// Names of the worker queues.
pub const DISPATCH_QUEUE: &str = "dispatch";
pub const BUILDS_QUEUE: &str = "builds";
pub const FIXES_QUEUE: &str = "fixes";

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// GitHub token for Actions dispatch and fix pull requests.
    pub github_token: String,
    /// GitHub REST API base URL.
    pub github_api_url: String,
    /// CI platform API tokens.
    pub codemagic_token: String,
    pub circleci_token: String,
    pub bitrise_token: String,
    /// Follow-up builds allowed per failure chain unless a repository overrides it.
    pub auto_fix_max_attempts: u32,
    pub poll: PollConfig,
    pub workers: WorkerPoolConfig,
}

/// Shortest poll interval and back-off ceiling accepted from the environment.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bounds on the platform status polling loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PollConfig {
    /// Delay between status polls.
    pub interval: Duration,
    /// Polls before the build is marked `timeout`.
    pub max_polls: u32,
    /// Ceiling for the back-off applied after transient poll errors.
    pub backoff_max: Duration,
    /// Longest a single trigger, status or log call may take.
    pub call_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_polls: 120,
            backoff_max: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// One named queue and how many of its jobs may run at once.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueConfig {
    pub name: &'static str,
    pub concurrency: usize,
}

/// Worker pool layout, passed explicitly to `WorkerPool::spawn`.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerPoolConfig {
    pub dispatch: QueueConfig,
    pub builds: QueueConfig,
    pub fixes: QueueConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            dispatch: QueueConfig { name: DISPATCH_QUEUE, concurrency: 4 },
            builds: QueueConfig { name: BUILDS_QUEUE, concurrency: 8 },
            fixes: QueueConfig { name: FIXES_QUEUE, concurrency: 2 },
        }
    }
}

impl CiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let github_webhook_secret = lookup("CI_WEBHOOK_SECRET").unwrap_or_default();
        let github_token = lookup("CI_GITHUB_TOKEN").unwrap_or_default();
        let github_api_url = lookup("CI_GITHUB_API_URL")
            .unwrap_or_else(|| "https://api.github.com".to_string());
        let codemagic_token = lookup("CI_CODEMAGIC_TOKEN").unwrap_or_default();
        let circleci_token = lookup("CI_CIRCLECI_TOKEN").unwrap_or_default();
        let bitrise_token = lookup("CI_BITRISE_TOKEN").unwrap_or_default();
        let auto_fix_max_attempts = parsed("CI_AUTO_FIX_MAX_ATTEMPTS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(3);

        let defaults = PollConfig::default();
        let seconds = |key: &str, default: Duration| {
            parsed(key)
                .map(Duration::from_secs)
                .unwrap_or(default)
                .max(MIN_POLL_INTERVAL)
        };
        let poll = PollConfig {
            interval: seconds("CI_POLL_INTERVAL_SECS", defaults.interval),
            max_polls: parsed("CI_MAX_POLLS")
                .and_then(|n| u32::try_from(n.max(1)).ok())
                .unwrap_or(defaults.max_polls),
            backoff_max: seconds("CI_POLL_BACKOFF_MAX_SECS", defaults.backoff_max),
            call_timeout: seconds("CI_PLATFORM_CALL_TIMEOUT_SECS", defaults.call_timeout),
        };

        let mut workers = WorkerPoolConfig::default();
        if let Some(n) = parsed("CI_DISPATCH_CONCURRENCY") {
            workers.dispatch.concurrency = (n as usize).max(1);
        }
        if let Some(n) = parsed("CI_BUILD_CONCURRENCY") {
            workers.builds.concurrency = (n as usize).max(1);
        }
        if let Some(n) = parsed("CI_FIX_CONCURRENCY") {
            workers.fixes.concurrency = (n as usize).max(1);
        }

        if github_webhook_secret.is_empty() {
            tracing::warn!(
                "CI_WEBHOOK_SECRET not set -- webhook signature validation disabled (never run like this in production)"
            );
        }
        if github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- Actions dispatch and fix pull requests will fail");
        }

        Self {
            github_webhook_secret,
            github_token,
            github_api_url,
            codemagic_token,
            circleci_token,
            bitrise_token,
            auto_fix_max_attempts,
            poll,
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> CiConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CiConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.auto_fix_max_attempts, 3);
        assert_eq!(config.poll, PollConfig::default());
        assert_eq!(config.workers, WorkerPoolConfig::default());
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert!(config.github_webhook_secret.is_empty());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("CI_WEBHOOK_SECRET", "s3cret"),
            ("CI_AUTO_FIX_MAX_ATTEMPTS", "5"),
            ("CI_POLL_INTERVAL_SECS", "2"),
            ("CI_MAX_POLLS", "30"),
            ("CI_BUILD_CONCURRENCY", "0"),
        ]);
        assert_eq!(config.github_webhook_secret, "s3cret");
        assert_eq!(config.auto_fix_max_attempts, 5);
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.max_polls, 30);
        assert_eq!(config.workers.builds.concurrency, 1);
        assert_eq!(config.workers.builds.name, BUILDS_QUEUE);
    }

    #[test]
    fn garbage_values_fall_back() {
        let config = config_from(&[("CI_MAX_POLLS", "lots"), ("CI_AUTO_FIX_MAX_ATTEMPTS", "-1")]);
        assert_eq!(config.poll.max_polls, 120);
        assert_eq!(config.auto_fix_max_attempts, 3);
    }

    #[test]
    fn out_of_range_counts_fall_back_instead_of_wrapping() {
        let config = config_from(&[
            ("CI_AUTO_FIX_MAX_ATTEMPTS", "4294967296"),
            ("CI_MAX_POLLS", "4294967297"),
        ]);
        assert_eq!(config.auto_fix_max_attempts, 3);
        assert_eq!(config.poll.max_polls, 120);

        let config = config_from(&[("CI_AUTO_FIX_MAX_ATTEMPTS", "4294967295")]);
        assert_eq!(config.auto_fix_max_attempts, u32::MAX);
    }

    #[test]
    fn zero_durations_are_raised_to_the_floor() {
        let config = config_from(&[
            ("CI_POLL_INTERVAL_SECS", "0"),
            ("CI_POLL_BACKOFF_MAX_SECS", "0"),
            ("CI_PLATFORM_CALL_TIMEOUT_SECS", "0"),
        ]);
        assert_eq!(config.poll.interval, MIN_POLL_INTERVAL);
        assert_eq!(config.poll.backoff_max, MIN_POLL_INTERVAL);
        assert_eq!(config.poll.call_timeout, MIN_POLL_INTERVAL);

        let config = config_from(&[("CI_PLATFORM_CALL_TIMEOUT_SECS", "12")]);
        assert_eq!(config.poll.call_timeout, Duration::from_secs(12));
    }
}
