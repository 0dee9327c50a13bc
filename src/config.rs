//! Group configuration.

use crate::error::{Error, Result};
use core::{str::FromStr, time::Duration};
use std::env;

/// Hardware attempts made before a guarded section falls back to the ticket lock.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Crossings that may defer the speculative wait. 1 means the wait is never deferred.
pub const DEFAULT_SPECULATION_BUDGET: u32 = 1;

/// Upper bound of the randomized delay after a conflict or capacity abort.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_micros(30);

pub const ENV_MAX_RETRIES: &str = "HTBARRIER_MAX_RETRIES";
pub const ENV_SPECULATION_BUDGET: &str = "HTBARRIER_SPECULATION_BUDGET";
pub const ENV_BACKOFF_MAX_US: &str = "HTBARRIER_BACKOFF_MAX_US";

/// Parameters of a [`BarrierGroup`](crate::BarrierGroup).
///
/// ```
/// use htbarrier::Config;
/// use std::time::Duration;
///
/// let config = Config::new(4)
///     .max_retries(8)
///     .backoff_max(Duration::from_micros(10));
/// assert_eq!(config.thread_count, 4);
/// assert_eq!(config.speculation_budget, 1);
/// ```
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Config {
    pub thread_count:       u32,
    pub max_retries:        u32,
    pub speculation_budget: u32,
    pub backoff_max:        Duration,
}

impl Config {
    #[inline]
    pub const fn new(thread_count: u32) -> Self {
        Config {
            thread_count,
            max_retries: DEFAULT_MAX_RETRIES,
            speculation_budget: DEFAULT_SPECULATION_BUDGET,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    /// A configuration for `thread_count` threads with defaults overridden by the
    /// `HTBARRIER_MAX_RETRIES`, `HTBARRIER_SPECULATION_BUDGET` and `HTBARRIER_BACKOFF_MAX_US`
    /// environment variables.
    pub fn from_env(thread_count: u32) -> Result<Self> {
        Config::from_lookup(thread_count, |var| env::var(var).ok())
    }

    pub(crate) fn from_lookup<F>(thread_count: u32, lookup: F) -> Result<Self>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Config::new(thread_count);
        if let Some(max_retries) = parse(ENV_MAX_RETRIES, &lookup)? {
            config.max_retries = max_retries;
        }
        if let Some(speculation_budget) = parse(ENV_SPECULATION_BUDGET, &lookup)? {
            config.speculation_budget = speculation_budget;
        }
        if let Some(backoff_max) = parse(ENV_BACKOFF_MAX_US, &lookup)? {
            config.backoff_max = Duration::from_micros(backoff_max);
        }
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[inline]
    pub fn speculation_budget(mut self, speculation_budget: u32) -> Self {
        self.speculation_budget = speculation_budget;
        self
    }

    #[inline]
    pub fn backoff_max(mut self, backoff_max: Duration) -> Self {
        self.backoff_max = backoff_max;
        self
    }

    /// Checks the configuration for values no group can run with.
    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            Err(Error::ZeroThreads)
        } else if self.speculation_budget == 0 {
            Err(Error::ZeroSpeculationBudget)
        } else {
            Ok(())
        }
    }
}

fn parse<T: FromStr, F: Fn(&'static str) -> Option<String>>(
    var: &'static str,
    lookup: &F,
) -> Result<Option<T>> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::InvalidEnv { var, value }),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lookup<'a>(
        vars: &'a [(&'static str, &'static str)],
    ) -> impl Fn(&'static str) -> Option<String> + 'a {
        move |var| {
            vars.iter()
                .find(|(name, _)| *name == var)
                .map(|(_, value)| (*value).to_owned())
        }
    }

    #[test]
    fn defaults() {
        let config = Config::new(8);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.speculation_budget, 1);
        assert_eq!(config.backoff_max, Duration::from_micros(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid() {
        assert_eq!(Config::new(0).validate(), Err(Error::ZeroThreads));
        assert_eq!(
            Config::new(2).speculation_budget(0).validate(),
            Err(Error::ZeroSpeculationBudget)
        );
    }

    #[test]
    fn env_overrides() {
        let vars = [
            (ENV_MAX_RETRIES, "12"),
            (ENV_SPECULATION_BUDGET, " 4 "),
            (ENV_BACKOFF_MAX_US, "0"),
        ];
        let config = Config::from_lookup(2, lookup(&vars)).unwrap();
        assert_eq!(config.max_retries, 12);
        assert_eq!(config.speculation_budget, 4);
        assert_eq!(config.backoff_max, Duration::from_micros(0));

        let config = Config::from_lookup(2, lookup(&[])).unwrap();
        assert_eq!(config, Config::new(2));
    }

    #[test]
    fn env_rejects_garbage() {
        let vars = [(ENV_MAX_RETRIES, "lots")];
        let err = Config::from_lookup(2, lookup(&vars)).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidEnv {
                var:   ENV_MAX_RETRIES,
                value: "lots".to_owned(),
            }
        );

        let vars = [(ENV_SPECULATION_BUDGET, "0")];
        assert_eq!(
            Config::from_lookup(2, lookup(&vars)),
            Err(Error::ZeroSpeculationBudget)
        );
    }
}
