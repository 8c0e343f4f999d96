//! Retry schedules with configurable backoff
//!
//! A [`Schedule`] is a pure decision function: given the number of the attempt
//! that just failed (1-indexed), the total time already spent waiting between
//! attempts, and the failure itself, it answers [`Decision::Continue`] with a
//! delay or [`Decision::Stop`]. Schedules hold no state between calls, so one
//! value can drive any number of concurrent retry loops.
//!
//! [`RetryConfig`] is the serializable form used in configuration files.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of consulting a schedule after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait for the given delay, then run another attempt.
    Continue(Duration),
    /// Give up and propagate the failure.
    Stop,
}

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase in delay
    Linear {
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential increase in delay
    Exponential {
        #[serde(default = "default_exponential_base")]
        base: f64,
    },
    /// Fibonacci sequence delays
    Fibonacci,
    /// Custom delay sequence
    Custom {
        #[serde(with = "duration_list")]
        delays: Vec<Duration>,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: default_exponential_base(),
        }
    }
}

/// Retry configuration with backoff strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, the first one included
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Initial delay between retries
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Add jitter to delays
    #[serde(default)]
    pub jitter: bool,

    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Maximum total time spent waiting between attempts
    #[serde(default, with = "humantime_serde")]
    pub retry_budget: Option<Duration>,

    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
            retry_budget: None,
            backoff: BackoffStrategy::default(),
        }
    }
}

type InputFilter<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry policy over failures of type `E`.
pub struct Schedule<E> {
    backoff: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Option<Duration>,
    max_retries: Option<u32>,
    max_elapsed: Option<Duration>,
    jitter_factor: Option<f64>,
    filter: Option<InputFilter<E>>,
}

impl<E> Clone for Schedule<E> {
    fn clone(&self) -> Self {
        Self {
            backoff: self.backoff.clone(),
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            max_retries: self.max_retries,
            max_elapsed: self.max_elapsed,
            jitter_factor: self.jitter_factor,
            filter: self.filter.clone(),
        }
    }
}

impl<E> fmt::Debug for Schedule<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("backoff", &self.backoff)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("max_retries", &self.max_retries)
            .field("max_elapsed", &self.max_elapsed)
            .field("jitter_factor", &self.jitter_factor)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl<E> Schedule<E> {
    fn with_backoff(backoff: BackoffStrategy, initial_delay: Duration) -> Self {
        Self {
            backoff,
            initial_delay,
            max_delay: None,
            max_retries: None,
            max_elapsed: None,
            jitter_factor: None,
            filter: None,
        }
    }

    /// Attempt `n` waits `base * factor^(n-1)`.
    pub fn exponential(base: Duration, factor: f64) -> Self {
        Self::with_backoff(BackoffStrategy::Exponential { base: factor }, base)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::with_backoff(BackoffStrategy::Fixed, delay)
    }

    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::with_backoff(BackoffStrategy::Linear { increment }, initial)
    }

    pub fn fibonacci(unit: Duration) -> Self {
        Self::with_backoff(BackoffStrategy::Fibonacci, unit)
    }

    /// Waits the given delays in order; attempts past the end wait the cap.
    pub fn custom(delays: Vec<Duration>) -> Self {
        let fallback = delays.last().copied().unwrap_or_default();
        Self::with_backoff(BackoffStrategy::Custom { delays }, Duration::ZERO)
            .with_max_delay(fallback)
    }

    /// Retries immediately, at most `times` times.
    pub fn recurs(times: u32) -> Self {
        Self::fixed(Duration::ZERO).with_max_retries(times)
    }

    /// Build from configuration. `attempts` counts the first try, so a
    /// config of 3 attempts allows 2 retries.
    pub fn from_config(config: &RetryConfig) -> Self {
        let schedule = Self::with_backoff(config.backoff.clone(), config.initial_delay)
            .with_max_delay(config.max_delay)
            .with_max_retries(config.attempts.saturating_sub(1));
        let schedule = match config.retry_budget {
            Some(budget) => schedule.with_max_elapsed(budget),
            None => schedule,
        };
        if config.jitter {
            schedule.with_jitter(config.jitter_factor)
        } else {
            schedule
        }
    }

    /// Caps each individual delay.
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = Some(cap);
        self
    }

    /// Stops after `retries` retries (`retries + 1` attempts in total).
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Stops once the cumulative delay would exceed `budget`.
    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = Some(budget);
        self
    }

    /// Randomizes each delay by up to `factor` of its length (0.0 to 1.0).
    ///
    /// Jitter is applied by the executor when it sleeps; [`Schedule::decide`]
    /// stays deterministic.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = Some(factor.clamp(0.0, 1.0));
        self
    }

    /// Only failures accepted by `predicate` are retried.
    ///
    /// Composes with an existing filter: both must accept the failure.
    pub fn while_input<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
        E: 'static,
    {
        self.filter = Some(match self.filter.take() {
            Some(existing) => Arc::new(move |error: &E| existing(error) && predicate(error)),
            None => Arc::new(predicate),
        });
        self
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_delay = match &self.backoff {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Linear { increment } => {
                self.initial_delay
                    .saturating_add(increment.saturating_mul(attempt - 1))
            }
            BackoffStrategy::Exponential { base } => {
                let multiplier = base.powi(attempt as i32 - 1);
                let secs = self.initial_delay.as_secs_f64() * multiplier;
                Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
            }
            BackoffStrategy::Fibonacci => self.initial_delay.saturating_mul(fibonacci(attempt)),
            BackoffStrategy::Custom { delays } => delays
                .get(attempt as usize - 1)
                .copied()
                .unwrap_or_else(|| self.max_delay.unwrap_or_default()),
        };

        match self.max_delay {
            Some(cap) => base_delay.min(cap),
            None => base_delay,
        }
    }

    /// Decide what happens after failed attempt `attempt`, having already
    /// waited `elapsed` in total between earlier attempts.
    pub fn decide(&self, attempt: u32, elapsed: Duration, error: &E) -> Decision {
        if let Some(filter) = &self.filter {
            if !filter(error) {
                return Decision::Stop;
            }
        }

        if let Some(max) = self.max_retries {
            if attempt > max {
                return Decision::Stop;
            }
        }

        let delay = self.delay_for(attempt);
        if let Some(budget) = self.max_elapsed {
            if elapsed.saturating_add(delay) > budget {
                return Decision::Stop;
            }
        }

        Decision::Continue(delay)
    }

    /// Apply jitter to delay
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        let Some(factor) = self.jitter_factor else {
            return delay;
        };
        if factor.is_nan() || factor == 0.0 || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * factor;
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::try_from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

/// Calculate fibonacci number
fn fibonacci(n: u32) -> u32 {
    match n {
        0 => 0,
        1 => 1,
        _ => {
            let mut a: u32 = 0;
            let mut b: u32 = 1;
            for _ in 2..=n {
                let temp = a.saturating_add(b);
                a = b;
                b = temp;
            }
            b
        }
    }
}

/// Human-readable durations for a list of delays, e.g. `["100ms", "1s"]`.
mod duration_list {
    use humantime_serde::Serde;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(delays: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(delays.iter().copied().map(Serde::from))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let delays = Vec::<Serde<Duration>>::deserialize(deserializer)?;
        Ok(delays.into_iter().map(Serde::into_inner).collect())
    }
}

// Default functions for serde
fn default_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_exponential_base() -> f64 {
    2.0
}
