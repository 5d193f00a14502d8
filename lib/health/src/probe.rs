//! Probes the aggregator polls for state it does not own.
//!
//! Closures implement both traits, so a probe can be registered inline:
//!
//! ```
//! use adpulse_health::{ErrorRateProbe, LivenessProbe};
//!
//! let db_alive = || true;
//! assert!(db_alive.is_alive());
//!
//! let upstream = |_subsystem: &str, _window_hours: u32| 0.05;
//! assert_eq!(upstream.error_rate("meta_ads", 24), 0.05);
//! ```

/// Reports whether a component is up.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// Reports a subsystem's error rate, in `[0, 1]`, over a trailing window.
pub trait ErrorRateProbe: Send + Sync {
    fn error_rate(&self, subsystem: &str, window_hours: u32) -> f64;
}

impl<F> LivenessProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_alive(&self) -> bool {
        self()
    }
}

impl<F> ErrorRateProbe for F
where
    F: Fn(&str, u32) -> f64 + Send + Sync,
{
    fn error_rate(&self, subsystem: &str, window_hours: u32) -> f64 {
        self(subsystem, window_hours)
    }
}
