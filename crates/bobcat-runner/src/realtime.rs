//! Real-time pacing.
//!
//! In real-time mode the scheduler sleeps between event pops until the wall
//! clock catches up with `start + due_simtime / factor`. Simtime semantics
//! are untouched; only dispatch pacing changes. In strict mode, falling
//! behind by more than the configured slack aborts the run.

use bobcat_core::SimTime;
use std::time::{Duration, Instant};
use tracing::warn;

/// Real-time mode settings.
#[derive(Debug, Clone)]
pub struct RealTimeConfig {
    /// Whether pacing is on at all.
    pub enabled: bool,
    /// Abort when the wall clock falls behind by more than `slack`.
    pub strict: bool,
    /// Simulated seconds per wall second.
    pub factor: f64,
    /// Tolerated lag before a strict abort / non-strict warning.
    pub slack: Duration,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        RealTimeConfig {
            enabled: false,
            strict: false,
            factor: 1.0,
            slack: Duration::from_millis(100),
        }
    }
}

/// The scheduler fell behind wall clock in strict mode.
#[derive(Debug, Clone, Copy)]
pub struct RealTimeViolation {
    /// How far behind the target the dispatch was, in seconds.
    pub behind_secs: f64,
}

/// Sleeps the event loop into wall-clock alignment.
pub struct RealTimePacer {
    config: RealTimeConfig,
    start: Instant,
    warned: bool,
}

impl RealTimePacer {
    /// Start pacing now.
    pub fn new(config: RealTimeConfig) -> Self {
        Self::with_start(config, Instant::now())
    }

    /// Start pacing from an explicit instant.
    pub fn with_start(config: RealTimeConfig, start: Instant) -> Self {
        RealTimePacer {
            config,
            start,
            warned: false,
        }
    }

    /// Block until the wall clock reaches the event's target, or report a
    /// violation when it is already past it.
    pub fn pace(&mut self, due: SimTime) -> Result<(), RealTimeViolation> {
        let target_secs = due.as_secs_f64() / self.config.factor;
        let elapsed_secs = self.start.elapsed().as_secs_f64();

        if elapsed_secs < target_secs {
            std::thread::sleep(Duration::from_secs_f64(target_secs - elapsed_secs));
            return Ok(());
        }

        let behind_secs = elapsed_secs - target_secs;
        if behind_secs > self.config.slack.as_secs_f64() {
            if self.config.strict {
                return Err(RealTimeViolation { behind_secs });
            }
            if !self.warned {
                warn!(behind_secs, "simulation slower than real time, continuing at best effort");
                self.warned = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(strict: bool) -> RealTimeConfig {
        RealTimeConfig {
            enabled: true,
            strict,
            factor: 1.0,
            slack: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_future_event_waits_and_passes() {
        let mut pacer = RealTimePacer::new(config(true));
        let before = Instant::now();
        pacer.pace(SimTime::from_secs(0.05)).unwrap();
        assert!(before.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_strict_overrun_aborts() {
        let mut pacer = RealTimePacer::new(config(true));
        std::thread::sleep(Duration::from_millis(60));
        let err = pacer.pace(SimTime::ZERO).unwrap_err();
        assert!(err.behind_secs > 0.01);
    }

    #[test]
    fn test_non_strict_overrun_continues() {
        let mut pacer = RealTimePacer::new(config(false));
        std::thread::sleep(Duration::from_millis(60));
        pacer.pace(SimTime::ZERO).unwrap();
        assert!(pacer.warned);
    }

    #[test]
    fn test_factor_scales_targets() {
        // factor 10: 0.5 simulated seconds land at 50ms wall.
        let mut fast = RealTimePacer::new(RealTimeConfig {
            enabled: true,
            strict: false,
            factor: 10.0,
            slack: Duration::from_millis(10),
        });
        let before = Instant::now();
        fast.pace(SimTime::from_secs(0.5)).unwrap();
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(40) && waited < Duration::from_millis(500));
    }
}
