//! Window planning.
//!
//! Each run processes one half-open window. The next window starts at the
//! committed progress minus the configured overlap (re-reading the tail of
//! the previous window to pick up late-ingested samples), is clamped to an
//! optional floor, and is only handed out once its end is no longer in the
//! future.

use crate::error::{Error, Result};
use crate::model::Window;
use chrono::DateTime;
use std::str::FromStr;

/// Whether the overlap is subtracted from a freshly seeded progress mark.
pub const DEFAULT_OVERLAP_ON_FIRST_RUN: bool = true;

/// Size and overlap of the windows handed out by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub window_seconds: i64,
    pub overlap_seconds: i64,
    pub overlap_on_first_run: bool,
}

impl WindowPolicy {
    pub fn new(window_seconds: i64, overlap_seconds: i64) -> Result<Self> {
        let policy = Self {
            window_seconds,
            overlap_seconds,
            overlap_on_first_run: DEFAULT_OVERLAP_ON_FIRST_RUN,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_overlap_on_first_run(mut self, enabled: bool) -> Self {
        self.overlap_on_first_run = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_seconds <= 0 {
            return Err(Error::Config(format!(
                "window size must be positive, got {}s",
                self.window_seconds
            )));
        }
        if self.overlap_seconds < 0 || self.overlap_seconds >= self.window_seconds {
            return Err(Error::Config(format!(
                "overlap must satisfy 0 <= overlap < window ({}s), got {}s",
                self.window_seconds, self.overlap_seconds
            )));
        }
        Ok(())
    }
}

/// Lower bound for window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinStart {
    /// Fixed unix timestamp.
    Absolute(i64),
    /// That many seconds before the current time.
    Relative(i64),
}

impl MinStart {
    pub fn resolve(&self, now: i64) -> i64 {
        match self {
            MinStart::Absolute(ts) => *ts,
            MinStart::Relative(secs) => now - secs,
        }
    }
}

impl FromStr for MinStart {
    type Err = Error;

    /// Accepts unix seconds (`1700000000`), RFC 3339 (`2024-01-01T00:00:00Z`)
    /// or a relative duration with a unit suffix (`90s`, `30m`, `12h`, `7d`, `2w`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(ts) = s.parse::<i64>() {
            return Ok(MinStart::Absolute(ts));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(MinStart::Absolute(dt.timestamp()));
        }
        parse_duration_seconds(s)
            .map(MinStart::Relative)
            .ok_or_else(|| Error::Config(format!("invalid min_start value: {:?}", s)))
    }
}

fn parse_duration_seconds(s: &str) -> Option<i64> {
    let unit = s.chars().last()?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return None,
    };
    let amount: i64 = s[..s.len() - 1].parse().ok()?;
    if amount < 0 {
        return None;
    }
    amount.checked_mul(multiplier)
}

/// Result of planning one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Process this window.
    Run(Window),
    /// The next window still extends into the future; try again later.
    NothingToDo { pending: Window },
}

#[derive(Debug, Clone)]
pub struct WindowPlanner {
    policy: WindowPolicy,
    min_start: Option<MinStart>,
}

impl WindowPlanner {
    pub fn new(policy: WindowPolicy, min_start: Option<MinStart>) -> Self {
        Self { policy, min_start }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Computes the next window.
    ///
    /// `first_run` marks a progress value that was seeded by an operator
    /// rather than committed by a previous run.
    pub fn plan(&self, progress: Option<i64>, first_run: bool, now: i64) -> Result<Plan> {
        let min_start = self.min_start.map(|m| m.resolve(now));

        let candidate = match (progress, min_start) {
            (Some(progress), _) => {
                let apply_overlap = !first_run || self.policy.overlap_on_first_run;
                if apply_overlap {
                    progress - self.policy.overlap_seconds
                } else {
                    progress
                }
            }
            (None, Some(floor)) => floor,
            (None, None) => {
                return Err(Error::Setup(
                    "timestamp_progress is not set and no min_start is configured; \
                     seed the job state before the first run"
                        .to_string(),
                ))
            }
        };

        let start = match min_start {
            Some(floor) => candidate.max(floor),
            None => candidate,
        };
        let window = Window {
            start,
            end: start + self.policy.window_seconds,
        };

        if window.end > now {
            return Ok(Plan::NothingToDo { pending: window });
        }
        Ok(Plan::Run(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(window: i64, overlap: i64, min_start: Option<MinStart>) -> WindowPlanner {
        WindowPlanner::new(WindowPolicy::new(window, overlap).unwrap(), min_start)
    }

    #[test]
    fn test_fresh_start_subtracts_overlap() {
        let plan = planner(300, 30, None)
            .plan(Some(1700000000), true, 1700000400)
            .unwrap();
        assert_eq!(
            plan,
            Plan::Run(Window {
                start: 1699999970,
                end: 1700000270
            })
        );
    }

    #[test]
    fn test_fresh_start_without_first_run_overlap() {
        let policy = WindowPolicy::new(300, 30)
            .unwrap()
            .with_overlap_on_first_run(false);
        let plan = WindowPlanner::new(policy, None)
            .plan(Some(1700000000), true, 1700000400)
            .unwrap();
        assert_eq!(
            plan,
            Plan::Run(Window {
                start: 1700000000,
                end: 1700000300
            })
        );
    }

    #[test]
    fn test_steady_state_always_subtracts_overlap() {
        let policy = WindowPolicy::new(300, 30)
            .unwrap()
            .with_overlap_on_first_run(false);
        let plan = WindowPlanner::new(policy, None)
            .plan(Some(1700000270), false, 1700001000)
            .unwrap();
        assert_eq!(
            plan,
            Plan::Run(Window {
                start: 1700000240,
                end: 1700000540
            })
        );
    }

    #[test]
    fn test_window_size_and_start_property() {
        let p = planner(600, 45, Some(MinStart::Absolute(1_000_000)));
        for progress in (1_000_000..1_010_000).step_by(777) {
            let expected_start = (progress - 45).max(1_000_000);
            let now = expected_start + 600 + (progress % 13);
            match p.plan(Some(progress), false, now).unwrap() {
                Plan::Run(w) => {
                    assert_eq!(w.len_seconds(), 600);
                    assert_eq!(w.start, expected_start);
                }
                other => panic!("unexpected plan {:?}", other),
            }
        }
    }

    #[test]
    fn test_future_window_is_nothing_to_do() {
        let plan = planner(300, 0, None)
            .plan(Some(1700000000), false, 1700000299)
            .unwrap();
        assert!(matches!(plan, Plan::NothingToDo { .. }));

        // An end exactly at `now` is complete.
        let plan = planner(300, 0, None)
            .plan(Some(1700000000), false, 1700000300)
            .unwrap();
        assert!(matches!(plan, Plan::Run(_)));
    }

    #[test]
    fn test_min_start_clamps_reset_progress() {
        let plan = planner(300, 30, Some(MinStart::Absolute(1700000000)))
            .plan(Some(0), false, 1700001000)
            .unwrap();
        assert_eq!(
            plan,
            Plan::Run(Window {
                start: 1700000000,
                end: 1700000300
            })
        );
    }

    #[test]
    fn test_missing_progress_uses_min_start() {
        let plan = planner(300, 30, Some(MinStart::Relative(3600)))
            .plan(None, true, 1700003600)
            .unwrap();
        assert_eq!(
            plan,
            Plan::Run(Window {
                start: 1700000000,
                end: 1700000300
            })
        );
    }

    #[test]
    fn test_missing_progress_without_floor_is_setup_error() {
        let err = planner(300, 30, None).plan(None, true, 1700000000).unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
    }

    #[test]
    fn test_policy_validation() {
        assert!(WindowPolicy::new(0, 0).is_err());
        assert!(WindowPolicy::new(300, 300).is_err());
        assert!(WindowPolicy::new(300, -1).is_err());
        assert!(WindowPolicy::new(300, 299).is_ok());
    }

    #[test]
    fn test_min_start_parsing() {
        assert_eq!("1700000000".parse::<MinStart>().unwrap(), MinStart::Absolute(1700000000));
        assert_eq!(
            "2023-11-14T22:13:20Z".parse::<MinStart>().unwrap(),
            MinStart::Absolute(1700000000)
        );
        assert_eq!("7d".parse::<MinStart>().unwrap(), MinStart::Relative(604800));
        assert_eq!("90s".parse::<MinStart>().unwrap(), MinStart::Relative(90));
        assert_eq!("12h".parse::<MinStart>().unwrap(), MinStart::Relative(43200));
        assert!("yesterday".parse::<MinStart>().is_err());
        assert!("-5m".parse::<MinStart>().is_err());
    }
}
