//! Re-entry risk limits
//!
//! Implements:
//! - Maximum cycles per position
//! - Maximum re-entries per UTC day, across all positions
//! - Daily re-entry statistics

use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::config::PositionOptimizationConfig;

/// Why a new re-entry was not scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDenial {
    MaxCycles { cycle: u32, max: u32 },
    DailyLimit { count: u32, max: u32 },
}

impl BudgetDenial {
    /// Outcome reason recorded on the skipped cycle
    pub fn reason(&self) -> &'static str {
        match self {
            BudgetDenial::MaxCycles { .. } => "max_cycles",
            BudgetDenial::DailyLimit { .. } => "daily_limit",
        }
    }
}

impl fmt::Display for BudgetDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetDenial::MaxCycles { cycle, max } => {
                write!(f, "cycle {} exceeds max cycles per position ({})", cycle, max)
            }
            BudgetDenial::DailyLimit { count, max } => {
                write!(f, "daily re-entry limit reached: {} (max {})", count, max)
            }
        }
    }
}

/// Daily re-entry statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyReentryStats {
    pub date: String,
    pub scheduled: u32,
    pub completed: u32,
    pub skipped: u32,
}

/// Shared across positions; keyed by UTC date
pub struct ReentryBudget {
    daily_stats: RwLock<HashMap<String, DailyReentryStats>>,
}

impl ReentryBudget {
    pub fn new() -> Self {
        Self {
            daily_stats: RwLock::new(HashMap::new()),
        }
    }

    /// Whether cycle `cycle_number` may schedule a re-entry
    pub fn check(
        &self,
        cycle_number: u32,
        config: &PositionOptimizationConfig,
        now: DateTime<Utc>,
    ) -> Result<(), BudgetDenial> {
        if cycle_number > config.max_cycles_per_position {
            return Err(BudgetDenial::MaxCycles {
                cycle: cycle_number,
                max: config.max_cycles_per_position,
            });
        }

        let today = self.today(now);
        if today.scheduled >= config.max_daily_reentries {
            return Err(BudgetDenial::DailyLimit {
                count: today.scheduled,
                max: config.max_daily_reentries,
            });
        }
        Ok(())
    }

    pub fn record_scheduled(&self, now: DateTime<Utc>) {
        self.update(now, |s| s.scheduled += 1);
    }

    pub fn record_completed(&self, now: DateTime<Utc>) {
        self.update(now, |s| s.completed += 1);
    }

    pub fn record_skipped(&self, now: DateTime<Utc>) {
        self.update(now, |s| s.skipped += 1);
    }

    /// Stats for the UTC day containing `now`
    pub fn today(&self, now: DateTime<Utc>) -> DailyReentryStats {
        let key = Self::get_date_key(now);
        self.daily_stats
            .read()
            .ok()
            .and_then(|stats| stats.get(&key).cloned())
            .unwrap_or(DailyReentryStats {
                date: key,
                ..Default::default()
            })
    }

    fn update(&self, now: DateTime<Utc>, f: impl FnOnce(&mut DailyReentryStats)) {
        if let Ok(mut stats_map) = self.daily_stats.write() {
            let today = Self::get_date_key(now);
            let stats = stats_map
                .entry(today.clone())
                .or_insert_with(|| DailyReentryStats {
                    date: today,
                    ..Default::default()
                });
            f(stats);
        }
    }

    /// Get date key for stats grouping
    fn get_date_key(dt: DateTime<Utc>) -> String {
        format!("{}-{:02}-{:02}", dt.year(), dt.month(), dt.day())
    }
}

impl Default for ReentryBudget {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config(max_cycles: u32, max_daily: u32) -> PositionOptimizationConfig {
        PositionOptimizationConfig {
            max_cycles_per_position: max_cycles,
            max_daily_reentries: max_daily,
            ..Default::default()
        }
    }

    #[test]
    fn test_max_cycles_is_inclusive() {
        let budget = ReentryBudget::new();
        let now = Utc::now();
        let cfg = config(2, 50);
        assert!(budget.check(1, &cfg, now).is_ok());
        assert!(budget.check(2, &cfg, now).is_ok());
        let denial = budget.check(3, &cfg, now).unwrap_err();
        assert_eq!(denial.reason(), "max_cycles");
    }

    #[test]
    fn test_daily_limit_resets_next_day() {
        let budget = ReentryBudget::new();
        let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        let cfg = config(10, 2);

        budget.record_scheduled(day1);
        budget.record_scheduled(day1);
        let denial = budget.check(1, &cfg, day1).unwrap_err();
        assert_eq!(denial, BudgetDenial::DailyLimit { count: 2, max: 2 });

        let day2 = day1 + Duration::hours(2);
        assert!(budget.check(1, &cfg, day2).is_ok());
        assert_eq!(budget.today(day2).date, "2024-03-02");
    }

    #[test]
    fn test_stats_accumulate() {
        let budget = ReentryBudget::new();
        let now = Utc::now();
        budget.record_scheduled(now);
        budget.record_completed(now);
        budget.record_skipped(now);
        let stats = budget.today(now);
        assert_eq!((stats.scheduled, stats.completed, stats.skipped), (1, 1, 1));
    }
}
