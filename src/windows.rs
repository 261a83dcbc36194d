use chrono::{Days, NaiveDate};
use std::fmt;

/// An inclusive day range submitted to the upstream API as one query.
/// The planner only ever produces single-day windows so that a failed
/// window maps exactly onto one table partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl TimeWindow {
    pub fn day(date: NaiveDate) -> Self {
        TimeWindow {
            since: date,
            until: date,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.since, self.until)
    }
}

/// Lazily yields one [`TimeWindow`] per calendar day over `[start, end]`,
/// oldest first. Empty when `start > end`.
pub struct WindowPlanner {
    next: NaiveDate,
    end: NaiveDate,
    done: bool,
}

pub fn plan_windows(start: NaiveDate, end: NaiveDate) -> WindowPlanner {
    WindowPlanner {
        next: start,
        end,
        done: start > end,
    }
}

impl Iterator for WindowPlanner {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.done {
            return None;
        }

        let window = TimeWindow::day(self.next);

        match self.next.checked_add_days(Days::new(1)) {
            Some(day) if day <= self.end => self.next = day,
            _ => self.done = true,
        }

        Some(window)
    }
}
