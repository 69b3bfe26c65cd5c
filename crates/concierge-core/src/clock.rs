//! The single source of "today".
//!
//! Every date rule (past check-in, the `${context.currentDate}` prompt
//! variable, relative dates like "tomorrow") reads the date from an
//! injected [`Clock`], never from the system clock directly.

use chrono::{Local, NaiveDate};

pub trait Clock: Send + Sync {
    /// The current calendar date at the hotel.
    fn today(&self) -> NaiveDate;

    fn tomorrow(&self) -> NaiveDate {
        let today = self.today();
        today.succ_opt().unwrap_or(today)
    }
}

/// Reads the server's local date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
