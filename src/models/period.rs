use chrono::{Datelike, Months, NaiveDate};
use std::fmt;

/// Number of months fetched per run: the current one and the two before it.
pub const PERIODS_PER_RUN: u32 = 3;

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// One calendar month as the portal's date fields and the output file name see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub year: i32,
    pub month: u32,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl Period {
    /// The month `offset` months before the month containing `today`.
    pub fn months_back(today: NaiveDate, offset: u32) -> Self {
        let first_of_current = today.with_day(1).unwrap_or(today);
        let first_day = first_of_current
            .checked_sub_months(Months::new(offset))
            .unwrap_or(first_of_current);
        let last_day = first_day
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(first_day);

        Self {
            year: first_day.year(),
            month: first_day.month(),
            first_day,
            last_day,
        }
    }

    /// Current month first, then the preceding ones.
    pub fn recent(today: NaiveDate) -> Vec<Self> {
        (0..PERIODS_PER_RUN)
            .map(|offset| Self::months_back(today, offset))
            .collect()
    }

    /// `DDMMYY`, the format the portal's date inputs accept.
    pub fn start_date(&self) -> String {
        self.first_day.format("%d%m%y").to_string()
    }

    pub fn end_date(&self) -> String {
        self.last_day.format("%d%m%y").to_string()
    }

    /// e.g. `MAR2024`
    pub fn file_base_name(&self) -> String {
        format!("{}{}", MONTH_ABBREVIATIONS[(self.month - 1) as usize], self.year)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start_date(), self.end_date())
    }
}
