use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::aggregate::week_start;

const NO_UPCOMING_HOLIDAY_DAYS: i64 = 365;

const FIXED_HOLIDAYS: [(u32, u32); 9] = [
    (1, 1),
    (3, 24),
    (4, 2),
    (5, 1),
    (5, 25),
    (6, 20),
    (7, 9),
    (12, 8),
    (12, 25),
];

const TRANSFERABLE_HOLIDAYS: [(u32, u32); 4] = [(6, 17), (8, 17), (10, 12), (11, 20)];

fn observed_on(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Tue | Weekday::Wed => week_start(date),
        Weekday::Thu | Weekday::Fri => week_start(date) + Duration::weeks(1),
        _ => date,
    }
}

/// Easter Sunday (Anonymous Gregorian algorithm).
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    holidays: BTreeSet<NaiveDate>,
    holiday_weeks: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn for_years(first_year: i32, last_year: i32) -> Self {
        let mut holidays = BTreeSet::new();
        for year in first_year..=last_year {
            for (month, day) in FIXED_HOLIDAYS {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    holidays.insert(date);
                }
            }
            for (month, day) in TRANSFERABLE_HOLIDAYS {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    holidays.insert(observed_on(date));
                }
            }
            if let Some(easter) = easter_sunday(year) {
                // carnival monday/tuesday and good friday
                holidays.insert(easter - Duration::days(48));
                holidays.insert(easter - Duration::days(47));
                holidays.insert(easter - Duration::days(2));
            }
        }
        let holiday_weeks = holidays.iter().map(|d| week_start(*d)).collect();
        Self {
            holidays,
            holiday_weeks,
        }
    }

    pub fn covering(first: NaiveDate, last: NaiveDate) -> Self {
        Self::for_years(first.year(), last.year() + 1)
    }

    pub fn is_holiday_week(&self, week: NaiveDate) -> bool {
        self.holiday_weeks.contains(&week_start(week))
    }

    pub fn days_until_next_holiday(&self, date: NaiveDate) -> i64 {
        self.holidays
            .range(date.succ_opt().unwrap_or(date)..)
            .next()
            .map_or(NO_UPCOMING_HOLIDAY_DAYS, |next| (*next - date).num_days())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarAttributes {
    pub month: u32,
    pub iso_week: u32,
    pub quarter: u32,
}

pub fn calendar_attributes(week: NaiveDate) -> CalendarAttributes {
    CalendarAttributes {
        month: week.month(),
        iso_week: week.iso_week().week(),
        quarter: (week.month() - 1) / 3 + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn easter_dates_match_known_years() {
        assert_eq!(easter_sunday(2023), Some(day(2023, 4, 9)));
        assert_eq!(easter_sunday(2024), Some(day(2024, 3, 31)));
        assert_eq!(easter_sunday(2025), Some(day(2025, 4, 20)));
    }

    #[test]
    fn holiday_week_flags_the_monday_of_the_week() {
        let calendar = HolidayCalendar::for_years(2024, 2024);
        // 2024-05-01 is a Wednesday
        assert!(calendar.is_holiday_week(day(2024, 4, 29)));
        assert!(!calendar.is_holiday_week(day(2024, 5, 6)));
        // carnival 2024: Feb 12-13
        assert!(calendar.is_holiday_week(day(2024, 2, 12)));
    }

    #[test]
    fn transferable_holidays_move_to_monday() {
        // Thursday 2023-10-12 moves forward, Wednesday 2024-11-20 moves back
        assert_eq!(observed_on(day(2023, 10, 12)), day(2023, 10, 16));
        assert_eq!(observed_on(day(2024, 11, 20)), day(2024, 11, 18));
        assert_eq!(observed_on(day(2024, 8, 17)), day(2024, 8, 17));

        let calendar = HolidayCalendar::for_years(2023, 2023);
        assert!(calendar.is_holiday_week(day(2023, 10, 16)));
        assert!(!calendar.is_holiday_week(day(2023, 10, 9)));
        assert_eq!(calendar.days_until_next_holiday(day(2023, 10, 12)), 4);
    }

    #[test]
    fn days_until_next_holiday_is_strictly_after() {
        let calendar = HolidayCalendar::for_years(2024, 2024);
        assert_eq!(calendar.days_until_next_holiday(day(2024, 4, 29)), 2);
        assert_eq!(calendar.days_until_next_holiday(day(2024, 5, 1)), 24);
    }

    #[test]
    fn falls_back_when_calendar_is_exhausted() {
        let calendar = HolidayCalendar::for_years(2024, 2024);
        assert_eq!(
            calendar.days_until_next_holiday(day(2024, 12, 30)),
            NO_UPCOMING_HOLIDAY_DAYS
        );
        let covering = HolidayCalendar::covering(day(2023, 1, 2), day(2024, 12, 30));
        assert_eq!(covering.days_until_next_holiday(day(2024, 12, 30)), 2);
    }

    #[test]
    fn attributes_use_iso_week_and_quarter() {
        let attrs = calendar_attributes(day(2024, 12, 30));
        assert_eq!(attrs.month, 12);
        assert_eq!(attrs.iso_week, 1);
        assert_eq!(attrs.quarter, 4);
    }
}
