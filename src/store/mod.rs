use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::aggregate::StatusCounts;
use crate::error::Error;
use crate::models::{Lesson, LessonStatus, PricingEntry, Student, User, UserRole, UserStatus};

#[cfg(test)]
pub mod memory;

/// A span of time matched against `scheduled_date` or `payment_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub end_inclusive: bool,
}

impl DateWindow {
    /// `[start, end)`
    pub fn half_open(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            end_inclusive: false,
        }
    }

    /// `[start, end]`
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            end_inclusive: true,
        }
    }

    /// The calendar month `year-month`, up to the first day of the next month.
    pub fn month(year: i32, month: u32) -> Result<Self, Error> {
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        Ok(Self::half_open(
            first_of_month(year, month)?,
            first_of_month(next_year, next_month)?,
        ))
    }

    /// The calendar year, from January 1st up to January 1st of the next year.
    pub fn year(year: i32) -> Result<Self, Error> {
        Ok(Self::half_open(
            first_of_month(year, 1)?,
            first_of_month(year + 1, 1)?,
        ))
    }

    #[cfg(test)]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if at < self.start {
            return false;
        }
        if self.end_inclusive {
            at <= self.end
        } else {
            at < self.end
        }
    }
}

fn first_of_month(year: i32, month: u32) -> Result<DateTime<Utc>, Error> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::InvalidInput(format!("invalid month {year}-{month:02}")))
}

/// Filter for lesson reads. Unset fields do not restrict the result.
#[derive(Debug, Clone, Default)]
pub struct LessonQuery {
    pub teacher_id: Option<Uuid>,
    pub statuses: Option<Vec<LessonStatus>>,
    pub scheduled: Option<DateWindow>,
}

impl LessonQuery {
    pub fn for_teacher(teacher_id: Uuid) -> Self {
        Self {
            teacher_id: Some(teacher_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[LessonStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn scheduled_within(mut self, window: Option<DateWindow>) -> Self {
        self.scheduled = window;
        self
    }

    #[cfg(test)]
    pub fn matches(&self, lesson: &Lesson) -> bool {
        if let Some(teacher_id) = self.teacher_id {
            if lesson.teacher_id != teacher_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&lesson.status) {
                return false;
            }
        }
        match &self.scheduled {
            Some(window) => window.contains(lesson.scheduled_date),
            None => true,
        }
    }
}

/// Number and summed amount of matching payments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentSums {
    pub count: usize,
    pub total: Decimal,
}

/// Read access to the institute's records.
///
/// Reports are rebuilt from these reads on every call; implementations must
/// not cache between calls. Lessons are returned in ascending
/// `scheduled_date` order.
#[async_trait]
pub trait InstituteStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, Error>;

    async fn users(&self, role: UserRole, status: Option<UserStatus>) -> Result<Vec<User>, Error>;

    async fn count_users(&self, role: UserRole, status: Option<UserStatus>) -> Result<usize, Error>;

    async fn students(&self, active_only: bool) -> Result<Vec<Student>, Error>;

    async fn count_students(&self, active_only: bool) -> Result<usize, Error>;

    async fn lessons(&self, query: &LessonQuery) -> Result<Vec<Lesson>, Error>;

    /// Lesson counts by status, scheduled within `window` when given.
    async fn lesson_status_counts(&self, window: Option<&DateWindow>) -> Result<StatusCounts, Error>;

    /// Payments dated within `window` when given.
    async fn payment_sums(&self, window: Option<&DateWindow>) -> Result<PaymentSums, Error>;

    /// Payments whose `student_name` contains `name`, ignoring case.
    async fn payment_sums_for_student_name(&self, name: &str) -> Result<PaymentSums, Error>;

    async fn active_pricing(&self) -> Result<Vec<PricingEntry>, Error>;

    async fn count_active_pricing(&self) -> Result<usize, Error>;

    /// Active entry whose subject equals `subject` after trimming, ignoring case.
    async fn find_active_pricing(&self, subject: &str) -> Result<Option<PricingEntry>, Error>;

    /// Whether any entry, active or not, already uses this subject name.
    async fn pricing_subject_exists(&self, subject: &str) -> Result<bool, Error>;

    async fn insert_pricing(&self, entry: &PricingEntry) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn month_window_rolls_over_december() {
        let window = DateWindow::month(2024, 12).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(!window.end_inclusive);
    }

    #[test]
    fn half_open_window_excludes_end() {
        let window = DateWindow::month(2024, 3).unwrap();
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap()));
    }

    #[test]
    fn closed_window_includes_both_ends() {
        let end = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let window = DateWindow::closed(end - Duration::days(7), end);
        assert!(window.contains(end));
        assert!(window.contains(end - Duration::days(7)));
        assert!(!window.contains(end + Duration::seconds(1)));
    }

    #[test]
    fn rejects_invalid_month() {
        assert!(matches!(DateWindow::month(2024, 13), Err(Error::InvalidInput(_))));
    }
}
