use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{Lesson, LessonStatus, LessonType};

/// Round hours half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round a money amount half up to cents.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Total duration in hours, rounded once after summing the minutes.
pub fn total_hours(lessons: &[Lesson]) -> f64 {
    let minutes: i64 = lessons.iter().map(|l| i64::from(l.duration_minutes)).sum();
    round2(minutes as f64 / 60.0)
}

/// Grouping key: subject exactly as stored, plus lesson type.
pub type GroupKey = (String, LessonType);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupTotals {
    /// Unrounded hours.
    pub hours: f64,
    pub count: usize,
}

impl GroupTotals {
    pub fn rounded_hours(&self) -> f64 {
        round2(self.hours)
    }
}

/// Sum hours and count lessons per `(subject, lesson_type)`.
///
/// The caller has already narrowed `lessons` to the teacher, window and
/// statuses it wants. Subjects are compared as stored, so "Math" and "math"
/// land in different groups.
pub fn aggregate_lessons(lessons: &[Lesson]) -> HashMap<GroupKey, GroupTotals> {
    let mut groups: HashMap<GroupKey, GroupTotals> = HashMap::new();

    for lesson in lessons {
        let entry = groups
            .entry((lesson.subject.clone(), lesson.lesson_type))
            .or_default();
        entry.hours += f64::from(lesson.duration_minutes) / 60.0;
        entry.count += 1;
    }

    groups
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn from_lessons<'a>(lessons: impl IntoIterator<Item = &'a Lesson>) -> Self {
        let mut counts = Self::default();
        for lesson in lessons {
            counts.record(lesson.status);
        }
        counts
    }

    pub fn record(&mut self, status: LessonStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: LessonStatus, count: usize) {
        match status {
            LessonStatus::Pending => self.pending += count,
            LessonStatus::Completed => self.completed += count,
            LessonStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.completed + self.cancelled
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub individual: usize,
    pub group: usize,
}

impl TypeCounts {
    pub fn from_lessons<'a>(lessons: impl IntoIterator<Item = &'a Lesson>) -> Self {
        let mut counts = Self::default();
        for lesson in lessons {
            match lesson.lesson_type {
                LessonType::Individual => counts.individual += 1,
                LessonType::Group => counts.group += 1,
            }
        }
        counts
    }
}
