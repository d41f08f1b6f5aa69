use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{aggregate_lessons, round2, round_money};
use crate::error::Error;
use crate::models::{LessonStatus, LessonType, UserRole};
use crate::pricing::PricingCatalog;
use crate::store::{DateWindow, InstituteStore, LessonQuery};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectEarnings {
    pub subject: String,
    pub lesson_type: LessonType,
    pub total_hours: f64,
    pub price_per_hour: Decimal,
    pub total_earnings: Decimal,
    pub lesson_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherEarningsReport {
    pub teacher_id: String,
    pub teacher_name: String,
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub total_hours: f64,
    pub total_earnings: Decimal,
    pub by_subject: Vec<SubjectEarnings>,
    pub total_lessons: usize,
}

pub fn validate_period(month: Option<u32>, year: Option<i32>) -> Result<(), Error> {
    if let Some(month) = month {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
    }
    if let Some(year) = year {
        if !(2000..=2100).contains(&year) {
            return Err(Error::InvalidInput(format!(
                "year must be between 2000 and 2100, got {year}"
            )));
        }
    }
    Ok(())
}

/// Scheduling window for an earnings report.
///
/// Filtering is active only when `year` is given: the whole year, or just
/// `month` within it. A `month` without a `year` applies no filter at all.
pub fn earnings_window(month: Option<u32>, year: Option<i32>) -> Result<Option<DateWindow>, Error> {
    validate_period(month, year)?;
    match (month, year) {
        (Some(month), Some(year)) => DateWindow::month(year, month).map(Some),
        (None, Some(year)) => DateWindow::year(year).map(Some),
        (Some(month), None) => {
            debug!(month, "month given without year, earnings are not date-filtered");
            Ok(None)
        }
        (None, None) => Ok(None),
    }
}

/// Earnings of one teacher, grouped by subject and lesson type.
///
/// Cancelled lessons are excluded. Group hours are rounded after summing;
/// report totals add up the rounded group values and round once more.
pub async fn build_teacher_earnings<S, C>(
    store: &S,
    catalog: &C,
    teacher_id: &str,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<TeacherEarningsReport, Error>
where
    S: InstituteStore + ?Sized,
    C: PricingCatalog + ?Sized,
{
    let window = earnings_window(month, year)?;

    let id = Uuid::parse_str(teacher_id.trim())
        .map_err(|_| Error::NotFound(format!("invalid teacher id '{teacher_id}'")))?;
    let teacher = store
        .find_user(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("teacher {teacher_id} not found")))?;
    if teacher.role != UserRole::Teacher {
        return Err(Error::InvalidState(format!(
            "user {teacher_id} is not a teacher"
        )));
    }

    let query = LessonQuery::for_teacher(teacher.id)
        .with_statuses(&LessonStatus::BILLABLE)
        .scheduled_within(window);
    let lessons = store.lessons(&query).await?;

    let mut by_subject = Vec::new();
    for ((subject, lesson_type), totals) in aggregate_lessons(&lessons) {
        let hours = totals.rounded_hours();
        let price_per_hour = catalog.get_price(&subject, lesson_type.as_str()).await?;
        let total_earnings = catalog
            .calculate_earnings(hours, &subject, lesson_type.as_str())
            .await?;
        by_subject.push(SubjectEarnings {
            total_earnings,
            subject,
            lesson_type,
            total_hours: hours,
            price_per_hour,
            lesson_count: totals.count,
        });
    }
    by_subject.sort_by(|a, b| {
        (a.subject.as_str(), a.lesson_type.as_str()).cmp(&(b.subject.as_str(), b.lesson_type.as_str()))
    });

    let total_hours = round2(by_subject.iter().map(|s| s.total_hours).sum());
    let total_earnings = round_money(by_subject.iter().map(|s| s.total_earnings).sum());

    info!(
        teacher = %teacher.id,
        lessons = lessons.len(),
        groups = by_subject.len(),
        total_earnings = %total_earnings,
        "built teacher earnings report"
    );

    Ok(TeacherEarningsReport {
        teacher_id: teacher.id.to_string(),
        teacher_name: teacher.display_name(),
        month,
        year,
        total_hours,
        total_earnings,
        by_subject,
        total_lessons: lessons.len(),
    })
}
