use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{round_money, total_hours, StatusCounts, TypeCounts};
use crate::earnings::validate_period;
use crate::error::Error;
use crate::models::{UserRole, UserStatus};
use crate::store::{DateWindow, InstituteStore, LessonQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodFilter {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCounts {
    pub total_teachers: usize,
    pub total_admins: usize,
    pub total_users: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentCounts {
    pub total_students: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LessonCounts {
    pub total_lessons: usize,
    pub pending_lessons: usize,
    pub completed_lessons: usize,
    pub cancelled_lessons: usize,
}

impl From<StatusCounts> for LessonCounts {
    fn from(counts: StatusCounts) -> Self {
        Self {
            total_lessons: counts.total(),
            pending_lessons: counts.pending,
            completed_lessons: counts.completed,
            cancelled_lessons: counts.cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentTotals {
    pub total_payments: usize,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingCounts {
    pub active_subjects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub users: UserCounts,
    pub students: StudentCounts,
    pub lessons: LessonCounts,
    pub payments: PaymentTotals,
    pub pricing: PricingCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<PeriodFilter>,
}

/// Dashboard period: applied only when both `month` and `year` are given.
pub fn dashboard_period(month: Option<u32>, year: Option<i32>) -> Result<Option<PeriodFilter>, Error> {
    validate_period(month, year)?;
    match (month, year) {
        (Some(month), Some(year)) => Ok(Some(PeriodFilter { month, year })),
        (None, None) => Ok(None),
        _ => {
            debug!(?month, ?year, "incomplete period, dashboard is not date-filtered");
            Ok(None)
        }
    }
}

fn period_window(period: Option<PeriodFilter>) -> Result<Option<DateWindow>, Error> {
    period
        .map(|p| DateWindow::month(p.year, p.month))
        .transpose()
}

/// Institute-wide counts.
///
/// User, student and pricing counts are always global. Lesson and payment
/// figures follow the period when one applies.
pub async fn build_dashboard<S: InstituteStore + ?Sized>(
    store: &S,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<DashboardStats, Error> {
    let period = dashboard_period(month, year)?;
    let window = period_window(period)?;

    let teachers = store
        .count_users(UserRole::Teacher, Some(UserStatus::Active))
        .await?;
    let admins = store
        .count_users(UserRole::Admin, Some(UserStatus::Active))
        .await?;
    let students = store.count_students(true).await?;
    let active_subjects = store.count_active_pricing().await?;

    let lessons = store.lesson_status_counts(window.as_ref()).await?;
    let payments = store.payment_sums(window.as_ref()).await?;

    info!(
        lessons = lessons.total(),
        payments = payments.count,
        filtered = period.is_some(),
        "built dashboard statistics"
    );

    Ok(DashboardStats {
        users: UserCounts {
            total_teachers: teachers,
            total_admins: admins,
            total_users: teachers + admins,
        },
        students: StudentCounts {
            total_students: students,
        },
        lessons: lessons.into(),
        payments: PaymentTotals {
            total_payments: payments.count,
            total_revenue: round_money(payments.total),
        },
        pricing: PricingCounts { active_subjects },
        filter: period,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherStats {
    pub teacher_id: String,
    pub teacher_name: String,
    pub username: String,
    pub email: Option<String>,
    pub total_lessons: usize,
    pub pending_lessons: usize,
    pub completed_lessons: usize,
    pub cancelled_lessons: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherStatsView {
    pub total_teachers: usize,
    pub teachers: Vec<TeacherStats>,
}

/// Lesson counts by status for every active teacher, over all dates.
pub async fn teacher_breakdown<S: InstituteStore + ?Sized>(
    store: &S,
) -> Result<TeacherStatsView, Error> {
    let teachers = store
        .users(UserRole::Teacher, Some(UserStatus::Active))
        .await?;
    let lessons = store.lessons(&LessonQuery::default()).await?;

    let mut per_teacher: HashMap<Uuid, StatusCounts> = HashMap::new();
    for lesson in &lessons {
        per_teacher
            .entry(lesson.teacher_id)
            .or_default()
            .record(lesson.status);
    }

    let stats: Vec<TeacherStats> = teachers
        .into_iter()
        .map(|teacher| {
            let counts = per_teacher.get(&teacher.id).copied().unwrap_or_default();
            TeacherStats {
                teacher_id: teacher.id.to_string(),
                teacher_name: teacher.display_name(),
                username: teacher.username,
                email: teacher.email,
                total_lessons: counts.total(),
                pending_lessons: counts.pending,
                completed_lessons: counts.completed,
                cancelled_lessons: counts.cancelled,
            }
        })
        .collect();

    Ok(TeacherStatsView {
        total_teachers: stats.len(),
        teachers: stats,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStats {
    pub student_id: String,
    pub student_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub total_payments: usize,
    pub total_paid: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStatsView {
    pub total_students: usize,
    pub students: Vec<StudentStats>,
}

/// Payment totals per active student.
///
/// Payments are attributed by case-insensitive substring of the student's
/// full name, so "Ann" also collects payments recorded for "Anna".
pub async fn student_breakdown<S: InstituteStore + ?Sized>(
    store: &S,
) -> Result<StudentStatsView, Error> {
    let students = store.students(true).await?;
    let mut stats = Vec::with_capacity(students.len());

    for student in students {
        let payments = store
            .payment_sums_for_student_name(&student.full_name)
            .await?;
        stats.push(StudentStats {
            student_id: student.id.to_string(),
            student_name: student.full_name,
            email: student.email,
            phone: student.phone,
            total_payments: payments.count,
            total_paid: round_money(payments.total),
        });
    }

    Ok(StudentStatsView {
        total_students: stats.len(),
        students: stats,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LessonTypeBreakdown {
    pub individual_lessons: usize,
    pub group_lessons: usize,
    pub total_lessons: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LessonStatsView {
    pub by_type: LessonTypeBreakdown,
    pub by_status: LessonCounts,
    pub total_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<PeriodFilter>,
}

/// Lesson counts by type and status plus total hours, optionally for one month.
pub async fn lesson_breakdown<S: InstituteStore + ?Sized>(
    store: &S,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<LessonStatsView, Error> {
    let period = dashboard_period(month, year)?;
    let window = period_window(period)?;
    let lessons = store
        .lessons(&LessonQuery::default().scheduled_within(window))
        .await?;

    let types = TypeCounts::from_lessons(&lessons);

    Ok(LessonStatsView {
        by_type: LessonTypeBreakdown {
            individual_lessons: types.individual,
            group_lessons: types.group,
            total_lessons: types.individual + types.group,
        },
        by_status: StatusCounts::from_lessons(&lessons).into(),
        total_hours: total_hours(&lessons),
        filter: period,
    })
}
