use std::fmt::Write;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use tracing::{info, warn};

use crate::aggregate::{round2, total_hours, StatusCounts};
use crate::error::Error;
use crate::mailer::{Attachment, Mailer, OutgoingMail};
use crate::models::Lesson;
use crate::store::{DateWindow, InstituteStore, LessonQuery};

pub const CSV_HEADERS: [&str; 15] = [
    "Lesson ID",
    "Title",
    "Subject",
    "Teacher",
    "Type",
    "Status",
    "Scheduled Date",
    "Duration (min)",
    "Duration (hrs)",
    "Students Count",
    "Max Students",
    "Notes",
    "Homework",
    "Created At",
    "Completed At",
];

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// The scheduled run: Saturdays at 09:00 UTC.
pub const RUN_WEEKDAY: Weekday = Weekday::Sat;
pub const RUN_HOUR: u32 = 9;

pub struct ReportSettings {
    pub app_name: String,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklySummary {
    pub total_lessons: usize,
    pub total_hours: f64,
    pub completed: usize,
    pub pending: usize,
    pub cancelled: usize,
}

impl WeeklySummary {
    pub fn from_lessons(lessons: &[Lesson]) -> Self {
        let statuses = StatusCounts::from_lessons(lessons);
        Self {
            total_lessons: lessons.len(),
            total_hours: total_hours(lessons),
            completed: statuses.completed,
            pending: statuses.pending,
            cancelled: statuses.cancelled,
        }
    }
}

/// The trailing seven days up to and including `now`.
pub fn report_window(now: DateTime<Utc>) -> DateWindow {
    DateWindow::closed(now - Duration::days(7), now)
}

pub fn report_filename(at: DateTime<Utc>) -> String {
    format!("weekly_lessons_report_{}.csv", at.format("%Y%m%d_%H%M%S"))
}

/// Hours as a plain decimal, keeping one fractional digit for whole numbers.
fn format_hours(hours: f64) -> String {
    if hours.fract() == 0.0 {
        format!("{hours:.1}")
    } else {
        hours.to_string()
    }
}

fn format_optional_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format(DATE_TIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// One CSV row per lesson under [`CSV_HEADERS`]; empty when there are no lessons.
pub fn export_lessons_csv(lessons: &[Lesson]) -> Result<String, Error> {
    if lessons.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;

    for lesson in lessons {
        let hours = round2(f64::from(lesson.duration_minutes) / 60.0);
        writer.write_record([
            lesson.id.to_string(),
            lesson.title.clone(),
            lesson.subject.clone(),
            lesson.teacher_name.clone(),
            lesson.lesson_type.as_str().to_uppercase(),
            lesson.status.as_str().to_uppercase(),
            lesson.scheduled_date.format(DATE_TIME_FORMAT).to_string(),
            lesson.duration_minutes.to_string(),
            format_hours(hours),
            lesson.students.len().to_string(),
            lesson.max_students.map(|m| m.to_string()).unwrap_or_default(),
            lesson.notes.clone().unwrap_or_default(),
            lesson.homework.clone().unwrap_or_default(),
            lesson.created_at.format(DATE_TIME_FORMAT).to_string(),
            format_optional_time(lesson.completed_at),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| Error::Io(err.into_error()))?;
    String::from_utf8(bytes).map_err(|err| Error::Decode(err.to_string()))
}

pub fn compose_body(
    app_name: &str,
    window: &DateWindow,
    generated_at: DateTime<Utc>,
    summary: &WeeklySummary,
) -> String {
    let mut body = String::new();

    let _ = writeln!(body, "Weekly Lesson Report");
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "Report Period: {} to {}",
        window.start.format("%Y-%m-%d"),
        window.end.format("%Y-%m-%d")
    );
    let _ = writeln!(body, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(body);
    let _ = writeln!(body, "SUMMARY:");
    let _ = writeln!(body, "===========");
    let _ = writeln!(body, "Total Lessons: {}", summary.total_lessons);
    let _ = writeln!(body, "Total Hours: {} hours", format_hours(summary.total_hours));
    let _ = writeln!(body);
    let _ = writeln!(body, "Status Breakdown:");
    let _ = writeln!(body, "- Completed: {}", summary.completed);
    let _ = writeln!(body, "- Pending: {}", summary.pending);
    let _ = writeln!(body, "- Cancelled: {}", summary.cancelled);
    let _ = writeln!(body);
    let _ = writeln!(body, "ATTACHMENT:");
    let _ = writeln!(body, "==============");
    let _ = writeln!(
        body,
        "Please find the detailed lesson report in the attached CSV file."
    );
    let _ = writeln!(body);
    let _ = writeln!(body, "The CSV includes:");
    let _ = writeln!(body, "- Lesson details (ID, Title, Subject, Teacher)");
    let _ = writeln!(body, "- Scheduling information (Date, Duration)");
    let _ = writeln!(body, "- Student information (Count, Max capacity)");
    let _ = writeln!(body, "- Status and completion details");
    let _ = writeln!(body, "- Notes and homework assignments");
    let _ = writeln!(body);
    let _ = writeln!(body, "---");
    let _ = writeln!(body, "This is an automated weekly report from {app_name}");

    body
}

/// Export the past week's lessons and mail them to the configured recipient.
///
/// Returns `false` without sending when no recipient is configured or no
/// lesson falls in the window; otherwise returns the mailer's verdict.
/// Store errors propagate. Sends are not deduplicated across runs.
pub async fn run_weekly_report<S, M>(
    store: &S,
    mailer: &M,
    settings: &ReportSettings,
    now: DateTime<Utc>,
) -> Result<bool, Error>
where
    S: InstituteStore + ?Sized,
    M: Mailer + ?Sized,
{
    let Some(recipient) = settings.recipient.as_deref() else {
        warn!("EMAIL_TO not configured, skipping weekly report");
        return Ok(false);
    };

    let window = report_window(now);
    let lessons = store
        .lessons(&LessonQuery::default().scheduled_within(Some(window)))
        .await?;

    let csv = export_lessons_csv(&lessons)?;
    if csv.is_empty() {
        warn!(start = %window.start, end = %window.end, "no lessons in window, skipping weekly report");
        return Ok(false);
    }

    let summary = WeeklySummary::from_lessons(&lessons);
    let mail = OutgoingMail {
        subject: format!("Weekly Lesson Report - {}", settings.app_name),
        body: compose_body(&settings.app_name, &window, now, &summary),
        recipient: recipient.to_string(),
        attachments: vec![Attachment {
            filename: report_filename(now),
            content_type: "text/csv".to_string(),
            content: csv,
        }],
    };

    let sent = mailer.send(&mail).await;
    info!(
        lessons = summary.total_lessons,
        hours = summary.total_hours,
        sent,
        "weekly lesson report finished"
    );
    Ok(sent)
}

/// Next scheduled run strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let run_time = NaiveTime::from_hms_opt(RUN_HOUR, 0, 0).unwrap_or_default();
    let days_ahead = (7 + RUN_WEEKDAY.num_days_from_monday()
        - now.weekday().num_days_from_monday())
        % 7;
    let candidate = (now.date_naive() + Duration::days(i64::from(days_ahead)))
        .and_time(run_time)
        .and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::testing::RecordingMailer;
    use crate::models::{LessonStatus, LessonType};
    use crate::store::memory::{lesson, teacher, MemoryStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 18, 9, 0, 0).unwrap()
    }

    fn settings(recipient: Option<&str>) -> ReportSettings {
        ReportSettings {
            app_name: "General Institute System".to_string(),
            recipient: recipient.map(str::to_string),
        }
    }

    fn week_of_lessons() -> Vec<Lesson> {
        let tina = teacher("tina", "Tina", "Moss");
        let mut first = lesson(
            &tina,
            "Math",
            LessonType::Group,
            LessonStatus::Completed,
            Utc.with_ymd_and_hms(2024, 5, 13, 16, 30, 0).unwrap(),
            90,
        );
        first.title = "Fractions, part 2".to_string();
        first.students = vec!["Ann Lee".to_string(), "Omar Said".to_string()];
        first.max_students = Some(6);
        first.notes = Some("Bring worksheets".to_string());
        first.completed_at = Some(Utc.with_ymd_and_hms(2024, 5, 13, 18, 0, 0).unwrap());

        let second = lesson(
            &tina,
            "Physics",
            LessonType::Individual,
            LessonStatus::Pending,
            Utc.with_ymd_and_hms(2024, 5, 17, 10, 0, 0).unwrap(),
            50,
        );
        let third = lesson(
            &tina,
            "Physics",
            LessonType::Individual,
            LessonStatus::Cancelled,
            now(),
            60,
        );
        vec![first, second, third]
    }

    #[test]
    fn csv_has_exact_headers_and_formatted_rows() {
        let lessons = week_of_lessons();
        let csv = export_lessons_csv(&lessons).unwrap();
        let mut lines = csv.split("\r\n");

        assert_eq!(
            lines.next().unwrap(),
            "Lesson ID,Title,Subject,Teacher,Type,Status,Scheduled Date,Duration (min),\
             Duration (hrs),Students Count,Max Students,Notes,Homework,Created At,Completed At"
        );
        let first = lines.next().unwrap();
        assert_eq!(
            first,
            format!(
                "{},\"Fractions, part 2\",Math,Tina Moss,GROUP,COMPLETED,2024-05-13 16:30,90,1.5,2,6,\
                 Bring worksheets,,2024-05-13 16:30,2024-05-13 18:00",
                lessons[0].id
            )
        );
        let second = lines.next().unwrap();
        assert!(second.contains(",INDIVIDUAL,PENDING,2024-05-17 10:00,50,0.83,0,,,,"));
        let third = lines.next().unwrap();
        assert!(third.contains(",60,1.0,"));
    }

    #[test]
    fn csv_is_empty_without_lessons() {
        assert_eq!(export_lessons_csv(&[]).unwrap(), "");
    }

    #[test]
    fn summary_counts_statuses_and_hours() {
        let summary = WeeklySummary::from_lessons(&week_of_lessons());
        assert_eq!(summary.total_lessons, 3);
        assert_eq!(summary.total_hours, 3.33);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.cancelled, 1);
    }

    #[tokio::test]
    async fn sends_report_for_the_trailing_week() {
        let mut lessons = week_of_lessons();
        let tina = teacher("tina", "Tina", "Moss");
        lessons.push(lesson(
            &tina,
            "Art",
            LessonType::Group,
            LessonStatus::Completed,
            now() - Duration::days(7) - Duration::minutes(1),
            45,
        ));
        let store = MemoryStore::default().with_lessons(lessons);
        let mailer = RecordingMailer::new(true);

        let sent = run_weekly_report(&store, &mailer, &settings(Some("office@institute.test")), now())
            .await
            .unwrap();

        assert!(sent);
        let outbox = mailer.sent.lock().await;
        assert_eq!(outbox.len(), 1);
        let mail = &outbox[0];
        assert_eq!(mail.recipient, "office@institute.test");
        assert_eq!(mail.subject, "Weekly Lesson Report - General Institute System");
        assert!(mail.body.contains("Report Period: 2024-05-11 to 2024-05-18"));
        assert!(mail.body.contains("Total Lessons: 3"));
        assert!(mail.body.contains("Total Hours: 3.33 hours"));
        assert!(mail.body.contains("- Cancelled: 1"));
        assert_eq!(mail.attachments[0].filename, "weekly_lessons_report_20240518_090000.csv");
        assert_eq!(mail.attachments[0].content.matches("\r\n").count(), 4);
    }

    #[tokio::test]
    async fn empty_window_sends_nothing() {
        let tina = teacher("tina", "Tina", "Moss");
        let stale = lesson(
            &tina,
            "Math",
            LessonType::Individual,
            LessonStatus::Completed,
            now() - Duration::days(30),
            60,
        );
        let store = MemoryStore::default().with_lessons(vec![stale]);
        let mailer = RecordingMailer::new(true);

        let sent = run_weekly_report(&store, &mailer, &settings(Some("office@institute.test")), now())
            .await
            .unwrap();

        assert!(!sent);
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_recipient_sends_nothing() {
        let store = MemoryStore::default().with_lessons(week_of_lessons());
        let mailer = RecordingMailer::new(true);

        let sent = run_weekly_report(&store, &mailer, &settings(None), now()).await.unwrap();

        assert!(!sent);
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn mailer_failure_is_reported() {
        let store = MemoryStore::default().with_lessons(week_of_lessons());
        let mailer = RecordingMailer::new(false);

        let sent = run_weekly_report(&store, &mailer, &settings(Some("office@institute.test")), now())
            .await
            .unwrap();

        assert!(!sent);
        assert_eq!(mailer.sent.lock().await.len(), 1);
    }

    #[test]
    fn next_run_lands_on_saturday_morning() {
        let wednesday = Utc.with_ymd_and_hms(2024, 5, 15, 14, 0, 0).unwrap();
        assert_eq!(
            next_run_after(wednesday),
            Utc.with_ymd_and_hms(2024, 5, 18, 9, 0, 0).unwrap()
        );

        let saturday_early = Utc.with_ymd_and_hms(2024, 5, 18, 8, 59, 0).unwrap();
        assert_eq!(
            next_run_after(saturday_early),
            Utc.with_ymd_and_hms(2024, 5, 18, 9, 0, 0).unwrap()
        );

        assert_eq!(
            next_run_after(now()),
            Utc.with_ymd_and_hms(2024, 5, 25, 9, 0, 0).unwrap()
        );
    }
}
