use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::StatusCounts;
use crate::error::Error;
use crate::models::{
    stored_subject, Lesson, LessonStatus, LessonType, PricingEntry, Student, User, UserRole,
    UserStatus,
};
use crate::pricing;
use crate::store::{DateWindow, InstituteStore, LessonQuery, PaymentSums};

const LESSON_COLUMNS: &str = "SELECT l.id, l.teacher_id, \
     COALESCE(NULLIF(TRIM(CONCAT_WS(' ', u.first_name, u.last_name)), ''), u.username) AS teacher_name, \
     l.title, l.subject, l.lesson_type, l.status, l.scheduled_date, l.duration_minutes, \
     l.max_students, l.students, l.notes, l.homework, l.created_at, l.completed_at \
     FROM institute.lessons l \
     JOIN institute.users u ON u.id = l.teacher_id \
     WHERE TRUE";

const PAYMENT_SUMS: &str = "SELECT COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total \
     FROM institute.payments WHERE TRUE";

const PRICING_COLUMNS: &str = "SELECT id, subject, individual_price, group_price, currency, \
     is_active, created_at, updated_at FROM institute.pricing";

pub async fn init_db(pool: &PgPool) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed [`InstituteStore`] over the `institute` schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_user(row: &PgRow) -> Result<User, Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
    })
}

fn decode_lesson(row: &PgRow) -> Result<Lesson, Error> {
    let lesson_type: Option<String> = row.try_get("lesson_type")?;
    Ok(Lesson {
        id: row.try_get("id")?,
        teacher_id: row.try_get("teacher_id")?,
        teacher_name: row.try_get("teacher_name")?,
        title: row.try_get("title")?,
        subject: stored_subject(row.try_get("subject")?),
        lesson_type: LessonType::from_stored(lesson_type.as_deref())?,
        status: row.try_get::<String, _>("status")?.parse()?,
        scheduled_date: row.try_get("scheduled_date")?,
        duration_minutes: row.try_get("duration_minutes")?,
        max_students: row.try_get("max_students")?,
        students: row.try_get("students")?,
        notes: row.try_get("notes")?,
        homework: row.try_get("homework")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn decode_payment_sums(row: &PgRow) -> Result<PaymentSums, Error> {
    Ok(PaymentSums {
        count: count_from(row.try_get("count")?),
        total: row.try_get::<Decimal, _>("total")?,
    })
}

/// `COUNT(*)` comes back as BIGINT; it is never negative.
fn count_from(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

fn decode_pricing(row: &PgRow) -> Result<PricingEntry, Error> {
    Ok(PricingEntry {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        individual_price: row.try_get("individual_price")?,
        group_price: row.try_get("group_price")?,
        currency: row.try_get("currency")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_window(builder: &mut QueryBuilder<'_, Postgres>, column: &str, window: &DateWindow) {
    builder.push(format!(" AND {column} >= ")).push_bind(window.start);
    let upper = if window.end_inclusive { "<=" } else { "<" };
    builder.push(format!(" AND {column} {upper} ")).push_bind(window.end);
}

/// Escape LIKE wildcards so `name` matches literally.
fn escape_like(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl InstituteStore for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, Error> {
        let row = sqlx::query(
            "SELECT id, username, role, email, first_name, last_name \
             FROM institute.users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_user).transpose()
    }

    async fn users(&self, role: UserRole, status: Option<UserStatus>) -> Result<Vec<User>, Error> {
        let rows = sqlx::query(
            "SELECT id, username, role, email, first_name, last_name \
             FROM institute.users \
             WHERE role = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY username",
        )
        .bind(role.as_str())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_user).collect()
    }

    async fn count_users(&self, role: UserRole, status: Option<UserStatus>) -> Result<usize, Error> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM institute.users \
             WHERE role = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(role.as_str())
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(count_from(count))
    }

    async fn students(&self, active_only: bool) -> Result<Vec<Student>, Error> {
        let rows = sqlx::query(
            "SELECT id, full_name, email, phone FROM institute.students \
             WHERE ($1 = FALSE OR is_active) ORDER BY full_name",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        let mut students = Vec::with_capacity(rows.len());
        for row in rows {
            students.push(Student {
                id: row.try_get("id")?,
                full_name: row.try_get("full_name")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
            });
        }
        Ok(students)
    }

    async fn count_students(&self, active_only: bool) -> Result<usize, Error> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM institute.students WHERE ($1 = FALSE OR is_active)",
        )
        .bind(active_only)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(count_from(count))
    }

    async fn lessons(&self, query: &LessonQuery) -> Result<Vec<Lesson>, Error> {
        let mut builder = QueryBuilder::<Postgres>::new(LESSON_COLUMNS);
        if let Some(teacher_id) = query.teacher_id {
            builder.push(" AND l.teacher_id = ").push_bind(teacher_id);
        }
        if let Some(statuses) = &query.statuses {
            let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            builder.push(" AND l.status = ANY(").push_bind(names).push(")");
        }
        if let Some(window) = &query.scheduled {
            push_window(&mut builder, "l.scheduled_date", window);
        }
        builder.push(" ORDER BY l.scheduled_date");

        let rows = builder.build().fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "fetched lessons");
        rows.iter().map(decode_lesson).collect()
    }

    async fn lesson_status_counts(&self, window: Option<&DateWindow>) -> Result<StatusCounts, Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT status, COUNT(*) AS count FROM institute.lessons WHERE TRUE",
        );
        if let Some(window) = window {
            push_window(&mut builder, "scheduled_date", window);
        }
        builder.push(" GROUP BY status");

        let mut counts = StatusCounts::default();
        for row in builder.build().fetch_all(&self.pool).await? {
            let status: LessonStatus = row.try_get::<String, _>("status")?.parse()?;
            counts.add(status, count_from(row.try_get("count")?));
        }
        Ok(counts)
    }

    async fn payment_sums(&self, window: Option<&DateWindow>) -> Result<PaymentSums, Error> {
        let mut builder = QueryBuilder::<Postgres>::new(PAYMENT_SUMS);
        if let Some(window) = window {
            push_window(&mut builder, "payment_date", window);
        }
        let row = builder.build().fetch_one(&self.pool).await?;
        decode_payment_sums(&row)
    }

    async fn payment_sums_for_student_name(&self, name: &str) -> Result<PaymentSums, Error> {
        let row = sqlx::query(&format!(
            r"{PAYMENT_SUMS} AND student_name ILIKE '%' || $1 || '%' ESCAPE '\'"
        ))
        .bind(escape_like(name))
        .fetch_one(&self.pool)
        .await?;
        decode_payment_sums(&row)
    }

    async fn active_pricing(&self) -> Result<Vec<PricingEntry>, Error> {
        let rows = sqlx::query(&format!(
            "{PRICING_COLUMNS} WHERE is_active ORDER BY subject"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_pricing).collect()
    }

    async fn count_active_pricing(&self) -> Result<usize, Error> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM institute.pricing WHERE is_active")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count_from(count))
    }

    async fn find_active_pricing(&self, subject: &str) -> Result<Option<PricingEntry>, Error> {
        let row = sqlx::query(&format!(
            "{PRICING_COLUMNS} WHERE is_active AND lower(trim(subject)) = lower(trim($1)) \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_pricing).transpose()
    }

    async fn pricing_subject_exists(&self, subject: &str) -> Result<bool, Error> {
        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM institute.pricing \
             WHERE lower(trim(subject)) = lower(trim($1)))",
        )
        .bind(subject)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(exists)
    }

    async fn insert_pricing(&self, entry: &PricingEntry) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO institute.pricing
            (id, subject, individual_price, group_price, currency, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.subject)
        .bind(entry.individual_price)
        .bind(entry.group_price)
        .bind(&entry.currency)
        .bind(entry.is_active)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub async fn seed(store: &PgStore) -> anyhow::Result<()> {
    let pool = store.pool();

    let users = vec![
        (
            Uuid::parse_str("5b0e7a52-4d0b-4f3a-9a3e-2f1c6d7e8a01")?,
            "admin",
            "admin@institute.local",
            None,
            None,
            UserRole::Admin,
        ),
        (
            Uuid::parse_str("a4c1d2e3-6f70-4b81-9c92-ad3b4e5f6a02")?,
            "lina.haddad",
            "lina.haddad@institute.local",
            Some("Lina"),
            Some("Haddad"),
            UserRole::Teacher,
        ),
        (
            Uuid::parse_str("c7d8e9f0-1a2b-4c3d-8e4f-5a6b7c8d9e03")?,
            "omar.farouk",
            "omar.farouk@institute.local",
            Some("Omar"),
            Some("Farouk"),
            UserRole::Teacher,
        ),
    ];

    for (id, username, email, first_name, last_name, role) in &users {
        sqlx::query(
            r#"
            INSERT INTO institute.users (id, username, email, first_name, last_name, role, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'active')
            ON CONFLICT (username) DO UPDATE
            SET email = EXCLUDED.email, first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name, role = EXCLUDED.role
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(role.as_str())
        .execute(pool)
        .await?;
    }

    let students = vec![
        (
            Uuid::parse_str("0f1e2d3c-4b5a-4968-8776-655443322101")?,
            "Sara Nasser",
            "sara.nasser@example.com",
        ),
        (
            Uuid::parse_str("1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c02")?,
            "Yusuf Karim",
            "yusuf.karim@example.com",
        ),
        (
            Uuid::parse_str("2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d03")?,
            "Maya Saleh",
            "maya.saleh@example.com",
        ),
    ];

    for (id, full_name, email) in &students {
        sqlx::query(
            r#"
            INSERT INTO institute.students (id, full_name, email, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (id) DO UPDATE SET full_name = EXCLUDED.full_name, email = EXCLUDED.email
            "#,
        )
        .bind(id)
        .bind(full_name)
        .bind(email)
        .execute(pool)
        .await?;
    }

    let lina = users[1].0;
    let omar = users[2].0;
    let march = |day: u32, hour: u32| -> anyhow::Result<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0)
            .single()
            .context("invalid date")
    };
    let now = Utc::now();

    let lessons = vec![
        (
            "6e1f0a3b-7c2d-4e5f-8a9b-0c1d2e3f4a01",
            lina,
            "Algebra basics",
            Some("Math"),
            LessonType::Individual,
            LessonStatus::Completed,
            march(4, 10)?,
            60,
            vec!["Sara Nasser"],
        ),
        (
            "6e1f0a3b-7c2d-4e5f-8a9b-0c1d2e3f4a02",
            lina,
            "Geometry workshop",
            Some("Math"),
            LessonType::Group,
            LessonStatus::Completed,
            march(11, 15)?,
            90,
            vec!["Sara Nasser", "Yusuf Karim", "Maya Saleh"],
        ),
        (
            "6e1f0a3b-7c2d-4e5f-8a9b-0c1d2e3f4a03",
            lina,
            "Quadratics",
            Some("Math"),
            LessonType::Individual,
            LessonStatus::Cancelled,
            march(18, 10)?,
            60,
            vec!["Yusuf Karim"],
        ),
        (
            "6e1f0a3b-7c2d-4e5f-8a9b-0c1d2e3f4a04",
            omar,
            "Reading circle",
            Some("Arabic"),
            LessonType::Group,
            LessonStatus::Pending,
            now - Duration::days(2),
            45,
            vec!["Maya Saleh", "Sara Nasser"],
        ),
        (
            "6e1f0a3b-7c2d-4e5f-8a9b-0c1d2e3f4a05",
            omar,
            "Free study",
            None,
            LessonType::Individual,
            LessonStatus::Completed,
            now - Duration::days(4),
            50,
            vec!["Yusuf Karim"],
        ),
    ];

    for (id, teacher_id, title, subject, lesson_type, status, scheduled, minutes, names) in lessons
    {
        let completed_at = (status == LessonStatus::Completed)
            .then(|| scheduled + Duration::minutes(i64::from(minutes)));
        sqlx::query(
            r#"
            INSERT INTO institute.lessons
            (id, teacher_id, title, subject, lesson_type, status, scheduled_date,
             duration_minutes, students, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(teacher_id)
        .bind(title)
        .bind(subject)
        .bind(lesson_type.as_str())
        .bind(status.as_str())
        .bind(scheduled)
        .bind(minutes)
        .bind(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
        .bind(completed_at)
        .execute(pool)
        .await?;
    }

    let payments = vec![
        ("7a8b9c0d-1e2f-4a3b-8c4d-5e6f7a8b9c01", "Sara Nasser", Decimal::new(12000, 2), march(5, 9)?),
        ("7a8b9c0d-1e2f-4a3b-8c4d-5e6f7a8b9c02", "Yusuf Karim", Decimal::new(7550, 2), march(12, 9)?),
        ("7a8b9c0d-1e2f-4a3b-8c4d-5e6f7a8b9c03", "Maya Saleh", Decimal::new(6000, 2), now - Duration::days(1)),
    ];

    for (id, student_name, amount, paid_at) in payments {
        sqlx::query(
            r#"
            INSERT INTO institute.payments (id, student_name, amount, payment_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(student_name)
        .bind(amount)
        .bind(paid_at)
        .execute(pool)
        .await?;
    }

    let summary = pricing::populate_defaults(store).await?;
    info!(created = summary.created, "seeded institute data");
    Ok(())
}

/// Load lessons from a CSV keyed by teacher username.
///
/// `students` is a `;`-separated list of names. Returns the number of rows
/// inserted.
pub async fn import_lessons_csv(
    store: &PgStore,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        teacher_username: String,
        title: String,
        subject: Option<String>,
        lesson_type: LessonType,
        status: LessonStatus,
        scheduled_date: DateTime<Utc>,
        duration_minutes: i32,
        max_students: Option<i32>,
        students: Option<String>,
        notes: Option<String>,
        homework: Option<String>,
    }

    let pool = store.pool();
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let line = index + 2;
        if !(1..=480).contains(&row.duration_minutes) {
            return Err(Error::InvalidInput(format!(
                "row {line}: duration_minutes must be between 1 and 480, got {}",
                row.duration_minutes
            ))
            .into());
        }

        let teacher_id: Uuid = sqlx::query(
            "SELECT id FROM institute.users WHERE username = $1 AND role = 'teacher'",
        )
        .bind(&row.teacher_username)
        .fetch_optional(pool)
        .await?
        .map(|r| r.get("id"))
        .ok_or_else(|| {
            Error::NotFound(format!("row {line}: teacher '{}' not found", row.teacher_username))
        })?;

        let students = split_students(row.students.as_deref());
        let completed_at = (row.status == LessonStatus::Completed)
            .then(|| row.scheduled_date + Duration::minutes(i64::from(row.duration_minutes)));

        let result = sqlx::query(
            r#"
            INSERT INTO institute.lessons
            (id, teacher_id, title, subject, lesson_type, status, scheduled_date,
             duration_minutes, max_students, students, notes, homework, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(teacher_id)
        .bind(&row.title)
        .bind(row.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .bind(row.lesson_type.as_str())
        .bind(row.status.as_str())
        .bind(row.scheduled_date)
        .bind(row.duration_minutes)
        .bind(row.max_students)
        .bind(students)
        .bind(&row.notes)
        .bind(&row.homework)
        .bind(completed_at)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    info!(inserted, path = %csv_path.display(), "imported lessons");
    Ok(inserted)
}

fn split_students(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
