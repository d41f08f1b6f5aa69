use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DateWindow, InstituteStore, LessonQuery, PaymentSums};
use crate::aggregate::StatusCounts;
use crate::error::Error;
use crate::models::{
    Lesson, LessonStatus, LessonType, PricingEntry, Student, User, UserRole, UserStatus,
};

/// Payment row as the store keeps it.
#[derive(Debug, Clone)]
pub struct Payment {
    pub student_name: String,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
}

/// In-process store backing the unit tests.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<Vec<(User, UserStatus)>>,
    students: RwLock<Vec<(Student, bool)>>,
    lessons: RwLock<Vec<Lesson>>,
    payments: RwLock<Vec<Payment>>,
    pricing: RwLock<Vec<PricingEntry>>,
}

impl MemoryStore {
    /// Adds `users` as active accounts.
    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users
            .get_mut()
            .extend(users.into_iter().map(|u| (u, UserStatus::Active)));
        self
    }

    pub fn with_user_status(mut self, user: User, status: UserStatus) -> Self {
        self.users.get_mut().push((user, status));
        self
    }

    /// Adds `students` as active students.
    pub fn with_students(mut self, students: Vec<Student>) -> Self {
        self.students
            .get_mut()
            .extend(students.into_iter().map(|s| (s, true)));
        self
    }

    pub fn with_inactive_student(mut self, student: Student) -> Self {
        self.students.get_mut().push((student, false));
        self
    }

    pub fn with_lessons(mut self, lessons: Vec<Lesson>) -> Self {
        self.lessons = RwLock::new(lessons);
        self
    }

    pub fn with_payments(mut self, payments: Vec<Payment>) -> Self {
        self.payments = RwLock::new(payments);
        self
    }

    pub fn with_pricing(mut self, pricing: Vec<PricingEntry>) -> Self {
        self.pricing = RwLock::new(pricing);
        self
    }

    pub async fn pricing_len(&self) -> usize {
        self.pricing.read().await.len()
    }

    async fn filtered_users(&self, role: UserRole, status: Option<UserStatus>) -> Vec<User> {
        self.users
            .read()
            .await
            .iter()
            .filter(|(u, s)| u.role == role && status.map_or(true, |wanted| *s == wanted))
            .map(|(u, _)| u.clone())
            .collect()
    }

    async fn filtered_students(&self, active_only: bool) -> Vec<Student> {
        self.students
            .read()
            .await
            .iter()
            .filter(|(_, active)| !active_only || *active)
            .map(|(s, _)| s.clone())
            .collect()
    }

    async fn sum_payments(&self, keep: impl Fn(&Payment) -> bool) -> PaymentSums {
        self.payments
            .read()
            .await
            .iter()
            .filter(|p| keep(*p))
            .fold(PaymentSums::default(), |sums, p| PaymentSums {
                count: sums.count + 1,
                total: sums.total + p.amount,
            })
    }
}

fn same_subject(stored: &str, wanted: &str) -> bool {
    stored.trim().to_lowercase() == wanted.trim().to_lowercase()
}

#[async_trait]
impl InstituteStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, Error> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone()))
    }

    async fn users(&self, role: UserRole, status: Option<UserStatus>) -> Result<Vec<User>, Error> {
        Ok(self.filtered_users(role, status).await)
    }

    async fn count_users(&self, role: UserRole, status: Option<UserStatus>) -> Result<usize, Error> {
        Ok(self.filtered_users(role, status).await.len())
    }

    async fn students(&self, active_only: bool) -> Result<Vec<Student>, Error> {
        Ok(self.filtered_students(active_only).await)
    }

    async fn count_students(&self, active_only: bool) -> Result<usize, Error> {
        Ok(self.filtered_students(active_only).await.len())
    }

    async fn lessons(&self, query: &LessonQuery) -> Result<Vec<Lesson>, Error> {
        let mut lessons: Vec<Lesson> = self
            .lessons
            .read()
            .await
            .iter()
            .filter(|l| query.matches(l))
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.scheduled_date);
        Ok(lessons)
    }

    async fn lesson_status_counts(&self, window: Option<&DateWindow>) -> Result<StatusCounts, Error> {
        let query = LessonQuery::default().scheduled_within(window.copied());
        Ok(StatusCounts::from_lessons(
            self.lessons.read().await.iter().filter(|l| query.matches(l)),
        ))
    }

    async fn payment_sums(&self, window: Option<&DateWindow>) -> Result<PaymentSums, Error> {
        Ok(self
            .sum_payments(|p| window.map_or(true, |w| w.contains(p.payment_date)))
            .await)
    }

    async fn payment_sums_for_student_name(&self, name: &str) -> Result<PaymentSums, Error> {
        let needle = name.to_lowercase();
        Ok(self
            .sum_payments(|p| p.student_name.to_lowercase().contains(&needle))
            .await)
    }

    async fn active_pricing(&self) -> Result<Vec<PricingEntry>, Error> {
        let mut entries: Vec<PricingEntry> = self
            .pricing
            .read()
            .await
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.subject.cmp(&b.subject));
        Ok(entries)
    }

    async fn count_active_pricing(&self) -> Result<usize, Error> {
        Ok(self.pricing.read().await.iter().filter(|p| p.is_active).count())
    }

    async fn find_active_pricing(&self, subject: &str) -> Result<Option<PricingEntry>, Error> {
        Ok(self
            .pricing
            .read()
            .await
            .iter()
            .find(|p| p.is_active && same_subject(&p.subject, subject))
            .cloned())
    }

    async fn pricing_subject_exists(&self, subject: &str) -> Result<bool, Error> {
        Ok(self
            .pricing
            .read()
            .await
            .iter()
            .any(|p| same_subject(&p.subject, subject)))
    }

    async fn insert_pricing(&self, entry: &PricingEntry) -> Result<(), Error> {
        let mut pricing = self.pricing.write().await;
        if pricing.iter().any(|p| same_subject(&p.subject, &entry.subject)) {
            return Err(Error::InvalidState(format!(
                "pricing for subject '{}' already exists",
                entry.subject
            )));
        }
        pricing.push(entry.clone());
        Ok(())
    }
}

pub fn teacher(username: &str, first: &str, last: &str) -> User {
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        role: UserRole::Teacher,
        email: Some(format!("{username}@institute.test")),
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
    }
}

pub fn admin(username: &str) -> User {
    User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        role: UserRole::Admin,
        email: None,
        first_name: None,
        last_name: None,
    }
}

pub fn student(full_name: &str) -> Student {
    Student {
        id: Uuid::new_v4(),
        full_name: full_name.to_string(),
        email: None,
        phone: None,
    }
}

pub fn lesson(
    teacher: &User,
    subject: &str,
    lesson_type: LessonType,
    status: LessonStatus,
    scheduled_date: DateTime<Utc>,
    duration_minutes: i32,
) -> Lesson {
    Lesson {
        id: Uuid::new_v4(),
        teacher_id: teacher.id,
        teacher_name: teacher.display_name(),
        title: format!("{subject} session"),
        subject: subject.to_string(),
        lesson_type,
        status,
        scheduled_date,
        duration_minutes,
        max_students: None,
        students: Vec::new(),
        notes: None,
        homework: None,
        created_at: scheduled_date,
        completed_at: None,
    }
}

pub fn payment(student_name: &str, amount: Decimal, payment_date: DateTime<Utc>) -> Payment {
    Payment {
        student_name: student_name.to_string(),
        amount,
        payment_date,
    }
}
