use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Subject recorded for lessons stored without one.
pub const DEFAULT_SUBJECT: &str = "other";

/// Subject of a stored lesson, `"other"` when the column is empty.
pub fn stored_subject(subject: Option<String>) -> String {
    subject.unwrap_or_else(|| DEFAULT_SUBJECT.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonType {
    Individual,
    Group,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonType::Individual => "individual",
            LessonType::Group => "group",
        }
    }

    /// Stored lesson type; a missing value is individual, an unknown one is an error.
    pub fn from_stored(value: Option<&str>) -> Result<Self, Error> {
        value.map_or(Ok(LessonType::Individual), |v| v.parse())
    }

    /// Pricing reading of a lesson type: anything other than "group" is individual.
    pub fn lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("group") {
            LessonType::Group
        } else {
            LessonType::Individual
        }
    }
}

impl FromStr for LessonType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "individual" => Ok(LessonType::Individual),
            "group" => Ok(LessonType::Group),
            other => Err(Error::Decode(format!("unknown lesson type '{other}'"))),
        }
    }
}

impl fmt::Display for LessonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonStatus {
    Pending,
    Completed,
    Cancelled,
}

impl LessonStatus {
    /// Statuses that count towards a teacher's earnings.
    pub const BILLABLE: [LessonStatus; 2] = [LessonStatus::Pending, LessonStatus::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Pending => "pending",
            LessonStatus::Completed => "completed",
            LessonStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for LessonStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(LessonStatus::Pending),
            "completed" => Ok(LessonStatus::Completed),
            "cancelled" => Ok(LessonStatus::Cancelled),
            other => Err(Error::Decode(format!("unknown lesson status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Teacher,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Teacher => "teacher",
        }
    }
}

impl FromStr for UserRole {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(UserRole::Admin),
            "teacher" => Ok(UserRole::Teacher),
            other => Err(Error::Decode(format!("unknown user role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for UserStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(Error::Decode(format!("unknown user status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    /// "First Last", or the username when both name parts are blank.
    pub fn display_name(&self) -> String {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let trimmed = full.trim();
        if trimmed.is_empty() {
            self.username.clone()
        } else {
            trimmed.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Lesson {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub teacher_name: String,
    pub title: String,
    pub subject: String,
    pub lesson_type: LessonType,
    pub status: LessonStatus,
    pub scheduled_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub max_students: Option<i32>,
    pub students: Vec<String>,
    pub notes: Option<String>,
    pub homework: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PricingEntry {
    pub id: Uuid,
    pub subject: String,
    pub individual_price: Option<Decimal>,
    pub group_price: Option<Decimal>,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PricingEntry {
    pub fn new(subject: &str, individual_price: Decimal, group_price: Decimal, currency: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.trim().to_string(),
            individual_price: Some(individual_price),
            group_price: Some(group_price),
            currency: currency.to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Configured hourly rate for the given tier, if the entry carries one.
    pub fn rate_for(&self, lesson_type: LessonType) -> Option<Decimal> {
        match lesson_type {
            LessonType::Individual => self.individual_price,
            LessonType::Group => self.group_price,
        }
    }
}
