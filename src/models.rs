use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;

const COURSE_KEY_PREFIX: &str = "course-v1:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Site {
    pub id: i64,
    pub domain: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationSite {
    pub organization_id: i64,
    pub site_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationCourse {
    pub organization_id: i64,
    pub course_id: CourseKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOrganizationMapping {
    pub user_id: i64,
    pub organization_id: i64,
}

/// `course-v1:{org}+{number}+{run}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseKey {
    pub org: String,
    pub number: String,
    pub run: String,
}

impl CourseKey {
    pub fn new(org: &str, number: &str, run: &str) -> Self {
        Self {
            org: org.to_string(),
            number: number.to_string(),
            run: run.to_string(),
        }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COURSE_KEY_PREFIX}{}+{}+{}", self.org, self.number, self.run)
    }
}

impl FromStr for CourseKey {
    type Err = AnalyticsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let body = raw
            .trim()
            .strip_prefix(COURSE_KEY_PREFIX)
            .ok_or_else(|| AnalyticsError::InvalidCourseKey(raw.to_string()))?;
        let parts: Vec<&str> = body.split('+').collect();
        match parts.as_slice() {
            [org, number, run] if !org.is_empty() && !number.is_empty() && !run.is_empty() => {
                Ok(CourseKey::new(org, number, run))
            }
            _ => Err(AnalyticsError::InvalidCourseKey(raw.to_string())),
        }
    }
}

impl TryFrom<String> for CourseKey {
    type Error = AnalyticsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CourseKey> for String {
    fn from(key: CourseKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Course {
    pub id: CourseKey,
    pub display_name: String,
    pub org: String,
    pub number: String,
    pub enrollment_start: Option<DateTime<Utc>>,
    pub enrollment_end: Option<DateTime<Utc>>,
    pub self_paced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub name: String,
    pub country: Option<String>,
    pub year_of_birth: Option<i32>,
    pub gender: Option<String>,
    pub level_of_education: Option<String>,
    pub language: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub profile: Option<Profile>,
}

impl User {
    pub fn full_name(&self) -> Option<&str> {
        self.profile.as_ref().map(|profile| profile.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: CourseKey,
    pub created: DateTime<Utc>,
    pub is_active: bool,
}

/// An issued certificate marks a learner as having completed a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    pub id: i64,
    pub user_id: i64,
    pub course_id: CourseKey,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerProgress {
    pub user_id: i64,
    pub course_id: CourseKey,
    pub date_for: NaiveDate,
    pub progress_percent: f64,
    pub sections_worked: i32,
    pub sections_possible: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseAccessRole {
    pub user_id: i64,
    pub course_id: CourseKey,
    pub role: String,
}

/// Half-open calendar month interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MetricWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn period_label(&self) -> String {
        self.start.format("%Y/%m").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub period: String,
    pub value: f64,
}

/// `history` is ordered oldest first and excludes the current month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyHistory {
    pub current_month: f64,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffMember {
    pub user_id: i64,
    pub username: String,
    pub fullname: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseDetails {
    pub course_id: CourseKey,
    pub course_name: String,
    pub course_code: String,
    pub org: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub self_paced: bool,
    pub staff: Vec<StaffMember>,
    pub learners_enrolled: MonthlyHistory,
    pub average_progress: MonthlyHistory,
    pub average_days_to_complete: MonthlyHistory,
    pub users_completed: MonthlyHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressData {
    pub course_completed: Option<DateTime<Utc>>,
    pub course_progress: f64,
    pub sections_worked: Option<i32>,
    pub sections_possible: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerCourseDetails {
    pub course_name: String,
    pub course_code: String,
    pub course_id: CourseKey,
    pub date_enrolled: NaiveDate,
    pub enrollment_id: i64,
    pub progress_data: ProgressData,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerDetails {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
    pub email: String,
    pub country: Option<String>,
    pub is_active: bool,
    pub year_of_birth: Option<i32>,
    pub level_of_education: Option<String>,
    pub gender: Option<String>,
    pub date_joined: NaiveDate,
    pub bio: Option<String>,
    pub language_proficiencies: Vec<String>,
    pub courses: Vec<LearnerCourseDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteSummary {
    pub site: String,
    pub total_site_users: usize,
    pub total_site_courses: usize,
    pub total_course_enrollments: usize,
}
