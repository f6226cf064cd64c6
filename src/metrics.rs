//! Course metrics over a half-open date range `[start_date, end_date)`.
//!
//! Every metric reads the catalog only and returns `0.0` when the course has
//! no matching data or does not belong to the site. An `Err` means the
//! underlying records are inconsistent.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde_json::json;

use crate::error::AnalyticsError;
use crate::models::{
    Certificate, CourseKey, Enrollment, LearnerProgress, MetricWindow, ProgressData,
};
use crate::pipeline_log::{ErrorLog, PipelineErrorKind};
use crate::sites::{SiteResolver, SiteScope};

pub type MetricFn = fn(
    &SiteResolver<'_>,
    &SiteScope<'_>,
    &CourseKey,
    NaiveDate,
    NaiveDate,
) -> Result<f64, AnalyticsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    LearnersEnrolled,
    AverageProgress,
    AverageDaysToComplete,
    UsersCompleted,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::LearnersEnrolled,
        MetricKind::AverageProgress,
        MetricKind::AverageDaysToComplete,
        MetricKind::UsersCompleted,
    ];

    pub fn function(self) -> MetricFn {
        match self {
            MetricKind::LearnersEnrolled => get_course_enrolled_users_for_time_period,
            MetricKind::AverageProgress => get_course_average_progress_for_time_period,
            MetricKind::AverageDaysToComplete => {
                get_course_average_days_to_complete_for_time_period
            }
            MetricKind::UsersCompleted => get_course_num_learners_completed_for_time_period,
        }
    }

    /// Machine name, used in error log context.
    pub fn name(self) -> &'static str {
        match self {
            MetricKind::LearnersEnrolled => "learners_enrolled",
            MetricKind::AverageProgress => "average_progress",
            MetricKind::AverageDaysToComplete => "average_days_to_complete",
            MetricKind::UsersCompleted => "users_completed",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            MetricKind::LearnersEnrolled => "Learners enrolled",
            MetricKind::AverageProgress => "Average progress",
            MetricKind::AverageDaysToComplete => "Average days to complete",
            MetricKind::UsersCompleted => "Users completed",
        }
    }
}

/// `None` when the course is outside the site; callers report the default.
fn scoped_window(
    scope: &SiteScope<'_>,
    course_id: &CourseKey,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Option<MetricWindow> {
    if !scope.contains_course(course_id) {
        return None;
    }
    Some(MetricWindow {
        start: start_date,
        end: end_date,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Number of enrollments created inside the window.
pub fn get_course_enrolled_users_for_time_period(
    resolver: &SiteResolver<'_>,
    scope: &SiteScope<'_>,
    course_id: &CourseKey,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<f64, AnalyticsError> {
    let Some(window) = scoped_window(scope, course_id, start_date, end_date) else {
        return Ok(0.0);
    };
    let enrolled = resolver
        .catalog()
        .enrollments_for_course(course_id)
        .filter(|enrollment| window.contains(enrollment.created.date_naive()))
        .count();
    Ok(enrolled as f64)
}

pub fn get_course_average_progress_for_time_period(
    resolver: &SiteResolver<'_>,
    scope: &SiteScope<'_>,
    course_id: &CourseKey,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<f64, AnalyticsError> {
    let Some(window) = scoped_window(scope, course_id, start_date, end_date) else {
        return Ok(0.0);
    };

    // latest snapshot per learner inside the window
    let mut latest: BTreeMap<i64, &LearnerProgress> = BTreeMap::new();
    for record in resolver
        .catalog()
        .progress_for_course(course_id)
        .filter(|record| window.contains(record.date_for))
    {
        latest
            .entry(record.user_id)
            .and_modify(|current| {
                if record.date_for > current.date_for {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut values = Vec::with_capacity(latest.len());
    for record in latest.values() {
        if !(0.0..=1.0).contains(&record.progress_percent) {
            return Err(AnalyticsError::DataIntegrity {
                course_id: course_id.to_string(),
                user_id: record.user_id,
                reason: format!("progress {} is outside 0.0..=1.0", record.progress_percent),
            });
        }
        values.push(record.progress_percent);
    }
    Ok(mean(&values))
}

/// Whole days from enrollment to the learner's earliest certificate issued
/// inside the window.
pub fn get_course_average_days_to_complete_for_time_period(
    resolver: &SiteResolver<'_>,
    scope: &SiteScope<'_>,
    course_id: &CourseKey,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<f64, AnalyticsError> {
    let Some(window) = scoped_window(scope, course_id, start_date, end_date) else {
        return Ok(0.0);
    };
    let catalog = resolver.catalog();

    let mut completed: BTreeMap<i64, &Certificate> = BTreeMap::new();
    for certificate in catalog
        .certificates_for_course(course_id)
        .filter(|certificate| window.contains(certificate.created_date.date_naive()))
    {
        completed
            .entry(certificate.user_id)
            .and_modify(|current| {
                if certificate.created_date < current.created_date {
                    *current = certificate;
                }
            })
            .or_insert(certificate);
    }

    let mut days = Vec::with_capacity(completed.len());
    for (user_id, certificate) in completed {
        let enrollment =
            catalog
                .enrollment_for(user_id, course_id)
                .ok_or_else(|| AnalyticsError::DataIntegrity {
                    course_id: course_id.to_string(),
                    user_id,
                    reason: "certificate issued without an enrollment".to_string(),
                })?;
        let elapsed = certificate.created_date - enrollment.created;
        if elapsed.num_seconds() < 0 {
            return Err(AnalyticsError::DataIntegrity {
                course_id: course_id.to_string(),
                user_id,
                reason: "certificate predates enrollment".to_string(),
            });
        }
        days.push(elapsed.num_days() as f64);
    }
    Ok(mean(&days))
}

pub fn get_course_num_learners_completed_for_time_period(
    resolver: &SiteResolver<'_>,
    scope: &SiteScope<'_>,
    course_id: &CourseKey,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<f64, AnalyticsError> {
    let Some(window) = scoped_window(scope, course_id, start_date, end_date) else {
        return Ok(0.0);
    };
    let learners: BTreeSet<i64> = resolver
        .catalog()
        .certificates_for_course(course_id)
        .filter(|certificate| window.contains(certificate.created_date.date_naive()))
        .map(|certificate| certificate.user_id)
        .collect();
    Ok(learners.len() as f64)
}

/// Completion and latest progress for one enrollment. A learner without any
/// progress record is logged and reported at `0.0`.
pub fn learner_course_progress(
    resolver: &SiteResolver<'_>,
    enrollment: &Enrollment,
    error_log: &ErrorLog,
) -> ProgressData {
    let catalog = resolver.catalog();
    let course_completed = catalog
        .certificate_for(enrollment.user_id, &enrollment.course_id)
        .map(|certificate| certificate.created_date);

    match catalog.most_recent_progress(enrollment.user_id, &enrollment.course_id) {
        Some(record) => ProgressData {
            course_completed,
            course_progress: record.progress_percent,
            sections_worked: Some(record.sections_worked),
            sections_possible: Some(record.sections_possible),
        },
        None => {
            let username = catalog
                .user(enrollment.user_id)
                .map(|user| user.username.clone());
            error_log.log_error(
                PipelineErrorKind::UnspecifiedData,
                "Unable to get learner course metrics",
                json!({
                    "username": username,
                    "user_id": enrollment.user_id,
                    "course_id": enrollment.course_id.to_string(),
                }),
            );
            ProgressData {
                course_completed,
                course_progress: 0.0,
                sections_worked: None,
                sections_possible: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::Settings;
    use crate::testing::*;
    use pretty_assertions::assert_eq;

    /// Three learners enrol in March 2024; one finishes on April 2.
    fn march_cohort() -> (Catalog, CourseKey) {
        let mut catalog = standalone_catalog(1);
        let key = catalog.courses[0].id.clone();
        catalog.users = vec![user(1, "alpha"), user(2, "bravo"), user(3, "charlie")];
        catalog.enrollments = vec![
            enrollment(1, 1, &key, at(2024, 3, 5)),
            enrollment(2, 2, &key, at(2024, 3, 12)),
            enrollment(3, 3, &key, at(2024, 3, 20)),
        ];
        catalog.progress = vec![
            progress(1, &key, date(2024, 3, 10), 0.4),
            progress(1, &key, date(2024, 3, 28), 1.0),
            progress(2, &key, date(2024, 3, 25), 0.2),
            progress(3, &key, date(2024, 3, 30), 0.3),
        ];
        catalog.certificates = vec![certificate(1, 1, &key, at(2024, 4, 2))];
        (catalog, key)
    }

    fn march() -> (NaiveDate, NaiveDate) {
        (date(2024, 3, 1), date(2024, 4, 1))
    }

    fn april() -> (NaiveDate, NaiveDate) {
        (date(2024, 4, 1), date(2024, 5, 1))
    }

    #[test]
    fn enrolled_users_counts_enrollments_in_range() {
        let (catalog, key) = march_cohort();
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = march();
        let value = get_course_enrolled_users_for_time_period(&resolver, &scope, &key, start, end);
        assert_eq!(value.unwrap(), 3.0);
        let (start, end) = april();
        let value = get_course_enrolled_users_for_time_period(&resolver, &scope, &key, start, end);
        assert_eq!(value.unwrap(), 0.0);
    }

    #[test]
    fn repeat_enrollments_are_each_counted() {
        let (mut catalog, key) = march_cohort();
        catalog.enrollments.push(enrollment(4, 1, &key, at(2024, 3, 25)));
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = march();
        let value = get_course_enrolled_users_for_time_period(&resolver, &scope, &key, start, end);
        assert_eq!(value.unwrap(), 4.0);
    }

    #[test]
    fn average_progress_uses_latest_snapshot_per_learner() {
        let (catalog, key) = march_cohort();
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = march();
        let value =
            get_course_average_progress_for_time_period(&resolver, &scope, &key, start, end)
                .unwrap();
        assert!((value - (1.0 + 0.2 + 0.3) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn progress_above_one_is_an_integrity_error() {
        let (mut catalog, key) = march_cohort();
        catalog.progress.push(progress(2, &key, date(2024, 3, 29), 1.5));
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = march();
        let result =
            get_course_average_progress_for_time_period(&resolver, &scope, &key, start, end);
        assert!(matches!(result, Err(AnalyticsError::DataIntegrity { user_id: 2, .. })));
    }

    #[test]
    fn completion_in_april_is_not_counted_in_march() {
        let (catalog, key) = march_cohort();
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = march();
        let completed =
            get_course_num_learners_completed_for_time_period(&resolver, &scope, &key, start, end);
        assert_eq!(completed.unwrap(), 0.0);
        let (start, end) = april();
        let completed =
            get_course_num_learners_completed_for_time_period(&resolver, &scope, &key, start, end);
        assert_eq!(completed.unwrap(), 1.0);
    }

    #[test]
    fn days_to_complete_measures_from_enrollment() {
        let (catalog, key) = march_cohort();
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = april();
        let days = get_course_average_days_to_complete_for_time_period(
            &resolver, &scope, &key, start, end,
        );
        assert_eq!(days.unwrap(), 28.0);
        let (start, end) = march();
        let days = get_course_average_days_to_complete_for_time_period(
            &resolver, &scope, &key, start, end,
        );
        assert_eq!(days.unwrap(), 0.0);
    }

    #[test]
    fn days_to_complete_uses_the_certificate_issued_in_range() {
        let mut catalog = standalone_catalog(1);
        let key = catalog.courses[0].id.clone();
        catalog.users = vec![user(1, "alpha")];
        catalog.enrollments = vec![enrollment(1, 1, &key, at(2024, 1, 1))];
        catalog.certificates = vec![
            certificate(1, 1, &key, at(2024, 1, 11)),
            certificate(2, 1, &key, at(2024, 4, 10)),
        ];
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = april();
        let days = get_course_average_days_to_complete_for_time_period(
            &resolver, &scope, &key, start, end,
        );
        assert_eq!(days.unwrap(), 100.0);
        let days = get_course_average_days_to_complete_for_time_period(
            &resolver,
            &scope,
            &key,
            date(2024, 1, 1),
            date(2024, 2, 1),
        );
        assert_eq!(days.unwrap(), 10.0);
    }

    #[test]
    fn certificate_without_enrollment_is_an_integrity_error() {
        let (mut catalog, key) = march_cohort();
        catalog.certificates.push(certificate(2, 9, &key, at(2024, 4, 9)));
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = april();
        let result = get_course_average_days_to_complete_for_time_period(
            &resolver, &scope, &key, start, end,
        );
        assert!(matches!(result, Err(AnalyticsError::DataIntegrity { user_id: 9, .. })));
    }

    #[test]
    fn certificate_before_enrollment_is_an_integrity_error() {
        let (mut catalog, key) = march_cohort();
        catalog.certificates.push(certificate(2, 3, &key, at(2024, 3, 15)));
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());

        let (start, end) = march();
        let result = get_course_average_days_to_complete_for_time_period(
            &resolver, &scope, &key, start, end,
        );
        assert!(matches!(result, Err(AnalyticsError::DataIntegrity { user_id: 3, .. })));
    }

    #[test]
    fn metrics_default_to_zero_without_data() {
        let catalog = standalone_catalog(1);
        let key = catalog.courses[0].id.clone();
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let scope = resolver.scope(resolver.default_site().unwrap());
        let (start, end) = march();

        for kind in MetricKind::ALL {
            let value = (kind.function())(&resolver, &scope, &key, start, end);
            assert_eq!(value.unwrap(), 0.0, "{}", kind.name());
        }
    }

    #[test]
    fn course_outside_site_reports_default() {
        let mut catalog = multisite_catalog();
        let key = link_course(&mut catalog, 10, course("FooOrg", "F001"));
        catalog.enrollments.push(enrollment(1, 1, &key, at(2024, 3, 5)));
        let settings = Settings::multisite();
        let resolver = SiteResolver::new(&catalog, &settings);
        let other = resolver.scope(resolver.get_site_by_domain("example.com").unwrap());
        let foo = resolver.scope(resolver.get_site_by_domain("foo.test").unwrap());
        let (start, end) = march();

        let outside =
            get_course_enrolled_users_for_time_period(&resolver, &other, &key, start, end);
        assert_eq!(outside.unwrap(), 0.0);
        let inside = get_course_enrolled_users_for_time_period(&resolver, &foo, &key, start, end);
        assert_eq!(inside.unwrap(), 1.0);
    }

    #[test]
    fn missing_progress_is_logged_and_defaulted() {
        let (mut catalog, key) = march_cohort();
        catalog.users.push(user(4, "delta"));
        catalog.enrollments.push(enrollment(4, 4, &key, at(2024, 3, 21)));
        let settings = Settings::standalone();
        let resolver = SiteResolver::new(&catalog, &settings);
        let log = ErrorLog::new();

        let finished = learner_course_progress(&resolver, &catalog.enrollments[0], &log);
        assert_eq!(finished.course_progress, 1.0);
        assert_eq!(finished.course_completed, Some(at(2024, 4, 2)));
        assert!(log.is_empty());

        let missing = learner_course_progress(&resolver, &catalog.enrollments[3], &log);
        assert_eq!(missing.course_progress, 0.0);
        assert_eq!(missing.course_completed, None);
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_type, PipelineErrorKind::UnspecifiedData);
        assert_eq!(entries[0].context["username"], "delta");
    }
}
