use std::fmt::Write;

use chrono::NaiveDate;
use serde_json::json;

use crate::error::AnalyticsError;
use crate::history::get_course_history_metric;
use crate::metrics::{learner_course_progress, MetricKind};
use crate::models::{
    Course, CourseDetails, CourseKey, LearnerCourseDetails, LearnerDetails, MonthlyHistory, Site,
    SiteSummary, StaffMember,
};
use crate::pipeline_log::{ErrorLog, PipelineErrorKind};
use crate::sites::{SiteResolver, SiteScope};

fn staff_for_course(resolver: &SiteResolver<'_>, course_id: &CourseKey) -> Vec<StaffMember> {
    let catalog = resolver.catalog();
    catalog
        .access_roles_for_course(course_id)
        .filter_map(|role| {
            let user = catalog.user(role.user_id)?;
            Some(StaffMember {
                user_id: user.id,
                username: user.username.clone(),
                fullname: user.full_name().map(str::to_string),
                role: role.role.clone(),
            })
        })
        .collect()
}

fn build_course_details(
    resolver: &SiteResolver<'_>,
    scope: &SiteScope<'_>,
    course: &Course,
    date_for: NaiveDate,
    months_back: u32,
    error_log: &ErrorLog,
) -> Result<CourseDetails, AnalyticsError> {
    let history = |kind: MetricKind| -> Result<MonthlyHistory, AnalyticsError> {
        get_course_history_metric(
            resolver,
            scope,
            &course.id,
            kind,
            date_for,
            months_back,
            error_log,
        )
    };

    Ok(CourseDetails {
        course_id: course.id.clone(),
        course_name: course.display_name.clone(),
        course_code: course.number.clone(),
        org: course.org.clone(),
        start_date: course.enrollment_start,
        end_date: course.enrollment_end,
        self_paced: course.self_paced,
        staff: staff_for_course(resolver, &course.id),
        learners_enrolled: history(MetricKind::LearnersEnrolled)?,
        average_progress: history(MetricKind::AverageProgress)?,
        average_days_to_complete: history(MetricKind::AverageDaysToComplete)?,
        users_completed: history(MetricKind::UsersCompleted)?,
    })
}

/// `Ok(None)` when the course is unknown or cannot be scoped to a site.
pub fn course_details(
    resolver: &SiteResolver<'_>,
    course_id: &str,
    date_for: NaiveDate,
    months_back: u32,
    error_log: &ErrorLog,
) -> Result<Option<CourseDetails>, AnalyticsError> {
    let Some(site) = resolver.get_site_for_course(Some(course_id))? else {
        return Ok(None);
    };
    let Ok(course_key) = course_id.parse::<CourseKey>() else {
        return Ok(None);
    };
    let Some(course) = resolver.catalog().course(&course_key) else {
        return Ok(None);
    };
    let scope = resolver.scope(site);
    build_course_details(resolver, &scope, course, date_for, months_back, error_log).map(Some)
}

pub fn course_details_for_site(
    resolver: &SiteResolver<'_>,
    site: &Site,
    date_for: NaiveDate,
    months_back: u32,
    error_log: &ErrorLog,
) -> Result<Vec<CourseDetails>, AnalyticsError> {
    let scope = resolver.scope(site);
    resolver
        .get_courses_for_site(site)
        .into_iter()
        .map(|course| {
            build_course_details(resolver, &scope, course, date_for, months_back, error_log)
        })
        .collect()
}

/// `None` when the user does not belong to the site.
pub fn learner_details(
    resolver: &SiteResolver<'_>,
    site: &Site,
    user_id: i64,
    error_log: &ErrorLog,
) -> Option<LearnerDetails> {
    if !resolver.get_user_ids_for_site(site).contains(&user_id) {
        return None;
    }
    let catalog = resolver.catalog();
    let user = catalog.user(user_id)?;
    let site_courses = resolver.get_course_keys_for_site(site);

    let mut courses = Vec::new();
    for enrollment in catalog
        .enrollments_for_user(user_id)
        .filter(|enrollment| site_courses.contains(&enrollment.course_id))
    {
        let Some(course) = catalog.course(&enrollment.course_id) else {
            error_log.log_error(
                PipelineErrorKind::DataIntegrity,
                "Enrollment references an unknown course",
                json!({
                    "enrollment_id": enrollment.id,
                    "course_id": enrollment.course_id.to_string(),
                }),
            );
            continue;
        };
        courses.push(LearnerCourseDetails {
            course_name: course.display_name.clone(),
            course_code: course.number.clone(),
            course_id: course.id.clone(),
            date_enrolled: enrollment.created.date_naive(),
            enrollment_id: enrollment.id,
            progress_data: learner_course_progress(resolver, enrollment, error_log),
        });
    }

    let profile = user.profile.as_ref();
    Some(LearnerDetails {
        id: user.id,
        username: user.username.clone(),
        name: user.full_name().map(str::to_string),
        email: user.email.clone(),
        country: profile.and_then(|p| p.country.clone()),
        is_active: user.is_active,
        year_of_birth: profile.and_then(|p| p.year_of_birth),
        level_of_education: profile.and_then(|p| p.level_of_education.clone()),
        gender: profile.and_then(|p| p.gender.clone()),
        date_joined: user.date_joined.date_naive(),
        bio: profile.and_then(|p| p.bio.clone()),
        language_proficiencies: profile
            .and_then(|p| p.language.clone())
            .into_iter()
            .collect(),
        courses,
    })
}

pub fn site_summary(resolver: &SiteResolver<'_>, site: &Site) -> SiteSummary {
    SiteSummary {
        site: site.domain.clone(),
        total_site_users: resolver.get_user_ids_for_site(site).len(),
        total_site_courses: resolver.get_course_keys_for_site(site).len(),
        total_course_enrollments: resolver.get_course_enrollments_for_site(site).len(),
    }
}

fn metric_history(course: &CourseDetails, kind: MetricKind) -> &MonthlyHistory {
    match kind {
        MetricKind::LearnersEnrolled => &course.learners_enrolled,
        MetricKind::AverageProgress => &course.average_progress,
        MetricKind::AverageDaysToComplete => &course.average_days_to_complete,
        MetricKind::UsersCompleted => &course.users_completed,
    }
}

fn write_history(output: &mut String, label: &str, history: &MonthlyHistory) {
    let _ = writeln!(output, "- {}: {:.2} this month", label, history.current_month);
    if history.history.is_empty() {
        return;
    }
    let trail: Vec<String> = history
        .history
        .iter()
        .map(|entry| format!("{} {:.2}", entry.period, entry.value))
        .collect();
    let _ = writeln!(output, "  - history: {}", trail.join(", "));
}

pub fn render_course_details(
    site: &str,
    date_for: NaiveDate,
    courses: &[CourseDetails],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course Progress Report");
    let _ = writeln!(output, "Generated for {} (as of {})", site, date_for);

    if courses.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "No courses found for this site.");
        return output;
    }

    for course in courses {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {} ({})", course.course_name, course.course_id);
        let _ = writeln!(
            output,
            "{} / {}{}",
            course.org,
            course.course_code,
            if course.self_paced { ", self paced" } else { "" }
        );

        if !course.staff.is_empty() {
            let staff: Vec<String> = course
                .staff
                .iter()
                .map(|member| {
                    format!(
                        "{} ({})",
                        member.fullname.as_deref().unwrap_or(&member.username),
                        member.role
                    )
                })
                .collect();
            let _ = writeln!(output, "Staff: {}", staff.join(", "));
        }

        for kind in MetricKind::ALL {
            write_history(&mut output, kind.title(), metric_history(course, kind));
        }
    }

    output
}

pub fn render_learner_details(learner: &LearnerDetails) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "# {} ({})",
        learner.name.as_deref().unwrap_or(&learner.username),
        learner.email
    );
    let _ = writeln!(
        output,
        "Joined {}{}",
        learner.date_joined,
        if learner.is_active { "" } else { " (inactive)" }
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Courses");

    if learner.courses.is_empty() {
        let _ = writeln!(output, "Not enrolled in any course on this site.");
        return output;
    }

    for course in &learner.courses {
        let completed = course
            .progress_data
            .course_completed
            .map(|at| format!(", completed {}", at.date_naive()))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "- {} ({}) enrolled {}: progress {:.0}%{}",
            course.course_name,
            course.course_code,
            course.date_enrolled,
            course.progress_data.course_progress * 100.0,
            completed
        );
    }

    output
}

pub fn render_site_summary(summary: &SiteSummary) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Site Summary: {}", summary.site);
    let _ = writeln!(output, "- Users: {}", summary.total_site_users);
    let _ = writeln!(output, "- Courses: {}", summary.total_site_courses);
    let _ = writeln!(output, "- Enrollments: {}", summary.total_course_enrollments);
    output
}
