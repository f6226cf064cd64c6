//! Catalog fixtures shared by the unit tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::catalog::Catalog;
use crate::models::{
    Certificate, Course, CourseKey, Enrollment, LearnerProgress, OrganizationCourse,
    OrganizationSite, Profile, Site, User, UserOrganizationMapping,
};

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn site(id: i64, domain: &str) -> Site {
    Site {
        id,
        domain: domain.to_string(),
        name: domain.to_string(),
    }
}

pub fn course(org: &str, number: &str) -> Course {
    Course {
        id: CourseKey::new(org, number, "2161"),
        display_name: format!("{org} {number}"),
        org: org.to_string(),
        number: number.to_string(),
        enrollment_start: None,
        enrollment_end: None,
        self_paced: false,
    }
}

pub fn user(id: i64, username: &str) -> User {
    User {
        id,
        username: username.to_string(),
        email: format!("{username}@example.com"),
        is_active: true,
        date_joined: at(2023, 1, 10),
        profile: Some(Profile {
            name: username.to_uppercase(),
            country: Some("US".to_string()),
            year_of_birth: Some(1990),
            gender: None,
            level_of_education: None,
            language: None,
            bio: None,
        }),
    }
}

pub fn enrollment(
    id: i64,
    user_id: i64,
    course_id: &CourseKey,
    created: DateTime<Utc>,
) -> Enrollment {
    Enrollment {
        id,
        user_id,
        course_id: course_id.clone(),
        created,
        is_active: true,
    }
}

pub fn certificate(
    id: i64,
    user_id: i64,
    course_id: &CourseKey,
    created_date: DateTime<Utc>,
) -> Certificate {
    Certificate {
        id,
        user_id,
        course_id: course_id.clone(),
        created_date,
    }
}

pub fn progress(
    user_id: i64,
    course_id: &CourseKey,
    date_for: NaiveDate,
    percent: f64,
) -> LearnerProgress {
    LearnerProgress {
        user_id,
        course_id: course_id.clone(),
        date_for,
        progress_percent: percent,
        sections_worked: (percent * 10.0).round() as i32,
        sections_possible: 10,
    }
}

/// One site, a handful of courses, no organizations.
pub fn standalone_catalog(course_count: usize) -> Catalog {
    Catalog {
        sites: vec![site(1, "example.com")],
        courses: (0..course_count)
            .map(|i| course("StarFleetAcademy", &format!("SFA{i:02}")))
            .collect(),
        ..Catalog::default()
    }
}

/// The default site plus `foo.test`, linked through one organization.
pub fn multisite_catalog() -> Catalog {
    Catalog {
        sites: vec![site(1, "example.com"), site(2, "foo.test")],
        organization_sites: vec![OrganizationSite {
            organization_id: 10,
            site_id: 2,
        }],
        ..Catalog::default()
    }
}

pub fn link_course(catalog: &mut Catalog, organization_id: i64, course: Course) -> CourseKey {
    let key = course.id.clone();
    catalog.organization_courses.push(OrganizationCourse {
        organization_id,
        course_id: key.clone(),
    });
    catalog.courses.push(course);
    key
}

pub fn link_user(catalog: &mut Catalog, organization_id: i64, user: User) {
    catalog.user_organizations.push(UserOrganizationMapping {
        user_id: user.id,
        organization_id,
    });
    catalog.users.push(user);
}
