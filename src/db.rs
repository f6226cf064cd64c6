use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::models::{
    Certificate, Course, CourseAccessRole, CourseKey, Enrollment, LearnerProgress,
    OrganizationCourse, OrganizationSite, Profile, Site, User, UserOrganizationMapping,
};
use crate::pipeline_log::PipelineError;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

async fn upsert_site(pool: &PgPool, domain: &str, name: &str) -> anyhow::Result<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO progress_analytics.sites (domain, name)
        VALUES ($1, $2)
        ON CONFLICT (domain) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(domain)
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_organization(pool: &PgPool, short_name: &str, name: &str) -> anyhow::Result<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO progress_analytics.organizations (short_name, name)
        VALUES ($1, $2)
        ON CONFLICT (short_name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(short_name)
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_course(pool: &PgPool, key: &CourseKey, display_name: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO progress_analytics.courses (id, display_name, org, number)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name
        "#,
    )
    .bind(key.to_string())
    .bind(display_name)
    .bind(&key.org)
    .bind(&key.number)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    full_name: &str,
) -> anyhow::Result<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO progress_analytics.users (username, email)
        VALUES ($1, $2)
        ON CONFLICT (username) DO UPDATE SET email = EXCLUDED.email
        RETURNING id
        "#,
    )
    .bind(username)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");

    sqlx::query(
        r#"
        INSERT INTO progress_analytics.user_profiles (user_id, name)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(id)
    .bind(full_name)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn link_course(pool: &PgPool, organization_id: i64, key: &CourseKey) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO progress_analytics.organization_courses (organization_id, course_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(organization_id)
    .bind(key.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

async fn link_user(pool: &PgPool, organization_id: i64, user_id: i64) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO progress_analytics.user_organization_mappings (user_id, organization_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(organization_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_enrollment(
    pool: &PgPool,
    user_id: i64,
    key: &CourseKey,
    created: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO progress_analytics.enrollments (user_id, course_id, created)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, course_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(key.to_string())
    .bind(created)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_certificate(
    pool: &PgPool,
    user_id: i64,
    key: &CourseKey,
    created_date: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO progress_analytics.certificates (user_id, course_id, created_date)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, course_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(key.to_string())
    .bind(created_date)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_progress(
    pool: &PgPool,
    user_id: i64,
    key: &CourseKey,
    date_for: NaiveDate,
    progress_percent: f64,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO progress_analytics.learner_progress
        (user_id, course_id, date_for, progress_percent, sections_worked, sections_possible)
        VALUES ($1, $2, $3, $4, $5, 10)
        ON CONFLICT (user_id, course_id, date_for) DO UPDATE
        SET progress_percent = EXCLUDED.progress_percent,
            sections_worked = EXCLUDED.sections_worked
        "#,
    )
    .bind(user_id)
    .bind(key.to_string())
    .bind(date_for)
    .bind(progress_percent)
    .bind((progress_percent * 10.0).round() as i32)
    .execute(pool)
    .await?;
    Ok(())
}

/// Two sites: the default `example.com` and `alpha.site`, which owns the
/// AlphaOrg courses. Dates are relative to today so recent months have data.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let today = Utc::now().date_naive();

    upsert_site(pool, "example.com", "Example").await?;
    let alpha_site = upsert_site(pool, "alpha.site", "Alpha Academy").await?;
    let alpha_org = upsert_organization(pool, "AlphaOrg", "Alpha Organization").await?;
    sqlx::query(
        r#"
        INSERT INTO progress_analytics.organization_sites (organization_id, site_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(alpha_org)
    .bind(alpha_site)
    .execute(pool)
    .await?;

    let courses = vec![
        ("course-v1:AlphaOrg+A001+RUN", "Alpha Course 1", true),
        ("course-v1:AlphaOrg+A002+RUN", "Alpha Course 2", true),
        ("course-v1:BravoOrg+B001+RUN", "Bravo Course 1", false),
        ("course-v1:BravoOrg+B002+RUN", "Bravo Course 2", false),
    ];
    let mut keys = Vec::new();
    for (id, name, alpha_owned) in courses {
        let key: CourseKey = id.parse()?;
        upsert_course(pool, &key, name).await?;
        if alpha_owned {
            link_course(pool, alpha_org, &key).await?;
        }
        keys.push(key);
    }

    let learners = vec![
        ("alpha", "alpha@example.com", "Alpha One", true),
        ("alpha02", "alpha02@example.com", "Alpha Two", true),
        ("bravo", "bravo@example.com", "Bravo One", false),
        ("bravo02", "bravo02@example.com", "Bravo Two", false),
    ];
    let mut user_ids = Vec::new();
    for (username, email, full_name, alpha_member) in learners {
        let user_id = upsert_user(pool, username, email, full_name).await?;
        if alpha_member {
            link_user(pool, alpha_org, user_id).await?;
        }
        user_ids.push(user_id);
    }

    // (learner, course, enrolled days ago, progress, completed days ago)
    let activity: Vec<(usize, usize, i64, f64, Option<i64>)> = vec![
        (0, 0, 120, 1.0, Some(40)),
        (1, 0, 75, 0.55, None),
        (0, 1, 20, 0.25, None),
        (1, 1, 95, 1.0, Some(10)),
        (2, 2, 150, 0.8, None),
        (3, 2, 60, 1.0, Some(5)),
        (3, 3, 15, 0.1, None),
    ];
    for (learner, course, enrolled_days_ago, percent, completed_days_ago) in activity {
        let user_id = user_ids[learner];
        let key = &keys[course];
        let enrolled = today - Duration::days(enrolled_days_ago);
        insert_enrollment(pool, user_id, key, start_of_day(enrolled)).await?;
        upsert_progress(pool, user_id, key, today - Duration::days(2), percent).await?;
        if let Some(days_ago) = completed_days_ago {
            let completed = today - Duration::days(days_ago);
            insert_certificate(pool, user_id, key, start_of_day(completed)).await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO progress_analytics.course_access_roles (user_id, course_id, role)
        VALUES ($1, $2, 'instructor')
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_ids[1])
    .bind(keys[0].to_string())
    .execute(pool)
    .await?;

    info!(courses = keys.len(), learners = user_ids.len(), "seed data inserted");
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        username: String,
        email: String,
        full_name: String,
        course_id: String,
        course_name: Option<String>,
        organization: Option<String>,
        enrolled_at: NaiveDate,
        completed_at: Option<NaiveDate>,
        progress: Option<f64>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let key: CourseKey = row
            .course_id
            .parse()
            .with_context(|| format!("row {}: bad course id", line + 1))?;

        upsert_course(pool, &key, row.course_name.as_deref().unwrap_or(&key.number)).await?;
        let user_id = upsert_user(pool, &row.username, &row.email, &row.full_name).await?;

        if let Some(short_name) = row.organization.as_deref().filter(|s| !s.is_empty()) {
            let organization_id = upsert_organization(pool, short_name, short_name).await?;
            link_course(pool, organization_id, &key).await?;
            link_user(pool, organization_id, user_id).await?;
        }

        if insert_enrollment(pool, user_id, &key, start_of_day(row.enrolled_at)).await? {
            inserted += 1;
        }
        if let Some(completed_at) = row.completed_at {
            insert_certificate(pool, user_id, &key, start_of_day(completed_at)).await?;
        }
        if let Some(progress) = row.progress {
            let date_for = row.completed_at.unwrap_or(row.enrolled_at);
            upsert_progress(pool, user_id, &key, date_for, progress).await?;
        }
    }

    Ok(inserted)
}

fn course_key(raw: &str, table: &str) -> Option<CourseKey> {
    match raw.parse() {
        Ok(key) => Some(key),
        Err(err) => {
            warn!(table, %err, "skipping row with unparseable course id");
            None
        }
    }
}

pub async fn load_catalog(pool: &PgPool) -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::default();

    for row in sqlx::query("SELECT id, domain, name FROM progress_analytics.sites ORDER BY id")
        .fetch_all(pool)
        .await
        .context("failed to load sites")?
    {
        catalog.sites.push(Site {
            id: row.get("id"),
            domain: row.get("domain"),
            name: row.get("name"),
        });
    }

    for row in
        sqlx::query("SELECT organization_id, site_id FROM progress_analytics.organization_sites")
            .fetch_all(pool)
            .await?
    {
        catalog.organization_sites.push(OrganizationSite {
            organization_id: row.get("organization_id"),
            site_id: row.get("site_id"),
        });
    }

    for row in sqlx::query(
        "SELECT organization_id, course_id FROM progress_analytics.organization_courses",
    )
    .fetch_all(pool)
    .await?
    {
        let Some(course_id) = course_key(row.get("course_id"), "organization_courses") else {
            continue;
        };
        catalog.organization_courses.push(OrganizationCourse {
            organization_id: row.get("organization_id"),
            course_id,
        });
    }

    for row in sqlx::query(
        "SELECT user_id, organization_id FROM progress_analytics.user_organization_mappings",
    )
    .fetch_all(pool)
    .await?
    {
        catalog.user_organizations.push(UserOrganizationMapping {
            user_id: row.get("user_id"),
            organization_id: row.get("organization_id"),
        });
    }

    for row in sqlx::query(
        "SELECT id, display_name, org, number, enrollment_start, enrollment_end, self_paced \
         FROM progress_analytics.courses",
    )
    .fetch_all(pool)
    .await
    .context("failed to load courses")?
    {
        let Some(id) = course_key(row.get("id"), "courses") else {
            continue;
        };
        catalog.courses.push(Course {
            id,
            display_name: row.get("display_name"),
            org: row.get("org"),
            number: row.get("number"),
            enrollment_start: row.get("enrollment_start"),
            enrollment_end: row.get("enrollment_end"),
            self_paced: row.get("self_paced"),
        });
    }

    for row in sqlx::query(
        "SELECT u.id, u.username, u.email, u.is_active, u.date_joined, \
         p.user_id AS profile_user_id, p.name, p.country, p.year_of_birth, p.gender, \
         p.level_of_education, p.language, p.bio \
         FROM progress_analytics.users u \
         LEFT JOIN progress_analytics.user_profiles p ON p.user_id = u.id",
    )
    .fetch_all(pool)
    .await
    .context("failed to load users")?
    {
        let profile_user_id: Option<i64> = row.get("profile_user_id");
        let profile = profile_user_id.map(|_| Profile {
            name: row.get("name"),
            country: row.get("country"),
            year_of_birth: row.get("year_of_birth"),
            gender: row.get("gender"),
            level_of_education: row.get("level_of_education"),
            language: row.get("language"),
            bio: row.get("bio"),
        });
        catalog.users.push(User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            is_active: row.get("is_active"),
            date_joined: row.get("date_joined"),
            profile,
        });
    }

    for row in sqlx::query(
        "SELECT id, user_id, course_id, created, is_active FROM progress_analytics.enrollments",
    )
    .fetch_all(pool)
    .await
    .context("failed to load enrollments")?
    {
        let Some(course_id) = course_key(row.get("course_id"), "enrollments") else {
            continue;
        };
        catalog.enrollments.push(Enrollment {
            id: row.get("id"),
            user_id: row.get("user_id"),
            course_id,
            created: row.get("created"),
            is_active: row.get("is_active"),
        });
    }

    for row in sqlx::query(
        "SELECT id, user_id, course_id, created_date FROM progress_analytics.certificates",
    )
    .fetch_all(pool)
    .await?
    {
        let Some(course_id) = course_key(row.get("course_id"), "certificates") else {
            continue;
        };
        catalog.certificates.push(Certificate {
            id: row.get("id"),
            user_id: row.get("user_id"),
            course_id,
            created_date: row.get("created_date"),
        });
    }

    for row in sqlx::query(
        "SELECT user_id, course_id, date_for, progress_percent, sections_worked, sections_possible \
         FROM progress_analytics.learner_progress",
    )
    .fetch_all(pool)
    .await?
    {
        let Some(course_id) = course_key(row.get("course_id"), "learner_progress") else {
            continue;
        };
        catalog.progress.push(LearnerProgress {
            user_id: row.get("user_id"),
            course_id,
            date_for: row.get("date_for"),
            progress_percent: row.get("progress_percent"),
            sections_worked: row.get("sections_worked"),
            sections_possible: row.get("sections_possible"),
        });
    }

    for row in
        sqlx::query("SELECT user_id, course_id, role FROM progress_analytics.course_access_roles")
            .fetch_all(pool)
            .await?
    {
        let Some(course_id) = course_key(row.get("course_id"), "course_access_roles") else {
            continue;
        };
        catalog.access_roles.push(CourseAccessRole {
            user_id: row.get("user_id"),
            course_id,
            role: row.get("role"),
        });
    }

    info!(
        sites = catalog.sites.len(),
        courses = catalog.courses.len(),
        users = catalog.users.len(),
        enrollments = catalog.enrollments.len(),
        "catalog loaded"
    );
    Ok(catalog)
}

pub async fn persist_pipeline_errors(
    pool: &PgPool,
    errors: &[PipelineError],
) -> anyhow::Result<usize> {
    for error in errors {
        sqlx::query(
            r#"
            INSERT INTO progress_analytics.pipeline_errors
            (id, error_type, message, context, logged_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(error.error_type.as_str())
        .bind(&error.message)
        .bind(&error.context)
        .bind(error.logged_at)
        .execute(pool)
        .await?;
    }
    Ok(errors.len())
}
