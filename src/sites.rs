//! Site scoping for standalone and multisite deployments.
//!
//! In standalone mode the single site owns every course, user and
//! enrollment. In multisite mode ownership follows organization membership:
//! a site is linked to organizations, organizations to courses and users.
//! Every collection returned here is deduplicated and ordered by key.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::{DeploymentMode, Settings};
use crate::error::AnalyticsError;
use crate::models::{Course, CourseKey, Enrollment, Site, User};

/// A site together with the course keys it owns.
pub struct SiteScope<'a> {
    pub site: &'a Site,
    course_keys: BTreeSet<CourseKey>,
}

impl SiteScope<'_> {
    pub fn contains_course(&self, course_id: &CourseKey) -> bool {
        self.course_keys.contains(course_id)
    }
}

pub struct SiteResolver<'a> {
    catalog: &'a Catalog,
    settings: &'a Settings,
}

impl<'a> SiteResolver<'a> {
    pub fn new(catalog: &'a Catalog, settings: &'a Settings) -> Self {
        Self { catalog, settings }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn mode(&self) -> DeploymentMode {
        self.settings.mode
    }

    /// The implicit site of a standalone deployment. Having no site at all
    /// is fatal.
    pub fn default_site(&self) -> Result<&'a Site, AnalyticsError> {
        self.catalog
            .sites
            .iter()
            .min_by_key(|site| site.id)
            .ok_or_else(|| {
                AnalyticsError::Misconfiguration("no site is configured".to_string())
            })
    }

    pub fn get_site_by_domain(&self, domain: &str) -> Option<&'a Site> {
        self.catalog.site_by_domain(domain)
    }

    /// `Ok(None)` means the course cannot be scoped to a site.
    pub fn get_site_for_course(
        &self,
        course_id: Option<&str>,
    ) -> Result<Option<&'a Site>, AnalyticsError> {
        if self.settings.mode == DeploymentMode::Standalone {
            return self.default_site().map(Some);
        }

        let Some(raw) = course_id.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        let course_key: CourseKey = match raw.parse() {
            Ok(key) => key,
            Err(err) => {
                debug!(%err, "course id cannot be scoped to a site");
                return Ok(None);
            }
        };
        if !self.settings.organizations_support_sites {
            return Ok(None);
        }

        let organization_ids: BTreeSet<i64> = self
            .catalog
            .organization_courses
            .iter()
            .filter(|link| link.course_id == course_key)
            .map(|link| link.organization_id)
            .collect();
        let site_ids: BTreeSet<i64> = self
            .catalog
            .organization_sites
            .iter()
            .filter(|link| organization_ids.contains(&link.organization_id))
            .map(|link| link.site_id)
            .collect();

        match site_ids.len() {
            0 => Ok(None),
            1 => Ok(site_ids
                .iter()
                .next()
                .and_then(|site_id| self.catalog.site(*site_id))),
            _ => {
                warn!(
                    course_id = %course_key,
                    sites = ?site_ids,
                    "course is linked to more than one site; refusing to scope it"
                );
                Ok(None)
            }
        }
    }

    fn organization_ids_for_site(&self, site: &Site) -> BTreeSet<i64> {
        if !self.settings.organizations_support_sites {
            return BTreeSet::new();
        }
        self.catalog
            .organization_sites
            .iter()
            .filter(|link| link.site_id == site.id)
            .map(|link| link.organization_id)
            .collect()
    }

    pub fn get_course_keys_for_site(&self, site: &Site) -> BTreeSet<CourseKey> {
        match self.settings.mode {
            DeploymentMode::Standalone => self
                .catalog
                .courses
                .iter()
                .map(|course| course.id.clone())
                .collect(),
            DeploymentMode::Multisite => {
                let organization_ids = self.organization_ids_for_site(site);
                self.catalog
                    .organization_courses
                    .iter()
                    .filter(|link| organization_ids.contains(&link.organization_id))
                    .map(|link| link.course_id.clone())
                    .collect()
            }
        }
    }

    /// Resolves the site's course keys once so per-month metric calls can
    /// check membership without rebuilding them.
    pub fn scope(&self, site: &'a Site) -> SiteScope<'a> {
        SiteScope {
            site,
            course_keys: self.get_course_keys_for_site(site),
        }
    }

    pub fn get_courses_for_site(&self, site: &Site) -> Vec<&'a Course> {
        let keys = self.get_course_keys_for_site(site);
        let mut courses: Vec<&Course> = self
            .catalog
            .courses
            .iter()
            .filter(|course| keys.contains(&course.id))
            .collect();
        courses.sort_by(|a, b| a.id.cmp(&b.id));
        courses.dedup_by(|a, b| a.id == b.id);
        courses
    }

    pub fn get_user_ids_for_site(&self, site: &Site) -> BTreeSet<i64> {
        match self.settings.mode {
            DeploymentMode::Standalone => self.catalog.users.iter().map(|user| user.id).collect(),
            DeploymentMode::Multisite => {
                let organization_ids = self.organization_ids_for_site(site);
                let member_ids: BTreeSet<i64> = self
                    .catalog
                    .user_organizations
                    .iter()
                    .filter(|mapping| organization_ids.contains(&mapping.organization_id))
                    .map(|mapping| mapping.user_id)
                    .collect();
                self.catalog
                    .users
                    .iter()
                    .map(|user| user.id)
                    .filter(|user_id| member_ids.contains(user_id))
                    .collect()
            }
        }
    }

    pub fn get_users_for_site(&self, site: &Site) -> Vec<&'a User> {
        self.get_user_ids_for_site(site)
            .into_iter()
            .filter_map(|user_id| self.catalog.user(user_id))
            .collect()
    }

    pub fn get_course_enrollments_for_site(&self, site: &Site) -> Vec<&'a Enrollment> {
        let keys = self.get_course_keys_for_site(site);
        let mut enrollments: Vec<&Enrollment> = self
            .catalog
            .enrollments
            .iter()
            .filter(|enrollment| keys.contains(&enrollment.course_id))
            .collect();
        enrollments.sort_by_key(|enrollment| enrollment.id);
        enrollments.dedup_by_key(|enrollment| enrollment.id);
        enrollments
    }
}
