use crate::models::{
    Certificate, Course, CourseAccessRole, CourseKey, Enrollment, LearnerProgress,
    OrganizationCourse, OrganizationSite, Site, User, UserOrganizationMapping,
};

/// Read-only snapshot of the platform collections the analytics read from.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub sites: Vec<Site>,
    pub organization_sites: Vec<OrganizationSite>,
    pub organization_courses: Vec<OrganizationCourse>,
    pub user_organizations: Vec<UserOrganizationMapping>,
    pub courses: Vec<Course>,
    pub users: Vec<User>,
    pub enrollments: Vec<Enrollment>,
    pub certificates: Vec<Certificate>,
    pub progress: Vec<LearnerProgress>,
    pub access_roles: Vec<CourseAccessRole>,
}

impl Catalog {
    pub fn course(&self, course_id: &CourseKey) -> Option<&Course> {
        self.courses.iter().find(|course| &course.id == course_id)
    }

    pub fn user(&self, user_id: i64) -> Option<&User> {
        self.users.iter().find(|user| user.id == user_id)
    }

    pub fn site(&self, site_id: i64) -> Option<&Site> {
        self.sites.iter().find(|site| site.id == site_id)
    }

    pub fn site_by_domain(&self, domain: &str) -> Option<&Site> {
        self.sites
            .iter()
            .find(|site| site.domain.eq_ignore_ascii_case(domain))
    }

    pub fn enrollments_for_course<'a>(
        &'a self,
        course_id: &'a CourseKey,
    ) -> impl Iterator<Item = &'a Enrollment> + 'a {
        self.enrollments
            .iter()
            .filter(move |enrollment| &enrollment.course_id == course_id)
    }

    pub fn enrollments_for_user(&self, user_id: i64) -> impl Iterator<Item = &Enrollment> + '_ {
        self.enrollments
            .iter()
            .filter(move |enrollment| enrollment.user_id == user_id)
    }

    pub fn certificates_for_course<'a>(
        &'a self,
        course_id: &'a CourseKey,
    ) -> impl Iterator<Item = &'a Certificate> + 'a {
        self.certificates
            .iter()
            .filter(move |certificate| &certificate.course_id == course_id)
    }

    pub fn certificate_for(&self, user_id: i64, course_id: &CourseKey) -> Option<&Certificate> {
        self.certificates
            .iter()
            .filter(|certificate| {
                certificate.user_id == user_id && &certificate.course_id == course_id
            })
            .min_by_key(|certificate| certificate.created_date)
    }

    pub fn enrollment_for(&self, user_id: i64, course_id: &CourseKey) -> Option<&Enrollment> {
        self.enrollments
            .iter()
            .filter(|enrollment| {
                enrollment.user_id == user_id && &enrollment.course_id == course_id
            })
            .min_by_key(|enrollment| enrollment.created)
    }

    pub fn progress_for_course<'a>(
        &'a self,
        course_id: &'a CourseKey,
    ) -> impl Iterator<Item = &'a LearnerProgress> + 'a {
        self.progress
            .iter()
            .filter(move |record| &record.course_id == course_id)
    }

    /// Latest progress snapshot for one learner in one course.
    pub fn most_recent_progress(
        &self,
        user_id: i64,
        course_id: &CourseKey,
    ) -> Option<&LearnerProgress> {
        self.progress
            .iter()
            .filter(|record| record.user_id == user_id && &record.course_id == course_id)
            .max_by_key(|record| record.date_for)
    }

    pub fn access_roles_for_course<'a>(
        &'a self,
        course_id: &'a CourseKey,
    ) -> impl Iterator<Item = &'a CourseAccessRole> + 'a {
        self.access_roles
            .iter()
            .filter(move |role| &role.course_id == course_id)
    }
}
