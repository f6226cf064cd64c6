use std::env;

use crate::error::AnalyticsError;

pub const DEFAULT_HISTORY_MONTHS_BACK: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    /// One implicit site owns every course and user.
    Standalone,
    /// Sites are scoped through organization membership.
    Multisite,
}

impl DeploymentMode {
    pub fn from_flag(is_multisite: bool) -> Self {
        if is_multisite {
            DeploymentMode::Multisite
        } else {
            DeploymentMode::Standalone
        }
    }

    pub fn is_multisite(self) -> bool {
        self == DeploymentMode::Multisite
    }
}

/// Process configuration, read once at start-up and passed by reference to
/// the resolver and the report builders.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: DeploymentMode,
    /// Whether the organization membership data can link organizations to
    /// sites. Without it multisite scoping degrades to empty results.
    pub organizations_support_sites: bool,
    pub history_months_back: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Standalone,
            organizations_support_sites: true,
            history_months_back: DEFAULT_HISTORY_MONTHS_BACK,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AnalyticsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AnalyticsError> {
        let is_multisite = parse_bool("IS_MULTISITE", lookup("IS_MULTISITE"), false)?;
        let organizations_support_sites = parse_bool(
            "ORGANIZATIONS_SUPPORT_SITES",
            lookup("ORGANIZATIONS_SUPPORT_SITES"),
            true,
        )?;
        let history_months_back = match lookup("HISTORY_MONTHS_BACK") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                AnalyticsError::Misconfiguration(format!(
                    "HISTORY_MONTHS_BACK must be a non-negative integer, got {raw:?}"
                ))
            })?,
            None => DEFAULT_HISTORY_MONTHS_BACK,
        };

        Ok(Self {
            mode: DeploymentMode::from_flag(is_multisite),
            organizations_support_sites,
            history_months_back,
        })
    }
}

#[cfg(test)]
impl Settings {
    pub fn standalone() -> Self {
        Self::default()
    }

    pub fn multisite() -> Self {
        Self {
            mode: DeploymentMode::Multisite,
            ..Self::default()
        }
    }
}

fn parse_bool(name: &str, raw: Option<String>, default: bool) -> Result<bool, AnalyticsError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AnalyticsError::Misconfiguration(format!(
            "{name} must be true or false, got {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use test_case::test_case;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings, AnalyticsError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test_case(None, false ; "unset uses default")]
    #[test_case(Some(""), false ; "blank uses default")]
    #[test_case(Some("True"), true ; "mixed case")]
    #[test_case(Some("1"), true ; "numeric on")]
    #[test_case(Some("off"), false ; "word off")]
    fn bool_flags_parse(raw: Option<&str>, expected: bool) {
        let parsed = parse_bool("IS_MULTISITE", raw.map(str::to_string), false).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn malformed_flag_is_misconfiguration() {
        let err = parse_bool("IS_MULTISITE", Some("maybe".to_string()), false).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn constructors_select_mode() {
        assert!(!Settings::standalone().mode.is_multisite());
        assert!(Settings::multisite().mode.is_multisite());
        assert_eq!(Settings::default().history_months_back, 6);
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.mode, DeploymentMode::Standalone);
        assert!(settings.organizations_support_sites);
        assert_eq!(settings.history_months_back, DEFAULT_HISTORY_MONTHS_BACK);
    }

    #[test]
    fn environment_overrides_every_setting() {
        let settings = settings_from(&[
            ("IS_MULTISITE", "true"),
            ("ORGANIZATIONS_SUPPORT_SITES", "false"),
            ("HISTORY_MONTHS_BACK", " 12 "),
        ])
        .unwrap();
        assert_eq!(settings.mode, DeploymentMode::Multisite);
        assert!(!settings.organizations_support_sites);
        assert_eq!(settings.history_months_back, 12);
    }

    #[test_case("twelve" ; "word")]
    #[test_case("-1" ; "negative")]
    #[test_case("" ; "blank")]
    fn malformed_months_back_is_misconfiguration(raw: &str) {
        let err = settings_from(&[("HISTORY_MONTHS_BACK", raw)]).unwrap_err();
        assert!(matches!(err, AnalyticsError::Misconfiguration(ref message)
            if message.contains("HISTORY_MONTHS_BACK")));
    }
}
