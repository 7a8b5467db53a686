// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability model.
//!
//! A capability string has the form `category:scope`. A granted string
//! authorizes a requested one when they are equal, or when the granted string
//! ends in `:*` and the requested string starts with everything before the
//! `*`. A wildcard never crosses categories.

use std::fmt;
use std::str::FromStr;

use capstan_security::SensitivePaths;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Known capability categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CapabilityCategory {
    Api,
    Database,
    Files,
    Env,
    Exec,
    Cron,
}

impl CapabilityCategory {
    pub const ALL: [Self; 6] = [
        Self::Api,
        Self::Database,
        Self::Files,
        Self::Env,
        Self::Exec,
        Self::Cron,
    ];

    pub fn risk(self) -> RiskLevel {
        match self {
            Self::Files | Self::Cron => RiskLevel::Low,
            Self::Api | Self::Database => RiskLevel::Medium,
            Self::Env | Self::Exec => RiskLevel::High,
        }
    }
}

/// Risk attached to a capability, for display and audit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability '{0}' is not of the form category:scope")]
    Malformed(String),
    #[error("capability '{capability}' has unknown category '{category}'")]
    UnknownCategory { capability: String, category: String },
    #[error("capability '{0}' has an empty scope")]
    EmptyScope(String),
}

/// A parsed capability string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub category: CapabilityCategory,
    pub scope: String,
}

impl Capability {
    pub fn is_wildcard(&self) -> bool {
        self.scope == "*"
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, scope) = s
            .split_once(':')
            .ok_or_else(|| CapabilityError::Malformed(s.to_string()))?;
        let category = CapabilityCategory::from_str(category).map_err(|_| {
            CapabilityError::UnknownCategory {
                capability: s.to_string(),
                category: category.to_string(),
            }
        })?;
        if scope.trim().is_empty() {
            return Err(CapabilityError::EmptyScope(s.to_string()));
        }
        Ok(Self {
            category,
            scope: scope.to_string(),
        })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.scope)
    }
}

/// Why a capability check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub requested: String,
    pub reason: String,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.requested)
    }
}

/// Whether `granted` authorizes `requested`.
pub fn matches(granted: &str, requested: &str) -> bool {
    if granted == requested {
        return true;
    }
    match granted.strip_suffix('*') {
        Some(prefix) if prefix.ends_with(':') => requested.starts_with(prefix),
        _ => false,
    }
}

/// The first granted string that authorizes `requested`.
pub fn has_capability<'a>(granted: &'a [String], requested: &str) -> Result<&'a str, Denial> {
    granted
        .iter()
        .find(|g| matches(g, requested))
        .map(String::as_str)
        .ok_or_else(|| Denial {
            requested: requested.to_string(),
            reason: format!("capability '{requested}' is not granted"),
        })
}

fn first_of<'a>(granted: &'a [String], candidates: &[String]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|c| has_capability(granted, c).ok())
}

/// Table access: `database:<table>`, then `database:*`.
pub fn check_table_access<'a>(granted: &'a [String], table: &str) -> Result<&'a str, Denial> {
    first_of(
        granted,
        &[format!("database:{table}"), "database:*".to_string()],
    )
    .ok_or_else(|| Denial {
        requested: format!("database:{table}"),
        reason: format!("no access to table '{table}'"),
    })
}

/// Environment access: `env:<key>`, then `env:*`.
pub fn check_env_access<'a>(granted: &'a [String], key: &str) -> Result<&'a str, Denial> {
    first_of(granted, &[format!("env:{key}"), "env:*".to_string()]).ok_or_else(|| Denial {
        requested: format!("env:{key}"),
        reason: format!("no access to environment variable '{key}'"),
    })
}

pub fn check_file_read<'a>(granted: &'a [String], path: &str) -> Result<&'a str, Denial> {
    has_capability(granted, "files:read").map_err(|_| Denial {
        requested: "files:read".to_string(),
        reason: format!("no read access to '{path}'"),
    })
}

/// File writes need `files:write` and a path outside the sensitive denylist.
pub fn check_file_write<'a>(
    granted: &'a [String],
    path: &str,
    sensitive: &SensitivePaths,
) -> Result<&'a str, Denial> {
    let grant = has_capability(granted, "files:write").map_err(|_| Denial {
        requested: "files:write".to_string(),
        reason: format!("no write access to '{path}'"),
    })?;
    if let Some(rule) = sensitive.check(path) {
        return Err(Denial {
            requested: "files:write".to_string(),
            reason: format!("write refused: {rule}"),
        });
    }
    Ok(grant)
}

/// Risk of a single capability string. Unparseable strings count as high.
pub fn risk_of(capability: &str) -> RiskLevel {
    capability
        .parse::<Capability>()
        .map(|c| c.category.risk())
        .unwrap_or(RiskLevel::High)
}

/// `high` if any capability is high-risk, otherwise the maximum present.
pub fn aggregate_risk<S: AsRef<str>>(capabilities: &[S]) -> RiskLevel {
    capabilities
        .iter()
        .map(|c| risk_of(c.as_ref()))
        .max()
        .unwrap_or(RiskLevel::Low)
}

/// Grants not covered by any of the `declared` capabilities.
pub fn undeclared_grants<'a>(declared: &[String], granted: &'a [String]) -> Vec<&'a str> {
    granted
        .iter()
        .filter(|g| !declared.iter().any(|d| matches(d, g)))
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grants(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_and_wildcard_matching() {
        assert!(matches("database:leads", "database:leads"));
        assert!(matches("database:*", "database:leads"));
        assert!(!matches("database:leads", "database:users"));
        assert!(!matches("database:*", "env:API_KEY"));
        assert!(!matches("*", "database:leads"));
        assert!(!matches("database*", "database:leads"));
    }

    #[test]
    fn has_capability_returns_first_match() {
        let granted = grants(&["env:A", "database:*", "database:leads"]);
        assert_eq!(has_capability(&granted, "database:leads"), Ok("database:*"));
        let denial = has_capability(&granted, "files:write").unwrap_err();
        assert_eq!(denial.requested, "files:write");
    }

    #[test]
    fn table_access_checks_specific_then_wildcard() {
        let specific = grants(&["database:leads"]);
        assert_eq!(check_table_access(&specific, "leads"), Ok("database:leads"));
        assert!(check_table_access(&specific, "users").is_err());

        let wildcard = grants(&["database:*"]);
        assert_eq!(check_table_access(&wildcard, "users"), Ok("database:*"));
    }

    #[test]
    fn env_access() {
        let granted = grants(&["env:API_KEY"]);
        assert!(check_env_access(&granted, "API_KEY").is_ok());
        assert!(check_env_access(&granted, "OTHER").is_err());
    }

    #[test]
    fn sensitive_writes_denied_despite_grant() {
        let granted = grants(&["files:write"]);
        let policy = SensitivePaths::default();
        assert!(check_file_write(&granted, "site/index.html", &policy).is_ok());
        let denial = check_file_write(&granted, "config/.env", &policy).unwrap_err();
        assert!(denial.reason.contains("sensitive"));
        assert!(check_file_write(&grants(&["files:read"]), "a.txt", &policy).is_err());
        assert!(check_file_read(&grants(&["files:*"]), "a.txt").is_ok());
    }

    #[test]
    fn parse_rejects_unknown_and_empty() {
        assert!("database:leads".parse::<Capability>().is_ok());
        assert!(matches!(
            "network:x".parse::<Capability>(),
            Err(CapabilityError::UnknownCategory { .. })
        ));
        assert!(matches!(
            "database:".parse::<Capability>(),
            Err(CapabilityError::EmptyScope(_))
        ));
        assert!(matches!(
            "database".parse::<Capability>(),
            Err(CapabilityError::Malformed(_))
        ));
    }

    #[test]
    fn risk_aggregation() {
        assert_eq!(aggregate_risk::<String>(&[]), RiskLevel::Low);
        assert_eq!(aggregate_risk(&["files:write", "cron:daily"]), RiskLevel::Low);
        assert_eq!(aggregate_risk(&["files:write", "database:leads"]), RiskLevel::Medium);
        assert_eq!(aggregate_risk(&["database:leads", "env:TOKEN"]), RiskLevel::High);
    }

    #[test]
    fn undeclared_grants_are_reported() {
        let declared = grants(&["database:*", "env:API_KEY"]);
        let granted = grants(&["database:leads", "env:OTHER"]);
        assert_eq!(undeclared_grants(&declared, &granted), vec!["env:OTHER"]);
    }

    fn category() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["api", "database", "files", "env", "exec", "cron"])
            .prop_map(str::to_string)
    }

    proptest! {
        #[test]
        fn wildcard_never_grants_another_category(
            granted_cat in category(),
            requested_cat in category(),
            scope in "[a-z_]{1,12}",
        ) {
            let granted = format!("{granted_cat}:*");
            let requested = format!("{requested_cat}:{scope}");
            prop_assert_eq!(matches(&granted, &requested), granted_cat == requested_cat);
        }

        #[test]
        fn matching_is_exact_or_wildcard(g in "[a-z]{1,6}:[a-z*]{1,6}", r in "[a-z]{1,6}:[a-z]{1,6}") {
            let expected = g == r
                || (g.ends_with(":*") && r.starts_with(&g[..g.len() - 1]));
            prop_assert_eq!(matches(&g, &r), expected);
        }
    }
}
