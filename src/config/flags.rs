//! Feature flag registry for the relational → document store migration.
//!
//! Each migrating domain has one flag. When a flag is on, that domain is read
//! from and written to the document store; otherwise the relational store
//! serves it. Flags declare prerequisites and a flag set that violates them
//! is rejected at construction, so an invalid combination can never reach the
//! request path. The registry is immutable once built.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::config::helpers::{optional_env, parse_bool_value};
use crate::error::ConfigError;

/// A domain whose storage backend is selected by a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Clients,
    Projects,
    Tasks,
    Auth,
}

impl Domain {
    pub const ALL: [Domain; 4] = [Self::Clients, Self::Projects, Self::Tasks, Self::Auth];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Projects => "projects",
            Self::Tasks => "tasks",
            Self::Auth => "auth",
        }
    }

    pub fn env_key(self) -> &'static str {
        match self {
            Self::Clients => "DOCSTORE_CLIENTS",
            Self::Projects => "DOCSTORE_PROJECTS",
            Self::Tasks => "DOCSTORE_TASKS",
            Self::Auth => "DOCSTORE_AUTH",
        }
    }

    /// Flags that must be on before this one may be turned on.
    ///
    /// Projects reference clients and tasks reference projects, so a child
    /// domain cannot move ahead of its parent.
    pub fn prerequisites(self) -> &'static [Domain] {
        match self {
            Self::Clients => &[],
            Self::Projects => &[Self::Clients],
            Self::Tasks => &[Self::Projects],
            Self::Auth => &[],
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clients" => Some(Self::Clients),
            "projects" => Some(Self::Projects),
            "tasks" => Some(Self::Tasks),
            "auth" => Some(Self::Auth),
            _ => None,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall migration progress derived from the enabled flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    NotStarted,
    Partial,
    Complete,
}

impl MigrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }
}

/// Validated, immutable set of enabled migration flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    enabled: BTreeSet<Domain>,
}

impl FeatureFlags {
    /// Build a registry from the enabled domains, enforcing prerequisites.
    pub fn new(enabled: impl IntoIterator<Item = Domain>) -> Result<Self, ConfigError> {
        let enabled: BTreeSet<Domain> = enabled.into_iter().collect();
        for flag in Domain::ALL {
            if !enabled.contains(&flag) {
                continue;
            }
            if let Some(missing) = flag
                .prerequisites()
                .iter()
                .find(|required| !enabled.contains(required))
            {
                return Err(ConfigError::FlagDependency {
                    flag: flag.env_key().to_string(),
                    requires: missing.env_key().to_string(),
                });
            }
        }
        Ok(Self { enabled })
    }

    /// Every domain served by the relational store.
    pub fn legacy() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut values = Vec::with_capacity(Domain::ALL.len());
        for domain in Domain::ALL {
            values.push((domain, optional_env(domain.env_key())?));
        }
        Self::from_values(values)
    }

    /// Resolve flags through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_values(
            Domain::ALL
                .into_iter()
                .map(|domain| (domain, lookup(domain.env_key())))
                .collect(),
        )
    }

    fn from_values(values: Vec<(Domain, Option<String>)>) -> Result<Self, ConfigError> {
        let mut enabled = Vec::new();
        for (domain, raw) in values {
            let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
                continue;
            };
            if parse_bool_value(domain.env_key(), &raw)? {
                enabled.push(domain);
            }
        }
        Self::new(enabled)
    }

    pub fn is_enabled(&self, domain: Domain) -> bool {
        self.enabled.contains(&domain)
    }

    pub fn enabled_flags(&self) -> BTreeSet<Domain> {
        self.enabled.clone()
    }

    pub fn migration_phase(&self) -> MigrationPhase {
        if self.enabled.is_empty() {
            MigrationPhase::NotStarted
        } else if self.enabled.len() == Domain::ALL.len() {
            MigrationPhase::Complete
        } else {
            MigrationPhase::Partial
        }
    }

    pub fn status(&self) -> FlagStatus {
        FlagStatus {
            phase: self.migration_phase(),
            enabled: self.enabled.iter().copied().collect(),
            flags: Domain::ALL
                .into_iter()
                .map(|domain| FlagState {
                    domain,
                    env_key: domain.env_key(),
                    enabled: self.is_enabled(domain),
                    requires: domain.prerequisites().to_vec(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagState {
    pub domain: Domain,
    pub env_key: &'static str,
    pub enabled: bool,
    pub requires: Vec<Domain>,
}

/// Serializable snapshot used by `GET /api/flags` and `agencyops flags`.
#[derive(Debug, Clone, Serialize)]
pub struct FlagStatus {
    pub phase: MigrationPhase,
    pub enabled: Vec<Domain>,
    pub flags: Vec<FlagState>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn no_flags_means_not_started() {
        let flags = FeatureFlags::from_lookup(lookup(&[])).expect("flags");
        assert_eq!(flags.migration_phase(), MigrationPhase::NotStarted);
        assert!(flags.enabled_flags().is_empty());
        for domain in Domain::ALL {
            assert!(!flags.is_enabled(domain));
        }
    }

    #[test]
    fn dependent_flag_without_prerequisite_is_rejected() {
        let err = FeatureFlags::from_lookup(lookup(&[("DOCSTORE_PROJECTS", "true")]))
            .expect_err("projects without clients must fail");
        let ConfigError::FlagDependency { flag, requires } = err else {
            panic!("expected FlagDependency");
        };
        assert_eq!(flag, "DOCSTORE_PROJECTS");
        assert_eq!(requires, "DOCSTORE_CLIENTS");
    }

    #[test]
    fn every_declared_prerequisite_is_enforced() {
        for domain in Domain::ALL {
            for required in domain.prerequisites() {
                let others: Vec<Domain> = Domain::ALL
                    .into_iter()
                    .filter(|d| d != required)
                    .collect();
                assert!(
                    FeatureFlags::new(others).is_err(),
                    "{domain} must require {required}"
                );
            }
        }
    }

    #[test]
    fn tasks_needs_the_whole_chain() {
        assert!(FeatureFlags::new([Domain::Tasks, Domain::Projects]).is_err());
        let flags =
            FeatureFlags::new([Domain::Tasks, Domain::Projects, Domain::Clients]).expect("valid");
        assert_eq!(flags.migration_phase(), MigrationPhase::Partial);
    }

    #[test]
    fn all_flags_is_complete() {
        let flags = FeatureFlags::new(Domain::ALL).expect("valid");
        assert_eq!(flags.migration_phase(), MigrationPhase::Complete);
        assert_eq!(flags.status().enabled.len(), 4);
    }

    #[test]
    fn false_values_do_not_enable() {
        let flags = FeatureFlags::from_lookup(lookup(&[
            ("DOCSTORE_CLIENTS", "false"),
            ("DOCSTORE_AUTH", "1"),
        ]))
        .expect("flags");
        assert!(!flags.is_enabled(Domain::Clients));
        assert!(flags.is_enabled(Domain::Auth));
        assert_eq!(flags.migration_phase(), MigrationPhase::Partial);
    }

    #[test]
    fn malformed_flag_value_is_a_config_error() {
        let err = FeatureFlags::from_lookup(lookup(&[("DOCSTORE_TASKS", "sometimes")]))
            .expect_err("must reject");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
