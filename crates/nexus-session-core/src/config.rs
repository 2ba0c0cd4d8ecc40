use crate::profile::Role;

pub const ENV_PROFILE_COLLECTION: &str = "NEXUS_PROFILE_COLLECTION";
pub const ENV_DEFAULT_ROLE: &str = "NEXUS_DEFAULT_ROLE";
pub const ENV_ENFORCE_ACTIVE_TAB: &str = "NEXUS_ENFORCE_ACTIVE_TAB";

pub const DEFAULT_PROFILE_COLLECTION: &str = "normal_users";
const DEFAULT_ENFORCE_ACTIVE_TAB: bool = true;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid NEXUS_DEFAULT_ROLE value '{value}'")]
    InvalidDefaultRole { value: String },
    #[error("NEXUS_DEFAULT_ROLE must not grant '{role}'")]
    PrivilegedDefaultRole { role: Role },
    #[error("invalid {key} value '{value}': expected true/false")]
    InvalidBool { key: &'static str, value: String },
    #[error("NEXUS_PROFILE_COLLECTION must not contain '/'")]
    InvalidCollection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub profile_collection: String,
    /// Role assumed when a profile document has none. Never `SuperAdmin`.
    pub default_role: Option<Role>,
    pub enforce_active_tab: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            profile_collection: DEFAULT_PROFILE_COLLECTION.to_string(),
            default_role: None,
            enforce_active_tab: DEFAULT_ENFORCE_ACTIVE_TAB,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(collection) = env_non_empty(ENV_PROFILE_COLLECTION) {
            if collection.contains('/') {
                return Err(ConfigError::InvalidCollection);
            }
            config.profile_collection = collection;
        }

        if let Some(raw) = env_non_empty(ENV_DEFAULT_ROLE) {
            config = config.with_default_role(parse_default_role(&raw)?)?;
        }

        if let Some(raw) = env_non_empty(ENV_ENFORCE_ACTIVE_TAB) {
            config.enforce_active_tab =
                parse_bool(&raw).ok_or_else(|| ConfigError::InvalidBool {
                    key: ENV_ENFORCE_ACTIVE_TAB,
                    value: raw.clone(),
                })?;
        }

        Ok(config)
    }

    pub fn with_default_role(mut self, role: Role) -> Result<Self, ConfigError> {
        if role == Role::SuperAdmin {
            return Err(ConfigError::PrivilegedDefaultRole { role });
        }
        self.default_role = Some(role);
        Ok(self)
    }
}

fn parse_default_role(raw: &str) -> Result<Role, ConfigError> {
    Role::parse(raw).ok_or_else(|| ConfigError::InvalidDefaultRole {
        value: raw.to_string(),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn with_env<T>(overrides: &[(&str, Option<&str>)], test: impl FnOnce() -> T) -> T {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = overrides
            .iter()
            .map(|(key, _)| (*key, std::env::var(key).ok()))
            .collect::<Vec<_>>();

        for (key, value) in overrides {
            if let Some(value) = value {
                unsafe { std::env::set_var(key, value) };
            } else {
                unsafe { std::env::remove_var(key) };
            }
        }

        let result = test();

        for (key, value) in previous {
            if let Some(value) = value {
                unsafe { std::env::set_var(key, value) };
            } else {
                unsafe { std::env::remove_var(key) };
            }
        }

        result
    }

    fn cleared() -> [(&'static str, Option<&'static str>); 3] {
        [
            (ENV_PROFILE_COLLECTION, None),
            (ENV_DEFAULT_ROLE, None),
            (ENV_ENFORCE_ACTIVE_TAB, None),
        ]
    }

    #[test]
    fn defaults_fail_closed() {
        with_env(&cleared(), || {
            let config = CoordinatorConfig::from_env().expect("default config");
            assert_eq!(config, CoordinatorConfig::default());
            assert_eq!(config.profile_collection, "normal_users");
            assert_eq!(config.default_role, None);
            assert!(config.enforce_active_tab);
        });
    }

    #[test]
    fn env_overrides_are_applied() {
        with_env(
            &[
                (ENV_PROFILE_COLLECTION, Some(" staff ")),
                (ENV_DEFAULT_ROLE, Some("admin")),
                (ENV_ENFORCE_ACTIVE_TAB, Some("off")),
            ],
            || {
                let config = CoordinatorConfig::from_env().expect("config");
                assert_eq!(config.profile_collection, "staff");
                assert_eq!(config.default_role, Some(Role::Admin));
                assert!(!config.enforce_active_tab);
            },
        );
    }

    #[test]
    fn privileged_default_role_is_rejected() {
        with_env(
            &[
                (ENV_PROFILE_COLLECTION, None),
                (ENV_DEFAULT_ROLE, Some("super_admin")),
                (ENV_ENFORCE_ACTIVE_TAB, None),
            ],
            || {
                let error = CoordinatorConfig::from_env().expect_err("rejected");
                assert_eq!(
                    error,
                    ConfigError::PrivilegedDefaultRole {
                        role: Role::SuperAdmin
                    }
                );
            },
        );
    }

    #[test]
    fn malformed_values_are_errors() {
        with_env(
            &[
                (ENV_PROFILE_COLLECTION, None),
                (ENV_DEFAULT_ROLE, Some("guest")),
                (ENV_ENFORCE_ACTIVE_TAB, None),
            ],
            || {
                let error = CoordinatorConfig::from_env().expect_err("rejected");
                assert_eq!(
                    error,
                    ConfigError::InvalidDefaultRole {
                        value: "guest".to_string()
                    }
                );
            },
        );
        with_env(
            &[
                (ENV_PROFILE_COLLECTION, None),
                (ENV_DEFAULT_ROLE, None),
                (ENV_ENFORCE_ACTIVE_TAB, Some("sometimes")),
            ],
            || {
                let error = CoordinatorConfig::from_env().expect_err("rejected");
                assert_eq!(
                    error,
                    ConfigError::InvalidBool {
                        key: ENV_ENFORCE_ACTIVE_TAB,
                        value: "sometimes".to_string()
                    }
                );
            },
        );
        with_env(
            &[
                (ENV_PROFILE_COLLECTION, Some("users/admins")),
                (ENV_DEFAULT_ROLE, None),
                (ENV_ENFORCE_ACTIVE_TAB, None),
            ],
            || {
                assert_eq!(
                    CoordinatorConfig::from_env(),
                    Err(ConfigError::InvalidCollection)
                );
            },
        );
    }
}
