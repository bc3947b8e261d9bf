//! Three-tier parameter resolution: explicit argument, then the client
//! instance's defaults, then the process-wide defaults installed by
//! [`setup`].

use crate::error::TrackerError;
use std::sync::{OnceLock, RwLock};
use tracing::debug;

/// Default timeout for new allocations, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// One tier of default values. Unset fields fall through to the next tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub url: Option<String>,
    pub application: Option<String>,
    pub module: Option<String>,
    pub resource_owner: Option<String>,
    pub resource_type: Option<String>,
    pub timeout: Option<u64>,
}

impl Defaults {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

static PROCESS_DEFAULTS: OnceLock<RwLock<Defaults>> = OnceLock::new();

fn process_defaults() -> &'static RwLock<Defaults> {
    PROCESS_DEFAULTS.get_or_init(|| RwLock::new(Defaults::default()))
}

/// Installs the process-wide default tier, replacing any previous one.
///
/// Calling this is optional.
pub fn setup(defaults: Defaults) {
    debug!(?defaults, "Installing process-wide defaults");
    let mut slot = process_defaults()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = defaults;
}

/// A snapshot of the process-wide default tier.
pub fn process_wide() -> Defaults {
    process_defaults()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// First value present in `explicit`, `instance`, `global`; otherwise
/// [`TrackerError::MissingConfiguration`] naming `argument`.
pub(crate) fn resolve<T: Clone>(
    argument: &'static str,
    explicit: Option<T>,
    instance: &Option<T>,
    global: &Option<T>,
) -> Result<T, TrackerError> {
    explicit
        .or_else(|| instance.clone())
        .or_else(|| global.clone())
        .ok_or(TrackerError::MissingConfiguration(argument))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_beats_instance_beats_global() {
        let instance = Some("instance".to_string());
        let global = Some("global".to_string());

        let explicit = resolve("application", Some("explicit".to_string()), &instance, &global);
        assert_eq!(explicit.unwrap(), "explicit");
        assert_eq!(resolve("application", None, &instance, &global).unwrap(), "instance");
        assert_eq!(resolve("application", None, &None, &global).unwrap(), "global");
    }

    #[test]
    fn test_missing_at_every_tier() {
        let result = resolve::<String>("resource_type", None, &None, &None);
        match result {
            Err(TrackerError::MissingConfiguration(name)) => assert_eq!(name, "resource_type"),
            other => panic!("Expected MissingConfiguration, got {other:?}"),
        }
    }
}
