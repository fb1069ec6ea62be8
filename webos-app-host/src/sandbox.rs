//! Per-app sandbox policy, the single gate for privileged operations.
//!
//! A `SandboxPolicy` is built once from a descriptor's security section and
//! is immutable afterwards. Every privileged action a container performs
//! goes through [`SandboxPolicy::validate_operation`], which:
//! - maps the operation to its required permission and checks the grant
//! - rejects the operation if any restriction rule matches it in context
//!
//! The sandbox also keeps check/denial counters for monitoring. Teardown
//! stops monitoring and makes every later check fail.

use crate::descriptor::SecurityConfig;
use crate::error::{AppHostError, AppHostResult};
use crate::permissions::{Permission, PermissionSet, operations};
use crate::policy::PolicyEngine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};
use webos_types::AppId;

/// Isolation level requested by a descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    #[default]
    Standard,
    High,
}

/// Key/value context accompanying an operation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationContext(Map<String, Value>);

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Condition under which a restriction rule applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum ContextPredicate {
    /// Matches every context.
    #[default]
    Always,
    /// Matches when `key` is present with exactly `value`.
    Equals { key: String, value: Value },
    /// Matches when `key` is present at all.
    Present { key: String },
    /// Matches when `key` is missing, not a string, or a path that escapes
    /// `prefix`.
    PathOutside { key: String, prefix: String },
}

impl ContextPredicate {
    pub fn matches(&self, context: &OperationContext) -> bool {
        match self {
            Self::Always => true,
            Self::Equals { key, value } => context.get(key) == Some(value),
            Self::Present { key } => context.get(key).is_some(),
            Self::PathOutside { key, prefix } => match context.get(key).and_then(Value::as_str) {
                Some(path) => !path_within(path, prefix),
                None => true,
            },
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            Self::Always => None,
            Self::Equals { key, .. } | Self::Present { key } | Self::PathOutside { key, .. } => {
                Some(key)
            }
        }
    }
}

fn path_within(path: &str, prefix: &str) -> bool {
    if path.split('/').any(|segment| segment == "..") {
        return false;
    }
    let prefix = prefix.trim_end_matches('/');
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// An operation name plus the context in which it is restricted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictionRule {
    pub operation: String,
    #[serde(default)]
    pub when: ContextPredicate,
}

impl RestrictionRule {
    pub fn new(operation: impl Into<String>, when: ContextPredicate) -> Self {
        Self {
            operation: operation.into(),
            when,
        }
    }

    fn matches(&self, operation: &str, context: &OperationContext) -> bool {
        self.operation == operation && self.when.matches(context)
    }
}

/// Monitoring counters for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SandboxMetrics {
    pub checks: u64,
    pub denials: u64,
    pub active: bool,
}

/// Granted permissions and restriction rules for one app instance.
#[derive(Debug)]
pub struct SandboxPolicy {
    app_id: AppId,
    permissions: PermissionSet,
    restrictions: Vec<RestrictionRule>,
    isolation: IsolationLevel,
    active: AtomicBool,
    checks: AtomicU64,
    denials: AtomicU64,
}

impl SandboxPolicy {
    /// Builds a sandbox from a security configuration.
    pub fn initialize(app_id: AppId, config: &SecurityConfig) -> AppHostResult<Self> {
        let invalid = |reason: String| AppHostError::InvalidSecurityConfig {
            app_id: app_id.clone(),
            reason,
        };

        let permissions =
            PermissionSet::from_names(&config.permissions).map_err(|e| invalid(e.to_string()))?;

        for rule in &config.restrictions {
            if rule.operation.trim().is_empty() {
                return Err(invalid("restriction rule with empty operation".into()));
            }
            if rule.when.key().is_some_and(|k| k.trim().is_empty()) {
                return Err(invalid(format!(
                    "restriction on '{}' has an empty context key",
                    rule.operation
                )));
            }
        }

        let mut restrictions = config.restrictions.clone();
        if config.isolation_level == IsolationLevel::High {
            restrictions.extend(high_isolation_rules(&app_id));
        }

        debug!(
            app_id = %app_id,
            permissions = permissions.len(),
            restrictions = restrictions.len(),
            isolation = ?config.isolation_level,
            "Sandbox initialized"
        );

        Ok(Self {
            app_id,
            permissions,
            restrictions,
            isolation: config.isolation_level,
            active: AtomicBool::new(true),
            checks: AtomicU64::new(0),
            denials: AtomicU64::new(0),
        })
    }

    /// Builds a sandbox after applying desktop policy: permissions the policy
    /// denies are never granted, and forced high isolation overrides the
    /// descriptor.
    pub fn initialize_with_policy(
        app_id: AppId,
        config: &SecurityConfig,
        policy: &PolicyEngine,
    ) -> AppHostResult<Self> {
        let mut effective = config.clone();
        effective.permissions.retain(|name| {
            let denied = name
                .parse::<Permission>()
                .is_ok_and(|p| policy.is_permission_denied_by_policy(p));
            if denied {
                debug!(app_id = %app_id, permission = %name, "Permission withheld by policy");
            }
            !denied
        });
        if policy.forces_high_isolation() {
            effective.isolation_level = IsolationLevel::High;
        }
        Self::initialize(app_id, &effective)
    }

    /// Checks whether `operation` may run in `context`.
    pub fn validate_operation(
        &self,
        operation: &str,
        context: &OperationContext,
    ) -> AppHostResult<()> {
        if !self.active.load(Ordering::Acquire) {
            return Err(AppHostError::SandboxTornDown(self.app_id.clone()));
        }
        self.checks.fetch_add(1, Ordering::Relaxed);

        let required = Permission::required_for(operation);
        if !self.permissions.is_granted(required) {
            self.denials.fetch_add(1, Ordering::Relaxed);
            warn!(
                app_id = %self.app_id,
                operation,
                permission = %required,
                "Sandbox denied operation: missing permission"
            );
            return Err(AppHostError::PermissionDenied {
                app_id: self.app_id.clone(),
                operation: operation.to_string(),
                permission: required.name().to_string(),
            });
        }

        if self.restrictions.iter().any(|r| r.matches(operation, context)) {
            self.denials.fetch_add(1, Ordering::Relaxed);
            warn!(app_id = %self.app_id, operation, "Sandbox denied operation: restricted");
            return Err(AppHostError::OperationRestricted {
                app_id: self.app_id.clone(),
                operation: operation.to_string(),
            });
        }

        Ok(())
    }

    /// Stops monitoring. Later checks fail with `SandboxTornDown`.
    pub fn teardown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(app_id = %self.app_id, "Sandbox torn down");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> SandboxMetrics {
        SandboxMetrics {
            checks: self.checks.load(Ordering::Relaxed),
            denials: self.denials.load(Ordering::Relaxed),
            active: self.is_active(),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn restrictions(&self) -> &[RestrictionRule] {
        &self.restrictions
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// Directory an app may touch under high isolation.
pub fn app_home(app_id: &AppId) -> String {
    format!("/apps/{app_id}")
}

fn high_isolation_rules(app_id: &AppId) -> [RestrictionRule; 2] {
    [
        RestrictionRule::new(
            operations::FILE_ACCESS,
            ContextPredicate::PathOutside {
                key: "path".into(),
                prefix: app_home(app_id),
            },
        ),
        RestrictionRule::new(
            operations::NETWORK_REQUEST,
            ContextPredicate::Equals {
                key: "cross_origin".into(),
                value: Value::Bool(true),
            },
        ),
    ]
}
