//! Attribute-to-authorization mapping.
//!
//! Facts are derived on demand from a principal's attributes and the
//! process-wide [`MappingConfig`]. They are recomputed every time
//! authorization is requested and never persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{config::MappingConfig, saml::AttributeMap};

/// Roles and permissions granted to an authenticated subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationFacts {
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

impl AuthorizationFacts {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Compute the roles and permissions for `attributes`.
///
/// Defaults are always granted. Each attribute listed in
/// `role_attribute_names` contributes all of its values as roles, and the
/// same for permissions. Listed attributes missing from `attributes`
/// contribute nothing. Never fails: malformed list strings degrade through
/// [`split_list`](crate::config::split_list).
pub fn authorize(attributes: &AttributeMap, config: &MappingConfig) -> AuthorizationFacts {
    let mut roles: BTreeSet<String> = config.default_roles().into_iter().collect();
    let mut permissions: BTreeSet<String> = config.default_permissions().into_iter().collect();

    grant_from(attributes, &config.role_attribute_names(), &mut roles);
    grant_from(attributes, &config.permission_attribute_names(), &mut permissions);

    tracing::trace!(
        roles = roles.len(),
        permissions = permissions.len(),
        "Computed authorization facts"
    );

    AuthorizationFacts { roles, permissions }
}

fn grant_from(attributes: &AttributeMap, names: &[String], granted: &mut BTreeSet<String>) {
    for name in names {
        if let Some(values) = attributes.get(name) {
            granted.extend(values.iter().cloned());
        }
    }
}
