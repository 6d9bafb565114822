//! Subscription identity: the (project, subscription) pair naming a queue partition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// ============================================================================
// Project Identifier
// ============================================================================

/// Validated project identifier
///
/// Accepts plain ids (`my-project-001`) as well as legacy domain-scoped ids
/// (`example.com:my-project`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Create new project ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "project_id".to_string(),
            });
        }

        if id.len() > 100 {
            return Err(ValidationError::OutOfRange {
                field: "project_id".to_string(),
                message: "maximum 100 characters".to_string(),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "project_id".to_string(),
                message: "only ASCII alphanumeric, hyphens, periods and colons allowed"
                    .to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get project ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

// ============================================================================
// Subscription Identifier
// ============================================================================

/// Validated subscription identifier
///
/// # Validation Rules
/// - 3-255 characters
/// - Must start with a letter
/// - Letters, digits, `-`, `_`, `.`, `~`, `+`, `%` only
/// - Must not start with `goog` (reserved)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create new subscription ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "subscription_id".to_string(),
            });
        }

        if id.len() < 3 || id.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "subscription_id".to_string(),
                message: "must be 3-255 characters".to_string(),
            });
        }

        if !id.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidFormat {
                field: "subscription_id".to_string(),
                message: "must start with a letter".to_string(),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '+' | '%'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "subscription_id".to_string(),
                message: "only letters, digits and - _ . ~ + % allowed".to_string(),
            });
        }

        if id.to_ascii_lowercase().starts_with("goog") {
            return Err(ValidationError::InvalidFormat {
                field: "subscription_id".to_string(),
                message: "the 'goog' prefix is reserved".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get subscription ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubscriptionId> for String {
    fn from(value: SubscriptionId) -> Self {
        value.0
    }
}

// ============================================================================
// Subscription Path
// ============================================================================

/// Fully qualified subscription: `projects/{project}/subscriptions/{subscription}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionPath {
    project: ProjectId,
    subscription: SubscriptionId,
}

impl SubscriptionPath {
    /// Combine already validated parts
    pub fn new(project: ProjectId, subscription: SubscriptionId) -> Self {
        Self {
            project,
            subscription,
        }
    }

    /// Validate and combine raw parts
    pub fn from_parts(project: &str, subscription: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(
            ProjectId::new(project)?,
            SubscriptionId::new(subscription)?,
        ))
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn subscription(&self) -> &SubscriptionId {
        &self.subscription
    }
}

impl fmt::Display for SubscriptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/subscriptions/{}",
            self.project, self.subscription
        )
    }
}

impl FromStr for SubscriptionPath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "subscriptions", subscription] => {
                Self::from_parts(project, subscription)
            }
            _ => Err(ValidationError::InvalidFormat {
                field: "subscription_path".to_string(),
                message: "expected projects/{project}/subscriptions/{subscription}".to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
