//! Resource definitions and their capabilities.

use serde::{Deserialize, Serialize};

use crate::core::ValidationError;
use crate::util::{AliasType, Priority, ResourceId, Technology};

/// Token substituted by allocated values in patterns and alias templates.
pub const VALUE_TOKEN: &str = "{value}";

/// How many concurrent allocations a resource accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// At most one reservation at any instant.
    Exclusive,
    /// Peak sum of overlapping units must stay within the limit.
    Limited(u32),
    /// No accounting.
    Unlimited,
}

/// Sequence of candidates substituted into a value pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSequence {
    /// Zero-padded decimal numbers from `start` up to `10^width - 1`.
    Digits {
        /// Number of digits.
        width: u32,
        /// First candidate.
        start: u64,
    },
    /// Lowercase base-36 strings of fixed width, counting from zero.
    Alphanumeric {
        /// Number of characters.
        width: u32,
    },
}

/// Capability offered by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Capability {
    /// Generates unique values such as numeric dial-in identifiers.
    ValueProvider {
        /// Pattern containing `{value}`.
        pattern: String,
        /// Candidate sequence.
        sequence: ValueSequence,
    },
    /// Produces aliases from values of a provider.
    Alias {
        /// Technology of the alias.
        technology: Technology,
        /// Alias kind.
        alias_type: AliasType,
        /// Template containing `{value}`.
        template: String,
        /// Value provider resource; the owning resource when absent.
        provider: Option<ResourceId>,
    },
    /// Hosts virtual rooms; capacity counts participant licenses.
    Room {
        /// Supported technologies.
        technologies: Vec<Technology>,
    },
    /// Records rooms into folders; capacity counts concurrent recordings.
    Recording {
        /// Supported technologies.
        technologies: Vec<Technology>,
    },
    /// Endpoint device able to dial a room.
    Terminal {
        /// Supported technologies.
        technologies: Vec<Technology>,
    },
}

/// Discriminant of [`Capability`] used for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// [`Capability::ValueProvider`].
    ValueProvider,
    /// [`Capability::Alias`].
    Alias,
    /// [`Capability::Room`].
    Room,
    /// [`Capability::Recording`].
    Recording,
    /// [`Capability::Terminal`].
    Terminal,
}

impl Capability {
    /// Discriminant.
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        match self {
            Self::ValueProvider { .. } => CapabilityKind::ValueProvider,
            Self::Alias { .. } => CapabilityKind::Alias,
            Self::Room { .. } => CapabilityKind::Room,
            Self::Recording { .. } => CapabilityKind::Recording,
            Self::Terminal { .. } => CapabilityKind::Terminal,
        }
    }

    /// Whether the capability works with `technology`.
    #[must_use]
    pub fn supports(&self, technology: Technology) -> bool {
        match self {
            Self::ValueProvider { .. } => true,
            Self::Alias { technology: t, .. } => *t == technology,
            Self::Room { technologies }
            | Self::Recording { technologies }
            | Self::Terminal { technologies } => technologies.contains(&technology),
        }
    }
}

/// A bookable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Identifier.
    pub id: ResourceId,
    /// Display name.
    pub name: String,
    /// Concurrency limit.
    pub capacity: Capacity,
    /// Ranking priority.
    #[serde(default)]
    pub priority: Priority,
    /// Whether the scheduler may hand it out.
    #[serde(default = "default_allocatable")]
    pub allocatable: bool,
    /// Connector controlling the device, if any.
    #[serde(default)]
    pub connector: Option<String>,
    /// Ordered capabilities.
    pub capabilities: Vec<Capability>,
}

const fn default_allocatable() -> bool {
    true
}

impl Resource {
    /// New allocatable resource with normal priority and no capabilities.
    pub fn new(id: impl Into<ResourceId>, capacity: Capacity) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capacity,
            priority: Priority::Normal,
            allocatable: true,
            connector: None,
            capabilities: Vec::new(),
        }
    }

    /// Add a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Set the ranking priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Bind the resource to a connector.
    #[must_use]
    pub fn with_connector(mut self, connector: impl Into<String>) -> Self {
        self.connector = Some(connector.into());
        self
    }

    /// First capability of the given kind.
    #[must_use]
    pub fn capability(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.kind() == kind)
    }

    /// Whether any capability of `kind` supports `technology`.
    #[must_use]
    pub fn offers(&self, kind: CapabilityKind, technology: Technology) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.kind() == kind && c.supports(technology))
    }

    /// Check structural constraints before registration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidResource` describing the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidResource {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.capacity == Capacity::Limited(0) {
            return Err(invalid("limited capacity must be greater than 0"));
        }
        for capability in &self.capabilities {
            match capability {
                Capability::ValueProvider { pattern, sequence } => {
                    if !pattern.contains(VALUE_TOKEN) {
                        return Err(invalid("value pattern must contain {value}"));
                    }
                    let width = match sequence {
                        ValueSequence::Digits { width, .. }
                        | ValueSequence::Alphanumeric { width } => *width,
                    };
                    if width == 0 || width > 12 {
                        return Err(invalid("value sequence width must be within 1..=12"));
                    }
                }
                Capability::Alias { template, .. } => {
                    if !template.contains(VALUE_TOKEN) {
                        return Err(invalid("alias template must contain {value}"));
                    }
                }
                Capability::Room { technologies }
                | Capability::Recording { technologies }
                | Capability::Terminal { technologies } => {
                    if technologies.is_empty() {
                        return Err(invalid("technology list must not be empty"));
                    }
                }
            }
        }
        Ok(())
    }
}
