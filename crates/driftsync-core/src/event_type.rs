//! Structured event types.
//!
//! An event type names what a transport event carries:
//!
//! ```text
//! <group>.<version>.<resource>.<subResource>.<action>
//! io.example.works.v1alpha1.manifestbundles.spec.create_request
//! ```
//!
//! The group may itself contain dots, so parsing pops the four fixed
//! segments from the right and joins whatever remains back into the group.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Segment delimiter of the wire form.
pub const DELIMITER: char = '.';

/// Minimum number of delimited segments in a valid event type.
const MIN_SEGMENTS: usize = 5;

/// Identifies a resource kind on the wire: `{group, version, resource}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataType {
    /// API group, e.g. `io.example.works`. May contain dots.
    pub group: String,
    /// API version, e.g. `v1alpha1`.
    pub version: String,
    /// Plural resource name, e.g. `manifestbundles`.
    pub resource: String,
}

impl DataType {
    /// Create a data type from its three parts.
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.group.is_empty()
            || self.group.starts_with(DELIMITER)
            || self.group.ends_with(DELIMITER)
            || self.group.contains("..")
        {
            return Err(CoreError::MalformedType(format!(
                "invalid group {:?}",
                self.group
            )));
        }
        check_segment("version", &self.version)?;
        check_segment("resource", &self.resource)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.group, self.version, self.resource)
    }
}

/// Which half of a resource an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubResource {
    /// Desired state, flowing source → agent.
    Spec,
    /// Observed state, flowing agent → source.
    Status,
}

impl SubResource {
    /// Wire spelling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubResource::Spec => "spec",
            SubResource::Status => "status",
        }
    }
}

impl FromStr for SubResource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spec" => Ok(SubResource::Spec),
            "status" => Ok(SubResource::Status),
            other => Err(CoreError::UnsupportedSubResource(other.to_string())),
        }
    }
}

impl fmt::Display for SubResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A free-form verb. `resync_request` (alias `resync`) is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventAction(String);

impl EventAction {
    pub const CREATE_REQUEST: &'static str = "create_request";
    pub const UPDATE_REQUEST: &'static str = "update_request";
    pub const DELETE_REQUEST: &'static str = "delete_request";
    pub const RESYNC_REQUEST: &'static str = "resync_request";
    pub const RESYNC_RESPONSE: &'static str = "resync_response";
    /// Short alias accepted for [`Self::RESYNC_REQUEST`].
    pub const RESYNC: &'static str = "resync";

    /// Wrap a verb.
    pub fn new(action: impl Into<String>) -> Self {
        Self(action.into())
    }

    pub fn create_request() -> Self {
        Self::new(Self::CREATE_REQUEST)
    }

    pub fn update_request() -> Self {
        Self::new(Self::UPDATE_REQUEST)
    }

    pub fn delete_request() -> Self {
        Self::new(Self::DELETE_REQUEST)
    }

    pub fn resync_request() -> Self {
        Self::new(Self::RESYNC_REQUEST)
    }

    /// Short spelling of a resync request.
    pub fn resync() -> Self {
        Self::new(Self::RESYNC)
    }

    pub fn resync_response() -> Self {
        Self::new(Self::RESYNC_RESPONSE)
    }

    /// True for the reserved resync verb in either spelling.
    pub fn is_resync(&self) -> bool {
        self.0 == Self::RESYNC_REQUEST || self.0 == Self::RESYNC
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully structured event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType {
    pub data_type: DataType,
    pub sub_resource: SubResource,
    pub action: EventAction,
}

impl EventType {
    pub fn new(data_type: DataType, sub_resource: SubResource, action: EventAction) -> Self {
        Self {
            data_type,
            sub_resource,
            action,
        }
    }

    /// Render the dot-delimited wire form.
    ///
    /// Fails when a fixed segment is empty or contains the delimiter, or the
    /// group is empty or has an empty dot-separated part.
    pub fn format(&self) -> Result<String> {
        self.data_type.validate()?;
        check_segment("action", self.action.as_str())?;
        Ok(format!(
            "{}{d}{}{d}{}",
            self.data_type,
            self.sub_resource,
            self.action,
            d = DELIMITER
        ))
    }

    /// Parse the dot-delimited wire form.
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split(DELIMITER).collect();
        let len = segments.len();
        if len < MIN_SEGMENTS {
            return Err(CoreError::MalformedType(format!(
                "{s:?} has {len} segments, need at least {MIN_SEGMENTS}"
            )));
        }
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(CoreError::MalformedType(format!("{s:?} has an empty segment")));
        }

        let sub_resource: SubResource = segments[len - 2].parse()?;

        Ok(Self {
            data_type: DataType {
                group: segments[..len - 4].join("."),
                version: segments[len - 4].to_string(),
                resource: segments[len - 3].to_string(),
            },
            sub_resource,
            action: EventAction::new(segments[len - 1]),
        })
    }

    /// True if this is a resync request on either sub-resource.
    pub fn is_resync(&self) -> bool {
        self.action.is_resync()
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn check_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::MalformedType(format!("empty {name} segment")));
    }
    if value.contains(DELIMITER) {
        return Err(CoreError::MalformedType(format!(
            "{name} segment {value:?} contains '{DELIMITER}'"
        )));
    }
    Ok(())
}
