//! Trip capabilities checked by the membership oracle before any document
//! mutation.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Permission a trip member needs for one class of document mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Vote,
    CompleteTask,
    EditLocation,
    ManagePoll,
    ManageTask,
}

impl Capability {
    /// Stable string id used in logs and wire payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vote => CAPABILITY_VOTE,
            Self::CompleteTask => CAPABILITY_COMPLETE_TASK,
            Self::EditLocation => CAPABILITY_EDIT_LOCATION,
            Self::ManagePoll => CAPABILITY_MANAGE_POLL,
            Self::ManageTask => CAPABILITY_MANAGE_TASK,
        }
    }

    /// User-facing short description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Vote => "Cast and withdraw votes on trip polls.",
            Self::CompleteTask => "Mark trip tasks as complete or incomplete.",
            Self::EditLocation => "Change the trip's shared basecamp location.",
            Self::ManagePoll => "Publish and close polls created by other members.",
            Self::ManageTask => "Create tasks and change task assignments.",
        }
    }
}

pub const CAPABILITY_VOTE: &str = "vote";
pub const CAPABILITY_COMPLETE_TASK: &str = "complete_task";
pub const CAPABILITY_EDIT_LOCATION: &str = "edit_location";
pub const CAPABILITY_MANAGE_POLL: &str = "manage_poll";
pub const CAPABILITY_MANAGE_TASK: &str = "manage_task";

const SUPPORTED_CAPABILITY_STRINGS: &[&str] = &[
    CAPABILITY_VOTE,
    CAPABILITY_COMPLETE_TASK,
    CAPABILITY_EDIT_LOCATION,
    CAPABILITY_MANAGE_POLL,
    CAPABILITY_MANAGE_TASK,
];

/// Returns supported capability strings.
pub fn supported_capability_strings() -> &'static [&'static str] {
    SUPPORTED_CAPABILITY_STRINGS
}

/// Parses one capability from its string id.
pub fn parse_capability(value: &str) -> Result<Capability, CapabilityError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(CapabilityError::EmptyCapability);
    }

    match normalized {
        CAPABILITY_VOTE => Ok(Capability::Vote),
        CAPABILITY_COMPLETE_TASK => Ok(Capability::CompleteTask),
        CAPABILITY_EDIT_LOCATION => Ok(Capability::EditLocation),
        CAPABILITY_MANAGE_POLL => Ok(Capability::ManagePoll),
        CAPABILITY_MANAGE_TASK => Ok(Capability::ManageTask),
        other => Err(CapabilityError::UnsupportedCapability(other.to_string())),
    }
}

/// Capability parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    EmptyCapability,
    UnsupportedCapability(String),
}

impl Display for CapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyCapability => write!(f, "capability value must not be empty"),
            Self::UnsupportedCapability(value) => write!(f, "capability is unsupported: {value}"),
        }
    }
}

impl Error for CapabilityError {}

#[cfg(test)]
mod tests {
    use super::{parse_capability, supported_capability_strings, Capability, CapabilityError};

    #[test]
    fn parses_every_supported_capability() {
        for value in supported_capability_strings() {
            let parsed = parse_capability(value).expect("supported capability parse");
            assert_eq!(parsed.as_str(), *value);
        }
    }

    #[test]
    fn rejects_empty_capability() {
        let err = parse_capability("   ").expect_err("empty capability must fail");
        assert_eq!(err, CapabilityError::EmptyCapability);
    }

    #[test]
    fn rejects_unknown_and_non_lowercase_values() {
        let err = parse_capability("delete_trip").expect_err("unknown capability must fail");
        assert_eq!(
            err,
            CapabilityError::UnsupportedCapability("delete_trip".to_string())
        );

        let err = parse_capability("Vote").expect_err("capitalized capability must fail");
        assert_eq!(err, CapabilityError::UnsupportedCapability("Vote".to_string()));
    }

    #[test]
    fn exposes_user_facing_descriptions() {
        assert!(Capability::Vote.description().contains("votes"));
        assert!(Capability::EditLocation.description().contains("basecamp"));
    }
}
