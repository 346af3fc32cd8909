//! Typed identifiers for users, workflows and executions.
//!
//! Each id wraps a ULID, so ids of one kind sort by creation time. The text
//! form carries a short kind prefix (`wf_01J...`) so an execution id pasted
//! where a workflow id is expected is rejected instead of silently parsed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Failure to read an id from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The text carries the prefix of another id kind.
    WrongKind {
        expected: &'static str,
        found: String,
    },
    /// The ULID part is malformed.
    InvalidUlid { kind: &'static str, reason: String },
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongKind { expected, found } => {
                write!(f, "expected a '{expected}_' id, found '{found}_'")
            }
            Self::InvalidUlid { kind, reason } => write!(f, "invalid {kind}: {reason}"),
        }
    }
}

impl std::error::Error for ParseIdError {}

/// Splits `text` into its ULID part, checking the kind prefix if present.
fn ulid_part(
    text: &str,
    prefix: &'static str,
    kind: &'static str,
) -> Result<Ulid, ParseIdError> {
    let raw = match text.split_once('_') {
        Some((found, rest)) if found == prefix => rest,
        Some((found, _)) => {
            return Err(ParseIdError::WrongKind {
                expected: prefix,
                found: found.to_string(),
            });
        }
        None => text,
    };
    Ulid::from_str(raw).map_err(|e| ParseIdError::InvalidUlid {
        kind,
        reason: e.to_string(),
    })
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Text prefix of this id kind.
            pub const PREFIX: &'static str = $prefix;

            /// Generates a fresh id.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Milliseconds since the Unix epoch at which the id was minted.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid_part(s, Self::PREFIX, stringify!($name)).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

typed_id!(
    /// Owner of workflows and the executions started on their behalf.
    UserId => "usr"
);

typed_id!(
    /// A workflow definition.
    WorkflowId => "wf"
);

typed_id!(
    /// One run of a workflow.
    ExecutionId => "exec"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_carries_the_kind_prefix() {
        assert!(UserId::new().to_string().starts_with("usr_"));
        assert!(WorkflowId::new().to_string().starts_with("wf_"));
        assert!(ExecutionId::new().to_string().starts_with("exec_"));
    }

    #[test]
    fn parses_prefixed_and_bare_ulids() {
        let id = WorkflowId::new();
        assert_eq!(id.to_string().parse::<WorkflowId>(), Ok(id));

        let ulid = Ulid::new();
        let bare: WorkflowId = ulid.to_string().parse().expect("bare ulid");
        assert_eq!(bare.as_ulid(), ulid);
    }

    #[test]
    fn rejects_an_id_of_another_kind() {
        let execution = ExecutionId::new().to_string();
        let err = execution.parse::<WorkflowId>().unwrap_err();
        assert_eq!(
            err,
            ParseIdError::WrongKind {
                expected: "wf",
                found: "exec".to_string()
            }
        );
    }

    #[test]
    fn rejects_a_malformed_ulid() {
        let err = "wf_nope".parse::<WorkflowId>().unwrap_err();
        assert!(matches!(err, ParseIdError::InvalidUlid { kind: "WorkflowId", .. }));
    }

    #[test]
    fn ids_order_by_creation_time() {
        let first = ExecutionId::from_ulid(Ulid::from_parts(1, 0));
        let second = ExecutionId::from_ulid(Ulid::from_parts(2, 0));
        assert!(first < second);
        assert_eq!(second.timestamp_ms(), 2);
    }

    #[test]
    fn serializes_as_prefixed_text() {
        let id = ExecutionId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ExecutionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, id);

        let wrong = format!("\"{}\"", UserId::new());
        assert!(serde_json::from_str::<ExecutionId>(&wrong).is_err());
    }
}
