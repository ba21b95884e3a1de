use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type Id = String;

/// Free-form key to values bag attached to most records.
///
/// Keys are unique and no ordering is implied between them.
pub type Info = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Orientation {
    Forward,
    Reverse,
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation::Forward
    }
}

impl Orientation {
    /// Orientation of `inner` when read through `self`.
    pub fn compose(self, inner: Orientation) -> Self {
        if self == inner {
            Orientation::Forward
        } else {
            Orientation::Reverse
        }
    }
}

/// One of the two ends of a segment, in the segment's own frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Start,
    End,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Start => Side::End,
            Side::End => Side::Start,
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_compose() {
        use Orientation::*;
        assert_eq!(Forward.compose(Forward), Forward);
        assert_eq!(Forward.compose(Reverse), Reverse);
        assert_eq!(Reverse.compose(Forward), Reverse);
        assert_eq!(Reverse.compose(Reverse), Forward);
    }

    #[test]
    fn test_orientation_wire_names() {
        assert_eq!(serde_json::to_string(&Orientation::Reverse).unwrap(), "\"REVERSE\"");
        assert_eq!(serde_json::to_string(&Side::Start).unwrap(), "\"START\"");
    }
}
