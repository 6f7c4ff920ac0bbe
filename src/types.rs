use std::fmt;

/// Identifies a node in the workflow graph.
///
/// `Start` and `End` are virtual: they never run, they only anchor edges.
/// Every real step is an `Other` carrying its step name (e.g. `"planner"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Start,
    End,
    Other(String),
}

impl NodeKind {
    pub fn named(name: impl Into<String>) -> Self {
        NodeKind::Other(name.into())
    }

    /// Human-facing step name. Virtual nodes use LangGraph-style dunder names.
    pub fn name(&self) -> &str {
        match self {
            NodeKind::Start => "__start__",
            NodeKind::End => "__end__",
            NodeKind::Other(name) => name,
        }
    }

    /// Stable string form used by the persistence layer.
    ///
    /// - `Start` -> `"Start"`
    /// - `End` -> `"End"`
    /// - `Other(name)` -> `"Other:<name>"`
    pub fn encode(&self) -> String {
        match self {
            NodeKind::Start => "Start".to_string(),
            NodeKind::End => "End".to_string(),
            NodeKind::Other(name) => format!("Other:{name}"),
        }
    }

    /// Inverse of [`NodeKind::encode`]. Unknown shapes round-trip as `Other`.
    pub fn decode(raw: &str) -> Self {
        match raw {
            "Start" => NodeKind::Start,
            "End" => NodeKind::End,
            other => NodeKind::Other(other.strip_prefix("Other:").unwrap_or(other).to_string()),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeKind::End)
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, NodeKind::Start | NodeKind::End)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for NodeKind {
    fn from(name: &str) -> Self {
        NodeKind::named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        for kind in [NodeKind::Start, NodeKind::End, NodeKind::named("generate")] {
            assert_eq!(NodeKind::decode(&kind.encode()), kind);
        }
    }

    #[test]
    fn decode_accepts_bare_names() {
        assert_eq!(NodeKind::decode("reflect"), NodeKind::named("reflect"));
    }

    #[test]
    fn display_uses_step_name() {
        assert_eq!(NodeKind::named("planner").to_string(), "planner");
        assert_eq!(NodeKind::End.to_string(), "__end__");
    }
}
