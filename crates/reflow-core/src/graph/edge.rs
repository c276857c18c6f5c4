use serde::{Deserialize, Serialize};

/// An edge connecting two nodes in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Firing this edge marks the target ready to run.
    #[serde(default)]
    pub trigger: bool,
    /// Condition the source's output must satisfy for the edge to fire.
    #[serde(default)]
    pub condition: EdgeCondition,
    /// Firing this edge delivers a copy of the output to the target.
    #[serde(default = "default_carry_data")]
    pub carry_data: bool,
}

fn default_carry_data() -> bool {
    true
}

/// Condition for firing an edge, evaluated against the source node's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always fire.
    #[default]
    Always,
    /// Fire when any keyword occurs in the output.
    Keyword {
        keywords: Vec<String>,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
}

fn default_case_sensitive() -> bool {
    true
}

impl EdgeCondition {
    pub fn keyword<I, S>(keywords: I, case_sensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EdgeCondition::Keyword {
            keywords: keywords.into_iter().map(Into::into).collect(),
            case_sensitive,
        }
    }

    /// Evaluate this condition against a node's emitted text.
    pub fn evaluate(&self, content: &str) -> bool {
        match self {
            EdgeCondition::Always => true,
            EdgeCondition::Keyword {
                keywords,
                case_sensitive,
            } => {
                if *case_sensitive {
                    keywords.iter().any(|k| content.contains(k.as_str()))
                } else {
                    let folded = content.to_lowercase();
                    keywords
                        .iter()
                        .any(|k| folded.contains(&k.to_lowercase()))
                }
            }
        }
    }
}

impl std::fmt::Display for EdgeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeCondition::Always => f.write_str("always"),
            EdgeCondition::Keyword {
                keywords,
                case_sensitive,
            } => write!(
                f,
                "keyword(any={:?}, case_sensitive={})",
                keywords, case_sensitive
            ),
        }
    }
}

impl Edge {
    /// Create an unconditional trigger edge that carries data.
    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            trigger: true,
            condition: EdgeCondition::Always,
            carry_data: true,
        }
    }

    /// Create an edge that only delivers data, never triggers.
    pub fn data_only(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            trigger: false,
            ..Self::always(from, to)
        }
    }

    /// Create a trigger edge gated on keywords in the source output.
    pub fn keyword<I, S>(
        from: impl Into<String>,
        to: impl Into<String>,
        keywords: I,
        case_sensitive: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            condition: EdgeCondition::keyword(keywords, case_sensitive),
            ..Self::always(from, to)
        }
    }

    /// Drop the data payload: firing only sets the target's trigger.
    pub fn without_data(mut self) -> Self {
        self.carry_data = false;
        self
    }
}
