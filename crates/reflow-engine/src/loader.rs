//! Workflow definition loader.
//!
//! Turns a YAML or JSON workflow document into a validated [`Graph`].
//! `${NAME}` placeholders in string config values are replaced from the
//! variable map before the graph is built. Loading never touches the network
//! and never executes anything.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use reflow_core::error::{DefinitionError, ReflowError, Result};
use reflow_core::graph::{Edge, EdgeCondition, Graph, Node, NodeKind};

/// `context_window` value meaning "keep every input across ticks".
const RETAIN_ALL_INPUTS: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Fail on `${NAME}` placeholders with no value instead of keeping them.
    pub strict_variables: bool,
}

/// Raw workflow document as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    pub graph: Option<GraphDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphDefinition {
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub nodes: Option<Vec<NodeDefinition>>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    pub start: Option<Vec<String>>,
    #[serde(default)]
    pub end: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: Option<String>,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_window: i64,
    #[serde(default)]
    pub retain_inputs: bool,
}

fn default_node_type() -> String {
    "agent".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDefinition {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub trigger: bool,
    #[serde(default)]
    pub condition: Option<ConditionDefinition>,
    #[serde(default = "default_carry_data")]
    pub carry_data: bool,
}

fn default_carry_data() -> bool {
    true
}

/// `true`, `"true"`, or `{type: keyword, config: {any: [...], case_sensitive}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConditionDefinition {
    Flag(bool),
    Text(String),
    Rule {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        config: KeywordDefinition,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordDefinition {
    #[serde(default)]
    pub any: Vec<String>,
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
}

fn default_case_sensitive() -> bool {
    true
}

pub fn parse_yaml(text: &str) -> std::result::Result<WorkflowDefinition, DefinitionError> {
    serde_yaml::from_str(text).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn parse_json(text: &str) -> std::result::Result<WorkflowDefinition, DefinitionError> {
    serde_json::from_str(text).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Build a graph, leaving unresolved placeholders in place.
pub fn load(
    raw: &WorkflowDefinition,
    variables: &HashMap<String, String>,
) -> std::result::Result<Graph, DefinitionError> {
    load_with(raw, variables, &LoadOptions::default())
}

pub fn load_with(
    raw: &WorkflowDefinition,
    variables: &HashMap<String, String>,
    options: &LoadOptions,
) -> std::result::Result<Graph, DefinitionError> {
    let graph_def = raw
        .graph
        .as_ref()
        .ok_or_else(|| DefinitionError::MissingField("graph".into()))?;
    let id = graph_def
        .id
        .clone()
        .ok_or_else(|| DefinitionError::MissingField("graph.id".into()))?;

    let mut unresolved = BTreeSet::new();
    let vars = merge_variables(&raw.vars, variables, &mut unresolved);

    let node_defs = graph_def
        .nodes
        .as_ref()
        .ok_or_else(|| DefinitionError::MissingField("graph.nodes".into()))?;
    let mut nodes = Vec::with_capacity(node_defs.len());
    for def in node_defs {
        nodes.push(build_node(def, &vars, &mut unresolved)?);
    }

    let edges = graph_def
        .edges
        .iter()
        .map(build_edge)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !unresolved.is_empty() {
        if options.strict_variables {
            let first = unresolved.iter().next().cloned().unwrap_or_default();
            return Err(DefinitionError::UnresolvedVariable(first));
        }
        for name in &unresolved {
            warn!(workflow_id = %id, variable = %name, "Unresolved variable left in place");
        }
    }

    let start = graph_def
        .start
        .clone()
        .ok_or_else(|| DefinitionError::MissingField("graph.start".into()))?;

    let graph = Graph::new(id, nodes, edges, start, graph_def.end.clone())?
        .with_description(graph_def.description.clone());
    debug!(
        workflow_id = %graph.id,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "Workflow loaded"
    );
    Ok(graph)
}

pub fn from_yaml_str(
    text: &str,
    variables: &HashMap<String, String>,
    options: &LoadOptions,
) -> std::result::Result<Graph, DefinitionError> {
    load_with(&parse_yaml(text)?, variables, options)
}

pub fn from_json_str(
    text: &str,
    variables: &HashMap<String, String>,
    options: &LoadOptions,
) -> std::result::Result<Graph, DefinitionError> {
    load_with(&parse_json(text)?, variables, options)
}

/// Load a `.yaml`, `.yml` or `.json` workflow file.
///
/// A definition without `graph.id` takes the file stem as its id.
pub fn load_path(
    path: &Path,
    variables: &HashMap<String, String>,
    options: &LoadOptions,
) -> Result<Graph> {
    let text = std::fs::read_to_string(path)?;
    let mut raw = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&text)?,
        _ => parse_yaml(&text)?,
    };

    if let Some(graph) = raw.graph.as_mut() {
        if graph.id.is_none() {
            graph.id = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
        }
    }

    load_with(&raw, variables, options).map_err(ReflowError::from)
}

/// Workflow names (file stems) in `dir`, sorted. Files starting with `_`
/// are partials and skipped.
pub fn list_workflows(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_definition = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml" | "json")
        );
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if is_definition && !stem.starts_with('_') {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Caller variables overlaid by the definition's own `vars`, which are
/// themselves substituted against the caller's map first.
fn merge_variables(
    own: &BTreeMap<String, Value>,
    caller: &HashMap<String, String>,
    unresolved: &mut BTreeSet<String>,
) -> HashMap<String, String> {
    let mut merged = caller.clone();
    for (name, value) in own {
        let text = match value {
            Value::String(s) => substitute(s, caller, unresolved),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        merged.insert(name.clone(), text);
    }
    merged
}

fn build_node(
    def: &NodeDefinition,
    vars: &HashMap<String, String>,
    unresolved: &mut BTreeSet<String>,
) -> std::result::Result<Node, DefinitionError> {
    let id = def
        .id
        .clone()
        .ok_or_else(|| DefinitionError::MissingField("node.id".into()))?;

    let config = match substitute_value(Value::Object(def.config.clone()), vars, unresolved) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mut kind = match def.node_type.as_str() {
        "agent" | "remote" => NodeKind::Remote,
        "passthrough" => NodeKind::Passthrough,
        "local" => NodeKind::Local,
        other => return Err(DefinitionError::UnknownNodeType(other.to_string())),
    };
    if kind == NodeKind::Remote
        && config.get("provider").and_then(|v| v.as_str()) == Some("passthrough")
    {
        kind = NodeKind::Passthrough;
    }

    let mut node = Node::new(id, kind);
    node.config = config;
    node.description = def.description.clone().filter(|d| !d.is_empty());
    node.retain_inputs = def.retain_inputs || def.context_window == RETAIN_ALL_INPUTS;
    Ok(node)
}

fn build_edge(def: &EdgeDefinition) -> std::result::Result<Edge, DefinitionError> {
    let from = def
        .from
        .clone()
        .ok_or_else(|| DefinitionError::MissingField("edge.from".into()))?;
    let to = def
        .to
        .clone()
        .ok_or_else(|| DefinitionError::MissingField("edge.to".into()))?;

    let condition = match &def.condition {
        None | Some(ConditionDefinition::Flag(true)) => EdgeCondition::Always,
        Some(ConditionDefinition::Text(t)) if t.trim().eq_ignore_ascii_case("true") => {
            EdgeCondition::Always
        }
        Some(ConditionDefinition::Rule { kind, config }) if kind == "keyword" => {
            EdgeCondition::keyword(config.any.iter().cloned(), config.case_sensitive)
        }
        Some(ConditionDefinition::Rule { kind, .. }) => {
            return Err(DefinitionError::UnknownCondition(kind.clone()))
        }
        Some(ConditionDefinition::Text(t)) => {
            return Err(DefinitionError::UnknownCondition(t.clone()))
        }
        Some(ConditionDefinition::Flag(false)) => {
            return Err(DefinitionError::UnknownCondition("false".into()))
        }
    };

    Ok(Edge {
        from,
        to,
        trigger: def.trigger,
        condition,
        carry_data: def.carry_data,
    })
}

/// Substitute placeholders in every string inside `value`.
fn substitute_value(
    value: Value,
    vars: &HashMap<String, String>,
    unresolved: &mut BTreeSet<String>,
) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(&s, vars, unresolved)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| substitute_value(v, vars, unresolved))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_value(v, vars, unresolved)))
                .collect(),
        ),
        other => other,
    }
}

/// Replace `${NAME}` with `vars[NAME]`. Unknown names stay verbatim and are
/// added to `unresolved`.
pub fn substitute(
    input: &str,
    vars: &HashMap<String, String>,
    unresolved: &mut BTreeSet<String>,
) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find("${") {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(close) = after.find('}') else {
            result.push_str(&rest[pos..]);
            return result;
        };

        let name = &after[..close];
        match vars.get(name) {
            Some(value) if !name.is_empty() => result.push_str(value),
            _ => {
                if !name.is_empty() {
                    unresolved.insert(name.to_string());
                }
                result.push_str(&rest[pos..pos + 2 + close + 1]);
            }
        }
        rest = &after[close + 1..];
    }
    result.push_str(rest);
    result
}
