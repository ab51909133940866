//! One `LogDocument` per HTTP request: the root of the action tree plus the
//! rules that turn a closed tree into a status code and a message.

use super::action::{lock, Action, ActionError, Node, SharedTree, Tree};
use super::level::ActionLevel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const ROUTE_NOT_FOUND: &str = "Route Not Found";
pub const METHOD_NOT_ALLOWED: &str = "Method Not Allowed";

/// Non-standard "client closed request" status.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

/// Serialized form of one action and its (filtered) children.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: String,
    pub name: String,
    pub level: ActionLevel,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<i64>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub results: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    pub children: Vec<ActionRecord>,
}

/// Root of the action tree for one request. Clones share the same tree.
#[derive(Clone)]
pub struct LogDocument {
    path: String,
    created_at: DateTime<Utc>,
    started: Instant,
    min_level: ActionLevel,
    tree: SharedTree,
}

impl LogDocument {
    /// Creates a document whose root action is named after the request path.
    pub fn new(path: &str, min_level: ActionLevel) -> Self {
        Self {
            path: path.to_string(),
            created_at: Utc::now(),
            started: Instant::now(),
            min_level,
            tree: Arc::new(Mutex::new(Tree::with_root(path, ActionLevel::Info))),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn min_level(&self) -> ActionLevel {
        self.min_level
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn root(&self) -> Action {
        Action::new(self.tree.clone(), 0)
    }

    /// Appends a child to the root action.
    pub fn add_action(&self, name: &str, level: ActionLevel) -> Action {
        self.root().add_sub_action(name, level)
    }

    /// Closes the root and therefore every action in the tree.
    pub fn close(&self) {
        self.root().complete();
    }

    pub fn is_closed(&self) -> bool {
        self.root().is_closed()
    }

    /// Records a closed Warn action on the root even after the tree was
    /// flushed. Used for emitter misuse that can only be seen post-flush.
    pub(crate) fn record_late_warning(&self, name: &str) {
        lock(&self.tree).push_closed_child(0, name, ActionLevel::Warn);
    }

    /// Highest level in the tree, counting errored actions as at least Warn.
    pub fn aggregate_level(&self) -> ActionLevel {
        lock(&self.tree)
            .nodes
            .iter()
            .map(|node| node.effective_level())
            .max()
            .unwrap_or(ActionLevel::Info)
    }

    /// First errored action in depth-first pre-order, left to right.
    pub fn first_error(&self) -> Option<ActionError> {
        let tree = lock(&self.tree);
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &tree.nodes[index];
            if let Some(error) = &node.error {
                return Some(error.clone());
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Envelope `message`: first error title, or "success".
    pub fn message(&self) -> String {
        self.first_error()
            .map(|e| e.title)
            .unwrap_or_else(|| "success".to_string())
    }

    /// Maps the tree to `(http status, envelope status)`.
    pub fn derive_status(&self) -> (u16, &'static str) {
        let tree = lock(&self.tree);
        derive_status(&tree)
    }

    /// Serializes the tree, dropping actions below `min_level` unless they
    /// carry an error or have a kept descendant. The root is always kept.
    pub fn record(&self, min_level: ActionLevel) -> ActionRecord {
        let tree = lock(&self.tree);
        let children = filtered_children(&tree, 0, min_level);
        to_record(&tree.nodes[0], children)
    }
}

fn filtered_children(tree: &Tree, index: usize, min_level: ActionLevel) -> Vec<ActionRecord> {
    tree.nodes[index]
        .children
        .iter()
        .filter_map(|&child| build_record(tree, child, min_level))
        .collect()
}

fn build_record(tree: &Tree, index: usize, min_level: ActionLevel) -> Option<ActionRecord> {
    let node = &tree.nodes[index];
    let children = filtered_children(tree, index, min_level);
    if node.level < min_level && node.error.is_none() && children.is_empty() {
        return None;
    }
    Some(to_record(node, children))
}

fn to_record(node: &Node, children: Vec<ActionRecord>) -> ActionRecord {
    ActionRecord {
        id: node.id.clone(),
        name: node.name.clone(),
        level: node.level,
        started_at: node.started_at,
        ended_at: node.ended_at,
        elapsed_ms: node
            .ended_at
            .map(|end| (end - node.started_at).num_milliseconds()),
        results: node.results.clone(),
        error: node.error.clone(),
        children,
    }
}

pub(crate) fn derive_status(tree: &Tree) -> (u16, &'static str) {
    let severity = tree
        .nodes
        .iter()
        .map(|node| node.effective_level())
        .max()
        .unwrap_or(ActionLevel::Info);

    match severity {
        ActionLevel::Trace | ActionLevel::Debug | ActionLevel::Info => (200, "success"),
        ActionLevel::Warn => (200, "warning"),
        ActionLevel::Error => (error_status(tree), "error"),
    }
}

fn error_status(tree: &Tree) -> u16 {
    let root_name = tree.nodes[0].name.as_str();
    let errors: Vec<&ActionError> = tree.nodes.iter().filter_map(|n| n.error.as_ref()).collect();
    let any_title = |needle: &str| errors.iter().any(|e| e.title.contains(needle));

    if root_name == ROUTE_NOT_FOUND || any_title(ROUTE_NOT_FOUND) {
        404
    } else if root_name == METHOD_NOT_ALLOWED || any_title(METHOD_NOT_ALLOWED) {
        405
    } else if errors.iter().any(|e| e.title == "Cancelled") {
        STATUS_CLIENT_CLOSED
    } else if any_title("Unauthenticated") || any_title("Invalid token") {
        401
    } else if any_title("Missing")
        || errors
            .iter()
            .any(|e| e.context.contains_key("missing_field") || e.context.contains_key("invalid_field"))
    {
        400
    } else {
        500
    }
}
