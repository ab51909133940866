//! Action tree storage and the `Action` handle.
//!
//! All actions of one request live in a single arena (`Tree`) behind one
//! mutex. An `Action` is a cheap handle (shared tree + node index) so helpers
//! can hold on to "their" action while the handler keeps adding siblings.

use super::level::ActionLevel;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) const AUTO_CLOSED: &str = "__auto_closed";
pub(crate) const ERROR_OVERWRITTEN: &str = "__error_overwritten";
pub(crate) const REJECTED_SUB_ACTIONS: &str = "__rejected_sub_actions";

/// Error payload attached to an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionError {
    pub title: String,
    /// What the user should try.
    pub help: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) level: ActionLevel,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) results: Map<String, Value>,
    pub(crate) error: Option<ActionError>,
}

impl Node {
    fn new(name: &str, level: ActionLevel, parent: Option<usize>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name: name.to_string(),
            level,
            started_at,
            ended_at: None,
            parent,
            children: Vec::new(),
            results: Map::new(),
            error: None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Level used for severity aggregation: an errored action counts as at least Warn.
    pub(crate) fn effective_level(&self) -> ActionLevel {
        if self.error.is_some() {
            self.level.max(ActionLevel::Warn)
        } else {
            self.level
        }
    }
}

/// Arena of every action recorded for one request. Index 0 is the root.
#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn with_root(name: &str, level: ActionLevel) -> Self {
        Self {
            nodes: vec![Node::new(name, level, None, Utc::now())],
        }
    }

    fn push_child(&mut self, parent: usize, name: &str, level: ActionLevel) -> usize {
        // clamp so a child never starts before its parent
        let started_at = Utc::now().max(self.nodes[parent].started_at);
        let index = self.nodes.len();
        self.nodes.push(Node::new(name, level, Some(parent), started_at));
        self.nodes[parent].children.push(index);
        index
    }

    fn nearest_open_ancestor(&self, index: usize) -> Option<usize> {
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            if self.nodes[i].is_open() {
                return Some(i);
            }
            cursor = self.nodes[i].parent;
        }
        None
    }

    /// Closes `index` and every open descendant. Descendants closed here are
    /// tagged with `__auto_closed`.
    pub(crate) fn close(&mut self, index: usize, now: DateTime<Utc>, auto: bool) {
        if !self.nodes[index].is_open() {
            return;
        }
        let mut ended_at = now.max(self.nodes[index].started_at);
        let children = self.nodes[index].children.clone();
        for child in children {
            self.close(child, now, true);
            if let Some(child_end) = self.nodes[child].ended_at {
                ended_at = ended_at.max(child_end);
            }
        }
        let node = &mut self.nodes[index];
        if auto {
            node.results.insert(AUTO_CLOSED.to_string(), Value::Bool(true));
        }
        node.ended_at = Some(ended_at);
    }

    /// Appends an already-closed child that fits inside the parent's time span.
    /// Only used for diagnostics recorded after the tree has been flushed.
    pub(crate) fn push_closed_child(&mut self, parent: usize, name: &str, level: ActionLevel) -> usize {
        let parent_node = &self.nodes[parent];
        let at = parent_node
            .ended_at
            .unwrap_or_else(Utc::now)
            .max(parent_node.started_at);
        let mut node = Node::new(name, level, Some(parent), at);
        node.ended_at = Some(at);
        let index = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        index
    }
}

pub(crate) type SharedTree = Arc<Mutex<Tree>>;

pub(crate) fn lock(tree: &SharedTree) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one node of a request's action tree.
///
/// A handle without an index is a detached no-op action: it is returned when a
/// sub-action is requested on a closed parent and silently ignores writes.
#[derive(Clone)]
pub struct Action {
    tree: SharedTree,
    index: Option<usize>,
}

impl Action {
    pub(crate) fn new(tree: SharedTree, index: usize) -> Self {
        Self {
            tree,
            index: Some(index),
        }
    }

    fn detached(tree: SharedTree) -> Self {
        Self { tree, index: None }
    }

    /// Runs `f` on this node if it exists and is still open.
    fn with_open_node(&self, op: &str, f: impl FnOnce(&mut Node)) {
        let Some(index) = self.index else { return };
        let mut tree = lock(&self.tree);
        let node = &mut tree.nodes[index];
        if node.is_open() {
            f(node);
        } else {
            tracing::warn!(action = %node.name, op, "ignored write to a closed action");
        }
    }

    pub fn id(&self) -> Option<String> {
        let index = self.index?;
        Some(lock(&self.tree).nodes[index].id.clone())
    }

    pub fn name(&self) -> String {
        self.index
            .map(|i| lock(&self.tree).nodes[i].name.clone())
            .unwrap_or_default()
    }

    pub fn level(&self) -> ActionLevel {
        self.index
            .map(|i| lock(&self.tree).nodes[i].level)
            .unwrap_or(ActionLevel::Trace)
    }

    pub fn is_detached(&self) -> bool {
        self.index.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.index
            .map(|i| !lock(&self.tree).nodes[i].is_open())
            .unwrap_or(true)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.index.map(|i| lock(&self.tree).nodes[i].started_at)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.index.and_then(|i| lock(&self.tree).nodes[i].ended_at)
    }

    pub fn results(&self) -> Map<String, Value> {
        self.index
            .map(|i| lock(&self.tree).nodes[i].results.clone())
            .unwrap_or_default()
    }

    pub fn error(&self) -> Option<ActionError> {
        self.index
            .and_then(|i| lock(&self.tree).nodes[i].error.clone())
    }

    pub fn children(&self) -> Vec<Action> {
        let Some(index) = self.index else {
            return Vec::new();
        };
        let indices = lock(&self.tree).nodes[index].children.clone();
        indices
            .into_iter()
            .map(|i| Action::new(self.tree.clone(), i))
            .collect()
    }

    /// Appends a child action. On a closed parent the returned action is
    /// detached and the rejection is noted on the nearest open ancestor.
    pub fn add_sub_action(&self, name: &str, level: ActionLevel) -> Action {
        let Some(index) = self.index else {
            return Action::detached(self.tree.clone());
        };
        let mut tree = lock(&self.tree);
        if tree.nodes[index].is_open() {
            let child = tree.push_child(index, name, level);
            return Action::new(self.tree.clone(), child);
        }

        tracing::warn!(
            parent = %tree.nodes[index].name,
            action = name,
            "sub-action requested on a closed action"
        );
        if let Some(open) = tree.nearest_open_ancestor(index) {
            let rejected = tree.nodes[open]
                .results
                .entry(REJECTED_SUB_ACTIONS)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(names) = rejected {
                names.push(Value::String(name.to_string()));
            }
        }
        drop(tree);
        Action::detached(self.tree.clone())
    }

    /// Attaches an error. Does not close the action. A second call replaces the
    /// first and records the replaced title under `__error_overwritten`.
    pub fn set_error(&self, title: &str, help: &str, context: Value) {
        let context = match context {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.with_open_node("set_error", |node| {
            if let Some(previous) = node.error.take() {
                tracing::warn!(action = %node.name, previous = %previous.title, "action error overwritten");
                node.results
                    .insert(ERROR_OVERWRITTEN.to_string(), Value::String(previous.title));
            }
            node.error = Some(ActionError {
                title: title.to_string(),
                help: help.to_string(),
                context,
            });
        });
    }

    /// Records a typed error without changing the level. Callers that cannot
    /// recover follow up with `escalate(ActionLevel::Error)` or use `fail`.
    pub fn record_error(&self, err: &AppError) {
        let mut context = err.context.clone();
        context.insert("kind".to_string(), serde_json::json!(err.kind));
        self.set_error(&err.title, &err.help, Value::Object(context));
    }

    /// Records a typed error and raises the level to Error.
    pub fn fail(&self, err: &AppError) {
        self.record_error(err);
        self.escalate(ActionLevel::Error);
    }

    /// Raises the level. Never lowers it.
    pub fn escalate(&self, level: ActionLevel) {
        self.with_open_node("escalate", |node| {
            node.level = node.level.max(level);
        });
    }

    /// Inserts or replaces a result field. A key keeps the position of its first write.
    pub fn append_result<V: Serialize + ?Sized>(&self, key: &str, value: &V) {
        let value = serde_json::to_value(value)
            .unwrap_or_else(|e| Value::String(format!("<unserializable: {}>", e)));
        self.with_open_node("append_result", |node| {
            node.results.insert(key.to_string(), value);
        });
    }

    /// Closes this action and any still-open descendants.
    pub fn complete(&self) {
        let Some(index) = self.index else { return };
        lock(&self.tree).close(index, Utc::now(), false);
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("index", &self.index)
            .field("name", &self.name())
            .finish()
    }
}
