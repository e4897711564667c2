//! Arena-backed data trees.
//!
//! A [`DataTree`] owns every node of one module's data in a slab; nodes refer
//! to each other with [`NodeId`] handles instead of owning pointers, so parents
//! hold children and children hold a weak parent handle resolved via the
//! arena.  Each node references its schema node and, for leaves and leaf-list
//! entries, carries a typed value.
//!
//! Child vectors are in document order: list instances and user-ordered
//! leaf-list entries keep their insertion order, which the move operations
//! rearrange.

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{self, Result};
use crate::path::{Path, Step};
use crate::schema::{ModuleSchema, SchemaNodeId, SchemaNodeKind, TypeSpec};
use wire::{EditFlags, MoveDirection, Value, ValueData};

/// Handle to a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub schema: SchemaNodeId,
    /// Some for leaves and leaf-list entries; None for containers and lists.
    pub value: Option<ValueData>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One module's data tree.
#[derive(Debug, Clone, Default)]
pub struct DataTree {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    roots: Vec<NodeId>,
}

/// The on-disk shape of a node; the tree serialises to a vector of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRepr {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeRepr>,
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Resolves a node handle.  A stale handle is an engine invariant
    /// violation and panics loudly rather than risking silent corruption.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("stale node handle {:?}", id))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0]
            .as_mut()
            .unwrap_or_else(|| panic!("stale node handle {:?}", id))
    }

    pub fn children(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.node(id).children,
            None => &self.roots,
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn attach(&mut self, parent: Option<NodeId>, node: Node) -> NodeId {
        let id = self.alloc(Node { parent, ..node });
        match parent {
            Some(p) => self.node_mut(p).children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Detaches a node from its parent and frees its whole subtree.
    fn remove(&mut self, id: NodeId) {
        let parent = self.node(id).parent;
        match parent {
            Some(p) => self.node_mut(p).children.retain(|&c| c != id),
            None => self.roots.retain(|&c| c != id),
        }
        self.free_subtree(id);
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children = self.node(id).children.clone();
        for child in children {
            self.free_subtree(child);
        }
        self.nodes[id.0] = None;
        self.free.push(id.0);
    }

    // Matching

    /// The instances under `parent` matching one path step.  For keyed steps
    /// the predicates are parsed with the list's key types and compared as
    /// typed values.
    fn match_step(
        &self,
        schema: &ModuleSchema,
        parent: Option<NodeId>,
        schema_id: SchemaNodeId,
        step: &Step,
        step_path: &str,
    ) -> Result<Vec<NodeId>> {
        let candidates: Vec<NodeId> = self
            .children(parent)
            .iter()
            .copied()
            .filter(|&id| self.node(id).schema == schema_id)
            .collect();

        if step.keys.is_empty() {
            return Ok(candidates);
        }

        ensure!(
            matches!(schema.node(schema_id).kind, SchemaNodeKind::List { .. }),
            error::InvalArgSnafu {
                path: step_path,
                msg: "key predicates are only valid on lists",
            }
        );
        let wanted = self.parse_key_predicates(schema, schema_id, step, step_path)?;

        Ok(candidates
            .into_iter()
            .filter(|&id| {
                wanted.iter().all(|(name, value)| {
                    self.key_leaf_value(id, name)
                        .map(|actual| actual == *value)
                        .unwrap_or(false)
                })
            })
            .collect())
    }

    /// Parses `[key='value']` predicates into typed values, checking that each
    /// named key exists on the list.
    fn parse_key_predicates(
        &self,
        schema: &ModuleSchema,
        list_schema: SchemaNodeId,
        step: &Step,
        step_path: &str,
    ) -> Result<Vec<(String, ValueData)>> {
        let keys = match &schema.node(list_schema).kind {
            SchemaNodeKind::List { keys, .. } => keys,
            _ => unreachable!("checked by caller"),
        };

        let mut out = Vec::with_capacity(step.keys.len());
        for predicate in &step.keys {
            ensure!(
                keys.contains(&predicate.name),
                error::InvalArgSnafu {
                    path: step_path,
                    msg: format!("'{}' is not a key of this list", predicate.name),
                }
            );
            let typ = self.key_leaf_type(schema, list_schema, &predicate.name, step_path)?;
            let value =
                typ.parse_lexical(&predicate.value)
                    .ok_or_else(|| error::Error::InvalArg {
                        path: step_path.to_string(),
                        msg: format!(
                            "key '{}' value '{}' is not a valid {}",
                            predicate.name,
                            predicate.value,
                            typ.name()
                        ),
                    })?;
            out.push((predicate.name.clone(), value));
        }
        Ok(out)
    }

    fn key_leaf_type<'a>(
        &self,
        schema: &'a ModuleSchema,
        list_schema: SchemaNodeId,
        key: &str,
        step_path: &str,
    ) -> Result<&'a TypeSpec> {
        let leaf = schema
            .find_child(Some(list_schema), key)
            .ok_or_else(|| error::Error::InvalArg {
                path: step_path.to_string(),
                msg: format!("list has no key leaf '{}'", key),
            })?;
        match &schema.node(leaf).kind {
            SchemaNodeKind::Leaf { typ, .. } => Ok(typ),
            _ => error::InvalArgSnafu {
                path: step_path,
                msg: format!("'{}' is not a leaf", key),
            }
            .fail(),
        }
    }

    fn key_leaf_value(&self, instance: NodeId, key: &str) -> Option<ValueData> {
        self.node(instance)
            .children
            .iter()
            .map(|&c| self.node(c))
            .find(|n| n.name == key)
            .and_then(|n| n.value.clone())
    }

    /// All nodes matching the path's steps (not counting a trailing
    /// wildcard).  The result may be empty; the caller decides whether that's
    /// an error.
    pub fn find(&self, schema: &ModuleSchema, path: &Path) -> Result<Vec<NodeId>> {
        let resolved = schema.resolve(path)?;
        let mut current: Vec<Option<NodeId>> = vec![None];
        for (i, step) in path.steps.iter().enumerate() {
            let mut next = Vec::new();
            for parent in &current {
                let matched =
                    self.match_step(schema, *parent, resolved[i], step, &path.prefix(i + 1))?;
                next.extend(matched.into_iter().map(Some));
            }
            if next.is_empty() {
                return Ok(Vec::new());
            }
            current = next;
        }
        Ok(current.into_iter().flatten().collect())
    }

    // Edits

    /// Creates or updates the node at `path`.  Returns whether a new node was
    /// created (as opposed to updating or re-asserting an existing one).
    pub fn set(
        &mut self,
        schema: &ModuleSchema,
        path: &Path,
        value: Option<&ValueData>,
        flags: EditFlags,
    ) -> Result<bool> {
        ensure!(
            !path.wildcard && !path.steps.is_empty(),
            error::InvalArgSnafu {
                path: path.to_string(),
                msg: "set requires a concrete path",
            }
        );
        let resolved = schema.resolve(path)?;
        let last = *resolved.last().expect("nonempty steps");

        // A list key leaf may only come into existence with its instance.
        self.ensure_not_key_leaf(schema, path, last, "cannot set a list key directly")?;

        // Walk (or create) the ancestors.
        let mut parent: Option<NodeId> = None;
        for (i, step) in path.steps[..path.steps.len() - 1].iter().enumerate() {
            let prefix = path.prefix(i + 1);
            let matched = self.match_step(schema, parent, resolved[i], step, &prefix)?;
            ensure!(
                matched.len() <= 1,
                error::InvalArgSnafu {
                    path: prefix,
                    msg: "path matches more than one ancestor",
                }
            );
            parent = match matched.first() {
                Some(&id) => Some(id),
                None => {
                    ensure!(
                        !flags.non_recursive,
                        error::DataMissingSnafu { path: prefix }
                    );
                    Some(self.create_step(schema, parent, resolved[i], step, &prefix)?)
                }
            };
        }

        // Apply the final step.
        let full = path.to_string();
        let step = path.steps.last().expect("nonempty steps");
        let existing = self.match_step(schema, parent, last, step, &full)?;

        match &schema.node(last).kind {
            SchemaNodeKind::Leaf { typ, default, .. } => {
                let data = self.leaf_value(schema, last, typ, default.as_deref(), value, &full)?;
                match existing.first() {
                    Some(&id) => {
                        ensure!(!flags.strict, error::DataExistsSnafu { path: full });
                        self.node_mut(id).value = Some(data);
                        Ok(false)
                    }
                    None => {
                        self.attach(
                            parent,
                            Node {
                                name: step.name.clone(),
                                schema: last,
                                value: Some(data),
                                parent: None,
                                children: Vec::new(),
                            },
                        );
                        Ok(true)
                    }
                }
            }
            SchemaNodeKind::LeafList { typ, .. } => {
                let data = self.leaf_value(schema, last, typ, None, value, &full)?;
                let duplicate = existing
                    .iter()
                    .any(|&id| self.node(id).value.as_ref() == Some(&data));
                if duplicate {
                    ensure!(!flags.strict, error::DataExistsSnafu { path: full });
                    return Ok(false);
                }
                self.attach(
                    parent,
                    Node {
                        name: step.name.clone(),
                        schema: last,
                        value: Some(data),
                        parent: None,
                        children: Vec::new(),
                    },
                );
                Ok(true)
            }
            SchemaNodeKind::Container { .. } | SchemaNodeKind::List { .. } => {
                ensure!(
                    value.is_none() || value.map(ValueData::is_structural) == Some(true),
                    error::InvalArgSnafu {
                        path: full,
                        msg: "structural nodes do not take a value",
                    }
                );
                if !existing.is_empty() {
                    ensure!(!flags.strict, error::DataExistsSnafu { path: full });
                    return Ok(false);
                }
                self.create_step(schema, parent, last, step, &full)?;
                Ok(true)
            }
            SchemaNodeKind::Choice { .. } | SchemaNodeKind::Case => {
                unreachable!("resolve never yields choice/case")
            }
        }
    }

    /// The typed value for a leaf set: the supplied value checked against the
    /// schema type, or the schema default, or Empty for empty-typed leaves.
    fn leaf_value(
        &self,
        schema: &ModuleSchema,
        leaf: SchemaNodeId,
        typ: &TypeSpec,
        default: Option<&str>,
        value: Option<&ValueData>,
        full: &str,
    ) -> Result<ValueData> {
        match value {
            Some(data) => {
                ensure!(
                    schema.check_value(leaf, data),
                    error::TypeMismatchSnafu {
                        path: full,
                        value_type: data.type_name(),
                    }
                );
                Ok(data.clone())
            }
            None => match (typ, default) {
                (TypeSpec::Empty, _) => Ok(ValueData::Empty),
                (_, Some(raw)) => typ.parse_lexical(raw).ok_or_else(|| error::Error::Internal {
                    msg: format!("schema default '{}' does not parse as {}", raw, typ.name()),
                }),
                (_, None) => error::InvalArgSnafu {
                    path: full,
                    msg: "a value is required for this node",
                }
                .fail(),
            },
        }
    }

    /// Creates one container or list instance (with its key leaves) under the
    /// given parent.
    fn create_step(
        &mut self,
        schema: &ModuleSchema,
        parent: Option<NodeId>,
        schema_id: SchemaNodeId,
        step: &Step,
        step_path: &str,
    ) -> Result<NodeId> {
        match &schema.node(schema_id).kind {
            SchemaNodeKind::Container { .. } => {
                ensure!(
                    step.keys.is_empty(),
                    error::InvalArgSnafu {
                        path: step_path,
                        msg: "containers take no key predicates",
                    }
                );
                Ok(self.attach(
                    parent,
                    Node {
                        name: step.name.clone(),
                        schema: schema_id,
                        value: None,
                        parent: None,
                        children: Vec::new(),
                    },
                ))
            }
            SchemaNodeKind::List { keys, .. } => {
                let keys = keys.clone();
                ensure!(
                    step.keys.len() == keys.len()
                        && keys.iter().all(|k| step.keys.iter().any(|p| p.name == *k)),
                    error::InvalArgSnafu {
                        path: step_path,
                        msg: "creating a list instance requires all its keys",
                    }
                );
                let typed = self.parse_key_predicates(schema, schema_id, step, step_path)?;
                let instance = self.attach(
                    parent,
                    Node {
                        name: step.name.clone(),
                        schema: schema_id,
                        value: None,
                        parent: None,
                        children: Vec::new(),
                    },
                );
                // Key leaves are created in schema key order.
                for key in &keys {
                    let (_, value) = typed
                        .iter()
                        .find(|(name, _)| name == key)
                        .expect("presence checked above");
                    let leaf_schema = schema
                        .find_child(Some(schema_id), key)
                        .expect("key leaf resolved above");
                    self.attach(
                        Some(instance),
                        Node {
                            name: key.clone(),
                            schema: leaf_schema,
                            value: Some(value.clone()),
                            parent: None,
                            children: Vec::new(),
                        },
                    );
                }
                Ok(instance)
            }
            other => error::InvalArgSnafu {
                path: step_path,
                msg: format!("cannot create children under a {}", other.keyword()),
            }
            .fail(),
        }
    }

    /// Deletes the nodes matching `path`.  Returns how many were removed.
    pub fn delete(&mut self, schema: &ModuleSchema, path: &Path, flags: EditFlags) -> Result<usize> {
        if path.steps.is_empty() {
            // Whole-module wildcard: clear the tree.
            let count = self.roots.len();
            ensure!(
                count > 0 || !flags.strict,
                error::DataMissingSnafu {
                    path: path.to_string(),
                }
            );
            for root in self.roots.clone() {
                self.free_subtree(root);
            }
            self.roots.clear();
            return Ok(count);
        }

        let resolved = schema.resolve(path)?;
        let last = *resolved.last().expect("nonempty steps");
        self.ensure_not_key_leaf(schema, path, last, "cannot delete a list key directly")?;

        let matched = self.find(schema, path)?;
        let targets: Vec<NodeId> = if path.wildcard {
            matched
                .iter()
                .flat_map(|&id| self.node(id).children.clone())
                .collect()
        } else {
            matched
        };

        ensure!(
            !targets.is_empty() || !flags.strict,
            error::DataMissingSnafu {
                path: path.to_string(),
            }
        );
        let count = targets.len();
        for id in targets {
            self.remove(id);
        }
        Ok(count)
    }

    fn ensure_not_key_leaf(
        &self,
        schema: &ModuleSchema,
        path: &Path,
        last: SchemaNodeId,
        msg: &str,
    ) -> Result<()> {
        if let Some(parent) = schema.node(last).parent {
            if let SchemaNodeKind::List { keys, .. } = &schema.node(parent).kind {
                ensure!(
                    !keys.contains(&schema.node(last).name),
                    error::InvalArgSnafu {
                        path: path.to_string(),
                        msg,
                    }
                );
            }
        }
        Ok(())
    }

    /// Moves a user-ordered list instance within its siblings.  A move at the
    /// boundary is a no-op.
    pub fn move_item(
        &mut self,
        schema: &ModuleSchema,
        path: &Path,
        direction: MoveDirection,
    ) -> Result<()> {
        ensure!(
            !path.wildcard && !path.steps.is_empty(),
            error::InvalArgSnafu {
                path: path.to_string(),
                msg: "move requires a concrete path",
            }
        );
        let resolved = schema.resolve(path)?;
        let last = *resolved.last().expect("nonempty steps");
        match &schema.node(last).kind {
            SchemaNodeKind::List { user_ordered, .. } => {
                ensure!(
                    *user_ordered,
                    error::InvalArgSnafu {
                        path: path.to_string(),
                        msg: "list is not user-ordered",
                    }
                );
            }
            _ => {
                return error::InvalArgSnafu {
                    path: path.to_string(),
                    msg: "move is only valid on user-ordered lists",
                }
                .fail()
            }
        }

        let matched = self.find(schema, path)?;
        let id = match matched.as_slice() {
            [] => {
                return error::NotFoundSnafu {
                    path: path.to_string(),
                }
                .fail()
            }
            [one] => *one,
            _ => {
                return error::InvalArgSnafu {
                    path: path.to_string(),
                    msg: "move requires a single list instance",
                }
                .fail()
            }
        };

        let parent = self.node(id).parent;
        let siblings: Vec<NodeId> = self
            .children(parent)
            .iter()
            .copied()
            .filter(|&c| self.node(c).schema == last)
            .collect();
        let pos = siblings
            .iter()
            .position(|&c| c == id)
            .expect("node is among its siblings");

        let target = match direction {
            MoveDirection::Up if pos > 0 => pos - 1,
            MoveDirection::Down if pos + 1 < siblings.len() => pos + 1,
            MoveDirection::First => 0,
            MoveDirection::Last => siblings.len() - 1,
            // Already at the edge.
            _ => return Ok(()),
        };
        if target == pos {
            return Ok(());
        }

        // Reorder within the shared child vector using the global positions of
        // the two siblings.
        let children: &mut Vec<NodeId> = match parent {
            Some(p) => &mut self.node_mut(p).children,
            None => &mut self.roots,
        };
        let from = children.iter().position(|&c| c == id).expect("present");
        let to = children
            .iter()
            .position(|&c| c == siblings[target])
            .expect("present");
        let node = children.remove(from);
        children.insert(to, node);
        Ok(())
    }

    // Retrieval

    /// The values matching a path, in document order.  A trailing wildcard
    /// expands to every descendant of the matched nodes (or of the whole
    /// module for `/module:*`).
    pub fn get_values(&self, schema: &ModuleSchema, path: &Path) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        if path.steps.is_empty() {
            // Module wildcard.
            for &root in &self.roots {
                self.collect_subtree(schema, &path.module, root, &mut out);
            }
            return Ok(out);
        }

        let matched = self.find(schema, path)?;
        if path.wildcard {
            for id in matched {
                for &child in &self.node(id).children {
                    self.collect_subtree(schema, &path.module, child, &mut out);
                }
            }
        } else {
            for id in matched {
                out.push(self.value_of(schema, &path.module, id));
            }
        }
        Ok(out)
    }

    fn collect_subtree(
        &self,
        schema: &ModuleSchema,
        module: &str,
        id: NodeId,
        out: &mut Vec<Value>,
    ) {
        out.push(self.value_of(schema, module, id));
        for &child in &self.node(id).children {
            self.collect_subtree(schema, module, child, out);
        }
    }

    fn value_of(&self, schema: &ModuleSchema, module: &str, id: NodeId) -> Value {
        let node = self.node(id);
        let data = match &node.value {
            Some(data) => data.clone(),
            None => match schema.node(node.schema).kind {
                SchemaNodeKind::List { .. } => ValueData::List,
                _ => ValueData::Container,
            },
        };
        Value::new(self.canonical_path(schema, module, id), data)
    }

    /// The canonical textual path of a node, with key predicates on list
    /// instances.
    pub fn canonical_path(&self, schema: &ModuleSchema, module: &str, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            let mut segment = node.name.clone();
            if let SchemaNodeKind::List { keys, .. } = &schema.node(node.schema).kind {
                for key in keys {
                    if let Some(value) = self.key_leaf_value(node_id, key) {
                        segment.push_str(&format!("[{}='{}']", key, value.lexical()));
                    }
                }
            }
            segments.push(segment);
            current = node.parent;
        }
        segments.reverse();
        format!("/{}:{}", module, segments.join("/"))
    }

    // Serialisation

    pub fn to_repr(&self) -> Vec<NodeRepr> {
        self.roots.iter().map(|&id| self.node_repr(id)).collect()
    }

    fn node_repr(&self, id: NodeId) -> NodeRepr {
        let node = self.node(id);
        NodeRepr {
            name: node.name.clone(),
            value: node.value.clone(),
            children: node
                .children
                .iter()
                .map(|&child| self.node_repr(child))
                .collect(),
        }
    }

    /// Rebuilds a tree from its serialised shape, re-resolving schema nodes by
    /// name.  Nodes the schema no longer knows are an integrity error.
    pub fn from_repr(schema: &ModuleSchema, reprs: &[NodeRepr]) -> Result<Self> {
        let mut tree = DataTree::new();
        for repr in reprs {
            tree.attach_repr(schema, None, None, repr)?;
        }
        Ok(tree)
    }

    fn attach_repr(
        &mut self,
        schema: &ModuleSchema,
        parent: Option<NodeId>,
        parent_schema: Option<SchemaNodeId>,
        repr: &NodeRepr,
    ) -> Result<()> {
        let schema_id =
            schema
                .find_child(parent_schema, &repr.name)
                .ok_or_else(|| error::Error::Internal {
                    msg: format!(
                        "stored node '{}' is not in module '{}' schema",
                        repr.name, schema.name
                    ),
                })?;
        let id = self.attach(
            parent,
            Node {
                name: repr.name.clone(),
                schema: schema_id,
                value: repr.value.clone(),
                parent: None,
                children: Vec::new(),
            },
        );
        for child in &repr.children {
            self.attach_repr(schema, Some(id), Some(schema_id), child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::parse::parse_module;
    use std::path::PathBuf;

    const SCHEMA: &str = r#"
        module example-module {
            namespace "urn:example";
            prefix ex;
            container container {
                list list {
                    key "key1 key2";
                    leaf key1 { type string; }
                    leaf key2 { type string; }
                    leaf leaf { type string; }
                }
            }
            list user {
                key "name";
                ordered-by user;
                leaf name { type string; }
            }
            leaf-list numbers { type uint32; }
        }
    "#;

    fn schema() -> ModuleSchema {
        parse_module(SCHEMA, &PathBuf::from("example-module.yang")).unwrap()
    }

    fn set(tree: &mut DataTree, schema: &ModuleSchema, path: &str, value: Option<ValueData>) {
        tree.set(
            schema,
            &Path::parse(path).unwrap(),
            value.as_ref(),
            EditFlags::default(),
        )
        .unwrap();
    }

    #[test]
    fn set_creates_ancestors_and_keys() {
        let s = schema();
        let mut tree = DataTree::new();
        set(
            &mut tree,
            &s,
            "/example-module:container/list[key1='k1'][key2='k2']/leaf",
            Some(ValueData::String("Leaf value".to_string())),
        );

        let values = tree
            .get_values(&s, &Path::parse("/example-module:*").unwrap())
            .unwrap();
        let paths: Vec<&str> = values
            .iter()
            .map(|v| v.path.as_deref().unwrap())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/example-module:container",
                "/example-module:container/list[key1='k1'][key2='k2']",
                "/example-module:container/list[key1='k1'][key2='k2']/key1",
                "/example-module:container/list[key1='k1'][key2='k2']/key2",
                "/example-module:container/list[key1='k1'][key2='k2']/leaf",
            ]
        );
        assert_eq!(
            values.last().unwrap().data,
            ValueData::String("Leaf value".to_string())
        );
    }

    #[test]
    fn strict_and_non_recursive() {
        let s = schema();
        let mut tree = DataTree::new();
        let leaf = Path::parse("/example-module:container/list[key1='a'][key2='b']/leaf").unwrap();

        // NON_RECURSIVE refuses to create the missing ancestors.
        let err = tree
            .set(
                &s,
                &leaf,
                Some(&ValueData::String("x".to_string())),
                EditFlags {
                    non_recursive: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::DataMissing { .. }));

        tree.set(
            &s,
            &leaf,
            Some(&ValueData::String("x".to_string())),
            EditFlags::default(),
        )
        .unwrap();

        // STRICT refuses to overwrite.
        let err = tree
            .set(
                &s,
                &leaf,
                Some(&ValueData::String("y".to_string())),
                EditFlags {
                    strict: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::DataExists { .. }));
    }

    #[test]
    fn list_key_cannot_be_set_or_deleted() {
        let s = schema();
        let mut tree = DataTree::new();
        let key_path =
            Path::parse("/example-module:container/list[key1='a'][key2='b']/key1").unwrap();

        let err = tree
            .set(
                &s,
                &key_path,
                Some(&ValueData::String("other".to_string())),
                EditFlags::default(),
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalArg { .. }));

        let err = tree
            .delete(&s, &key_path, EditFlags::default())
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalArg { .. }));
    }

    #[test]
    fn delete_list_instances() {
        let s = schema();
        let mut tree = DataTree::new();
        set(
            &mut tree,
            &s,
            "/example-module:container/list[key1='a'][key2='b']/leaf",
            Some(ValueData::String("1".to_string())),
        );
        set(
            &mut tree,
            &s,
            "/example-module:container/list[key1='c'][key2='d']/leaf",
            Some(ValueData::String("2".to_string())),
        );

        // Unkeyed list step matches all instances.
        let removed = tree
            .delete(
                &s,
                &Path::parse("/example-module:container/list").unwrap(),
                EditFlags::default(),
            )
            .unwrap();
        assert_eq!(removed, 2);

        // STRICT delete of now-absent data fails.
        let err = tree
            .delete(
                &s,
                &Path::parse("/example-module:container/list").unwrap(),
                EditFlags {
                    strict: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::DataMissing { .. }));
    }

    #[test]
    fn user_ordered_moves() {
        let s = schema();
        let mut tree = DataTree::new();
        for name in ["A", "B", "C"] {
            set(
                &mut tree,
                &s,
                &format!("/example-module:user[name='{}']", name),
                None,
            );
        }

        let order = |tree: &DataTree| -> Vec<String> {
            tree.get_values(&s, &Path::parse("/example-module:user").unwrap())
                .unwrap()
                .iter()
                .map(|v| v.path.as_deref().unwrap().to_string())
                .collect()
        };

        tree.move_item(
            &s,
            &Path::parse("/example-module:user[name='A']").unwrap(),
            MoveDirection::Down,
        )
        .unwrap();
        tree.move_item(
            &s,
            &Path::parse("/example-module:user[name='C']").unwrap(),
            MoveDirection::Up,
        )
        .unwrap();
        assert_eq!(
            order(&tree),
            vec![
                "/example-module:user[name='B']",
                "/example-module:user[name='C']",
                "/example-module:user[name='A']",
            ]
        );

        // Moves at the boundary are no-ops.
        tree.move_item(
            &s,
            &Path::parse("/example-module:user[name='B']").unwrap(),
            MoveDirection::Up,
        )
        .unwrap();
        assert_eq!(order(&tree)[0], "/example-module:user[name='B']");

        tree.move_item(
            &s,
            &Path::parse("/example-module:user[name='B']").unwrap(),
            MoveDirection::Last,
        )
        .unwrap();
        assert_eq!(
            order(&tree),
            vec![
                "/example-module:user[name='C']",
                "/example-module:user[name='A']",
                "/example-module:user[name='B']",
            ]
        );
    }

    #[test]
    fn move_rejects_unordered_list() {
        let s = schema();
        let mut tree = DataTree::new();
        set(
            &mut tree,
            &s,
            "/example-module:container/list[key1='a'][key2='b']/leaf",
            Some(ValueData::String("1".to_string())),
        );
        let err = tree
            .move_item(
                &s,
                &Path::parse("/example-module:container/list[key1='a'][key2='b']").unwrap(),
                MoveDirection::Down,
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalArg { .. }));
    }

    #[test]
    fn leaf_list_duplicates() {
        let s = schema();
        let mut tree = DataTree::new();
        let path = Path::parse("/example-module:numbers").unwrap();
        tree.set(&s, &path, Some(&ValueData::Uint32(1)), EditFlags::default())
            .unwrap();
        tree.set(&s, &path, Some(&ValueData::Uint32(2)), EditFlags::default())
            .unwrap();
        // Re-asserting an existing entry is a no-op without STRICT...
        assert!(!tree
            .set(&s, &path, Some(&ValueData::Uint32(1)), EditFlags::default())
            .unwrap());
        // ...and an error with it.
        let err = tree
            .set(
                &s,
                &path,
                Some(&ValueData::Uint32(1)),
                EditFlags {
                    strict: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::DataExists { .. }));
    }

    #[test]
    fn typed_key_comparison() {
        let text = r#"
            module t {
                namespace "urn:t";
                prefix t;
                list port {
                    key "number";
                    leaf number { type uint16; }
                }
            }
        "#;
        let s = parse_module(text, &PathBuf::from("t.yang")).unwrap();
        let mut tree = DataTree::new();
        set(&mut tree, &s, "/t:port[number='8080']", None);

        // Keys compare as typed values, and a non-numeric predicate is an
        // argument error, not a silent miss.
        assert_eq!(
            tree.find(&s, &Path::parse("/t:port[number='8080']").unwrap())
                .unwrap()
                .len(),
            1
        );
        tree.find(&s, &Path::parse("/t:port[number='eight']").unwrap())
            .unwrap_err();
    }

    #[test]
    fn repr_round_trip() {
        let s = schema();
        let mut tree = DataTree::new();
        set(
            &mut tree,
            &s,
            "/example-module:container/list[key1='k1'][key2='k2']/leaf",
            Some(ValueData::String("v".to_string())),
        );
        set(&mut tree, &s, "/example-module:user[name='A']", None);

        let json = serde_json::to_string(&tree.to_repr()).unwrap();
        let reprs: Vec<NodeRepr> = serde_json::from_str(&json).unwrap();
        let rebuilt = DataTree::from_repr(&s, &reprs).unwrap();

        let before = tree
            .get_values(&s, &Path::parse("/example-module:*").unwrap())
            .unwrap();
        let after = rebuilt
            .get_values(&s, &Path::parse("/example-module:*").unwrap())
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_element_error() {
        let s = schema();
        let tree = DataTree::new();
        let err = tree
            .find(&s, &Path::parse("/example-module:unknown/next").unwrap())
            .unwrap_err();
        match err {
            crate::error::Error::BadElement { path } => {
                assert_eq!(path, "/example-module:unknown");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
