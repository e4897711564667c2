//! Full-tree validation against a module schema.
//!
//! Checks the datastore invariants: every value conforms to its schema type,
//! list instances carry all their keys, no two sibling instances share a key
//! tuple, leaf-list entries are unique, nodes from at most one case of a
//! choice are present, and mandatory descendants exist wherever their
//! ancestor is present (absent subtrees are not descended into).
//!
//! All problems found are reported, each tagged with the faulting path.

use std::collections::HashSet;

use crate::tree::{DataTree, NodeId};
use crate::schema::{ModuleSchema, SchemaNodeId, SchemaNodeKind};
use wire::ErrorInfo;

/// Validates the whole tree, returning every violation found.
pub fn check(schema: &ModuleSchema, module: &str, tree: &DataTree) -> Vec<ErrorInfo> {
    let mut errors = Vec::new();
    check_scope(schema, module, tree, None, None, &mut errors);
    errors
}

/// Checks one scope: the data children of `parent` against the schema
/// children of `parent_schema`, then recurses into present subtrees.
fn check_scope(
    schema: &ModuleSchema,
    module: &str,
    tree: &DataTree,
    parent: Option<NodeId>,
    parent_schema: Option<SchemaNodeId>,
    errors: &mut Vec<ErrorInfo>,
) {
    let present = tree.children(parent);

    // Per-node checks and recursion.
    for &id in present {
        let node = tree.node(id);
        let path = || tree.canonical_path(schema, module, id);

        match &schema.node(node.schema).kind {
            SchemaNodeKind::Leaf { typ, .. } | SchemaNodeKind::LeafList { typ, .. } => {
                match &node.value {
                    Some(data) if schema.check_value(node.schema, data) => {}
                    Some(data) => errors.push(ErrorInfo::with_path(
                        format!(
                            "value of type {} does not conform to schema type {}",
                            data.type_name(),
                            typ.name()
                        ),
                        path(),
                    )),
                    None => errors.push(ErrorInfo::with_path("leaf carries no value", path())),
                }
            }
            SchemaNodeKind::List { keys, .. } => {
                for key in keys {
                    let has_key = tree
                        .children(Some(id))
                        .iter()
                        .any(|&c| tree.node(c).name == *key);
                    if !has_key {
                        errors.push(ErrorInfo::with_path(
                            format!("list instance is missing key '{}'", key),
                            path(),
                        ));
                    }
                }
                check_scope(schema, module, tree, Some(id), Some(node.schema), errors);
            }
            SchemaNodeKind::Container { .. } => {
                check_scope(schema, module, tree, Some(id), Some(node.schema), errors);
            }
            SchemaNodeKind::Choice { .. } | SchemaNodeKind::Case => {
                errors.push(ErrorInfo::with_path(
                    "structural schema node present in data tree",
                    path(),
                ));
            }
        }
    }

    // Sibling uniqueness, per schema node.
    let mut seen_schemas = HashSet::new();
    for &id in present {
        let schema_id = tree.node(id).schema;
        if !seen_schemas.insert(schema_id) {
            continue;
        }
        let siblings: Vec<NodeId> = present
            .iter()
            .copied()
            .filter(|&c| tree.node(c).schema == schema_id)
            .collect();
        match &schema.node(schema_id).kind {
            SchemaNodeKind::List { keys, .. } => {
                check_key_uniqueness(schema, module, tree, &siblings, keys, errors);
            }
            SchemaNodeKind::LeafList { .. } => {
                let mut seen = Vec::new();
                for &entry in &siblings {
                    let value = tree.node(entry).value.clone();
                    if seen.contains(&value) {
                        errors.push(ErrorInfo::with_path(
                            "duplicate leaf-list entry",
                            tree.canonical_path(schema, module, entry),
                        ));
                    } else {
                        seen.push(value);
                    }
                }
            }
            _ => {}
        }
    }

    // Mandatory and choice enforcement for this scope.
    let schema_children: Vec<SchemaNodeId> = match parent_schema {
        Some(id) => schema.node(id).children.clone(),
        None => schema.roots().to_vec(),
    };
    check_mandatory(
        schema,
        module,
        tree,
        parent,
        &schema_children,
        &scope_path(schema, module, tree, parent),
        errors,
    );
}

fn scope_path(
    schema: &ModuleSchema,
    module: &str,
    tree: &DataTree,
    parent: Option<NodeId>,
) -> String {
    match parent {
        Some(id) => tree.canonical_path(schema, module, id),
        None => format!("/{}", module),
    }
}

fn check_key_uniqueness(
    schema: &ModuleSchema,
    module: &str,
    tree: &DataTree,
    instances: &[NodeId],
    keys: &[String],
    errors: &mut Vec<ErrorInfo>,
) {
    let mut seen: Vec<Vec<Option<wire::ValueData>>> = Vec::new();
    for &instance in instances {
        let tuple: Vec<Option<wire::ValueData>> = keys
            .iter()
            .map(|key| {
                tree.children(Some(instance))
                    .iter()
                    .map(|&c| tree.node(c))
                    .find(|n| n.name == *key)
                    .and_then(|n| n.value.clone())
            })
            .collect();
        if seen.contains(&tuple) {
            errors.push(ErrorInfo::with_path(
                "duplicate list key tuple",
                tree.canonical_path(schema, module, instance),
            ));
        } else {
            seen.push(tuple);
        }
    }
}

/// Walks the schema children of a present scope, reporting missing mandatory
/// leaves and choice violations.  Choice branches recurse so that mandatory
/// nodes inside the active case are enforced.
fn check_mandatory(
    schema: &ModuleSchema,
    module: &str,
    tree: &DataTree,
    parent: Option<NodeId>,
    schema_children: &[SchemaNodeId],
    scope: &str,
    errors: &mut Vec<ErrorInfo>,
) {
    let present_schemas: HashSet<SchemaNodeId> = tree
        .children(parent)
        .iter()
        .map(|&id| tree.node(id).schema)
        .collect();

    for &child in schema_children {
        if !schema.enabled(child) {
            continue;
        }
        let node = schema.node(child);
        match &node.kind {
            SchemaNodeKind::Leaf { mandatory, .. } => {
                if *mandatory && !present_schemas.contains(&child) {
                    errors.push(ErrorInfo::with_path(
                        format!("mandatory leaf '{}' is missing", node.name),
                        format!("{}/{}", scope, node.name),
                    ));
                }
            }
            SchemaNodeKind::Choice { mandatory } => {
                let mut active = Vec::new();
                for &branch in &node.children {
                    if !schema.enabled(branch) {
                        continue;
                    }
                    let members = branch_members(schema, branch);
                    if members.iter().any(|m| present_schemas.contains(m)) {
                        active.push(branch);
                    }
                }
                match active.as_slice() {
                    [] => {
                        if *mandatory {
                            errors.push(ErrorInfo::with_path(
                                format!("mandatory choice '{}' has no case", node.name),
                                format!("{}/{}", scope, node.name),
                            ));
                        }
                    }
                    [one] => {
                        // Enforce mandatory nodes within the active case.
                        let case_children = match schema.node(*one).kind {
                            SchemaNodeKind::Case => schema.node(*one).children.clone(),
                            _ => vec![*one],
                        };
                        check_mandatory(
                            schema,
                            module,
                            tree,
                            parent,
                            &case_children,
                            scope,
                            errors,
                        );
                    }
                    _ => errors.push(ErrorInfo::with_path(
                        format!("nodes from more than one case of choice '{}'", node.name),
                        format!("{}/{}", scope, node.name),
                    )),
                }
            }
            _ => {}
        }
    }
}

/// The data schema nodes a choice branch contributes to its parent scope.
fn branch_members(schema: &ModuleSchema, branch: SchemaNodeId) -> Vec<SchemaNodeId> {
    if schema.node(branch).kind.is_data() {
        vec![branch]
    } else {
        schema.data_children(Some(branch))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::Path;
    use crate::schema::parse::parse_module;
    use std::path::PathBuf;
    use wire::{EditFlags, ValueData};

    const SCHEMA: &str = r#"
        module test-module {
            namespace "urn:test";
            prefix t;
            container location {
                leaf name { type string; }
                leaf latitude { type string; mandatory true; }
                leaf longitude { type string; mandatory true; }
            }
            list user {
                key "name";
                ordered-by user;
                leaf name { type string; }
            }
            choice transport {
                case tcp { leaf tcp-port { type uint16; mandatory true; } }
                case udp { leaf udp-port { type uint16; } }
            }
        }
    "#;

    fn schema() -> ModuleSchema {
        parse_module(SCHEMA, &PathBuf::from("test-module.yang")).unwrap()
    }

    fn set(tree: &mut DataTree, s: &ModuleSchema, path: &str, value: Option<ValueData>) {
        tree.set(
            s,
            &Path::parse(path).unwrap(),
            value.as_ref(),
            EditFlags::default(),
        )
        .unwrap();
    }

    #[test]
    fn empty_tree_is_valid() {
        let s = schema();
        assert!(check(&s, "test-module", &DataTree::new()).is_empty());
    }

    #[test]
    fn missing_mandatory_leaves() {
        let s = schema();
        let mut tree = DataTree::new();
        set(
            &mut tree,
            &s,
            "/test-module:location/name",
            Some(ValueData::String("Banska Bystrica".to_string())),
        );

        let errors = check(&s, "test-module", &tree);
        let paths: Vec<&str> = errors.iter().filter_map(|e| e.path.as_deref()).collect();
        assert!(paths.contains(&"/test-module:location/latitude"));
        assert!(paths.contains(&"/test-module:location/longitude"));

        set(
            &mut tree,
            &s,
            "/test-module:location/latitude",
            Some(ValueData::String("48.7".to_string())),
        );
        set(
            &mut tree,
            &s,
            "/test-module:location/longitude",
            Some(ValueData::String("19.15".to_string())),
        );
        assert!(check(&s, "test-module", &tree).is_empty());
    }

    #[test]
    fn mandatory_not_required_when_ancestor_absent() {
        let s = schema();
        let mut tree = DataTree::new();
        // The location container is absent, so its mandatory leaves are not
        // required; users are unaffected.
        set(&mut tree, &s, "/test-module:user[name='A']", None);
        assert!(check(&s, "test-module", &tree).is_empty());
    }

    #[test]
    fn duplicate_key_tuples() {
        let s = schema();
        let mut tree = DataTree::new();
        set(&mut tree, &s, "/test-module:user[name='A']", None);
        set(&mut tree, &s, "/test-module:user[name='B']", None);
        assert!(check(&s, "test-module", &tree).is_empty());

        // Force a duplicate through the serialised form; the edit layer would
        // refuse to create one.
        let mut reprs = tree.to_repr();
        let copy = reprs[0].clone();
        reprs.push(copy);
        let broken = DataTree::from_repr(&s, &reprs).unwrap();

        let errors = check(&s, "test-module", &broken);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("duplicate list key tuple")));
    }

    #[test]
    fn choice_exclusivity() {
        let s = schema();
        let mut tree = DataTree::new();
        set(
            &mut tree,
            &s,
            "/test-module:tcp-port",
            Some(ValueData::Uint16(22)),
        );
        assert!(check(&s, "test-module", &tree).is_empty());

        set(
            &mut tree,
            &s,
            "/test-module:udp-port",
            Some(ValueData::Uint16(53)),
        );
        let errors = check(&s, "test-module", &tree);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("more than one case")));
    }

    #[test]
    fn mandatory_inside_active_case() {
        let text = r#"
            module c {
                namespace "urn:c";
                prefix c;
                choice mode {
                    case full {
                        leaf detail { type string; }
                        leaf level { type uint8; mandatory true; }
                    }
                }
            }
        "#;
        let s = parse_module(text, &PathBuf::from("c.yang")).unwrap();
        let mut tree = DataTree::new();
        // Activating the case without its mandatory leaf is an error.
        set(
            &mut tree,
            &s,
            "/c:detail",
            Some(ValueData::String("x".to_string())),
        );
        let errors = check(&s, "c", &tree);
        assert!(errors.iter().any(|e| e.message.contains("level")));

        set(&mut tree, &s, "/c:level", Some(ValueData::Uint8(3)));
        assert!(check(&s, "c", &tree).is_empty());
    }
}
