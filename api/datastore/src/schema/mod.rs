//! The schema context: a registry of installed modules and the typed node
//! tree each module defines.
//!
//! Schemas are parsed from YANG text files by the [`parse`] module.  Schema
//! nodes live in a per-module arena and are referenced by [`SchemaNodeId`];
//! data tree nodes point back into this arena.  Choice and case nodes are
//! structural only: their descendants appear as direct data children of the
//! choice's parent.
//!
//! Nodes guarded by an `if-feature` whose feature isn't enabled are invisible
//! to data operations.

pub mod parse;

use log::{debug, info};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use walkdir::WalkDir;

use crate::error::{self, Error, Result};
use crate::path::Path;
use wire::{SchemaInfo, SubmoduleInfo, ValueData};

/// Handle to a node within a module's schema arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaNodeId(pub(crate) usize);

/// The value type of a leaf or leaf-list.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Decimal64 { fraction_digits: u8 },
    String,
    Boolean,
    Binary,
    Empty,
    Enumeration { values: Vec<String> },
    Bits { bits: Vec<String> },
    Identityref { base: String },
    InstanceIdentifier,
}

impl TypeSpec {
    /// The YANG name of the type, for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            TypeSpec::Int8 => "int8",
            TypeSpec::Int16 => "int16",
            TypeSpec::Int32 => "int32",
            TypeSpec::Int64 => "int64",
            TypeSpec::Uint8 => "uint8",
            TypeSpec::Uint16 => "uint16",
            TypeSpec::Uint32 => "uint32",
            TypeSpec::Uint64 => "uint64",
            TypeSpec::Decimal64 { .. } => "decimal64",
            TypeSpec::String => "string",
            TypeSpec::Boolean => "boolean",
            TypeSpec::Binary => "binary",
            TypeSpec::Empty => "empty",
            TypeSpec::Enumeration { .. } => "enumeration",
            TypeSpec::Bits { .. } => "bits",
            TypeSpec::Identityref { .. } => "identityref",
            TypeSpec::InstanceIdentifier => "instance-identifier",
        }
    }

    /// Whether the given value conforms to this type.  Identityref membership
    /// is checked separately against the module's identity set.
    pub fn check(&self, data: &ValueData) -> bool {
        match (self, data) {
            (TypeSpec::Int8, ValueData::Int8(_)) => true,
            (TypeSpec::Int16, ValueData::Int16(_)) => true,
            (TypeSpec::Int32, ValueData::Int32(_)) => true,
            (TypeSpec::Int64, ValueData::Int64(_)) => true,
            (TypeSpec::Uint8, ValueData::Uint8(_)) => true,
            (TypeSpec::Uint16, ValueData::Uint16(_)) => true,
            (TypeSpec::Uint32, ValueData::Uint32(_)) => true,
            (TypeSpec::Uint64, ValueData::Uint64(_)) => true,
            (TypeSpec::Decimal64 { .. }, ValueData::Decimal64(_)) => true,
            (TypeSpec::String, ValueData::String(_)) => true,
            (TypeSpec::Boolean, ValueData::Bool(_)) => true,
            (TypeSpec::Binary, ValueData::Binary(_)) => true,
            (TypeSpec::Empty, ValueData::Empty) => true,
            (TypeSpec::Enumeration { values }, ValueData::Enum(v)) => values.contains(v),
            (TypeSpec::Bits { bits }, ValueData::Bits(set)) => {
                set.iter().all(|b| bits.contains(b))
            }
            (TypeSpec::Identityref { .. }, ValueData::Identityref(_)) => true,
            (TypeSpec::InstanceIdentifier, ValueData::InstanceId(_)) => true,
            _ => false,
        }
    }

    /// Parses the lexical form of a value of this type, e.g. a list key
    /// predicate or a schema default.  Returns None when the text doesn't
    /// conform.
    pub fn parse_lexical(&self, raw: &str) -> Option<ValueData> {
        match self {
            TypeSpec::Int8 => raw.parse().ok().map(ValueData::Int8),
            TypeSpec::Int16 => raw.parse().ok().map(ValueData::Int16),
            TypeSpec::Int32 => raw.parse().ok().map(ValueData::Int32),
            TypeSpec::Int64 => raw.parse().ok().map(ValueData::Int64),
            TypeSpec::Uint8 => raw.parse().ok().map(ValueData::Uint8),
            TypeSpec::Uint16 => raw.parse().ok().map(ValueData::Uint16),
            TypeSpec::Uint32 => raw.parse().ok().map(ValueData::Uint32),
            TypeSpec::Uint64 => raw.parse().ok().map(ValueData::Uint64),
            TypeSpec::Decimal64 { fraction_digits } => {
                parse_decimal64(raw, *fraction_digits).map(ValueData::Decimal64)
            }
            TypeSpec::String => Some(ValueData::String(raw.to_string())),
            TypeSpec::Boolean => match raw {
                "true" => Some(ValueData::Bool(true)),
                "false" => Some(ValueData::Bool(false)),
                _ => None,
            },
            TypeSpec::Binary => parse_hex(raw).map(ValueData::Binary),
            TypeSpec::Empty => raw.is_empty().then_some(ValueData::Empty),
            TypeSpec::Enumeration { values } => values
                .contains(&raw.to_string())
                .then(|| ValueData::Enum(raw.to_string())),
            TypeSpec::Bits { bits } => {
                let set: Vec<String> = raw.split_whitespace().map(String::from).collect();
                set.iter()
                    .all(|b| bits.contains(b))
                    .then_some(ValueData::Bits(set))
            }
            TypeSpec::Identityref { .. } => Some(ValueData::Identityref(raw.to_string())),
            TypeSpec::InstanceIdentifier => Some(ValueData::InstanceId(raw.to_string())),
        }
    }
}

/// Parses a decimal string like `-12.34` into the integer mantissa for the
/// given scale.  A bare integer means whole units.
fn parse_decimal64(raw: &str, fraction_digits: u8) -> Option<i64> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > fraction_digits as usize {
        return None;
    }
    let mut mantissa: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    mantissa = mantissa.checked_mul(10i64.checked_pow(fraction_digits as u32)?)?;
    if !frac_part.is_empty() {
        let scale = 10i64.checked_pow((fraction_digits as usize - frac_part.len()) as u32)?;
        let frac: i64 = frac_part.parse().ok()?;
        mantissa = mantissa.checked_add(frac.checked_mul(scale)?)?;
    }
    Some(if negative { -mantissa } else { mantissa })
}

fn parse_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
        .collect()
}

/// What kind of node a schema node is, with per-kind metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNodeKind {
    Container {
        presence: bool,
    },
    List {
        keys: Vec<String>,
        user_ordered: bool,
    },
    Leaf {
        typ: TypeSpec,
        mandatory: bool,
        default: Option<String>,
    },
    LeafList {
        typ: TypeSpec,
        user_ordered: bool,
    },
    Choice {
        mandatory: bool,
    },
    Case,
}

impl SchemaNodeKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            SchemaNodeKind::Container { .. } => "container",
            SchemaNodeKind::List { .. } => "list",
            SchemaNodeKind::Leaf { .. } => "leaf",
            SchemaNodeKind::LeafList { .. } => "leaf-list",
            SchemaNodeKind::Choice { .. } => "choice",
            SchemaNodeKind::Case => "case",
        }
    }

    /// Whether nodes of this kind appear in data trees.  Choice and case are
    /// schema-only.
    pub fn is_data(&self) -> bool {
        !matches!(self, SchemaNodeKind::Choice { .. } | SchemaNodeKind::Case)
    }
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub name: String,
    pub kind: SchemaNodeKind,
    pub parent: Option<SchemaNodeId>,
    pub children: Vec<SchemaNodeId>,
    pub if_features: Vec<String>,
}

/// One installed module: header metadata plus the schema node arena.
#[derive(Debug, Clone)]
pub struct ModuleSchema {
    pub name: String,
    pub namespace: String,
    pub prefix: String,
    pub revision: Option<String>,
    pub features: Vec<String>,
    pub enabled_features: HashSet<String>,
    pub identities: HashSet<String>,
    pub submodules: Vec<String>,
    pub yang_path: PathBuf,
    pub(crate) nodes: Vec<SchemaNode>,
    pub(crate) roots: Vec<SchemaNodeId>,
}

impl ModuleSchema {
    pub fn node(&self, id: SchemaNodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[SchemaNodeId] {
        &self.roots
    }

    /// Whether a node is visible given the enabled feature set.  All
    /// `if-feature` guards on the node itself must be satisfied; ancestors are
    /// checked by the traversal that got us here.
    pub fn enabled(&self, id: SchemaNodeId) -> bool {
        self.node(id)
            .if_features
            .iter()
            .all(|f| self.enabled_features.contains(f))
    }

    /// The data children visible under the given parent (the module root when
    /// None), looking through choice and case nodes.
    pub fn data_children(&self, parent: Option<SchemaNodeId>) -> Vec<SchemaNodeId> {
        let direct: &[SchemaNodeId] = match parent {
            Some(id) => &self.node(id).children,
            None => &self.roots,
        };
        let mut out = Vec::new();
        self.collect_data_children(direct, &mut out);
        out
    }

    fn collect_data_children(&self, ids: &[SchemaNodeId], out: &mut Vec<SchemaNodeId>) {
        for &id in ids {
            if !self.enabled(id) {
                continue;
            }
            let node = self.node(id);
            if node.kind.is_data() {
                out.push(id);
            } else {
                self.collect_data_children(&node.children, out);
            }
        }
    }

    /// Finds the visible data child with the given name under a parent.
    pub fn find_child(&self, parent: Option<SchemaNodeId>, name: &str) -> Option<SchemaNodeId> {
        self.data_children(parent)
            .into_iter()
            .find(|&id| self.node(id).name == name)
    }

    /// Resolves every step of a data path to its schema node.  Fails with
    /// `BadElement` naming the longest resolvable prefix.
    pub fn resolve(&self, path: &Path) -> Result<Vec<SchemaNodeId>> {
        let mut parent = None;
        let mut resolved = Vec::with_capacity(path.steps.len());
        for (i, step) in path.steps.iter().enumerate() {
            let id = self
                .find_child(parent, &step.name)
                .context(error::BadElementSnafu {
                    path: path.prefix(i + 1),
                })?;
            resolved.push(id);
            parent = Some(id);
        }
        Ok(resolved)
    }

    /// The nearest choice node above the given node, with the branch (the
    /// immediate child of the choice) we descended through.  Used to enforce
    /// case exclusivity.
    pub fn choice_branch(&self, id: SchemaNodeId) -> Option<(SchemaNodeId, SchemaNodeId)> {
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            if matches!(self.node(parent).kind, SchemaNodeKind::Choice { .. }) {
                return Some((parent, current));
            }
            current = parent;
        }
        None
    }

    /// Checks a value against a leaf/leaf-list node's type, including
    /// identityref membership against the module's identity set.
    pub fn check_value(&self, id: SchemaNodeId, data: &ValueData) -> bool {
        let typ = match &self.node(id).kind {
            SchemaNodeKind::Leaf { typ, .. } => typ,
            SchemaNodeKind::LeafList { typ, .. } => typ,
            _ => return data.is_structural(),
        };
        if !typ.check(data) {
            return false;
        }
        if let ValueData::Identityref(name) = data {
            if !self.identities.is_empty() {
                let bare = name.rsplit(':').next().unwrap_or(name);
                return self.identities.contains(bare) || self.identities.contains(name.as_str());
            }
        }
        true
    }

    pub fn enable_feature(&mut self, feature: &str) -> Result<()> {
        ensure!(
            self.features.iter().any(|f| f == feature),
            error::NotFoundSnafu {
                path: format!("/{}:feature/{}", self.name, feature),
            }
        );
        self.enabled_features.insert(feature.to_string());
        Ok(())
    }

    pub fn disable_feature(&mut self, feature: &str) -> Result<()> {
        ensure!(
            self.features.iter().any(|f| f == feature),
            error::NotFoundSnafu {
                path: format!("/{}:feature/{}", self.name, feature),
            }
        );
        self.enabled_features.remove(feature);
        Ok(())
    }

    /// The `list_schemas` record for this module.
    pub fn info(&self, schema_dir: &FsPath) -> SchemaInfo {
        let yin = self.yang_path.with_extension("yin");
        SchemaInfo {
            module: self.name.clone(),
            namespace: self.namespace.clone(),
            prefix: self.prefix.clone(),
            revision: self.revision.clone(),
            yang_path: Some(self.yang_path.display().to_string()),
            yin_path: yin.exists().then(|| yin.display().to_string()),
            submodules: self
                .submodules
                .iter()
                .map(|name| {
                    let path = schema_dir.join(format!("{}.yang", name));
                    SubmoduleInfo {
                        name: name.clone(),
                        yang_path: path.exists().then(|| path.display().to_string()),
                    }
                })
                .collect(),
        }
    }
}

/// The process-wide registry of installed modules.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    modules: HashMap<String, ModuleSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every module file found under the schema directory.  Files whose
    /// top-level statement is `submodule` are skipped; they're pulled in via
    /// their parent's `include`.
    pub fn load_dir<P: AsRef<FsPath>>(schema_dir: P) -> Result<Self> {
        let schema_dir = schema_dir.as_ref();
        let mut registry = Self::new();

        for entry in WalkDir::new(schema_dir).follow_links(false) {
            let entry = entry.map_err(|e| Error::Internal {
                msg: format!("unable to walk schema directory: {}", e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yang") {
                continue;
            }

            let text = fs::read_to_string(path).context(error::IoSnafu { path })?;
            if parse::is_submodule(&text) {
                debug!("Skipping submodule file {}", path.display());
                continue;
            }

            let module = parse::parse_module(&text, path)?;
            info!(
                "Loaded module '{}' (revision {}) from {}",
                module.name,
                module.revision.as_deref().unwrap_or("none"),
                path.display()
            );
            registry.modules.insert(module.name.clone(), module);
        }

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<&ModuleSchema> {
        self.modules
            .get(name)
            .context(error::UnknownModuleSnafu { module: name })
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut ModuleSchema> {
        self.modules
            .get_mut(name)
            .context(error::UnknownModuleSnafu { module: name })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn insert(&mut self, module: ModuleSchema) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn remove(&mut self, name: &str) -> Option<ModuleSchema> {
        self.modules.remove(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleSchema> {
        self.modules.values()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decimal64_parsing() {
        assert_eq!(parse_decimal64("1.5", 2), Some(150));
        assert_eq!(parse_decimal64("-12.34", 2), Some(-1234));
        assert_eq!(parse_decimal64("2", 4), Some(20000));
        assert_eq!(parse_decimal64("0.001", 3), Some(1));
        // Too many fraction digits for the scale.
        assert_eq!(parse_decimal64("0.0001", 3), None);
        assert_eq!(parse_decimal64("", 2), None);
        assert_eq!(parse_decimal64(".", 2), None);
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("dead"), Some(vec![0xde, 0xad]));
        assert_eq!(parse_hex(""), Some(vec![]));
        assert_eq!(parse_hex("abc"), None);
        assert_eq!(parse_hex("zz"), None);
    }

    #[test]
    fn type_checks() {
        let t = TypeSpec::Enumeration {
            values: vec!["on".to_string(), "off".to_string()],
        };
        assert!(t.check(&ValueData::Enum("on".to_string())));
        assert!(!t.check(&ValueData::Enum("maybe".to_string())));
        assert!(!t.check(&ValueData::String("on".to_string())));

        let bits = TypeSpec::Bits {
            bits: vec!["a".to_string(), "b".to_string()],
        };
        assert!(bits.check(&ValueData::Bits(vec!["a".to_string()])));
        assert!(!bits.check(&ValueData::Bits(vec!["c".to_string()])));
    }

    #[test]
    fn boolean_lexical() {
        let t = TypeSpec::Boolean;
        assert_eq!(t.parse_lexical("true"), Some(ValueData::Bool(true)));
        assert_eq!(t.parse_lexical("1"), None);
    }
}
