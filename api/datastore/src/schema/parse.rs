//! A parser for the YANG subset the engine understands.
//!
//! YANG's surface grammar is uniform: a statement is a keyword, an optional
//! argument, and either `;` or a `{ ... }` block of substatements.  We
//! tokenize into that shape first and then build a [`ModuleSchema`] from the
//! generic statement tree, ignoring statements we don't model (descriptions,
//! references, organization, and the like) so real-world modules parse.
//!
//! Supported data definitions: `container` (with `presence`), `list` (with
//! `key`, `ordered-by user`), `leaf`, `leaf-list`, `choice`/`case`, plus
//! `feature`, `if-feature`, `identity`, and `include` of submodules.

use snafu::OptionExt;
use std::collections::HashSet;
use std::fs;
use std::path::Path as FsPath;

use super::{ModuleSchema, SchemaNode, SchemaNodeId, SchemaNodeKind, TypeSpec};
use crate::error::{self, Error, Result};

/// A generic YANG statement: keyword, optional argument, substatements.
#[derive(Debug, Clone)]
pub struct Statement {
    pub keyword: String,
    pub arg: Option<String>,
    pub substmts: Vec<Statement>,
}

impl Statement {
    /// The first substatement with the given keyword.
    fn find(&self, keyword: &str) -> Option<&Statement> {
        self.substmts.iter().find(|s| s.keyword == keyword)
    }

    /// The argument of the first substatement with the given keyword.
    fn find_arg(&self, keyword: &str) -> Option<&str> {
        self.find(keyword).and_then(|s| s.arg.as_deref())
    }

    fn args_of(&self, keyword: &str) -> Vec<String> {
        self.substmts
            .iter()
            .filter(|s| s.keyword == keyword)
            .filter_map(|s| s.arg.clone())
            .collect()
    }
}

/// Quick check whether a schema file holds a submodule; used to skip such
/// files during directory loads.
pub fn is_submodule(text: &str) -> bool {
    match tokenize(text) {
        Ok(tokens) => matches!(tokens.first(), Some(Token::Str(s)) if s == "submodule"),
        Err(_) => false,
    }
}

/// Parses a module file into its schema.  `include`d submodules are read from
/// the same directory and merged.
pub fn parse_module(text: &str, file: &FsPath) -> Result<ModuleSchema> {
    let stmt = parse_statement_tree(text, file)?;
    if stmt.keyword != "module" {
        return error::SchemaParseSnafu {
            file,
            msg: format!("expected 'module' at top level, found '{}'", stmt.keyword),
        }
        .fail();
    }
    let name = stmt.arg.clone().context(error::SchemaParseSnafu {
        file,
        msg: "module statement has no name",
    })?;

    let mut module = ModuleSchema {
        name,
        namespace: String::new(),
        prefix: String::new(),
        revision: None,
        features: Vec::new(),
        enabled_features: HashSet::new(),
        identities: HashSet::new(),
        submodules: Vec::new(),
        yang_path: file.to_path_buf(),
        nodes: Vec::new(),
        roots: Vec::new(),
    };

    build_body(&mut module, &stmt.substmts, file)?;

    if module.namespace.is_empty() || module.prefix.is_empty() {
        return error::SchemaParseSnafu {
            file,
            msg: "module is missing namespace or prefix",
        }
        .fail();
    }

    Ok(module)
}

/// Processes the body statements of a module or submodule.
fn build_body(module: &mut ModuleSchema, stmts: &[Statement], file: &FsPath) -> Result<()> {
    for stmt in stmts {
        match stmt.keyword.as_str() {
            "namespace" => {
                if let Some(arg) = &stmt.arg {
                    module.namespace = arg.clone();
                }
            }
            "prefix" => {
                if let Some(arg) = &stmt.arg {
                    module.prefix = arg.clone();
                }
            }
            // Revisions are listed newest first; the first one is current.
            "revision" => {
                if module.revision.is_none() {
                    module.revision = stmt.arg.clone();
                }
            }
            "feature" => {
                if let Some(arg) = &stmt.arg {
                    module.features.push(arg.clone());
                }
            }
            "identity" => {
                if let Some(arg) = &stmt.arg {
                    module.identities.insert(arg.clone());
                }
            }
            "include" => {
                let name = stmt.arg.as_ref().context(error::SchemaParseSnafu {
                    file,
                    msg: "include statement has no submodule name",
                })?;
                include_submodule(module, name, file)?;
            }
            "container" | "list" | "leaf" | "leaf-list" | "choice" => {
                build_node(module, None, stmt, file)?;
            }
            // import, typedef, augment, rpc, notification, description,
            // organization, contact, reference, yang-version: not modelled.
            _ => {}
        }
    }
    Ok(())
}

/// Reads `{dir}/{name}.yang`, checks it's a submodule belonging to us, and
/// merges its body.
fn include_submodule(module: &mut ModuleSchema, name: &str, file: &FsPath) -> Result<()> {
    let dir = file.parent().unwrap_or_else(|| FsPath::new("."));
    let sub_path = dir.join(format!("{}.yang", name));
    let text = fs::read_to_string(&sub_path).map_err(|source| Error::Io {
        path: sub_path.clone(),
        source,
    })?;

    let stmt = parse_statement_tree(&text, &sub_path)?;
    if stmt.keyword != "submodule" {
        return error::SchemaParseSnafu {
            file: sub_path,
            msg: "included file is not a submodule",
        }
        .fail();
    }
    if let Some(belongs) = stmt.find_arg("belongs-to") {
        if belongs != module.name {
            return error::SchemaParseSnafu {
                file: sub_path,
                msg: format!(
                    "submodule belongs to '{}', not '{}'",
                    belongs, module.name
                ),
            }
            .fail();
        }
    }

    module.submodules.push(name.to_string());
    build_body(module, &stmt.substmts, &sub_path)
}

/// Recursively builds schema nodes from a data-definition statement.
fn build_node(
    module: &mut ModuleSchema,
    parent: Option<SchemaNodeId>,
    stmt: &Statement,
    file: &FsPath,
) -> Result<()> {
    let name = stmt.arg.clone().context(error::SchemaParseSnafu {
        file,
        msg: format!("'{}' statement has no name", stmt.keyword),
    })?;

    let kind = match stmt.keyword.as_str() {
        "container" => SchemaNodeKind::Container {
            presence: stmt.find("presence").is_some(),
        },
        "list" => {
            let keys = stmt
                .find_arg("key")
                .map(|arg| arg.split_whitespace().map(String::from).collect())
                .unwrap_or_default();
            SchemaNodeKind::List {
                keys,
                user_ordered: stmt.find_arg("ordered-by") == Some("user"),
            }
        }
        "leaf" => SchemaNodeKind::Leaf {
            typ: build_type(stmt, file)?,
            mandatory: stmt.find_arg("mandatory") == Some("true"),
            default: stmt.find_arg("default").map(String::from),
        },
        "leaf-list" => SchemaNodeKind::LeafList {
            typ: build_type(stmt, file)?,
            user_ordered: stmt.find_arg("ordered-by") == Some("user"),
        },
        "choice" => SchemaNodeKind::Choice {
            mandatory: stmt.find_arg("mandatory") == Some("true"),
        },
        "case" => SchemaNodeKind::Case,
        other => {
            return error::SchemaParseSnafu {
                file,
                msg: format!("unsupported data definition '{}'", other),
            }
            .fail()
        }
    };

    let id = SchemaNodeId(module.nodes.len());
    module.nodes.push(SchemaNode {
        name,
        kind,
        parent,
        children: Vec::new(),
        if_features: stmt.args_of("if-feature"),
    });
    match parent {
        Some(p) => module.nodes[p.0].children.push(id),
        None => module.roots.push(id),
    }

    for sub in &stmt.substmts {
        match sub.keyword.as_str() {
            "container" | "list" | "leaf" | "leaf-list" | "choice" | "case" => {
                build_node(module, Some(id), sub, file)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Builds the type of a leaf or leaf-list from its `type` substatement.
fn build_type(stmt: &Statement, file: &FsPath) -> Result<TypeSpec> {
    let type_stmt = stmt.find("type").context(error::SchemaParseSnafu {
        file,
        msg: format!(
            "'{}' '{}' has no type",
            stmt.keyword,
            stmt.arg.as_deref().unwrap_or("?")
        ),
    })?;
    let type_name = type_stmt.arg.as_deref().context(error::SchemaParseSnafu {
        file,
        msg: "type statement has no name",
    })?;

    let spec = match type_name {
        "int8" => TypeSpec::Int8,
        "int16" => TypeSpec::Int16,
        "int32" => TypeSpec::Int32,
        "int64" => TypeSpec::Int64,
        "uint8" => TypeSpec::Uint8,
        "uint16" => TypeSpec::Uint16,
        "uint32" => TypeSpec::Uint32,
        "uint64" => TypeSpec::Uint64,
        "decimal64" => {
            let digits = type_stmt
                .find_arg("fraction-digits")
                .and_then(|d| d.parse::<u8>().ok())
                .context(error::SchemaParseSnafu {
                    file,
                    msg: "decimal64 requires fraction-digits 1..18",
                })?;
            TypeSpec::Decimal64 {
                fraction_digits: digits,
            }
        }
        "string" => TypeSpec::String,
        "boolean" => TypeSpec::Boolean,
        "binary" => TypeSpec::Binary,
        "empty" => TypeSpec::Empty,
        "enumeration" => TypeSpec::Enumeration {
            values: type_stmt.args_of("enum"),
        },
        "bits" => TypeSpec::Bits {
            bits: type_stmt.args_of("bit"),
        },
        "identityref" => TypeSpec::Identityref {
            base: type_stmt.find_arg("base").unwrap_or_default().to_string(),
        },
        "instance-identifier" => TypeSpec::InstanceIdentifier,
        other => {
            return error::SchemaParseSnafu {
                file,
                msg: format!("unsupported type '{}'", other),
            }
            .fail()
        }
    };
    Ok(spec)
}

// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    LBrace,
    RBrace,
    Semi,
}

fn parse_statement_tree(text: &str, file: &FsPath) -> Result<Statement> {
    let tokens = tokenize(text).map_err(|msg| Error::SchemaParse {
        file: file.to_path_buf(),
        msg,
    })?;
    let mut pos = 0;
    let stmt = parse_stmt(&tokens, &mut pos).map_err(|msg| Error::SchemaParse {
        file: file.to_path_buf(),
        msg,
    })?;
    if pos != tokens.len() {
        return error::SchemaParseSnafu {
            file,
            msg: "trailing content after top-level statement",
        }
        .fail();
    }
    Ok(stmt)
}

fn parse_stmt(tokens: &[Token], pos: &mut usize) -> std::result::Result<Statement, String> {
    let keyword = match tokens.get(*pos) {
        Some(Token::Str(s)) => s.clone(),
        other => return Err(format!("expected statement keyword, found {:?}", other)),
    };
    *pos += 1;

    let arg = match tokens.get(*pos) {
        Some(Token::Str(s)) => {
            *pos += 1;
            Some(s.clone())
        }
        _ => None,
    };

    let mut substmts = Vec::new();
    match tokens.get(*pos) {
        Some(Token::Semi) => {
            *pos += 1;
        }
        Some(Token::LBrace) => {
            *pos += 1;
            loop {
                match tokens.get(*pos) {
                    Some(Token::RBrace) => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => substmts.push(parse_stmt(tokens, pos)?),
                    None => return Err(format!("unterminated block in '{}'", keyword)),
                }
            }
        }
        other => {
            return Err(format!(
                "expected ';' or '{{' after '{}', found {:?}",
                keyword, other
            ))
        }
    }

    Ok(Statement {
        keyword,
        arg,
        substmts,
    })
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' => {
                chars.next();
                tokens.push(Token::LBrace);
            }
            '}' => {
                chars.next();
                tokens.push(Token::RBrace);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semi);
            }
            '/' => {
                chars.next();
                match chars.peek() {
                    Some('/') => {
                        // Line comment.
                        for c in chars.by_ref() {
                            if c == '\n' {
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = '\0';
                        let mut closed = false;
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                closed = true;
                                break;
                            }
                            prev = c;
                        }
                        if !closed {
                            return Err("unterminated block comment".to_string());
                        }
                    }
                    _ => return Err("stray '/' outside comment".to_string()),
                }
            }
            '"' | '\'' => {
                let mut value = quoted_string(&mut chars)?;
                // Quoted strings may be concatenated with '+'.
                loop {
                    let mut ahead = chars.clone();
                    while matches!(ahead.peek(), Some(c) if c.is_whitespace()) {
                        ahead.next();
                    }
                    if ahead.peek() != Some(&'+') {
                        break;
                    }
                    ahead.next();
                    while matches!(ahead.peek(), Some(c) if c.is_whitespace()) {
                        ahead.next();
                    }
                    match ahead.peek() {
                        Some('"') | Some('\'') => {
                            chars = ahead;
                            value.push_str(&quoted_string(&mut chars)?);
                        }
                        _ => return Err("'+' not followed by string".to_string()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            _ => {
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | ';') {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                tokens.push(Token::Str(value));
            }
        }
    }

    Ok(tokens)
}

fn quoted_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> std::result::Result<String, String> {
    let quote = chars.next().ok_or("expected quote")?;
    let mut value = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => break,
            // Escapes only apply inside double quotes.
            Some('\\') if quote == '"' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('"') => value.push('"'),
                Some('\\') => value.push('\\'),
                Some(c) => {
                    value.push('\\');
                    value.push(c);
                }
                None => return Err("unterminated string escape".to_string()),
            },
            Some(c) => value.push(c),
            None => return Err("unterminated string".to_string()),
        }
    }
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    const EXAMPLE: &str = r#"
        module example-module {
            namespace "urn:example:example-module";
            prefix em;
            revision 2016-03-05 { description "Initial revision."; }
            revision 2016-01-01;

            feature extra;

            container container {
                list list {
                    key "key1 key2";
                    leaf key1 { type string; }
                    leaf key2 { type string; }
                    leaf leaf { type string; }
                }
            }
            leaf-list numbers {
                ordered-by user;
                type uint32;
            }
            leaf guarded {
                if-feature extra;
                type boolean;
            }
        }
    "#;

    fn parse_example() -> ModuleSchema {
        parse_module(EXAMPLE, &PathBuf::from("example-module.yang")).unwrap()
    }

    #[test]
    fn header_fields() {
        let m = parse_example();
        assert_eq!(m.name, "example-module");
        assert_eq!(m.namespace, "urn:example:example-module");
        assert_eq!(m.prefix, "em");
        assert_eq!(m.revision.as_deref(), Some("2016-03-05"));
        assert_eq!(m.features, vec!["extra".to_string()]);
    }

    #[test]
    fn node_tree() {
        let m = parse_example();
        let container = m.find_child(None, "container").unwrap();
        assert!(matches!(
            m.node(container).kind,
            SchemaNodeKind::Container { presence: false }
        ));

        let list = m.find_child(Some(container), "list").unwrap();
        match &m.node(list).kind {
            SchemaNodeKind::List { keys, user_ordered } => {
                assert_eq!(keys, &["key1".to_string(), "key2".to_string()]);
                assert!(!user_ordered);
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let numbers = m.find_child(None, "numbers").unwrap();
        match &m.node(numbers).kind {
            SchemaNodeKind::LeafList { typ, user_ordered } => {
                assert_eq!(typ, &TypeSpec::Uint32);
                assert!(user_ordered);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn feature_gating() {
        let mut m = parse_example();
        // Disabled by default: if-feature not satisfied.
        assert!(m.find_child(None, "guarded").is_none());
        m.enable_feature("extra").unwrap();
        assert!(m.find_child(None, "guarded").is_some());
        m.disable_feature("extra").unwrap();
        assert!(m.find_child(None, "guarded").is_none());

        m.enable_feature("no-such-feature").unwrap_err();
    }

    #[test]
    fn choice_children_are_transparent() {
        let text = r#"
            module c {
                namespace "urn:c";
                prefix c;
                choice transport {
                    case tcp { leaf tcp-port { type uint16; } }
                    case udp { leaf udp-port { type uint16; } }
                }
            }
        "#;
        let m = parse_module(text, &PathBuf::from("c.yang")).unwrap();
        // Both case alternatives resolve as top-level data children.
        assert!(m.find_child(None, "tcp-port").is_some());
        assert!(m.find_child(None, "udp-port").is_some());
        assert!(m.find_child(None, "transport").is_none());
    }

    #[test]
    fn string_concatenation() {
        let text = r#"
            module s {
                namespace "urn:" + "s";
                prefix s;
                leaf l { type string; }
            }
        "#;
        let m = parse_module(text, &PathBuf::from("s.yang")).unwrap();
        assert_eq!(m.namespace, "urn:s");
    }

    #[test]
    fn rejects_unsupported_type() {
        let text = r#"
            module u {
                namespace "urn:u";
                prefix u;
                leaf l { type union { type string; type uint8; } }
            }
        "#;
        parse_module(text, &PathBuf::from("u.yang")).unwrap_err();
    }

    #[test]
    fn submodule_detection() {
        assert!(is_submodule("submodule sub { belongs-to m { prefix m; } }"));
        assert!(!is_submodule(EXAMPLE));
    }
}
