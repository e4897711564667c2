//! The tagged message union exchanged over the engine socket.
//!
//! Three top-level variants: requests flow from clients to the engine,
//! responses flow back on the same connection, and notifications are pushed by
//! the engine over outbound connections to subscriber destinations.  Every
//! envelope carries the session id (0 until a session has been assigned).
//!
//! Operation payloads are serde-tagged records; decoding ignores fields it
//! doesn't know so the two sides can evolve independently.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorCode, ErrorInfo};
use crate::value::Value;

/// A complete framed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Message {
    Request {
        session_id: u32,
        op: Request,
    },
    Response {
        session_id: u32,
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<ErrorInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Response>,
    },
    Notification {
        session_id: u32,
        event: Notification,
    },
}

impl Message {
    /// Builds the error response for a failed request.
    pub fn error_response(session_id: u32, code: ErrorCode, errors: Vec<ErrorInfo>) -> Self {
        Message::Response {
            session_id,
            code,
            errors,
            result: None,
        }
    }

    /// Builds the success response carrying the given result payload.
    pub fn ok_response(session_id: u32, result: Response) -> Self {
        Message::Response {
            session_id,
            code: ErrorCode::Ok,
            errors: Vec::new(),
            result: Some(result),
        }
    }
}

/// The named datastores.  A session is bound to one of them at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datastore {
    Startup,
    Running,
    Candidate,
}

impl Datastore {
    /// The datastore name as used in data file extensions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Startup => "startup",
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags recognised by the edit operations.  The default (both false) is the
/// protocol's `DEFAULT` behavior: auto-create missing ancestors, overwrite
/// existing values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditFlags {
    /// Fail with `DATA_EXISTS`/`DATA_MISSING` instead of silently overwriting
    /// or ignoring.
    #[serde(default)]
    pub strict: bool,
    /// Do not auto-create missing ancestors of the target.
    #[serde(default)]
    pub non_recursive: bool,
}

/// Where to move a user-ordered list instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
    First,
    Last,
}

/// Events a destination can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ModuleInstall,
    FeatureEnable,
    ModuleChange,
    Rpc,
}

/// Schema serialisation formats served by `get_schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    Yang,
    Yin,
}

/// One installed module as reported by `list_schemas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub module: String,
    pub namespace: String,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yang_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yin_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submodules: Vec<SubmoduleInfo>,
}

/// A submodule belonging to a listed module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmoduleInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yang_path: Option<String>,
}

/// The operation surface, one variant per request.  The request processor
/// matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SessionStart {
        datastore: Datastore,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effective_user: Option<String>,
    },
    SessionStop,
    SessionRefresh,
    ListSchemas,
    GetSchema {
        module: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        submodule: Option<String>,
        format: SchemaFormat,
    },
    GetItem {
        path: String,
    },
    GetItems {
        path: String,
    },
    GetItemsIter {
        path: String,
        offset: usize,
        limit: usize,
    },
    SetItem {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default)]
        flags: EditFlags,
    },
    DeleteItem {
        path: String,
        #[serde(default)]
        flags: EditFlags,
    },
    MoveItem {
        path: String,
        direction: MoveDirection,
    },
    Validate,
    Commit,
    DiscardChanges,
    LockModule {
        module: String,
    },
    UnlockModule {
        module: String,
    },
    LockDatastore,
    UnlockDatastore,
    ModuleInstall {
        module: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        installed: bool,
    },
    FeatureEnable {
        module: String,
        feature: String,
        enable: bool,
    },
    Subscribe {
        event: EventType,
        dst_address: String,
        dst_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Unsubscribe {
        event: EventType,
        dst_address: String,
        dst_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
    },
    GetLastErrors,
}

impl Request {
    /// The operation name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::SessionStart { .. } => "session_start",
            Request::SessionStop => "session_stop",
            Request::SessionRefresh => "session_refresh",
            Request::ListSchemas => "list_schemas",
            Request::GetSchema { .. } => "get_schema",
            Request::GetItem { .. } => "get_item",
            Request::GetItems { .. } => "get_items",
            Request::GetItemsIter { .. } => "get_items_iter",
            Request::SetItem { .. } => "set_item",
            Request::DeleteItem { .. } => "delete_item",
            Request::MoveItem { .. } => "move_item",
            Request::Validate => "validate",
            Request::Commit => "commit",
            Request::DiscardChanges => "discard_changes",
            Request::LockModule { .. } => "lock_module",
            Request::UnlockModule { .. } => "unlock_module",
            Request::LockDatastore => "lock_datastore",
            Request::UnlockDatastore => "unlock_datastore",
            Request::ModuleInstall { .. } => "module_install",
            Request::FeatureEnable { .. } => "feature_enable",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::GetLastErrors => "get_last_errors",
        }
    }
}

/// Result payloads for requests that return data.  Requests with nothing to
/// return answer with `Ack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    Ack,
    SessionStart {
        session_id: u32,
    },
    ListSchemas {
        schemas: Vec<SchemaInfo>,
    },
    GetSchema {
        content: String,
    },
    GetItem {
        value: Value,
    },
    GetItems {
        values: Vec<Value>,
    },
    Subscribe {
        subscription_id: u32,
    },
    GetLastErrors {
        errors: Vec<ErrorInfo>,
    },
}

/// Events pushed to subscriber destinations.  `dst_id` is the identifier the
/// destination registered with, so one endpoint can multiplex subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ModuleInstall {
        dst_id: u32,
        module: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        installed: bool,
    },
    FeatureEnable {
        dst_id: u32,
        module: String,
        feature: String,
        enabled: bool,
    },
    ModuleChange {
        dst_id: u32,
        module: String,
        datastore: Datastore,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::ValueData;

    #[test]
    fn request_round_trip() {
        let msg = Message::Request {
            session_id: 7,
            op: Request::SetItem {
                path: "/example-module:container/leaf".to_string(),
                value: Some(Value::bare(ValueData::String("x".to_string()))),
                flags: EditFlags {
                    strict: true,
                    non_recursive: false,
                },
            },
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back: Message = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn response_defaults() {
        // A minimal response without errors or result must decode; both fields
        // default.
        let raw = r#"{"msg":"response","session_id":1,"code":0}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        match msg {
            Message::Response {
                session_id,
                code,
                errors,
                result,
            } => {
                assert_eq!(session_id, 1);
                assert_eq!(code, ErrorCode::Ok);
                assert!(errors.is_empty());
                assert!(result.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_fields_tolerated() {
        // Fields added by a newer peer must not break decoding.
        let raw = r#"{"msg":"request","session_id":3,"future_field":true,
                      "op":{"op":"commit","another_future_field":[1,2,3]}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            Message::Request {
                session_id: 3,
                op: Request::Commit
            }
        );
    }

    #[test]
    fn edit_flags_default() {
        let raw = r#"{"msg":"request","session_id":1,
                      "op":{"op":"set_item","path":"/m:c"}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        match msg {
            Message::Request {
                op: Request::SetItem { flags, value, .. },
                ..
            } => {
                assert_eq!(flags, EditFlags::default());
                assert!(value.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
