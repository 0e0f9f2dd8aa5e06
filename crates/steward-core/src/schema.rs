//! Closed catalog of adapters ("servers") and the operations each accepts.
//!
//! Every action is checked against this table before anything reaches an
//! adapter. Unknown servers and operations are typed errors.

use crate::error::{Result, StewardError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Server {
    Email,
    Facebook,
    Instagram,
    Linkedin,
    Odoo,
}

impl Server {
    pub fn all() -> &'static [Server] {
        &[
            Server::Email,
            Server::Facebook,
            Server::Instagram,
            Server::Linkedin,
            Server::Odoo,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Server::Email => "email",
            Server::Facebook => "facebook",
            Server::Instagram => "instagram",
            Server::Linkedin => "linkedin",
            Server::Odoo => "odoo",
        }
    }

    pub fn is_valid(s: &str) -> bool {
        s.parse::<Server>().is_ok()
    }

    /// Operations this server accepts, in menu order.
    pub fn operations(self) -> impl Iterator<Item = &'static OperationSpec> {
        CATALOG.iter().filter(move |spec| spec.server == self)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Server {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "email" => Ok(Server::Email),
            "facebook" => Ok(Server::Facebook),
            "instagram" => Ok(Server::Instagram),
            "linkedin" => Ok(Server::Linkedin),
            "odoo" => Ok(Server::Odoo),
            other => Err(StewardError::UnknownServer(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SendEmail,
    DraftEmail,
    PostText,
    PostImage,
    SendMessage,
    CreateRecord,
    CreateInvoice,
    ReadInsights,
    ReadProfile,
    ReadRecords,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::SendEmail => "send_email",
            Operation::DraftEmail => "draft_email",
            Operation::PostText => "post_text",
            Operation::PostImage => "post_image",
            Operation::SendMessage => "send_message",
            Operation::CreateRecord => "create_record",
            Operation::CreateInvoice => "create_invoice",
            Operation::ReadInsights => "read_insights",
            Operation::ReadProfile => "read_profile",
            Operation::ReadRecords => "read_records",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "send_email" => Operation::SendEmail,
            "draft_email" => Operation::DraftEmail,
            "post_text" => Operation::PostText,
            "post_image" => Operation::PostImage,
            "send_message" => Operation::SendMessage,
            "create_record" => Operation::CreateRecord,
            "create_invoice" => Operation::CreateInvoice,
            "read_insights" => Operation::ReadInsights,
            "read_profile" => Operation::ReadProfile,
            "read_records" => Operation::ReadRecords,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parameter and operation specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Object,
    Array,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn req(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        description,
    }
}

const fn opt(name: &'static str, kind: ParamKind, description: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        description,
    }
}

#[derive(Debug)]
pub struct OperationSpec {
    pub server: Server,
    pub operation: Operation,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    /// Read operations never mutate remote state.
    pub side_effecting: bool,
}

impl OperationSpec {
    pub fn required(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().filter(|p| p.required).map(|p| p.name)
    }

    /// JSON schema for the operation's parameters, as served by `tools/list`.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in self.params {
            properties.insert(
                p.name.to_string(),
                serde_json::json!({
                    "type": p.kind.json_type(),
                    "description": p.description,
                }),
            );
        }
        let required: Vec<&str> = self.required().collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check that every required parameter is present and non-empty.
    pub fn check_params(&self, params: &Map<String, Value>) -> Result<()> {
        for name in self.required() {
            let present = match params.get(name) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(StewardError::MissingParameter {
                    server: self.server.to_string(),
                    operation: self.operation.to_string(),
                    param: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

use ParamKind::{Array, Object, String as Str};

const EMAIL_PARAMS: &[ParamSpec] = &[
    req("to", Str, "Recipient address"),
    req("subject", Str, "Subject line"),
    req("body", Str, "Plain-text body"),
    opt("cc", Str, "Comma-separated cc addresses"),
];

const IMAGE_POST_PARAMS: &[ParamSpec] = &[
    req("caption", Str, "Post caption"),
    req("image_url", Str, "Publicly reachable image URL or vault path"),
];

/// The full menu. Order here is the order tools are listed in.
pub static CATALOG: &[OperationSpec] = &[
    OperationSpec {
        server: Server::Email,
        operation: Operation::SendEmail,
        description: "Send an email",
        params: EMAIL_PARAMS,
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Email,
        operation: Operation::DraftEmail,
        description: "Save an email as a draft without sending",
        params: EMAIL_PARAMS,
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Facebook,
        operation: Operation::PostText,
        description: "Publish a text post to the page",
        params: &[req("text", Str, "Post body")],
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Facebook,
        operation: Operation::PostImage,
        description: "Publish an image post to the page",
        params: IMAGE_POST_PARAMS,
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Facebook,
        operation: Operation::ReadInsights,
        description: "Read page engagement insights",
        params: &[opt("period", Str, "day, week, or days_28")],
        side_effecting: false,
    },
    OperationSpec {
        server: Server::Instagram,
        operation: Operation::PostImage,
        description: "Publish an image post to the business account",
        params: IMAGE_POST_PARAMS,
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Instagram,
        operation: Operation::ReadInsights,
        description: "Read account insights",
        params: &[opt("period", Str, "day, week, or days_28")],
        side_effecting: false,
    },
    OperationSpec {
        server: Server::Linkedin,
        operation: Operation::PostText,
        description: "Publish a text post to the member feed",
        params: &[req("text", Str, "Post body")],
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Linkedin,
        operation: Operation::SendMessage,
        description: "Send a direct message",
        params: &[
            req("recipient", Str, "Profile URN or handle"),
            req("text", Str, "Message body"),
        ],
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Linkedin,
        operation: Operation::ReadProfile,
        description: "Read the authenticated member profile",
        params: &[],
        side_effecting: false,
    },
    OperationSpec {
        server: Server::Odoo,
        operation: Operation::CreateRecord,
        description: "Create a record in an Odoo model",
        params: &[
            req("model", Str, "Model name, e.g. res.partner"),
            req("values", Object, "Field values for the new record"),
        ],
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Odoo,
        operation: Operation::CreateInvoice,
        description: "Create a draft customer invoice",
        params: &[
            req("partner", Str, "Customer name or id"),
            req("lines", Array, "Invoice lines"),
            opt("currency", Str, "ISO currency code"),
        ],
        side_effecting: true,
    },
    OperationSpec {
        server: Server::Odoo,
        operation: Operation::ReadRecords,
        description: "Search and read records of a model",
        params: &[
            req("model", Str, "Model name"),
            opt("domain", Array, "Search domain"),
        ],
        side_effecting: false,
    },
];

/// Platform rules that forbid an otherwise well-known operation.
const PLATFORM_RULES: &[(Server, Operation, &str)] = &[(
    Server::Instagram,
    Operation::PostText,
    "instagram does not allow text-only posts; use post_image",
)];

/// Resolve `server`/`operation` names to their spec.
pub fn lookup(server: &str, operation: &str) -> Result<&'static OperationSpec> {
    let srv: Server = server.parse()?;
    let unsupported = |reason: &str| StewardError::UnsupportedOperation {
        server: srv.to_string(),
        operation: operation.to_string(),
        reason: reason.to_string(),
    };
    let op = Operation::parse(operation).ok_or_else(|| unsupported("unknown operation"))?;
    if let Some((_, _, reason)) = PLATFORM_RULES
        .iter()
        .find(|(s, o, _)| *s == srv && *o == op)
    {
        return Err(unsupported(reason));
    }
    CATALOG
        .iter()
        .find(|spec| spec.server == srv && spec.operation == op)
        .ok_or_else(|| unsupported("operation not offered by this server"))
}

/// Full validation: names resolve and required parameters are present.
pub fn validate(
    server: &str,
    operation: &str,
    params: &Map<String, Value>,
) -> Result<&'static OperationSpec> {
    let spec = lookup(server, operation)?;
    spec.check_params(params)?;
    Ok(spec)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
