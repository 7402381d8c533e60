//! Built-in object types.

use std::sync::Arc;

use lbkit_core::{SchemaError, UnsupportedOperation};
use lbkit_schema::{schema_for, EnumDecl, FieldDecl, Schema, TypeDescriptor};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::info;

static CATALOG: Lazy<Vec<TypeDescriptor>> =
    Lazy::new(|| vec![server(), ssl_key(), l7_content_class(), l3_interface(), health_check_http()]);

fn enabled_disabled(name: &'static str) -> EnumDecl { EnumDecl::new(name, &[("enabled", 1), ("disabled", 2)]) }

fn ip_ver() -> EnumDecl { EnumDecl::new("ip_ver", &[("ipv4", 1), ("ipv6", 2)]) }

fn server() -> TypeDescriptor {
    TypeDescriptor::new("server")
        .field(FieldDecl::str("index").identity())
        .field(
            FieldDecl::enumeration(
                "state",
                EnumDecl::new("server_state", &[("enabled", 2), ("disabled", 3), ("disabled_with_fastage", 4)])
                    .with_literals(&["shutdown_connection", "shutdown_persistent_sessions"]),
            )
            .optional(),
        )
        .field(FieldDecl::enumeration("ip_ver", ip_ver()).optional().default_value("ipv4"))
        .field(FieldDecl::str("ip_address").optional())
        .field(FieldDecl::str("ip6_address").optional())
        .field(FieldDecl::int("weight").optional().default_value(1))
        .field(FieldDecl::int("max_connections").optional().default_value(0))
        .field(
            FieldDecl::enumeration("connection_mode", EnumDecl::new("connection_mode", &[("physical", 1), ("logical", 2)]))
                .optional()
                .default_value("physical"),
        )
        .field(FieldDecl::int("availability").optional())
        .field(
            FieldDecl::enumeration("server_type", EnumDecl::new("server_type", &[("local_server", 1), ("remote_server", 2)]))
                .optional()
                .default_value("local_server"),
        )
        .field(
            FieldDecl::enumeration("nat_mode", EnumDecl::new("nat_mode", &[("enable", 1), ("address", 2), ("nwclss", 3), ("disable", 4)]))
                .optional()
                .default_value("enable"),
        )
        .field(FieldDecl::str("nat_address").optional())
        .field(FieldDecl::str("nat_subnet").optional())
        .field(FieldDecl::str("health_check_id").optional())
        .field(FieldDecl::int("server_ports").repeated().optional())
        .field(FieldDecl::str("name").optional())
}

fn ssl_key() -> TypeDescriptor {
    TypeDescriptor::new("ssl_key")
        .field(FieldDecl::str("index").identity())
        .field(FieldDecl::str("description").optional())
        .field(FieldDecl::secret("passphrase").optional())
        .field(FieldDecl::secret("content").optional())
}

fn l7_content_class() -> TypeDescriptor {
    let host = TypeDescriptor::new("l7_content_class.host")
        .field(FieldDecl::str("id"))
        .field(FieldDecl::str("host"))
        .field(
            FieldDecl::enumeration(
                "match_type",
                EnumDecl::new("host_match", &[("sufx", 1), ("prefx", 2), ("equal", 3), ("include", 4), ("regex", 5)]),
            )
            .optional(),
        )
        .field(FieldDecl::bool("case_sensitive").optional());
    TypeDescriptor::new("l7_content_class")
        .field(FieldDecl::str("content_class_id").identity())
        .field(FieldDecl::str("name").optional())
        .field(
            FieldDecl::enumeration("content_class_type", EnumDecl::new("content_class_type", &[("http", 1), ("http2", 2), ("ssl", 3)]))
                .optional()
                .default_value("http"),
        )
        .field(FieldDecl::str("logical_expression").optional())
        .field(FieldDecl::structure("hosts", host).repeated().optional())
}

fn l3_interface() -> TypeDescriptor {
    TypeDescriptor::new("l3_interface")
        .field(FieldDecl::int("index").identity())
        .field(FieldDecl::str("description").optional())
        .field(FieldDecl::str("ip4_address").optional())
        .field(FieldDecl::str("ip4_subnet").optional())
        .field(FieldDecl::int("vlan").optional())
        .field(FieldDecl::enumeration("state", enabled_disabled("interface_state")).optional().default_value("enabled"))
        .field(FieldDecl::enumeration("bootp_relay", enabled_disabled("bootp_relay")).optional().default_value("enabled"))
        .field(FieldDecl::enumeration("ip_ver", ip_ver()).optional().default_value("ipv4"))
        .field(FieldDecl::str("ip6_address").optional())
        .field(FieldDecl::str("ip6_prefix").optional())
        .field(FieldDecl::str("peer_ip").optional())
}

fn health_check_http() -> TypeDescriptor {
    TypeDescriptor::new("health_check_http")
        .field(FieldDecl::str("index").identity())
        .field(FieldDecl::str("description").optional())
        .field(FieldDecl::int("destination_port").optional())
        .field(FieldDecl::enumeration("ip_ver", ip_ver().with_literals(&["none"])).optional())
        .field(FieldDecl::str("destination_ip_or_hostname").optional())
        .field(FieldDecl::int("interval_second").optional())
        .field(FieldDecl::int("retries_failure").optional())
        .field(FieldDecl::int("retries_restore").optional())
        .field(FieldDecl::int("response_timeout_second").optional())
        .field(FieldDecl::enumeration("https", enabled_disabled("https")).optional())
        .field(FieldDecl::str("http_hostname").optional())
        .field(FieldDecl::str("http_path").optional())
        .field(FieldDecl::enumeration("http_method", EnumDecl::new("http_method", &[("get", 1), ("post", 2), ("head", 3)])).optional())
        .field(
            FieldDecl::enumeration(
                "authentication",
                EnumDecl::new("http_auth", &[("none", 0), ("basic", 1), ("ntlm2", 2), ("ntlmssp", 3)]),
            )
            .optional(),
        )
        .field(FieldDecl::str("auth_username").optional())
        .field(FieldDecl::secret("auth_password").optional())
        .field(FieldDecl::str("expected_return_codes").optional())
}

/// Summary of one catalog entry, for listings.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub identity: Vec<String>,
    pub fields: usize,
    pub appendable: bool,
}

/// Names of all built-in object types, in catalog order.
pub fn object_types() -> Vec<&'static str> { CATALOG.iter().map(|d| d.name).collect() }

pub fn descriptor(name: &str) -> Result<&'static TypeDescriptor, UnsupportedOperation> {
    CATALOG.iter().find(|d| d.name == name).ok_or_else(|| UnsupportedOperation {
        object_type: name.to_string(),
        operation: "configure".into(),
        reason: format!("unknown object type (known: {})", object_types().join(", ")),
    })
}

/// Schema of a built-in type.
pub fn schema(name: &str) -> Result<Arc<Schema>, lbkit_core::Error> {
    let desc = descriptor(name)?;
    Ok(schema_for(desc)?)
}

/// Build every catalog schema now, so a malformed entry fails at startup.
pub fn preload() -> Result<Vec<CatalogEntry>, SchemaError> {
    let mut out = Vec::with_capacity(CATALOG.len());
    for desc in CATALOG.iter() {
        let s = schema_for(desc)?;
        out.push(CatalogEntry {
            name: desc.name.to_string(),
            identity: s.identity_fields().iter().map(|f| f.name.clone()).collect(),
            fields: s.fields.len(),
            appendable: s.has_list_fields(),
        });
    }
    info!(types = out.len(), "object catalog loaded");
    Ok(out)
}
