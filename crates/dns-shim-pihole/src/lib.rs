// # Pi-hole Directory Client
//
// This crate implements the directory and session traits of the DNS shim
// against the Pi-hole v6 REST API.
//
// ## Architectural Constraints
//
// ### Trust Level: Untrusted (Directory Client)
//
// The client is a thin translation layer:
// - One HTTP request per trait call
// - Errors are returned to the reconciler, which decides what to retry
// - No background tasks, no caching of record lists
//
// The only state kept between calls is the session id obtained by
// `authenticate`, which is attached to every later request.
//
// ## Security Requirements
//
// - The secret and the session id NEVER appear in logs or Debug output
//
// ## API Reference
//
// | Operation      | Request                                      |
// |----------------|----------------------------------------------|
// | Authenticate   | `POST /auth` `{"password": ...}`             |
// | List sessions  | `GET /auth/sessions`                         |
// | Revoke session | `DELETE /auth/session/{id}`                  |
// | Address list   | `GET /config/dns/hosts`                      |
// | Address create | `PUT /config/dns/hosts/{target name}`        |
// | Address delete | `DELETE /config/dns/hosts/{target name}`     |
// | Alias list     | `GET /config/dns/cnameRecords`               |
// | Alias create   | `PUT /config/dns/cnameRecords/{name,target}` |
// | Alias delete   | `DELETE /config/dns/cnameRecords/{name,target}` |

use async_trait::async_trait;
use dns_shim_core::config::DirectoryConfig;
use dns_shim_core::traits::{DirectoryClient, SessionApi, SessionInfo};
use dns_shim_core::{Error, Record, Result};
use reqwest::header::USER_AGENT;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the session id
const SESSION_HEADER: &str = "sid";

/// Error message Pi-hole returns when creating an existing entry
const ALREADY_PRESENT_MESSAGE: &str = "Item already present";

/// One Pi-hole API operation
#[derive(Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// Exchange the password for a session
    Authenticate { password: String },
    /// List active sessions
    ListSessions,
    /// Revoke a session
    RevokeSession { id: i64 },
    /// List local DNS host entries
    ListAddresses,
    /// Add a host entry
    CreateAddress(Record),
    /// Remove a host entry
    DeleteAddress(Record),
    /// List CNAME entries
    ListAliases,
    /// Add a CNAME entry
    CreateAlias(Record),
    /// Remove a CNAME entry
    DeleteAlias(Record),
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticate { .. } => f
                .debug_struct("Authenticate")
                .field("password", &"<REDACTED>")
                .finish(),
            Self::ListSessions => f.write_str("ListSessions"),
            Self::RevokeSession { id } => f.debug_struct("RevokeSession").field("id", id).finish(),
            Self::ListAddresses => f.write_str("ListAddresses"),
            Self::CreateAddress(r) => f.debug_tuple("CreateAddress").field(r).finish(),
            Self::DeleteAddress(r) => f.debug_tuple("DeleteAddress").field(r).finish(),
            Self::ListAliases => f.write_str("ListAliases"),
            Self::CreateAlias(r) => f.debug_tuple("CreateAlias").field(r).finish(),
            Self::DeleteAlias(r) => f.debug_tuple("DeleteAlias").field(r).finish(),
        }
    }
}

impl ApiRequest {
    /// Short operation name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::ListSessions => "list sessions",
            Self::RevokeSession { .. } => "revoke session",
            Self::ListAddresses => "list hosts",
            Self::CreateAddress(_) => "create host",
            Self::DeleteAddress(_) => "delete host",
            Self::ListAliases => "list CNAMEs",
            Self::CreateAlias(_) => "create CNAME",
            Self::DeleteAlias(_) => "delete CNAME",
        }
    }

    /// HTTP method
    pub fn method(&self) -> Method {
        match self {
            Self::Authenticate { .. } => Method::POST,
            Self::ListSessions | Self::ListAddresses | Self::ListAliases => Method::GET,
            Self::CreateAddress(_) | Self::CreateAlias(_) => Method::PUT,
            Self::RevokeSession { .. } | Self::DeleteAddress(_) | Self::DeleteAlias(_) => {
                Method::DELETE
            }
        }
    }

    /// Path segments below the API base URL, unencoded
    pub fn path_segments(&self) -> Vec<String> {
        let mut segments: Vec<String> = match self {
            Self::Authenticate { .. } => vec!["auth".into()],
            Self::ListSessions => vec!["auth".into(), "sessions".into()],
            Self::RevokeSession { id } => vec!["auth".into(), "session".into(), id.to_string()],
            Self::ListAddresses | Self::CreateAddress(_) | Self::DeleteAddress(_) => {
                vec!["config".into(), "dns".into(), "hosts".into()]
            }
            Self::ListAliases | Self::CreateAlias(_) | Self::DeleteAlias(_) => {
                vec!["config".into(), "dns".into(), "cnameRecords".into()]
            }
        };

        match self {
            Self::CreateAddress(r) | Self::DeleteAddress(r) => segments.push(host_entry(r)),
            Self::CreateAlias(r) | Self::DeleteAlias(r) => segments.push(alias_entry(r)),
            _ => {}
        }
        segments
    }

    /// JSON body, if the operation sends one
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::Authenticate { password } => Some(json!({ "password": password })),
            _ => None,
        }
    }
}

/// Decoded result of an [`ApiRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse {
    /// Session id; `None` when the API has no password set
    Session(Option<String>),
    /// Active sessions
    Sessions(Vec<SessionInfo>),
    /// Host entries
    Addresses(HashSet<Record>),
    /// CNAME entries
    Aliases(HashSet<Record>),
    /// Success without a payload
    Done,
}

#[derive(Debug, Deserialize)]
struct AuthBody {
    session: SessionBody,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionsBody {
    sessions: Vec<SessionInfo>,
}

#[derive(Debug, Deserialize)]
struct ConfigBody {
    config: ConfigSection,
}

#[derive(Debug, Deserialize)]
struct ConfigSection {
    dns: DnsSection,
}

#[derive(Debug, Deserialize)]
struct DnsSection {
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default, rename = "cnameRecords")]
    cname_records: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

/// Host entry as Pi-hole stores it: `"target name"`
pub fn host_entry(record: &Record) -> String {
    format!("{} {}", record.target(), record.name())
}

/// Parse a `"target name"` host entry
pub fn parse_host_entry(entry: &str) -> Option<Record> {
    let (target, name) = entry.trim().split_once(char::is_whitespace)?;
    let name = name.trim();
    if target.is_empty() || name.is_empty() {
        return None;
    }
    Some(Record::new(name, target))
}

/// CNAME entry as Pi-hole stores it: `"name,target"`
pub fn alias_entry(record: &Record) -> String {
    format!("{},{}", record.name(), record.target())
}

/// Parse a `"name,target[,ttl]"` CNAME entry
pub fn parse_alias_entry(entry: &str) -> Option<Record> {
    let mut fields = entry.trim().split(',');
    let name = fields.next()?.trim();
    let target = fields.next()?.trim();
    if name.is_empty() || target.is_empty() {
        return None;
    }
    Some(Record::new(name, target))
}

fn parse_entries(
    entries: Vec<String>,
    parse: fn(&str) -> Option<Record>,
    what: &str,
) -> HashSet<Record> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let record = parse(&entry);
            if record.is_none() {
                tracing::warn!("Ignoring malformed {} entry: {:?}", what, entry);
            }
            record
        })
        .collect()
}

/// Decode a 200 response body for `request`
pub fn decode_response(request: &ApiRequest, body: Value) -> Result<ApiResponse> {
    let malformed =
        |e: serde_json::Error| Error::directory(format!("Unexpected {} response: {}", request.name(), e));

    match request {
        ApiRequest::Authenticate { .. } => {
            let auth: AuthBody = serde_json::from_value(body).map_err(malformed)?;
            if !auth.session.valid {
                return Err(Error::auth(
                    auth.session
                        .message
                        .unwrap_or_else(|| "session not valid".to_string()),
                ));
            }
            Ok(ApiResponse::Session(auth.session.sid))
        }
        ApiRequest::ListSessions => {
            let sessions: SessionsBody = serde_json::from_value(body).map_err(malformed)?;
            Ok(ApiResponse::Sessions(sessions.sessions))
        }
        ApiRequest::ListAddresses => {
            let config: ConfigBody = serde_json::from_value(body).map_err(malformed)?;
            Ok(ApiResponse::Addresses(parse_entries(
                config.config.dns.hosts,
                parse_host_entry,
                "host",
            )))
        }
        ApiRequest::ListAliases => {
            let config: ConfigBody = serde_json::from_value(body).map_err(malformed)?;
            Ok(ApiResponse::Aliases(parse_entries(
                config.config.dns.cname_records,
                parse_alias_entry,
                "CNAME",
            )))
        }
        ApiRequest::RevokeSession { .. }
        | ApiRequest::CreateAddress(_)
        | ApiRequest::DeleteAddress(_)
        | ApiRequest::CreateAlias(_)
        | ApiRequest::DeleteAlias(_) => Ok(ApiResponse::Done),
    }
}

/// Map a non-success response to an error
pub fn classify_failure(request: &ApiRequest, status: u16, body: &str) -> Error {
    let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error);

    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| body.trim().to_string());

    if message == ALREADY_PRESENT_MESSAGE {
        return Error::already_present(format!("{}: {}", request.name(), message));
    }

    let mut context = format!("{} failed with status {}: {}", request.name(), status, message);
    if let Some(detail) = &detail {
        if let Some(key) = &detail.key {
            context.push_str(&format!(" [{}]", key));
        }
        if let Some(hint) = &detail.hint {
            context.push_str(&format!(" ({})", hint));
        }
    }

    match status {
        401 | 403 => Error::auth(context),
        404 => Error::not_found(context),
        _ => Error::directory(context),
    }
}

/// Pi-hole v6 API client
///
/// # Security
///
/// The Debug implementation does NOT expose the session id.
pub struct PiholeClient {
    /// API base URL, e.g. `http://pi.hole:8080/api`
    base_url: Url,

    /// Value of the User-Agent header
    identity: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Session id from the last successful authentication
    /// ⚠️ NEVER log this value
    sid: RwLock<Option<String>>,
}

impl fmt::Debug for PiholeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiholeClient")
            .field("base_url", &self.base_url.as_str())
            .field("identity", &self.identity)
            .field("sid", &"<REDACTED>")
            .finish()
    }
}

impl PiholeClient {
    /// Create a client for the configured API
    ///
    /// Nothing is sent until [`SessionApi::authenticate`] is called.
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            Error::config(format!("Invalid directory base URL {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "Directory base URL cannot carry paths: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            identity: config.client_identity.clone(),
            client,
            sid: RwLock::new(None),
        })
    }

    /// Full URL of a request, each path segment percent-encoded
    pub fn url_for(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::config("Directory base URL cannot carry paths"))?;
            segments.pop_if_empty();
            for segment in request.path_segments() {
                segments.push(&segment);
            }
        }
        Ok(url)
    }

    /// Send one request and decode its response
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url_for(request)?;
        tracing::debug!("{} {}", request.method(), url.path());

        let mut builder = self
            .client
            .request(request.method(), url)
            .header(USER_AGENT, &self.identity);

        if let Some(sid) = self.sid.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, sid);
        }
        if let Some(body) = request.body() {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::http(format!("{} request failed: {}", request.name(), e)))?;

        let status = response.status().as_u16();
        tracing::debug!("Response code: {}", status);

        match status {
            200 => {
                let body: Value = response.json().await.map_err(|e| {
                    Error::http(format!("Failed to read {} response: {}", request.name(), e))
                })?;
                decode_response(request, body)
            }
            201 | 204 => Ok(ApiResponse::Done),
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                Err(classify_failure(request, status, &body))
            }
        }
    }

    async fn send_expecting_done(&self, request: ApiRequest) -> Result<()> {
        match self.send(&request).await? {
            ApiResponse::Done => Ok(()),
            other => Err(unexpected(&request, &other)),
        }
    }
}

fn unexpected(request: &ApiRequest, response: &ApiResponse) -> Error {
    Error::directory(format!(
        "Unexpected response to {}: {:?}",
        request.name(),
        response
    ))
}

#[async_trait]
impl DirectoryClient for PiholeClient {
    async fn list_address_records(&self) -> Result<HashSet<Record>> {
        let request = ApiRequest::ListAddresses;
        match self.send(&request).await? {
            ApiResponse::Addresses(records) => {
                tracing::debug!("DNS records: {}", records.len());
                Ok(records)
            }
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn list_alias_records(&self) -> Result<HashSet<Record>> {
        let request = ApiRequest::ListAliases;
        match self.send(&request).await? {
            ApiResponse::Aliases(records) => {
                tracing::debug!("CNAME records: {}", records.len());
                Ok(records)
            }
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn create_address_record(&self, record: &Record) -> Result<()> {
        self.send_expecting_done(ApiRequest::CreateAddress(record.clone()))
            .await
    }

    async fn delete_address_record(&self, record: &Record) -> Result<()> {
        self.send_expecting_done(ApiRequest::DeleteAddress(record.clone()))
            .await
    }

    async fn create_alias_record(&self, record: &Record) -> Result<()> {
        self.send_expecting_done(ApiRequest::CreateAlias(record.clone()))
            .await
    }

    async fn delete_alias_record(&self, record: &Record) -> Result<()> {
        self.send_expecting_done(ApiRequest::DeleteAlias(record.clone()))
            .await
    }

    fn directory_name(&self) -> &'static str {
        "pihole"
    }
}

#[async_trait]
impl SessionApi for PiholeClient {
    async fn authenticate(&self, secret: &str) -> Result<()> {
        tracing::debug!("Authenticating with pihole API");
        let request = ApiRequest::Authenticate {
            password: secret.to_string(),
        };

        match self.send(&request).await? {
            ApiResponse::Session(sid) => {
                if sid.is_none() {
                    tracing::warn!("Pi-hole returned no session id, is a password set?");
                }
                *self.sid.write().await = sid;
                Ok(())
            }
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let request = ApiRequest::ListSessions;
        match self.send(&request).await? {
            ApiResponse::Sessions(sessions) => Ok(sessions),
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn revoke_session(&self, id: i64) -> Result<()> {
        self.send_expecting_done(ApiRequest::RevokeSession { id })
            .await
    }

    fn client_identity(&self) -> &str {
        &self.identity
    }
}
