//! Typed operations over the MyCloud HTTPS SDK.
//!
//! Every function here speaks the remote's wire format and nothing else: no
//! caching, no path logic. All requests go through one shared
//! [`reqwest::Client`] so connection pooling, DNS caching and TLS session
//! reuse are shared across concurrent filesystem callbacks. The local
//! address is pinned to IPv4; IPv6 lookups against the device endpoints have
//! been observed to stall.
//!
//! Conditional GETs (listings, size stats) return [`Fetched`], so a 304 from
//! the server is a first-class outcome rather than an error.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, IF_NONE_MATCH, LOCATION, RANGE};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ApiError;

/// MIME type the remote uses to mark directories.
pub const DIR_MIME: &str = "application/x.wd.dir";

const AUTH_BASE: &str = "https://wdc.auth0.com";
const DEVICE_DIRECTORY_URL: &str = "https://prod.wdckeystone.com/device/v1/user";
const AUTH0_CLIENT_ID: &str = "56pjpE1J4c6ZyATz3sYP8cMT47CZd6rk";

/// Fixed boundary the SDK expects for its multipart/related bodies.
const MULTIPART_BOUNDARY: &str = "287032381131322";

/// One file or directory as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub name: String,
    /// Only present in multi-parent listings.
    pub parent_id: Option<String>,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File { size: u64 },
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Outcome of a conditional GET.
#[derive(Debug)]
pub enum Fetched<T> {
    Fresh { value: T, etag: Option<String> },
    NotModified,
}

/// Tokens produced by the login call.
#[derive(Debug, Clone)]
pub struct Session {
    pub id_token: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct RawEntry {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "parentID", default)]
    parent_id: Option<String>,
}

impl From<RawEntry> for Entry {
    fn from(raw: RawEntry) -> Self {
        let kind = if raw.mime_type == DIR_MIME {
            EntryKind::Dir
        } else {
            EntryKind::File {
                size: raw.size.unwrap_or(0),
            }
        };
        Entry {
            id: raw.id,
            name: raw.name,
            parent_id: raw.parent_id,
            kind,
        }
    }
}

#[derive(Deserialize)]
struct FileListing {
    files: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: String,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct SizeResponse {
    size: u64,
}

#[derive(Deserialize)]
struct UserInfo {
    user_id: String,
}

#[derive(Deserialize)]
struct DeviceListing {
    data: Vec<RawDevice>,
}

#[derive(Deserialize)]
struct RawDevice {
    #[serde(rename = "deviceId")]
    device_id: String,
    name: String,
}

/// Shared handle for all SDK traffic.
///
/// The endpoint prefix and the session bearer are set exactly once, during
/// startup (login, then endpoint detection); after that the value is shared
/// immutably between every filesystem callback.
pub struct RemoteClient {
    http: reqwest::Client,
    base: OnceLock<String>,
    auth_base: OnceLock<String>,
    bearer: OnceLock<String>,
}

impl RemoteClient {
    pub fn new() -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .build()?;
        Ok(Self {
            http,
            base: OnceLock::new(),
            auth_base: OnceLock::new(),
            bearer: OnceLock::new(),
        })
    }

    /// Install the URL prefix all SDK requests are resolved against.
    /// The first installed value wins; later calls are ignored.
    pub fn set_endpoint(&self, base: String) {
        let _ = self.base.set(base);
    }

    /// Override the authentication service prefix (no trailing slash).
    /// The first installed value wins; later calls are ignored.
    pub fn set_auth_endpoint(&self, base: String) {
        let _ = self.auth_base.set(base);
    }

    /// Install the bearer token attached to every request after login.
    pub fn install_session(&self, id_token: &str) {
        let _ = self.bearer.set(format!("Bearer {id_token}"));
    }

    fn base(&self) -> &str {
        self.base.get().map(String::as_str).unwrap_or("")
    }

    fn auth_base(&self) -> &str {
        self.auth_base.get().map(String::as_str).unwrap_or(AUTH_BASE)
    }

    fn auth_value(&self) -> &str {
        self.bearer.get().map(String::as_str).unwrap_or("")
    }

    /// Authenticate against Auth0 with the fixed password-grant payload.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let payload = json!({
            "client_id": AUTH0_CLIENT_ID,
            "connection": "Username-Password-Authentication",
            "device": "123456789",
            "grant_type": "password",
            "password": password,
            "username": username,
            "scope": "openid offline_access",
        });
        let url = format!("{}/oauth/ro", self.auth_base());
        let resp = self.http.post(&url).json(&payload).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        check_status(status, &body).map_err(|err| match err {
            ApiError::AuthExpired => ApiError::BadCredentials,
            other => other,
        })?;
        let tokens: TokenResponse = serde_json::from_str(&body)?;
        self.install_session(&tokens.id_token);
        Ok(Session {
            id_token: tokens.id_token,
            access_token: tokens.access_token,
        })
    }

    /// Probe the candidate URL prefixes for a device and install the first
    /// one that answers an authenticated stat of the root folder.
    pub async fn detect_endpoint(&self, device_id: &str) -> Result<String, ApiError> {
        let candidates = [format!("device-local-{device_id}"), device_id.to_string()];
        for host in candidates {
            let base = format!("https://{host}.remotewd.com/");
            let probe = format!("{base}sdk/v2/files/root?pretty=false&fields=id");
            debug!("probing endpoint {base}");
            match self
                .http
                .get(&probe)
                .header(AUTHORIZATION, self.auth_value())
                .send()
                .await
            {
                Ok(resp)
                    if resp.status().is_success()
                        || resp.status() == StatusCode::NOT_MODIFIED =>
                {
                    self.set_endpoint(base);
                    return Ok(host);
                }
                Ok(resp) => debug!("endpoint {host} answered {}", resp.status()),
                Err(err) => debug!("endpoint {host} unreachable: {err}"),
            }
        }
        Err(ApiError::NoEndpoint(device_id.to_string()))
    }

    /// URL of a single-parent listing; listings are cached under this exact
    /// string, so it must stay byte-stable.
    pub fn list_url(&self, parent_id: &str) -> String {
        format!(
            "{}sdk/v2/filesSearch/parents?ids={}&fields=id,mimeType,name,size&pretty=false&orderBy=name&order=asc;",
            self.base(),
            parent_id
        )
    }

    /// URL of a multi-parent listing (subfolder-count prefetch).
    pub fn list_multi_url(&self, parent_ids: &str) -> String {
        format!(
            "{}sdk/v2/filesSearch/parents?ids={}&fields=id,mimeType,name,parentID&pretty=false&orderBy=name&order=asc;",
            self.base(),
            parent_ids
        )
    }

    fn stat_url(&self, file_id: &str) -> String {
        format!("{}sdk/v2/files/{}?pretty=false&fields=size", self.base(), file_id)
    }

    async fn conditional_get(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<String>, ApiError> {
        let mut req = self.http.get(url).header(AUTHORIZATION, self.auth_value());
        if let Some(tag) = etag {
            req = req.header(IF_NONE_MATCH, tag);
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        let status = resp.status();
        let new_etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.text().await?;
        check_status(status, &body)?;
        Ok(Fetched::Fresh {
            value: body,
            etag: new_etag,
        })
    }

    /// List the children of one directory id.
    pub async fn list(
        &self,
        parent_id: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<Vec<Entry>>, ApiError> {
        let url = self.list_url(parent_id);
        self.fetch_listing(&url, etag).await
    }

    /// List the children of several directory ids (comma-separated) in one
    /// round trip; each entry carries its `parentID`.
    pub async fn list_multi(
        &self,
        parent_ids: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<Vec<Entry>>, ApiError> {
        let url = self.list_multi_url(parent_ids);
        self.fetch_listing(&url, etag).await
    }

    async fn fetch_listing(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<Vec<Entry>>, ApiError> {
        match self.conditional_get(url, etag).await? {
            Fetched::NotModified => Ok(Fetched::NotModified),
            Fetched::Fresh { value, etag } => {
                let listing: FileListing = serde_json::from_str(&value)?;
                Ok(Fetched::Fresh {
                    value: listing.files.into_iter().map(Entry::from).collect(),
                    etag,
                })
            }
        }
    }

    /// Fetch the size of one file, revalidated by ETag.
    pub async fn stat_size(
        &self,
        file_id: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<u64>, ApiError> {
        match self.conditional_get(&self.stat_url(file_id), etag).await? {
            Fetched::NotModified => Ok(Fetched::NotModified),
            Fetched::Fresh { value, etag } => {
                let parsed: SizeResponse = serde_json::from_str(&value)?;
                Ok(Fetched::Fresh {
                    value: parsed.size,
                    etag,
                })
            }
        }
    }

    /// Create a directory; the new id comes back in the `Location` header.
    pub async fn make_dir(&self, name: &str, parent_id: &str) -> Result<String, ApiError> {
        let url = format!("{}sdk/v2/files?resolveNameConflict=true", self.base());
        let meta = json!({
            "name": name,
            "parentID": parent_id,
            "mimeType": DIR_MIME,
        });
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.auth_value())
            .header(CONTENT_TYPE, multipart_content_type())
            .body(multipart_related(&meta))
            .send()
            .await?;
        id_from_location(resp).await
    }

    /// Open a resumable upload for a new file in `parent_id`; returns the id
    /// assigned to the file. The upload stays open until
    /// [`file_write_close`](Self::file_write_close).
    pub async fn file_write_open(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<String, ApiError> {
        let url = format!(
            "{}sdk/v2/files/resumable?resolveNameConflict=0&done=false",
            self.base()
        );
        let meta = json!({
            "name": name,
            "parentID": parent_id,
            "mTime": format_mtime(&Local::now()),
        });
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.auth_value())
            .header(CONTENT_TYPE, multipart_content_type())
            .body(multipart_related(&meta))
            .send()
            .await?;
        id_from_location(resp).await
    }

    /// PUT one chunk of an open resumable upload at an explicit offset.
    pub async fn write_chunk(
        &self,
        file_id: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}sdk/v2/files/{}/resumable/content?offset={}&done=false",
            self.base(),
            file_id,
            offset
        );
        let resp = self
            .http
            .put(&url)
            .header(AUTHORIZATION, self.auth_value())
            .body(data)
            .send()
            .await?;
        expect_success(resp).await
    }

    /// Finalize a resumable upload; after this the file is listed by the
    /// server and can never be written to again.
    pub async fn file_write_close(&self, file_id: &str) -> Result<(), ApiError> {
        let url = format!(
            "{}sdk/v2/files/{}/resumable/content?done=true",
            self.base(),
            file_id
        );
        let resp = self
            .http
            .put(&url)
            .header(AUTHORIZATION, self.auth_value())
            .send()
            .await?;
        expect_success(resp).await
    }

    /// Read `len` bytes of a file starting at `offset`. A zero-length read
    /// never leaves the process; a 416 means the file is empty and reads as
    /// zero bytes.
    pub async fn read_range(
        &self,
        file_id: &str,
        offset: u64,
        len: usize,
    ) -> Result<Bytes, ApiError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let url = format!(
            "{}sdk/v2/files/{}/content?download=true",
            self.base(),
            file_id
        );
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_value())
            .header(RANGE, range)
            .send()
            .await?;
        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!("read of {file_id} was for an empty file");
            return Ok(Bytes::new());
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await?;
            check_status(status, &body)?;
            unreachable!("check_status always returns Err for a non-success status");
        }
        Ok(resp.bytes().await?)
    }

    /// Delete a file or directory by id.
    pub async fn remove(&self, id: &str) -> Result<(), ApiError> {
        let url = format!("{}sdk/v2/files/{}", self.base(), id);
        let resp = self
            .http
            .delete(&url)
            .header(AUTHORIZATION, self.auth_value())
            .send()
            .await?;
        expect_success(resp).await
    }

    /// Rename an entry in place; ids are stable across renames.
    pub async fn rename(&self, id: &str, new_name: &str) -> Result<(), ApiError> {
        self.patch(id, json!({ "name": new_name, "mTime": format_mtime(&Local::now()) }))
            .await
    }

    /// Move an entry under a different parent without renaming it.
    pub async fn move_to(&self, id: &str, new_parent_id: &str) -> Result<(), ApiError> {
        self.patch(id, json!({ "parentID": new_parent_id })).await
    }

    /// Set the modification time of an entry, seconds precision.
    pub async fn set_mtime(&self, id: &str, epoch_seconds: i64) -> Result<(), ApiError> {
        let stamp = Local
            .timestamp_opt(epoch_seconds, 0)
            .single()
            .unwrap_or_else(Local::now);
        self.patch(id, json!({ "mTime": format_mtime(&stamp) })).await
    }

    async fn patch(&self, id: &str, body: serde_json::Value) -> Result<(), ApiError> {
        let url = format!("{}sdk/v2/files/{}/patch", self.base(), id);
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.auth_value())
            .json(&body)
            .send()
            .await?;
        expect_success(resp).await
    }

    /// Resolve the Auth0 user id behind an access token.
    pub async fn user_id(&self, access_token: &str) -> Result<String, ApiError> {
        let url = format!("{}/userinfo", self.auth_base());
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        check_status(status, &body)?;
        let info: UserInfo = serde_json::from_str(&body)?;
        Ok(info.user_id)
    }

    /// Enumerate the devices registered to a user.
    pub async fn user_devices(&self, user_id: &str) -> Result<Vec<Device>, ApiError> {
        let url = format!("{}/{}", DEVICE_DIRECTORY_URL, encode_url_part(user_id));
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth_value())
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        check_status(status, &body)?;
        let listing: DeviceListing = serde_json::from_str(&body)?;
        Ok(listing
            .data
            .into_iter()
            .map(|d| Device {
                id: d.device_id,
                name: d.name,
            })
            .collect())
    }
}

/// Map a status code to the error taxonomy; 2xx passes.
fn check_status(status: StatusCode, body: &str) -> Result<(), ApiError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED {
        Err(ApiError::AuthExpired)
    } else if status == StatusCode::BAD_REQUEST {
        Err(ApiError::BadRequest(body.to_string()))
    } else {
        Err(ApiError::Protocol {
            status: status.as_u16(),
            body: body.to_string(),
        })
    }
}

async fn expect_success(resp: reqwest::Response) -> Result<(), ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await?;
    check_status(status, &body)
}

/// Pull the new object's id out of the `Location` header of a creation
/// response (it is the last path segment).
async fn id_from_location(resp: reqwest::Response) -> Result<String, ApiError> {
    let status = resp.status();
    let location = resp
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = resp.text().await?;
    check_status(status, &body)?;
    let location = location.ok_or(ApiError::MissingLocation)?;
    Ok(last_path_segment(&location).to_string())
}

fn last_path_segment(location: &str) -> &str {
    location.rsplit('/').next().unwrap_or(location)
}

fn multipart_content_type() -> String {
    format!("multipart/related; boundary={MULTIPART_BOUNDARY}")
}

/// The SDK accepts metadata only as a single-part multipart/related body
/// with a fixed boundary.
fn multipart_related(meta: &serde_json::Value) -> String {
    format!(
        "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{MULTIPART_BOUNDARY}--"
    )
}

/// RFC3339 with a `:`-separated UTC offset, the only timestamp shape the
/// patch endpoint accepts.
fn format_mtime<Tz: TimeZone>(t: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    t.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

fn encode_url_part(part: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(part.as_bytes()).collect();
    encoded.replace('+', "%20")
}
