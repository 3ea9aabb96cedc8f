//! WebDAV surface: system-tag lookups, tag-filtered file listing, and
//! file downloads.
//!
//! The indexing scanner drives `resolve_tag_id` + `files_by_tag`; the
//! processors and the `files_read_file` tool drive `read_file`.

use chrono::DateTime;
use http::Method;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use ncmcp_core::{BridgeError, BridgeResult};

use crate::NextcloudClient;

/// One file from a tag-filtered WebDAV listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub file_id: i64,
    /// Path relative to the user's files root, with a leading slash.
    pub path: String,
    pub name: String,
    pub size: i64,
    pub content_type: String,
    /// Unix timestamp parsed from `getlastmodified`.
    pub last_modified: Option<i64>,
    pub etag: Option<String>,
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

/// Parse a `d:multistatus` filter-files response into file infos.
pub(crate) fn parse_filter_files_response(xml: &str, username: &str) -> Vec<FileInfo> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let webdav_prefix = format!("/remote.php/dav/files/{username}");
    let mut files = Vec::new();
    let mut current: Option<std::collections::HashMap<String, String>> = None;
    let mut current_element = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "response" {
                    current = Some(std::collections::HashMap::new());
                }
                current_element = name;
            }
            Ok(Event::Text(e)) => {
                if let Some(props) = current.as_mut() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    props.entry(current_element.clone()).or_insert(text);
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == "response" {
                    if let Some(props) = current.take() {
                        if let Some(info) = file_info_from_props(&props, &webdav_prefix) {
                            files.push(info);
                        }
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    files
}

fn file_info_from_props(
    props: &std::collections::HashMap<String, String>,
    webdav_prefix: &str,
) -> Option<FileInfo> {
    let file_id: i64 = props.get("fileid")?.parse().ok()?;
    let href = props.get("href")?;
    let decoded = urlencoding::decode(href).map_or_else(|_| href.clone(), |d| d.into_owned());
    let path = decoded
        .strip_prefix(webdav_prefix)
        .unwrap_or(&decoded)
        .to_string();

    // Collections carry no content length; the pipeline only wants files.
    let size = props.get("getcontentlength")?.parse().ok()?;

    let last_modified = props
        .get("getlastmodified")
        .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.timestamp());

    Some(FileInfo {
        file_id,
        name: props
            .get("displayname")
            .cloned()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| path.rsplit('/').next().unwrap_or_default().to_string()),
        path,
        size,
        content_type: props.get("getcontenttype").cloned().unwrap_or_default(),
        last_modified,
        etag: props.get("getetag").cloned(),
    })
}

/// Parse the systemtags PROPFIND response into `(id, display_name)` pairs.
pub(crate) fn parse_systemtags_response(xml: &str) -> Vec<(i64, String)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut tags = Vec::new();
    let mut current_element = String::new();
    let mut tag_id: Option<i64> = None;
    let mut display_name: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "response" {
                    tag_id = None;
                    display_name = None;
                }
                current_element = name;
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_element.as_str() {
                    "id" => tag_id = text.parse().ok(),
                    "display-name" => display_name = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == "response" {
                    if let (Some(id), Some(name)) = (tag_id.take(), display_name.take()) {
                        tags.push((id, name));
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    tags
}

impl NextcloudClient {
    fn webdav_base(&self) -> String {
        format!("/remote.php/dav/files/{}", self.username())
    }

    /// Resolve a system tag's numeric id by display name.
    pub async fn resolve_tag_id(&self, tag_name: &str) -> BridgeResult<Option<i64>> {
        const PROPFIND_BODY: &str = r#"<?xml version="1.0"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <oc:id/>
    <oc:display-name/>
    <oc:user-visible/>
    <oc:user-assignable/>
  </d:prop>
</d:propfind>"#;

        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| BridgeError::config(format!("PROPFIND method: {e}")))?;
        let response = self
            .request("webdav", method, "/remote.php/dav/systemtags/", |b| {
                b.header("Depth", "1")
                    .header("Content-Type", "application/xml")
                    .body(PROPFIND_BODY)
            })
            .await?;

        let xml = response.text().await?;
        let tag = parse_systemtags_response(&xml)
            .into_iter()
            .find(|(_, name)| name == tag_name)
            .map(|(id, _)| id);
        debug!(tag_name, tag_id = ?tag, "system tag lookup");
        Ok(tag)
    }

    /// List the files carrying a system tag, via a WebDAV REPORT.
    pub async fn files_by_tag(&self, tag_id: i64) -> BridgeResult<Vec<FileInfo>> {
        let report_body = format!(
            r#"<?xml version="1.0"?>
<oc:filter-files xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns" xmlns:nc="http://nextcloud.org/ns">
  <d:prop>
    <oc:fileid/>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getcontenttype/>
    <d:getlastmodified/>
    <d:getetag/>
  </d:prop>
  <oc:filter-rules>
    <oc:systemtag>{tag_id}</oc:systemtag>
  </oc:filter-rules>
</oc:filter-files>"#
        );

        let method = Method::from_bytes(b"REPORT")
            .map_err(|e| BridgeError::config(format!("REPORT method: {e}")))?;
        let base = format!("{}/", self.webdav_base());
        let response = self
            .request("webdav", method, &base, move |b| {
                b.header("Content-Type", "application/xml")
                    .body(report_body.clone())
            })
            .await?;

        let xml = response.text().await?;
        let files = parse_filter_files_response(&xml, self.username());
        debug!(tag_id, count = files.len(), "tag-filtered file listing");
        Ok(files)
    }

    /// Download a file, returning its bytes and content type.
    pub async fn read_file(&self, path: &str) -> BridgeResult<(Vec<u8>, String)> {
        let normalized = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let url_path = format!("{}{}", self.webdav_base(), normalized);

        let response = self.request("webdav", Method::GET, &url_path, |b| b).await?;
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }
}
