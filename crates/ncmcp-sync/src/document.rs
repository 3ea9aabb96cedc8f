//! Documents flowing through the pipeline.

use ncmcp_client::webdav::FileInfo;

/// One document queued for (re-)indexing. Identity is
/// `(user_id, file_id)`; existence is bounded by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub user_id: String,
    pub file_id: i64,
    pub path: String,
    pub content_type: String,
    pub size: i64,
    pub last_modified: Option<i64>,
    pub etag: Option<String>,
}

impl DocumentRef {
    /// Build a ref from a tag-filtered listing entry.
    pub fn from_file(user_id: &str, file: &FileInfo) -> Self {
        Self {
            user_id: user_id.to_string(),
            file_id: file.file_id,
            path: file.path.clone(),
            content_type: file.content_type.clone(),
            size: file.size,
            last_modified: file.last_modified,
            etag: file.etag.clone(),
        }
    }

    /// Change fingerprint the index is diffed against: the ETag when the
    /// server sends one, the mtime otherwise.
    pub fn fingerprint(&self) -> String {
        self.etag.clone().unwrap_or_else(|| {
            format!("mtime:{}", self.last_modified.unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(etag: Option<&str>, mtime: Option<i64>) -> FileInfo {
        FileInfo {
            file_id: 1,
            path: "/doc.md".into(),
            name: "doc.md".into(),
            size: 10,
            content_type: "text/markdown".into(),
            last_modified: mtime,
            etag: etag.map(str::to_string),
        }
    }

    #[test]
    fn fingerprint_prefers_etag() {
        let doc = DocumentRef::from_file("alice", &file(Some("\"e1\""), Some(100)));
        assert_eq!(doc.fingerprint(), "\"e1\"");
    }

    #[test]
    fn fingerprint_falls_back_to_mtime() {
        let doc = DocumentRef::from_file("alice", &file(None, Some(100)));
        assert_eq!(doc.fingerprint(), "mtime:100");
    }
}
