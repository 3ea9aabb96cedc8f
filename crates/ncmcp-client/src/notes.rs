//! Notes app REST surface.

use http::Method;
use serde::Deserialize;

use ncmcp_core::BridgeResult;

use crate::NextcloudClient;

const NOTES_API: &str = "/index.php/apps/notes/api/v1/notes";

/// A note as the Notes app returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct Note {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub modified: i64,
    #[serde(default)]
    pub favorite: bool,
}

impl NextcloudClient {
    /// All notes of the authenticated user.
    pub async fn list_notes(&self) -> BridgeResult<Vec<Note>> {
        let response = self.request("notes", Method::GET, NOTES_API, |b| b).await?;
        Ok(response.json().await?)
    }

    /// One note by id. Missing notes surface as `NotFound`.
    pub async fn get_note(&self, note_id: i64) -> BridgeResult<Note> {
        let path = format!("{NOTES_API}/{note_id}");
        let response = self.request("notes", Method::GET, &path, |b| b).await?;
        Ok(response.json().await?)
    }

    /// Case-insensitive title/content search over the user's notes.
    ///
    /// The Notes API has no server-side search; filtering happens here.
    pub async fn search_notes(&self, query: &str) -> BridgeResult<Vec<Note>> {
        let needle = query.to_lowercase();
        let notes = self.list_notes().await?;
        Ok(notes
            .into_iter()
            .filter(|note| {
                note.title.to_lowercase().contains(&needle)
                    || note.content.to_lowercase().contains(&needle)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method as http_method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn notes_upstream() -> MockServer {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path(NOTES_API))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "title": "Groceries", "content": "milk, bread", "category": "", "modified": 100},
                {"id": 2, "title": "Project plan", "content": "bridge milestones", "category": "work", "modified": 200},
            ])))
            .mount(&upstream)
            .await;
        upstream
    }

    fn client(base: &str) -> NextcloudClient {
        NextcloudClient::with_basic_auth(base, "alice", "secret", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn search_filters_title_and_content() {
        let upstream = notes_upstream().await;
        let client = client(&upstream.uri());

        let by_title = client.search_notes("groceries").await.unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, 1);

        let by_content = client.search_notes("milestones").await.unwrap();
        assert_eq!(by_content.len(), 1);
        assert_eq!(by_content[0].id, 2);

        assert!(client.search_notes("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_note_maps_missing_to_not_found() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path(format!("{NOTES_API}/99")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&upstream)
            .await;

        assert!(matches!(
            client(&upstream.uri()).get_note(99).await.unwrap_err(),
            ncmcp_core::BridgeError::NotFound
        ));
    }
}
