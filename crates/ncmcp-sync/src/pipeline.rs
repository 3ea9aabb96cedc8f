//! Scanner / processor task group.
//!
//! One scanner discovers tagged documents and diffs them against the
//! vector index; a pool of processors drains a bounded queue. The queue's
//! capacity is the back-pressure mechanism: a full queue blocks the
//! scanner's send. Shutdown is a `CancellationToken`; both task kinds
//! honour it between steps, and the channel closing (the scanner owning
//! the only sender) ends the processors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ncmcp_client::NextcloudClient;
use ncmcp_core::{BridgeResult, Settings};

use crate::collaborators::{EmbeddedChunk, EmbeddingService, ProcessorRegistry, VectorStore};
use crate::document::DocumentRef;

/// Soft chunk size for extracted text.
const CHUNK_CHARS: usize = 1600;

/// Pipeline tuning, derived from settings plus the indexing user.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub username: String,
    pub tag: String,
    pub queue_max_size: usize,
    pub processor_workers: usize,
    pub scan_interval: Duration,
}

impl PipelineConfig {
    /// Derive the tuning block from settings for the configured user.
    pub fn from_settings(settings: &Settings, username: &str) -> Self {
        Self {
            username: username.to_string(),
            tag: settings.vector_sync_tag.clone(),
            queue_max_size: settings.vector_sync_queue_max_size,
            processor_workers: settings.vector_sync_processor_workers,
            scan_interval: Duration::from_secs(settings.vector_sync_interval_seconds),
        }
    }
}

/// Collaborators every task shares.
#[derive(Clone)]
pub struct PipelineContext {
    pub client: NextcloudClient,
    pub processors: Arc<ProcessorRegistry>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub store: Arc<dyn VectorStore>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("client", &self.client.username())
            .finish_non_exhaustive()
    }
}

/// Running pipeline handle, owned by the process lifecycle.
#[derive(Debug)]
pub struct Pipeline {
    shutdown: CancellationToken,
    scanner_wake: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

/// Start the scanner and the processor pool.
pub fn start(config: PipelineConfig, ctx: PipelineContext) -> Pipeline {
    let (tx, rx) = mpsc::channel::<DocumentRef>(config.queue_max_size.max(1));
    let rx = Arc::new(Mutex::new(rx));
    let shutdown = CancellationToken::new();
    let scanner_wake = Arc::new(Notify::new());

    let mut tasks = Vec::with_capacity(config.processor_workers + 1);
    tasks.push(tokio::spawn(scanner_task(
        config.clone(),
        ctx.clone(),
        tx,
        Arc::clone(&scanner_wake),
        shutdown.clone(),
    )));
    for worker in 0..config.processor_workers.max(1) {
        tasks.push(tokio::spawn(processor_task(
            worker,
            Arc::clone(&rx),
            ctx.clone(),
            shutdown.clone(),
        )));
    }

    info!(
        workers = config.processor_workers.max(1),
        queue = config.queue_max_size,
        tag = %config.tag,
        "indexing pipeline started"
    );
    Pipeline {
        shutdown,
        scanner_wake,
        tasks,
    }
}

impl Pipeline {
    /// Request an immediate scan.
    pub fn wake_scanner(&self) {
        self.scanner_wake.notify_one();
    }

    /// Signal shutdown and wait for every task to return.
    pub async fn shutdown(self) {
        info!("shutting down indexing pipeline");
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("indexing pipeline stopped");
    }
}

async fn scanner_task(
    config: PipelineConfig,
    ctx: PipelineContext,
    tx: mpsc::Sender<DocumentRef>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) {
    info!(user = %config.username, tag = %config.tag, "scanner started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        if let Err(e) = scan_once(&config, &ctx, &tx, &shutdown).await {
            warn!(error = %e, "scan cycle failed");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.scan_interval) => {}
            _ = wake.notified() => {
                debug!("scanner woken for an immediate scan");
            }
        }
    }
    info!("scanner stopped");
}

async fn scan_once(
    config: &PipelineConfig,
    ctx: &PipelineContext,
    tx: &mpsc::Sender<DocumentRef>,
    shutdown: &CancellationToken,
) -> BridgeResult<()> {
    let Some(tag_id) = ctx.client.resolve_tag_id(&config.tag).await? else {
        debug!(tag = %config.tag, "indexing tag does not exist upstream yet");
        return Ok(());
    };
    if shutdown.is_cancelled() {
        return Ok(());
    }

    let files = ctx.client.files_by_tag(tag_id).await?;
    let index = ctx.store.index_state(&config.username).await?;
    metrics::gauge!("ncmcp_sync_tagged_documents").set(files.len() as f64);

    let mut queued = 0usize;
    for file in files {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        let doc = DocumentRef::from_file(&config.username, &file);
        if index.get(&doc.file_id) == Some(&doc.fingerprint()) {
            continue;
        }

        debug!(file_id = doc.file_id, path = %doc.path, "queueing changed document");
        // A full queue blocks here until a processor drains it.
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            sent = tx.send(doc) => {
                if sent.is_err() {
                    return Ok(());
                }
                queued += 1;
            }
        }
    }

    if queued > 0 {
        info!(queued, "scan queued changed documents");
    }
    Ok(())
}

async fn processor_task(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<DocumentRef>>>,
    ctx: PipelineContext,
    shutdown: CancellationToken,
) {
    info!(worker, "processor started");
    loop {
        let doc = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                doc = rx.recv() => doc,
            }
        };
        let Some(doc) = doc else { break };

        let started = Instant::now();
        match process_document(&ctx, &doc, &shutdown).await {
            Ok(chunks) => {
                metrics::counter!("ncmcp_sync_documents_total", "outcome" => "ok").increment(1);
                metrics::histogram!("ncmcp_sync_document_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                debug!(worker, file_id = doc.file_id, chunks, "document indexed");
            }
            Err(e) => {
                metrics::counter!("ncmcp_sync_documents_total", "outcome" => "error").increment(1);
                warn!(worker, file_id = doc.file_id, path = %doc.path, error = %e, "document processing failed");
            }
        }
    }
    info!(worker, "processor stopped");
}

/// Fetch, extract, embed, upsert, checking cancellation between steps.
async fn process_document(
    ctx: &PipelineContext,
    doc: &DocumentRef,
    shutdown: &CancellationToken,
) -> BridgeResult<usize> {
    if shutdown.is_cancelled() {
        return Ok(0);
    }
    let (bytes, fetched_type) = ctx.client.read_file(&doc.path).await?;
    let content_type = if doc.content_type.is_empty() {
        fetched_type
    } else {
        doc.content_type.clone()
    };

    let Some(processor) = ctx.processors.find(&content_type) else {
        debug!(file_id = doc.file_id, content_type, "no processor for document type, skipping");
        return Ok(0);
    };
    let text = processor.extract_text(&bytes, &content_type).await?;
    let chunks = chunk_text(&text, CHUNK_CHARS);
    if chunks.is_empty() {
        return Ok(0);
    }

    if shutdown.is_cancelled() {
        return Ok(0);
    }
    let vectors = ctx.embedder.embed(&chunks).await?;

    let embedded: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(chunk_index, (text, vector))| EmbeddedChunk {
            chunk_index,
            text,
            vector,
        })
        .collect();

    if shutdown.is_cancelled() {
        return Ok(0);
    }
    ctx.store.upsert_chunks(doc, &embedded).await?;
    Ok(embedded.len())
}

/// Split text into chunks of at most `max_chars`, preferring paragraph
/// boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if current.len() + paragraph.len() + 2 > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if paragraph.len() > max_chars {
            // One oversized paragraph is hard-split on char boundaries.
            let mut start = 0;
            let chars: Vec<char> = paragraph.chars().collect();
            while start < chars.len() {
                let end = (start + max_chars).min(chars.len());
                chunks.push(chars[start..end].iter().collect());
                start = end;
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{method as http_method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn chunking_respects_paragraphs_and_caps_length() {
        let text = "alpha\n\nbeta\n\ngamma";
        assert_eq!(chunk_text(text, 1000), vec!["alpha\n\nbeta\n\ngamma"]);

        let chunks = chunk_text(text, 8);
        assert_eq!(chunks, vec!["alpha", "beta", "gamma"]);

        let oversized = "x".repeat(25);
        let chunks = chunk_text(&oversized, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));
    }

    #[test]
    fn blank_text_yields_no_chunks() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("\n\n\n\n", 100).is_empty());
    }

    struct StaticEmbedder;

    #[async_trait]
    impl EmbeddingService for StaticEmbedder {
        async fn embed(&self, chunks: &[String]) -> BridgeResult<Vec<Vec<f32>>> {
            Ok(chunks.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        state: StdMutex<HashMap<i64, String>>,
        upserts: StdMutex<Vec<(i64, usize)>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn index_state(&self, _user_id: &str) -> BridgeResult<HashMap<i64, String>> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn upsert_chunks(
            &self,
            document: &DocumentRef,
            chunks: &[EmbeddedChunk],
        ) -> BridgeResult<()> {
            self.state
                .lock()
                .unwrap()
                .insert(document.file_id, document.fingerprint());
            self.upserts
                .lock()
                .unwrap()
                .push((document.file_id, chunks.len()));
            Ok(())
        }
    }

    const SYSTEMTAGS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/systemtags/7</d:href>
    <d:propstat>
      <d:prop><oc:id>7</oc:id><oc:display-name>mcp-index</oc:display-name></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    const TAGGED_FILES: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/files/alice/doc.md</d:href>
    <d:propstat>
      <d:prop>
        <oc:fileid>101</oc:fileid>
        <d:displayname>doc.md</d:displayname>
        <d:getcontentlength>11</d:getcontentlength>
        <d:getcontenttype>text/markdown</d:getcontenttype>
        <d:getetag>"e-1"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    async fn mock_upstream() -> MockServer {
        let upstream = MockServer::start().await;
        Mock::given(http_method("PROPFIND"))
            .and(url_path("/remote.php/dav/systemtags/"))
            .respond_with(ResponseTemplate::new(207).set_body_string(SYSTEMTAGS))
            .mount(&upstream)
            .await;
        Mock::given(http_method("REPORT"))
            .and(url_path("/remote.php/dav/files/alice/"))
            .respond_with(ResponseTemplate::new(207).set_body_string(TAGGED_FILES))
            .mount(&upstream)
            .await;
        Mock::given(http_method("GET"))
            .and(url_path("/remote.php/dav/files/alice/doc.md"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/markdown")
                    .set_body_string("# document"),
            )
            .mount(&upstream)
            .await;
        upstream
    }

    fn pipeline_parts(
        upstream_url: &str,
        store: Arc<RecordingStore>,
    ) -> (PipelineConfig, PipelineContext) {
        let client = NextcloudClient::with_basic_auth(
            upstream_url,
            "alice",
            "secret",
            Duration::from_secs(2),
        )
        .unwrap();
        let config = PipelineConfig {
            username: "alice".into(),
            tag: "mcp-index".into(),
            queue_max_size: 4,
            processor_workers: 2,
            scan_interval: Duration::from_secs(3600),
        };
        let ctx = PipelineContext {
            client,
            processors: Arc::new(ProcessorRegistry::with_defaults()),
            embedder: Arc::new(StaticEmbedder),
            store,
        };
        (config, ctx)
    }

    #[tokio::test]
    async fn pipeline_indexes_changed_documents_once() {
        let upstream = mock_upstream().await;
        let store = Arc::new(RecordingStore::default());
        let (config, ctx) = pipeline_parts(&upstream.uri(), Arc::clone(&store));

        let pipeline = start(config, ctx);

        // The initial scan queues the tagged document and a worker indexes it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.upserts.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "document was never indexed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.upserts.lock().unwrap().as_slice(), &[(101, 1)]);

        // A woken re-scan sees the fingerprint match and queues nothing.
        pipeline.wake_scanner();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.upserts.lock().unwrap().len(), 1);

        tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
            .await
            .expect("pipeline drained within the shutdown budget");
    }

    #[tokio::test]
    async fn shutdown_returns_promptly_with_idle_workers() {
        let upstream = mock_upstream().await;
        let store = Arc::new(RecordingStore::default());
        let (config, ctx) = pipeline_parts(&upstream.uri(), store);

        let pipeline = start(config, ctx);
        tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown())
            .await
            .expect("shutdown must not hang");
    }
}
