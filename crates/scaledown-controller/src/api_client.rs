use crate::client::{list_from_body, ClusterClient, ObjectList, WatchStream};
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use scaledown_core::{GroupVersionKind, ResourceEvent, ResourceKey, WatchEventType};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Connection settings for the API server
#[derive(Debug, Clone, Default)]
pub struct ApiClientConfig {
    /// API server URL (e.g., "https://10.0.0.1:6443")
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Accept any server certificate
    pub insecure_skip_tls_verify: bool,
}

impl ApiClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    /// Read the bearer token from a file, e.g. a mounted service account token
    pub fn with_token_file(mut self, path: &Path) -> Result<Self> {
        let token = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::invalid_config(
                format!("cannot read token file {}: {}", path.display(), e),
                "Point --token-file at a readable bearer token, or omit it",
            )
        })?;
        self.token = Some(token.trim().to_string());
        Ok(self)
    }
}

/// HTTP client for the Kubernetes API server
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

/// Watch event as sent on the wire, one JSON document per line
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: serde_json::Value,
}

impl ApiClient {
    pub fn new(config: &ApiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| ControllerError::transport(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, verb: &str, path: &str, request: RequestBuilder) -> Result<Response> {
        debug!("{} {}", verb, path);
        self.authorized(request)
            .send()
            .await
            .map_err(|e| ControllerError::transport(format!("{} {}: {}", verb, path, e)))
    }

    async fn json_body(verb: &str, path: &str, resp: Response) -> Result<serde_json::Value> {
        resp.json::<serde_json::Value>().await.map_err(|e| {
            ControllerError::transport(format!("{} {}: failed to parse response: {}", verb, path, e))
        })
    }
}

/// Map a non-success response onto the error taxonomy
async fn status_error(verb: &str, path: &str, key: &ResourceKey, resp: Response) -> ControllerError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => {
            ControllerError::not_found(&key.gvk.kind, &key.namespace, &key.name)
        }
        StatusCode::CONFLICT => {
            ControllerError::already_exists(&key.gvk.kind, &key.namespace, &key.name)
        }
        _ => ControllerError::api_error(verb, path, status.as_u16(), body),
    }
}

/// Decode one line of a watch response. Blank lines yield `None`.
pub(crate) fn parse_watch_line(gvk: &GroupVersionKind, line: &[u8]) -> Option<Result<ResourceEvent>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    let event: WatchEvent = match serde_json::from_slice(line) {
        Ok(event) => event,
        Err(e) => {
            return Some(Err(ControllerError::watch_failed(
                &gvk.kind,
                format!("malformed watch event: {}", e),
            )))
        }
    };

    if event.event_type == WatchEventType::Error {
        let message = event.object["message"]
            .as_str()
            .unwrap_or("watch error")
            .to_string();
        return Some(Err(ControllerError::watch_failed(&gvk.kind, message)));
    }

    let metadata = &event.object["metadata"];
    let resource_version = metadata["resourceVersion"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let key = ResourceKey::new(
        gvk.clone(),
        metadata["namespace"].as_str().unwrap_or_default(),
        metadata["name"].as_str().unwrap_or_default(),
    );

    Some(Ok(ResourceEvent::new(
        event.event_type,
        key,
        event.object,
        resource_version,
    )))
}

struct LineReader {
    gvk: GroupVersionKind,
    body: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: BytesMut,
    finished: bool,
}

impl LineReader {
    /// Next decoded event, buffering partial lines across chunks
    async fn next_event(&mut self) -> Option<Result<ResourceEvent>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line = self.buffer.split_to(pos + 1);
                match parse_watch_line(&self.gvk, &line) {
                    Some(item) => return Some(item),
                    None => continue,
                }
            }

            if self.finished {
                let rest = self.buffer.split();
                return parse_watch_line(&self.gvk, &rest);
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Err(ControllerError::watch_failed(
                        &self.gvk.kind,
                        e.to_string(),
                    )));
                }
                None => self.finished = true,
            }
        }
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    /// GET {collection}
    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<ObjectList> {
        let path = gvk.collection_path(namespace);
        let resp = self.send("GET", &path, self.client.get(self.url(&path))).await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ControllerError::api_error("GET", path, status, body));
        }

        let body = Self::json_body("GET", &path, resp).await?;
        Ok(list_from_body(body))
    }

    /// GET {collection}?watch=true&resourceVersion={rv}
    async fn watch(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let path = gvk.collection_path(namespace);
        let request = self.client.get(self.url(&path)).query(&[
            ("watch", "true"),
            ("allowWatchBookmarks", "true"),
            ("resourceVersion", resource_version),
        ]);
        let resp = self.send("WATCH", &path, request).await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!("Watch on {} rejected with status {}", path, status);
            return Err(ControllerError::api_error("WATCH", path, status, body));
        }

        let reader = LineReader {
            gvk: gvk.clone(),
            body: resp.bytes_stream().boxed(),
            buffer: BytesMut::new(),
            finished: false,
        };

        let stream = futures_util::stream::unfold(reader, |mut reader| async move {
            reader.next_event().await.map(|item| (item, reader))
        });
        Ok(stream.boxed())
    }

    /// GET {collection}/{name}
    async fn get(&self, key: &ResourceKey) -> Result<serde_json::Value> {
        let path = key.api_path();
        let resp = self.send("GET", &path, self.client.get(self.url(&path))).await?;

        if !resp.status().is_success() {
            return Err(status_error("GET", &path, key, resp).await);
        }

        Self::json_body("GET", &path, resp).await
    }

    /// POST {collection}
    async fn create(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let name = object["metadata"]["name"].as_str().unwrap_or_default();
        let key = ResourceKey::new(gvk.clone(), namespace, name);
        let path = key.collection_path();
        let resp = self
            .send("POST", &path, self.client.post(self.url(&path)).json(&object))
            .await?;

        if !resp.status().is_success() {
            return Err(status_error("POST", &path, &key, resp).await);
        }

        Self::json_body("POST", &path, resp).await
    }

    /// DELETE {collection}/{name}
    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let path = key.api_path();
        let resp = self
            .send("DELETE", &path, self.client.delete(self.url(&path)))
            .await?;

        if !resp.status().is_success() {
            return Err(status_error("DELETE", &path, key, resp).await);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pod_gvk() -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind("v1", "Pod")
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new(&ApiClientConfig::new("https://10.0.0.1:6443/")).unwrap();
        assert_eq!(client.base_url(), "https://10.0.0.1:6443");
        assert_eq!(
            client.url("/api/v1/pods"),
            "https://10.0.0.1:6443/api/v1/pods"
        );
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  secret-token  ").unwrap();

        let config = ApiClientConfig::new("https://k8s")
            .with_token_file(file.path())
            .unwrap();
        assert_eq!(config.token.as_deref(), Some("secret-token"));

        let missing = ApiClientConfig::new("https://k8s").with_token_file(Path::new("/nonexistent"));
        assert!(matches!(missing, Err(ControllerError::InvalidConfig { .. })));
    }

    #[test]
    fn test_parse_watch_line() {
        let line = br#"{"type":"MODIFIED","object":{"metadata":{"name":"b1-2","namespace":"brokers","resourceVersion":"17"}}}"#;
        let event = parse_watch_line(&pod_gvk(), line).unwrap().unwrap();
        assert_eq!(event.event_type, WatchEventType::Modified);
        assert_eq!(event.resource_key.namespace, "brokers");
        assert_eq!(event.resource_key.name, "b1-2");
        assert_eq!(event.resource_version, "17");

        assert!(parse_watch_line(&pod_gvk(), b"  \n").is_none());
    }

    #[test]
    fn test_parse_watch_error_event() {
        let line = br#"{"type":"ERROR","object":{"kind":"Status","message":"too old resource version","code":410}}"#;
        let err = parse_watch_line(&pod_gvk(), line).unwrap().unwrap_err();
        assert!(err.to_string().contains("too old resource version"));

        let err = parse_watch_line(&pod_gvk(), b"{not json").unwrap().unwrap_err();
        assert!(matches!(err, ControllerError::WatchFailed { .. }));
    }

    #[tokio::test]
    async fn test_line_reader_joins_split_chunks() {
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(
                br#"{"type":"ADDED","object":{"metadata":{"name":"b1-0","#,
            )),
            Ok(bytes::Bytes::from_static(
                br#""namespace":"brokers"}}}
{"type":"DELETED","object":{"metadata":{"name":"b1-1","namespace":"brokers"}}}"#,
            )),
        ];
        let mut reader = LineReader {
            gvk: pod_gvk(),
            body: futures_util::stream::iter(chunks).boxed(),
            buffer: BytesMut::new(),
            finished: false,
        };

        let first = reader.next_event().await.unwrap().unwrap();
        assert_eq!(first.event_type, WatchEventType::Added);
        assert_eq!(first.resource_key.name, "b1-0");

        let second = reader.next_event().await.unwrap().unwrap();
        assert_eq!(second.event_type, WatchEventType::Deleted);
        assert_eq!(second.resource_key.name, "b1-1");

        assert!(reader.next_event().await.is_none());
    }
}
