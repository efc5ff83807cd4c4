use crate::bulk::{BulkExecutor, BulkRequest, BulkSummary};
use crate::config::ElasticsearchConfig;
use crate::error::{BulkError, TransportError};
use crate::import::cleanup::{IdPage, IndexScanner};
use crate::search::models::{
    BulkResponse, ClearScrollRequest, ScrollContinueRequest, ScrollResponse, ScrollStartRequest,
    encode_ndjson, interpret_bulk_response,
};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::future::Future;
use tokio::time::timeout;

const SCROLL_KEEP_ALIVE: &str = "1m";

/// Elasticsearch client used as the pipeline's bulk transport.
///
/// Cheap to clone; clones share one connection pool, so a single client can
/// serve every in-flight work unit.
#[derive(Clone)]
pub struct ElasticsearchClient {
    http: Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchClient {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .user_agent("search-reindexer/0.1")
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    fn url_for(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url_for(path));
        match &self.config.username {
            Some(username) => builder.basic_auth(username, self.config.password.as_deref()),
            None => builder,
        }
    }

    /// Run `call` under the configured deadline; a hung call becomes `TransportError::Timeout`.
    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.request_timeout)),
        }
    }

    async fn check_status(response: Response) -> Result<Response, TransportError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".to_string());
        Err(TransportError::status(status, body))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<Response, TransportError> {
        let response = self.request(method, path).json(payload).send().await?;
        Self::check_status(response).await
    }

    pub async fn healthcheck(&self) -> Result<(), TransportError> {
        self.with_deadline(async {
            let response = self.request(Method::GET, "/").send().await?;
            Self::check_status(response).await.map(|_| ())
        })
        .await
    }

    /// Submit one bulk request and attribute every item of the response.
    pub async fn bulk(&self, request: &BulkRequest) -> Result<BulkSummary, BulkError> {
        if request.is_empty() {
            return Ok(BulkSummary::default());
        }

        let body = encode_ndjson(request)
            .map_err(|err| TransportError::malformed(format!("failed to encode bulk body: {err}")))?;

        debug!(
            "bulk: sending {} operations ({} bytes) to index {}",
            request.len(),
            body.len(),
            request.index
        );

        let response = self
            .with_deadline(async {
                let response = self
                    .request(Method::POST, "/_bulk")
                    .header(CONTENT_TYPE, "application/x-ndjson")
                    .body(body)
                    .send()
                    .await?;
                let response = Self::check_status(response).await?;
                let bytes = response.bytes().await?;
                serde_json::from_slice::<BulkResponse>(&bytes).map_err(|err| {
                    TransportError::malformed(format!("failed to decode bulk response: {err}"))
                })
            })
            .await?;

        interpret_bulk_response(request, response)
    }

    async fn read_scroll_page(response: Response) -> Result<IdPage, TransportError> {
        let bytes = response.bytes().await?;
        let page: ScrollResponse = serde_json::from_slice(&bytes).map_err(|err| {
            TransportError::malformed(format!("failed to decode scroll response: {err}"))
        })?;

        Ok(IdPage {
            ids: page.hits.hits.into_iter().map(|hit| hit.id).collect(),
            cursor: page.scroll_id,
        })
    }
}

#[async_trait]
impl BulkExecutor for ElasticsearchClient {
    async fn execute(&self, request: BulkRequest) -> Result<BulkSummary, BulkError> {
        self.bulk(&request).await
    }
}

#[async_trait]
impl IndexScanner for ElasticsearchClient {
    async fn open_scan(&self, index: &str, page_size: usize) -> Result<IdPage, TransportError> {
        info!("scroll: opening scan of index {index} (page size {page_size})");
        let payload = ScrollStartRequest {
            size: page_size.max(1),
            source: false,
            sort: ["_doc"],
        };
        let path = format!("/{}/_search?scroll={}", index, SCROLL_KEEP_ALIVE);

        self.with_deadline(async {
            let response = self.send_json(Method::POST, &path, &payload).await?;
            Self::read_scroll_page(response).await
        })
        .await
    }

    async fn next_page(&self, cursor: &str) -> Result<IdPage, TransportError> {
        let payload = ScrollContinueRequest {
            scroll: SCROLL_KEEP_ALIVE,
            scroll_id: cursor,
        };

        self.with_deadline(async {
            let response = self
                .send_json(Method::POST, "/_search/scroll", &payload)
                .await?;
            Self::read_scroll_page(response).await
        })
        .await
    }

    async fn close_scan(&self, cursor: &str) -> Result<(), TransportError> {
        let payload = ClearScrollRequest { scroll_id: [cursor] };

        self.with_deadline(async {
            match self
                .send_json(Method::DELETE, "/_search/scroll", &payload)
                .await
            {
                Ok(_) => Ok(()),
                // The context already expired on the server side.
                Err(TransportError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
        .await
    }
}
