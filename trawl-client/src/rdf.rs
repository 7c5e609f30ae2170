//! Pooled SPARQL client over the graph store's HTTP protocol endpoint.
//!
//! Three authorization modes select the out-of-band headers on each
//! request: *sudo* (unrestricted, used for root-subject discovery),
//! *group-scoped* (the canonical allowed-groups JSON, used for document
//! builds), and *default* (neither header; the upstream store applies the
//! incoming request's identity).

use crate::error::{ensure_success, Result};
use crate::pool::{Pool, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_POOL_SIZE};
use crate::retry::with_retry;
use crate::sparql::{AskResult, SelectResults};
use async_trait::async_trait;
use std::time::Duration;
use trawl_core::{vocab, AuthGroupSet};

/// Authorization mode for a graph-store request.
#[derive(Debug, Clone, Default)]
pub enum AuthContext {
    /// Unrestricted read access
    Sudo,
    /// Restricted to a canonical group set
    Groups(AuthGroupSet),
    /// No out-of-band headers
    #[default]
    Default,
}

/// The graph-store seam. Object-safe so the pipeline can substitute
/// recording mocks in tests.
#[async_trait]
pub trait SparqlClient: Send + Sync {
    /// Run a SELECT query.
    async fn select(&self, query: &str, auth: &AuthContext) -> Result<SelectResults>;

    /// Run an ASK query.
    async fn ask(&self, query: &str, auth: &AuthContext) -> Result<bool>;

    /// Run an update (INSERT/DELETE).
    async fn update(&self, query: &str, auth: &AuthContext) -> Result<()>;

    /// Trivial sudo probe of store reachability.
    async fn health_check(&self) -> Result<bool> {
        self.ask("ASK { ?s ?p ?o }", &AuthContext::Sudo).await
    }
}

/// Configuration for [`HttpSparqlClient`].
#[derive(Debug, Clone)]
pub struct SparqlClientConfig {
    /// Number of pooled HTTP handles
    pub pool_size: usize,
    /// Bound on pool acquisition
    pub acquire_timeout: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for SparqlClientConfig {
    fn default() -> Self {
        SparqlClientConfig {
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Pooled HTTP implementation of [`SparqlClient`].
pub struct HttpSparqlClient {
    endpoint: String,
    pool: Pool<reqwest::Client>,
}

impl HttpSparqlClient {
    /// Create a client against a SPARQL protocol endpoint.
    pub fn new(endpoint: impl Into<String>, config: SparqlClientConfig) -> Result<Self> {
        let mut handles = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size.max(1) {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()?;
            handles.push(client);
        }

        Ok(HttpSparqlClient {
            endpoint: endpoint.into(),
            pool: Pool::new(handles, config.acquire_timeout),
        })
    }

    fn apply_auth(request: reqwest::RequestBuilder, auth: &AuthContext) -> reqwest::RequestBuilder {
        match auth {
            AuthContext::Sudo => request.header(vocab::headers::SUDO, "true"),
            AuthContext::Groups(groups) => {
                request.header(vocab::headers::ALLOWED_GROUPS, groups.key())
            }
            AuthContext::Default => request,
        }
    }

    async fn post_query(
        &self,
        form_key: &str,
        query: &str,
        accept: &str,
        auth: &AuthContext,
    ) -> Result<reqwest::Response> {
        let client = self.pool.acquire().await?;
        let request = Self::apply_auth(
            client
                .post(&self.endpoint)
                .header(reqwest::header::ACCEPT, accept)
                .form(&[(form_key, query)]),
            auth,
        );
        let response = request.send().await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl SparqlClient for HttpSparqlClient {
    async fn select(&self, query: &str, auth: &AuthContext) -> Result<SelectResults> {
        with_retry("sparql.select", || async move {
            let response = self
                .post_query("query", query, "application/sparql-results+json", auth)
                .await?;
            Ok(response.json::<SelectResults>().await?)
        })
        .await
    }

    async fn ask(&self, query: &str, auth: &AuthContext) -> Result<bool> {
        with_retry("sparql.ask", || async move {
            let response = self
                .post_query("query", query, "application/sparql-results+json", auth)
                .await?;
            Ok(response.json::<AskResult>().await?.boolean)
        })
        .await
    }

    async fn update(&self, query: &str, auth: &AuthContext) -> Result<()> {
        with_retry("sparql.update", || async move {
            self.post_query("update", query, "*/*", auth).await?;
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for HttpSparqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSparqlClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
