//! Blocking OData v2 transport.
//!
//! [`ODataClient`] implements [`RemoteApi`] against the CRM's
//! `OrganizationData.svc` endpoint:
//!
//! - `get`:    `GET    {root}/{service}Set(guid'{id}')`
//! - `list`:   `GET    {root}/{service}Set?$top=..&$skip=..&$filter=..`, page by page
//! - `create`: `POST   {root}/{service}Set`
//! - `update`: `PUT    {root}/{service}Set(guid'{id}')`
//! - `delete`: `DELETE {root}/{service}Set(guid'{id}')`
//!
//! Responses are unwrapped from the `{"d": ...}` envelope.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::session::{Session, SessionToken};
use crmsync_engine::{RemoteApi, RemoteError, RemoteResult, RemoteSnapshot};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{StatusCode, Url};
use serde_json::Value as Wire;
use tracing::{debug, warn};

/// Query options of one list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub top: usize,
    pub skip: usize,
    /// ANDed filter expressions
    pub filters: Vec<String>,
    pub select: Vec<String>,
    pub orderby: Option<String>,
}

impl ListParams {
    pub fn page(top: usize, skip: usize) -> Self {
        Self {
            top,
            skip,
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: &[String]) -> Self {
        self.filters = filters.to_vec();
        self
    }

    /// `$`-prefixed query pairs, in a stable order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("$top", self.top.to_string()), ("$skip", self.skip.to_string())];
        if !self.filters.is_empty() {
            pairs.push(("$filter", self.filters.join(" and ")));
        }
        if !self.select.is_empty() {
            pairs.push(("$select", self.select.join(",")));
        }
        if let Some(orderby) = &self.orderby {
            pairs.push(("$orderby", orderby.clone()));
        }
        pairs
    }
}

/// Unwrap a single-entity response: `{"d": {...}}`.
pub fn unwrap_entity(body: Wire) -> RemoteResult<RemoteSnapshot> {
    match body {
        Wire::Object(mut outer) => match outer.remove("d") {
            Some(Wire::Object(entity)) => Ok(entity),
            Some(_) => Err(RemoteError::InvalidResponse("'d' is not an object".into())),
            None => Ok(outer),
        },
        _ => Err(RemoteError::InvalidResponse("expected a JSON object".into())),
    }
}

/// Unwrap a list response: `{"d": {"results": [...]}}` or `{"d": [...]}`.
pub fn unwrap_results(body: Wire) -> RemoteResult<Vec<RemoteSnapshot>> {
    let items = match body {
        Wire::Object(mut outer) => match outer.remove("d") {
            Some(Wire::Object(mut d)) => d.remove("results"),
            Some(Wire::Array(items)) => Some(Wire::Array(items)),
            _ => None,
        },
        _ => None,
    };

    match items {
        Some(Wire::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Wire::Object(entity) => Ok(entity),
                _ => Err(RemoteError::InvalidResponse("list item is not an object".into())),
            })
            .collect(),
        _ => Err(RemoteError::InvalidResponse("missing 'd.results' array".into())),
    }
}

/// Map a non-success status to a remote error.
pub fn status_error(status: StatusCode, body: &str, service: &str, id: Option<&str>) -> RemoteError {
    match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => RemoteError::NotFound {
            service: service.to_string(),
            id: id.to_string(),
        },
        _ => RemoteError::Status {
            code: status.as_u16(),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            },
        },
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

pub struct ODataClient {
    http: Client,
    root: String,
    page_size: usize,
    session: Session,
}

impl ODataClient {
    pub fn new(config: &ClientConfig, session: Session) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            root: config.rest_root(),
            page_size: config.page_size,
            session,
        })
    }

    /// Build from configuration, with basic auth when credentials are set.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let session = match config.credentials() {
            Some((username, password)) => Session::basic(username, password),
            None => Session::anonymous(),
        };
        Self::new(config, session)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn collection_url(&self, service: &str) -> String {
        format!("{}/{service}Set", self.root)
    }

    pub fn entity_url(&self, service: &str, id: &str) -> String {
        format!("{}/{service}Set(guid'{id}')", self.root)
    }

    pub fn list_url(&self, service: &str, params: &ListParams) -> RemoteResult<Url> {
        Url::parse_with_params(&self.collection_url(service), params.query_pairs())
            .map_err(|e| RemoteError::Transport(format!("invalid list url: {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let request = request.header(ACCEPT, "application/json");
        Ok(match self.session.acquire().map_err(RemoteError::from)? {
            SessionToken::Anonymous => request,
            SessionToken::Basic { username, password } => request.basic_auth(username, Some(password)),
            SessionToken::Cookie(cookie) => request.header(COOKIE, cookie),
        })
    }

    /// Send a request and return the JSON body, or `None` for an empty one.
    fn send(
        &self,
        request: RequestBuilder,
        service: &str,
        id: Option<&str>,
    ) -> RemoteResult<Option<Wire>> {
        let response: Response = self.authorize(request)?.send().map_err(transport)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!(service, "credentials rejected, releasing session");
            self.session.release();
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, &body, service, id));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.text().map_err(transport)?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    /// Fetch one page of a list.
    pub fn list_page(&self, service: &str, params: &ListParams) -> RemoteResult<Vec<RemoteSnapshot>> {
        let url = self.list_url(service, params)?;
        debug!(service, %url, "list page");
        match self.send(self.http.get(url), service, None)? {
            Some(body) => unwrap_results(body),
            None => Ok(Vec::new()),
        }
    }
}

impl RemoteApi for ODataClient {
    fn get(&self, service: &str, id: &str) -> RemoteResult<RemoteSnapshot> {
        debug!(service, id, "get");
        let request = self.http.get(self.entity_url(service, id));
        match self.send(request, service, Some(id))? {
            Some(body) => unwrap_entity(body),
            None => Err(RemoteError::InvalidResponse("empty get response".into())),
        }
    }

    fn list(&self, service: &str, filters: &[String]) -> RemoteResult<Vec<RemoteSnapshot>> {
        let mut results = Vec::new();
        loop {
            let params = ListParams::page(self.page_size, results.len()).with_filters(filters);
            let page = self.list_page(service, &params)?;
            let count = page.len();
            results.extend(page);
            if count < self.page_size {
                break;
            }
        }
        debug!(service, count = results.len(), "listed");
        Ok(results)
    }

    fn create(&self, service: &str, data: &RemoteSnapshot) -> RemoteResult<RemoteSnapshot> {
        debug!(service, "create");
        let request = self.http.post(self.collection_url(service)).json(data);
        match self.send(request, service, None)? {
            Some(body) => unwrap_entity(body),
            None => Err(RemoteError::InvalidResponse("empty create response".into())),
        }
    }

    fn update(&self, service: &str, id: &str, data: &RemoteSnapshot) -> RemoteResult<RemoteSnapshot> {
        debug!(service, id, "update");
        let request = self.http.put(self.entity_url(service, id)).json(data);
        match self.send(request, service, Some(id))? {
            Some(body) => unwrap_entity(body),
            None => Ok(data.clone()),
        }
    }

    fn delete(&self, service: &str, id: &str) -> RemoteResult<()> {
        debug!(service, id, "delete");
        self.send(self.http.delete(self.entity_url(service, id)), service, Some(id))?;
        Ok(())
    }
}
