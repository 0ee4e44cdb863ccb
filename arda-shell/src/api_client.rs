//! REST client for the menu service.

use std::fmt;

use arda_core::FetchError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ShellConfig;

/// Longest error body kept in a `FetchError::Status` message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A node of the menu tree served by `GET /menus/tree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuNode {
    pub id: i64,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub order: i64,
    pub label: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub children: Vec<MenuNode>,
}

/// One placement in a reorder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderItem {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub items: Vec<ReorderItem>,
}

/// Menu endpoints as seen by the query layer.
///
/// Every failure is already a [`FetchError`] so the runtime can apply its
/// retry policy to it.
#[async_trait]
pub trait MenuApi: Send + Sync {
    async fn menu_tree(&self, role: &str) -> Result<Vec<MenuNode>, FetchError>;

    async fn reorder(&self, request: &ReorderRequest) -> Result<(), FetchError>;
}

#[derive(Clone)]
pub struct MenuClient {
    client: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for MenuClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MenuClient {
    pub fn new(config: &ShellConfig) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base}/menus/tree?role=<role>`
    pub async fn get_menu_tree(&self, role: &str) -> Result<Vec<MenuNode>, FetchError> {
        let url = format!("{}/menus/tree", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("role", role)])
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response).await
    }

    /// `PATCH {base}/menus/reorder`
    pub async fn reorder_menus(&self, request: &ReorderRequest) -> Result<(), FetchError> {
        let url = format!("{}/menus/reorder", self.base_url);
        let response = self
            .client
            .patch(url)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

#[async_trait]
impl MenuApi for MenuClient {
    async fn menu_tree(&self, role: &str) -> Result<Vec<MenuNode>, FetchError> {
        self.get_menu_tree(role).await
    }

    async fn reorder(&self, request: &ReorderRequest) -> Result<(), FetchError> {
        self.reorder_menus(request).await
    }
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::decode(e.to_string())
    } else {
        FetchError::network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut text = response.text().await.unwrap_or_default();
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    let message = if text.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        text
    };
    Err(FetchError::status(status.as_u16(), message))
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FetchError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::decode(e.to_string()))
}

/// Flatten a tree into the placements a reorder request carries.
pub fn reorder_items(tree: &[MenuNode]) -> Vec<ReorderItem> {
    fn walk(nodes: &[MenuNode], parent_id: Option<i64>, out: &mut Vec<ReorderItem>) {
        for (order, node) in nodes.iter().enumerate() {
            out.push(ReorderItem {
                id: node.id,
                parent_id,
                order: order as i64,
            });
            walk(&node.children, Some(node.id), out);
        }
    }

    let mut out = Vec::new();
    walk(tree, None, &mut out);
    out
}
