//! PNCP (Portal Nacional de Contratações Públicas) client.
//!
//! Every request goes through one shared rate limiter, a per-request
//! timeout and the retry policy. Listing and detail calls hit the
//! consultation API; items and files live under the main API.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auction_extraction::{ArtifactRef, CandidateRecord, DetailLookup, LookupError, UpstreamDetail};
use chrono::{DateTime, NaiveDateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde_json::Value;

use super::{Download, ListingPage, UpstreamClient};
use crate::config::HarvestConfig;
use crate::error::{HarvestError, Result, UpstreamError};
use crate::retry::{with_retry, RetryPolicy};
use crate::types::HarvestWindow;

struct Fetched {
    status: u16,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

pub struct PncpClient {
    http: reqwest::Client,
    consulta_base: String,
    files_base: String,
    page_size: u32,
    retry: RetryPolicy,
    timeout: Duration,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl PncpClient {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            HarvestError::InvalidConfiguration("requests_per_second must be > 0".into())
        })?;
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("leilao-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarvestError::InvalidConfiguration(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            consulta_base: config.consulta_base_url.as_str().trim_end_matches('/').to_string(),
            files_base: config.files_base_url.as_str().trim_end_matches('/').to_string(),
            page_size: config.page_size,
            retry: config.retry,
            timeout: config.request_timeout,
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    async fn fetch(&self, url: &str, query: &[(&str, String)]) -> Result<Fetched> {
        let timeout = self.timeout;
        with_retry(&self.retry, url, move || async move {
            self.limiter.until_ready().await;

            let response = tokio::time::timeout(timeout, self.http.get(url).query(query).send())
                .await
                .map_err(|_| UpstreamError::Timeout(timeout))?
                .map_err(UpstreamError::Transport)?;

            let status = response.status();
            if status == StatusCode::NO_CONTENT {
                return Ok(Fetched {
                    status: status.as_u16(),
                    content_type: None,
                    bytes: Vec::new(),
                });
            }
            if !status.is_success() {
                return Err(UpstreamError::Status {
                    status: status.as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = tokio::time::timeout(timeout, response.bytes())
                .await
                .map_err(|_| UpstreamError::Timeout(timeout))?
                .map_err(UpstreamError::Transport)?;

            Ok(Fetched {
                status: status.as_u16(),
                content_type,
                bytes: bytes.to_vec(),
            })
        })
        .await
    }

    /// JSON body, or `None` for an empty (204) response.
    async fn fetch_json(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        let fetched = self.fetch(url, query).await?;
        if fetched.status == 204 || fetched.bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&fetched.bytes)
            .map(Some)
            .map_err(|e| HarvestError::decode(url, e.to_string()))
    }

    fn purchase_path(candidate: &CandidateRecord) -> Option<String> {
        candidate
            .detail_key()
            .map(|(cnpj, year, sequence)| format!("/v1/orgaos/{cnpj}/compras/{year}/{sequence}"))
    }

    /// Detail payload plus the item count from the items endpoint.
    pub async fn fetch_detail(&self, candidate: &CandidateRecord) -> Result<Option<UpstreamDetail>> {
        let Some(path) = Self::purchase_path(candidate) else {
            return Ok(None);
        };

        let detail_url = format!("{}{path}", self.consulta_base);
        let body = self.fetch_json(&detail_url, &[]).await?.unwrap_or(Value::Null);
        let mut detail = UpstreamDetail::from_json(detail_url, &body);

        let items_url = format!("{}{path}/itens", self.files_base);
        match self.fetch_json(&items_url, &[]).await {
            Ok(Some(Value::Array(items))) => {
                detail = detail.with_entry("quantidadeItens", items.len().to_string());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(record_id = %candidate.id, error = %e, "Item listing unavailable");
            }
        }

        Ok(Some(detail))
    }
}

#[async_trait]
impl UpstreamClient for PncpClient {
    async fn list_page(&self, modality: u32, window: &HarvestWindow, page: u32) -> Result<ListingPage> {
        let url = format!("{}/v1/contratacoes/publicacao", self.consulta_base);
        let query = [
            ("dataInicial", window.start.format("%Y%m%d").to_string()),
            ("dataFinal", window.end.format("%Y%m%d").to_string()),
            ("codigoModalidadeContratacao", modality.to_string()),
            ("pagina", page.to_string()),
            ("tamanhoPagina", self.page_size.to_string()),
        ];

        match self.fetch_json(&url, &query).await? {
            None => Ok(ListingPage::empty(page)),
            Some(body) => parse_listing(&body, page).map_err(|reason| HarvestError::decode(url, reason)),
        }
    }

    async fn list_artifacts(&self, candidate: &CandidateRecord) -> Result<Vec<ArtifactRef>> {
        let Some(path) = Self::purchase_path(candidate) else {
            tracing::debug!(record_id = %candidate.id, "No purchase key, skipping file listing");
            return Ok(Vec::new());
        };
        let url = format!("{}{path}/arquivos", self.files_base);
        Ok(self
            .fetch_json(&url, &[])
            .await?
            .map(|body| parse_artifacts(&body))
            .unwrap_or_default())
    }

    async fn download(&self, artifact: &ArtifactRef) -> Result<Download> {
        let fetched = self.fetch(&artifact.locator, &[]).await?;
        Ok(Download {
            bytes: fetched.bytes,
            content_type: fetched.content_type,
        })
    }
}

/// [`DetailLookup`] backed by the PNCP detail and item endpoints.
pub struct PncpDetailLookup {
    client: Arc<PncpClient>,
}

impl PncpDetailLookup {
    pub fn new(client: Arc<PncpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DetailLookup for PncpDetailLookup {
    async fn lookup(&self, candidate: &CandidateRecord) -> std::result::Result<UpstreamDetail, LookupError> {
        self.client
            .fetch_detail(candidate)
            .await
            .map_err(|e| LookupError::Upstream(Box::new(e)))?
            .ok_or_else(|| LookupError::MissingKey {
                record_id: candidate.id.clone(),
            })
    }
}

/// Parse a `/contratacoes/publicacao` response body.
pub fn parse_listing(body: &Value, requested_page: u32) -> std::result::Result<ListingPage, String> {
    let items = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| "listing response has no data array".to_string())?;

    let candidates = items
        .iter()
        .filter_map(|item| {
            let candidate = candidate_from_listing(item);
            if candidate.is_none() {
                let control_number = item.get("numeroControlePNCP").unwrap_or(&Value::Null);
                tracing::warn!(
                    item = %control_number,
                    "Skipping listing entry without id or publication date"
                );
            }
            candidate
        })
        .collect();

    Ok(ListingPage {
        candidates,
        page: body
            .get("numeroPagina")
            .and_then(Value::as_u64)
            .map(|p| p as u32)
            .unwrap_or(requested_page),
        total_pages: body.get("totalPaginas").and_then(Value::as_u64).unwrap_or(0) as u32,
    })
}

fn text<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Build a candidate from one listing entry; the entry itself becomes its
/// structured metadata.
pub fn candidate_from_listing(item: &Value) -> Option<CandidateRecord> {
    let id = text(item, &["numeroControlePNCP"])?;
    let published_at = text(item, &["dataPublicacaoPncp"])
        .or_else(|| text(item, &["dataInclusao"]))
        .and_then(parse_timestamp)?;

    let mut candidate = CandidateRecord::new(
        id,
        text(item, &["orgaoEntidade", "cnpj"]).unwrap_or_default(),
        text(item, &["objetoCompra"]).unwrap_or_default(),
        published_at,
    )
    .with_description(text(item, &["informacaoComplementar"]).unwrap_or_default())
    .with_organization_name(text(item, &["orgaoEntidade", "razaoSocial"]).unwrap_or_default());

    if let (Some(year), Some(sequence)) = (
        item.get("anoCompra").and_then(Value::as_i64),
        item.get("sequencialCompra").and_then(Value::as_i64),
    ) {
        candidate = candidate.with_purchase(year as i32, sequence);
    }

    candidate.jurisdiction.state = text(item, &["unidadeOrgao", "ufSigla"]).map(str::to_string);
    candidate.jurisdiction.municipality =
        text(item, &["unidadeOrgao", "municipioNome"]).map(str::to_string);
    candidate.source_system_link = text(item, &["linkSistemaOrigem"]).map(str::to_string);

    Some(candidate.with_listing_metadata(item.clone()))
}

/// Parse an `/arquivos` response into artifact references, skipping withdrawn files.
pub fn parse_artifacts(body: &Value) -> Vec<ArtifactRef> {
    body.as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|file| file.get("statusAtivo").and_then(Value::as_bool) != Some(false))
        .filter_map(|file| {
            let locator = text(file, &["url"]).or_else(|| text(file, &["uri"]))?;
            let mut artifact = ArtifactRef::new(locator);
            if let Some(name) = text(file, &["titulo"]).or_else(|| text(file, &["tipoDocumentoNome"])) {
                artifact = artifact.with_name(name);
            }
            Some(artifact)
        })
        .collect()
}
