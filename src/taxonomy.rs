use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TaxonomySettings;
use crate::domain::{GenomeId, GenomeNaming};
use crate::error::KiraError;
use crate::tables::QualityTable;

/// One entry of a GTDB taxon history; ranks carry their `x__` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonRecord {
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub d: String,
    #[serde(default)]
    pub p: String,
    #[serde(default)]
    pub c: String,
    #[serde(default)]
    pub o: String,
    #[serde(default)]
    pub f: String,
    #[serde(default)]
    pub g: String,
    #[serde(default)]
    pub s: String,
}

impl TaxonRecord {
    pub fn genus(&self) -> Option<String> {
        normalize_rank(&self.g, "g__")
    }

    pub fn species(&self) -> Option<String> {
        normalize_rank(&self.s, "s__")
    }
}

/// `s__Foo bar` -> `Foo bar`; a bare prefix or blank value is no call.
pub fn normalize_rank(raw: &str, prefix: &str) -> Option<String> {
    let value = raw.trim();
    let value = value.strip_prefix(prefix).unwrap_or(value).trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub trait TaxonomyClient: Send + Sync {
    fn taxon_history(&self, accession: &str) -> Result<Vec<TaxonRecord>, KiraError>;
}

#[derive(Clone)]
pub struct GtdbHttpClient {
    client: Client,
    base_url: String,
}

impl GtdbHttpClient {
    pub fn new(settings: &TaxonomySettings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-sp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::TaxonomyHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| KiraError::TaxonomyHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn history_url(&self, accession: &str) -> String {
        format!("{}/genome/{accession}/taxon-history", self.base_url)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::TaxonomyHttp(err.to_string()));
                }
            }
        }
    }
}

impl TaxonomyClient for GtdbHttpClient {
    fn taxon_history(&self, accession: &str) -> Result<Vec<TaxonRecord>, KiraError> {
        let url = self.history_url(accession);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GTDB request failed".to_string());
            return Err(KiraError::TaxonomyStatus { status, message });
        }
        response
            .json::<Vec<TaxonRecord>>()
            .map_err(|err| KiraError::TaxonomyHttp(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Latest taxon record per genome. Genomes without one are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonomyIndex {
    records: BTreeMap<GenomeId, TaxonRecord>,
}

impl TaxonomyIndex {
    pub fn insert(&mut self, genome: GenomeId, record: TaxonRecord) {
        self.records.insert(genome, record);
    }

    pub fn get(&self, genome: &GenomeId) -> Option<&TaxonRecord> {
        self.records.get(genome)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn read(path: &Path) -> Result<Self, KiraError> {
        let content = fs::read_to_string(path).map_err(|err| KiraError::InputRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|err| KiraError::InputParse {
            path: path.to_path_buf(),
            line: err.line(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxonomyGap {
    pub genome: GenomeId,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TaxonomySweep {
    pub classified: TaxonomyIndex,
    pub unclassified: Vec<(GenomeId, PathBuf)>,
    pub gaps: Vec<TaxonomyGap>,
}

/// Looks up every genome file's accession (via its isolate id in `quality`)
/// and keeps the first history entry. Every failure is a per-genome gap.
pub fn sweep<T: TaxonomyClient>(
    client: &T,
    genomes: &[(GenomeId, PathBuf)],
    quality: &QualityTable,
    naming: &GenomeNaming,
) -> TaxonomySweep {
    let mut classified = TaxonomyIndex::default();
    let mut unclassified = Vec::new();
    let mut gaps = Vec::new();

    for (genome, path) in genomes {
        let isolate = naming.isolate_id(genome);
        let lookup = match quality.get(isolate).and_then(|record| record.refseq_accession()) {
            Some(accession) => client
                .taxon_history(accession)
                .map(|history| history.into_iter().next())
                .map_err(|err| err.to_string()),
            None => Err(format!("no RefSeq accession for isolate {isolate}")),
        };

        match lookup {
            Ok(Some(record)) => {
                info!(genome = %genome, "taxonomy record obtained");
                classified.insert(genome.clone(), record);
            }
            Ok(None) => {
                warn!(genome = %genome, "no taxonomy information found");
                gaps.push(TaxonomyGap {
                    genome: genome.clone(),
                    reason: "empty taxon history".to_string(),
                });
                unclassified.push((genome.clone(), path.clone()));
            }
            Err(reason) => {
                warn!(genome = %genome, reason = %reason, "taxonomy lookup failed");
                gaps.push(TaxonomyGap {
                    genome: genome.clone(),
                    reason,
                });
                unclassified.push((genome.clone(), path.clone()));
            }
        }
    }

    TaxonomySweep {
        classified,
        unclassified,
        gaps,
    }
}
