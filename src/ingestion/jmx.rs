//! JSON-bean adapter for Hadoop JMX servlets
//!
//! Each cycle walks an explicit state machine:
//!
//! ```text
//!  Fetching ──ok──▶ Parsing ──ok──▶ Updating ──▶ Done
//!     │                │
//!     └──err──▶ Failed ◀──err
//! ```
//!
//! A failed cycle produces no updates at all, so the registry keeps showing
//! the last good snapshot.

use std::time::Duration;

use async_trait::async_trait;

use super::{extract_into, Bindings, IngestOutcome, Ingestor, RawPayload};
use crate::error::{Error, Result};
use crate::extract::{BeanDocument, ParsedRecord};

/// State of one JMX ingestion cycle
#[derive(Debug)]
pub enum CycleState {
    /// Requesting the document from the upstream
    Fetching,
    /// Decoding the fetched body
    Parsing(RawPayload),
    /// Extracting mapped fields from matching beans
    Updating(BeanDocument),
    /// Cycle finished with updates to commit
    Done(IngestOutcome),
    /// Cycle aborted; nothing is committed
    Failed(Error),
}

impl CycleState {
    /// State name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CycleState::Fetching => "fetching",
            CycleState::Parsing(_) => "parsing",
            CycleState::Updating(_) => "updating",
            CycleState::Done(_) => "done",
            CycleState::Failed(_) => "failed",
        }
    }
}

/// Ingestor reading `{"beans": [...]}` documents over HTTP
#[derive(Debug)]
pub struct JmxIngestor {
    client: reqwest::Client,
    url: String,
    bindings: Bindings,
}

impl JmxIngestor {
    /// Create an ingestor for `url`; every fetch is bounded by `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration, bindings: Bindings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            bindings,
        })
    }

    /// Run a cycle on an already fetched payload
    pub async fn ingest_payload(&self, payload: RawPayload) -> Result<IngestOutcome> {
        self.run(CycleState::Parsing(payload)).await
    }

    async fn run(&self, mut state: CycleState) -> Result<IngestOutcome> {
        loop {
            tracing::trace!(state = state.name(), upstream = %self.url, "JMX cycle step");
            state = match state {
                CycleState::Done(outcome) => return Ok(outcome),
                CycleState::Failed(e) => return Err(e),
                other => self.step(other).await,
            };
        }
    }

    async fn step(&self, state: CycleState) -> CycleState {
        match state {
            CycleState::Fetching => match self.fetch().await {
                Ok(payload) => CycleState::Parsing(payload),
                Err(e) => CycleState::Failed(e),
            },
            CycleState::Parsing(payload) => match BeanDocument::from_slice(payload.as_bytes()) {
                Ok(doc) => CycleState::Updating(doc),
                Err(e) => CycleState::Failed(Error::malformed(&self.url, e)),
            },
            CycleState::Updating(doc) => CycleState::Done(self.update(&doc)),
            terminal => terminal,
        }
    }

    async fn fetch(&self) -> Result<RawPayload> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::fetch(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(&self.url, format!("HTTP status {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(&self.url, e))?;
        Ok(RawPayload::new(body))
    }

    fn update(&self, doc: &BeanDocument) -> IngestOutcome {
        let mut outcome = IngestOutcome {
            records_seen: doc.beans.len(),
            ..Default::default()
        };
        for bean in &doc.beans {
            let record = ParsedRecord::Bean(bean);
            // nameless beans cannot be mapped
            let Some(identity) = record.identity() else {
                continue;
            };
            // most beans exposed by the servlet are not mapped
            let mut bindings = self.bindings.for_identity(Some(identity)).peekable();
            if bindings.peek().is_none() {
                continue;
            }
            outcome.records_matched += 1;
            extract_into(&record, bindings, &mut outcome);
        }
        outcome
    }
}

#[async_trait]
impl Ingestor for JmxIngestor {
    fn upstream(&self) -> &str {
        &self.url
    }

    async fn ingest(&self) -> Result<IngestOutcome> {
        self.run(CycleState::Fetching).await
    }
}
