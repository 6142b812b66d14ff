//! Line-protocol adapter for ZooKeeper `mntr`
//!
//! The reply is a list of `key<TAB>value` lines. Every line identifies itself,
//! so values are routed by key alone. Lines that are not exactly two
//! tab-separated fields, unknown keys, and non-numeric values (`zk_version`,
//! `zk_server_state`) are skipped.
//!
//! The query can be sent straight to the server socket ([`SocketQuery`]) or run
//! as an external shell command ([`CommandQuery`]), e.g.
//! `echo mntr | nc zk01 2181`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

use super::{extract_into, Bindings, IngestOutcome, Ingestor, RawPayload};
use crate::error::{Error, Result};
use crate::extract::{LineRecord, ParsedRecord};

/// Default ZooKeeper client port
pub const DEFAULT_PORT: u16 = 2181;

/// Four-letter word returning the monitoring statistics
pub const MNTR_COMMAND: &str = "mntr";

// ============================================================================
// Queries
// ============================================================================

/// A query producing line-protocol output
#[async_trait]
pub trait LineQuery: Send + Sync + fmt::Debug {
    /// Query description for logs and errors
    fn describe(&self) -> &str;

    /// Run the query once and return its raw output
    async fn run(&self) -> Result<RawPayload>;
}

/// Sends a four-letter word to the server and reads the reply until EOF
#[derive(Debug, Clone)]
pub struct SocketQuery {
    addr: String,
    timeout: Duration,
}

impl SocketQuery {
    /// `mntr` query against `host:port`
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            timeout,
        }
    }

    async fn exchange(&self) -> std::io::Result<Vec<u8>> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(MNTR_COMMAND.as_bytes()).await?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        Ok(reply)
    }
}

#[async_trait]
impl LineQuery for SocketQuery {
    fn describe(&self) -> &str {
        &self.addr
    }

    async fn run(&self) -> Result<RawPayload> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(Ok(reply)) => Ok(RawPayload::new(reply)),
            Ok(Err(e)) => Err(Error::fetch(&self.addr, e)),
            Err(_) => Err(Error::fetch(
                &self.addr,
                format!("no reply within {:?}", self.timeout),
            )),
        }
    }
}

/// Runs a shell command whose stdout is the line-protocol reply
///
/// Any output on stderr or a non-zero exit status fails the query.
#[derive(Debug, Clone)]
pub struct CommandQuery {
    command: String,
    timeout: Duration,
}

impl CommandQuery {
    /// Command executed through `/bin/sh -c`
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// The classic `echo mntr | nc <host> <port>` pipeline
    pub fn netcat(host: &str, port: u16, timeout: Duration) -> Self {
        Self::new(format!("echo {} | nc {} {}", MNTR_COMMAND, host, port), timeout)
    }
}

#[async_trait]
impl LineQuery for CommandQuery {
    fn describe(&self) -> &str {
        &self.command
    }

    async fn run(&self) -> Result<RawPayload> {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result.map_err(|e| Error::fetch(&self.command, e))?,
            Err(_) => {
                return Err(Error::fetch(
                    &self.command,
                    format!("did not finish within {:?}", self.timeout),
                ))
            }
        };

        if !output.stderr.is_empty() {
            return Err(Error::fetch(
                &self.command,
                format!(
                    "stderr: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        if !output.status.success() {
            return Err(Error::fetch(
                &self.command,
                format!("exited with {}", output.status),
            ));
        }
        Ok(RawPayload::new(output.stdout))
    }
}

// ============================================================================
// Ingestor
// ============================================================================

/// When the line query is re-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Sample once at startup and serve that sample forever
    Startup,
    /// Re-run the query on every scrape
    #[default]
    EveryScrape,
}

/// Ingestor for line-protocol sources
#[derive(Debug)]
pub struct MntrIngestor {
    query: Box<dyn LineQuery>,
    bindings: Bindings,
    policy: RefreshPolicy,
    sampled: AtomicBool,
}

impl MntrIngestor {
    /// Create an ingestor over the given query
    pub fn new(query: Box<dyn LineQuery>, bindings: Bindings, policy: RefreshPolicy) -> Self {
        Self {
            query,
            bindings,
            policy,
            sampled: AtomicBool::new(false),
        }
    }

    /// Turn a reply into updates
    pub fn ingest_text(&self, text: &str) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        for record in LineRecord::parse_all(text) {
            outcome.records_seen += 1;
            let Some(binding) = self.bindings.for_key(record.key) else {
                continue;
            };
            outcome.records_matched += 1;
            extract_into(
                &ParsedRecord::Line(record),
                std::slice::from_ref(binding),
                &mut outcome,
            );
        }
        outcome
    }
}

#[async_trait]
impl Ingestor for MntrIngestor {
    fn upstream(&self) -> &str {
        self.query.describe()
    }

    async fn ingest(&self) -> Result<IngestOutcome> {
        if self.policy == RefreshPolicy::Startup && self.sampled.load(Ordering::Acquire) {
            return Ok(IngestOutcome::default());
        }

        let payload = self.query.run().await?;
        let text = std::str::from_utf8(payload.as_bytes())
            .map_err(|e| Error::malformed(self.query.describe(), e))?;
        let outcome = self.ingest_text(text);

        self.sampled.store(true, Ordering::Release);
        Ok(outcome)
    }

    fn requires_startup_sample(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::DeploymentTarget;
    use crate::registry::MetricRegistry;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    const REPLY: &str = "zk_version\t3.4.6-1569965, built on 02/20/2014 09:09 GMT\n\
                         zk_avg_latency\t42\n\
                         garbage\n\
                         zk_watch_count\t7\n\
                         zk_server_state\tleader\n";

    #[derive(Debug)]
    struct FixedQuery {
        reply: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LineQuery for FixedQuery {
        fn describe(&self) -> &str {
            "fixed"
        }

        async fn run(&self) -> Result<RawPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawPayload::new(self.reply.as_bytes().to_vec()))
        }
    }

    fn zookeeper_ingestor(
        query: Box<dyn LineQuery>,
        policy: RefreshPolicy,
    ) -> (MetricRegistry, MntrIngestor) {
        let table = DeploymentTarget::ZooKeeper.mapping_table().unwrap();
        let mut registry = MetricRegistry::new();
        let bindings = Bindings::declare(&table, &mut registry, None).unwrap();
        (registry, MntrIngestor::new(query, bindings, policy))
    }

    fn fixed(reply: &'static str) -> (Box<dyn LineQuery>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = FixedQuery {
            reply,
            calls: calls.clone(),
        };
        (Box::new(query), calls)
    }

    #[test]
    fn test_ingest_text() {
        let (query, _) = fixed("");
        let (registry, ingestor) = zookeeper_ingestor(query, RefreshPolicy::EveryScrape);

        let outcome = ingestor.ingest_text("zk_avg_latency\t42\ngarbage\nzk_watch_count\t7\n");
        assert_eq!(outcome.records_seen, 2);
        assert_eq!(outcome.records_matched, 2);
        assert_eq!(outcome.fields_skipped, 0);

        registry.commit(&outcome.batch).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.get("zk_avg_latency"), Some(42.0));
        assert_eq!(snapshot.get("zk_watch_count"), Some(7.0));
        assert_eq!(snapshot.populated(), 2);
    }

    #[test]
    fn test_ingest_text_skips_unknown_and_unparseable() {
        let (query, _) = fixed("");
        let (_registry, ingestor) = zookeeper_ingestor(query, RefreshPolicy::EveryScrape);

        let outcome = ingestor.ingest_text("zk_server_state\tleader\nzk_znode_count\tmany\n");
        assert_eq!(outcome.records_seen, 2);
        assert_eq!(outcome.records_matched, 1);
        assert_eq!(outcome.fields_skipped, 1);
        assert!(outcome.batch.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_every_scrape() {
        let (query, calls) = fixed(REPLY);
        let (_registry, ingestor) = zookeeper_ingestor(query, RefreshPolicy::EveryScrape);

        ingestor.ingest().await.unwrap();
        let outcome = ingestor.ingest().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.batch.len(), 2);
        assert!(ingestor.requires_startup_sample());
    }

    #[tokio::test]
    async fn test_refresh_startup_only() {
        let (query, calls) = fixed(REPLY);
        let (_registry, ingestor) = zookeeper_ingestor(query, RefreshPolicy::Startup);

        let first = ingestor.ingest().await.unwrap();
        let second = ingestor.ingest().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.batch.len(), 2);
        assert!(second.batch.is_empty());
    }

    #[tokio::test]
    async fn test_socket_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut word = [0u8; 4];
            socket.read_exact(&mut word).await.unwrap();
            assert_eq!(&word, b"mntr");
            socket.write_all(REPLY.as_bytes()).await.unwrap();
        });

        let query = SocketQuery::new("127.0.0.1", port, Duration::from_secs(5));
        let (registry, ingestor) = zookeeper_ingestor(Box::new(query), RefreshPolicy::EveryScrape);
        let outcome = ingestor.ingest().await.unwrap();
        registry.commit(&outcome.batch).unwrap();

        assert_eq!(registry.snapshot().get("zk_avg_latency"), Some(42.0));
        assert_eq!(ingestor.upstream(), format!("127.0.0.1:{}", port));
    }

    #[tokio::test]
    async fn test_socket_query_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let query = SocketQuery::new("127.0.0.1", port, Duration::from_millis(200));
        assert!(matches!(query.run().await, Err(Error::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_command_query() {
        let query = CommandQuery::new(
            r"printf 'zk_avg_latency\t42\nzk_watch_count\t7\n'",
            Duration::from_secs(5),
        );
        let payload = query.run().await.unwrap();
        assert_eq!(
            payload.as_bytes(),
            b"zk_avg_latency\t42\nzk_watch_count\t7\n"
        );
    }

    #[tokio::test]
    async fn test_command_query_stderr_fails() {
        let query = CommandQuery::new("echo partial; echo oops >&2", Duration::from_secs(5));
        let err = query.run().await.unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[tokio::test]
    async fn test_command_query_exit_status_fails() {
        let query = CommandQuery::new("exit 3", Duration::from_secs(5));
        assert!(matches!(query.run().await, Err(Error::Fetch { .. })));
    }

    #[test]
    fn test_netcat_command() {
        let query = CommandQuery::netcat("zk01", DEFAULT_PORT, Duration::from_secs(1));
        assert_eq!(query.describe(), "echo mntr | nc zk01 2181");
    }
}
