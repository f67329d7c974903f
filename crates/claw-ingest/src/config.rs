//! Agent configuration.
//!
//! Every setting is a command-line flag with an environment fallback. The
//! raw flags ([`IngestArgs`]) are validated once into an [`IngestConfig`]
//! that the rest of the agent treats as immutable.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{ArgAction, Args};
use claw_remote_write::LabelSet;
use reqwest::Url;

use crate::error::{IngestError, IngestResult};
use crate::retry::RetryPolicy;

/// Label attached to every series of a target unless overridden.
pub const JOB_LABEL: &str = "job";

/// Raw command-line flags shared by the `run` and `scrape` subcommands.
#[derive(Debug, Clone, Args)]
pub struct IngestArgs {
    /// Remote-write endpoint.
    #[arg(long, env = "MIMIR_REMOTE_WRITE_URL", default_value = "http://localhost:9009/api/v1/push")]
    pub remote_write_url: String,

    /// Tenant identifier sent as `X-Scope-OrgID`.
    #[arg(long, env = "TENANT_ID", default_value = "demo-tenant")]
    pub tenant_id: String,

    /// Scrape targets as `name=url` or a bare URL, comma-separated.
    #[arg(
        long = "target",
        env = "SCRAPE_TARGETS",
        value_delimiter = ',',
        default_value = "customer-app=http://localhost:9464/metrics"
    )]
    pub targets: Vec<String>,

    /// Labels added to every series as `name=value`, comma-separated.
    #[arg(long = "static-label", env = "STATIC_LABELS", value_delimiter = ',', default_value = "instance=local")]
    pub static_labels: Vec<String>,

    /// Milliseconds between scrape cycles.
    #[arg(long, env = "SCRAPE_INTERVAL_MS", default_value_t = 5000)]
    pub scrape_interval_ms: u64,

    /// Per-target scrape timeout in milliseconds.
    #[arg(long, env = "SCRAPE_TIMEOUT_MS", default_value_t = 5000)]
    pub scrape_timeout_ms: u64,

    /// Attach `tenant_id=<tenant>` to every series.
    #[arg(long, env = "ADD_TENANT_LABEL", default_value_t = true, action = ArgAction::Set)]
    pub add_tenant_label: bool,

    /// Retries after a failed push.
    #[arg(long, env = "PUSH_MAX_RETRIES", default_value_t = 3)]
    pub push_max_retries: u32,

    /// Retry pushes rejected with 429.
    #[arg(long, env = "PUSH_RETRY_ON_429", default_value_t = true, action = ArgAction::Set)]
    pub push_retry_on_429: bool,

    /// Base delay of the push backoff in milliseconds.
    #[arg(long, env = "PUSH_BASE_DELAY_MS", default_value_t = 100)]
    pub push_base_delay_ms: u64,

    /// Per-attempt push timeout in milliseconds.
    #[arg(long, env = "PUSH_TIMEOUT_MS", default_value_t = 5000)]
    pub push_timeout_ms: u64,

    /// Upper bound in milliseconds on one push including every retry and
    /// wait; defaults to the push timeout times the number of attempts.
    #[arg(long, env = "PUSH_TOTAL_BUDGET_MS")]
    pub push_total_budget_ms: Option<u64>,

    /// Listen address of the OTLP proxy; the proxy is disabled when unset.
    #[arg(long, env = "PROXY_LISTEN_ADDR")]
    pub proxy_listen: Option<SocketAddr>,

    /// Upstream OTLP metrics endpoint.
    #[arg(long, env = "MIMIR_OTLP_URL", default_value = "http://localhost:9009/otlp/v1/metrics")]
    pub otlp_upstream_url: String,

    /// Upstream timeout of the proxy in milliseconds.
    #[arg(long, env = "PROXY_TIMEOUT_MS", default_value_t = 2000)]
    pub proxy_timeout_ms: u64,

    /// Largest request body the proxy accepts, in bytes.
    #[arg(long, env = "PROXY_BODY_LIMIT_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub proxy_body_limit: usize,
}

/// One endpoint to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    /// Unique name, used as the default `job` label.
    pub name: String,
    /// Exposition endpoint.
    pub url: String,
    /// Labels attached to every series of this target.
    pub static_labels: LabelSet,
}

/// OTLP proxy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Upstream OTLP endpoint.
    pub upstream_url: String,
    /// Upstream timeout.
    pub timeout: Duration,
    /// Largest accepted request body.
    pub body_limit: usize,
}

/// Validated agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Remote-write endpoint.
    pub remote_write_url: String,
    /// Tenant identifier.
    pub tenant_id: String,
    /// Targets in scrape order.
    pub targets: Vec<ScrapeTarget>,
    /// Time between cycle starts.
    pub scrape_interval: Duration,
    /// Per-target scrape timeout.
    pub scrape_timeout: Duration,
    /// Whether every series gets a `tenant_id` label.
    pub add_tenant_label: bool,
    /// Retry policy of remote-write pushes.
    pub push_policy: RetryPolicy,
    /// OTLP proxy, when enabled.
    pub proxy: Option<ProxyConfig>,
}

impl IngestArgs {
    /// Validates the flags into a configuration.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Config` naming the first invalid setting.
    pub fn into_config(self) -> IngestResult<IngestConfig> {
        let tenant_id = self.tenant_id.trim().to_string();
        if tenant_id.is_empty() {
            return Err(IngestError::Config("tenant id must not be empty".to_string()));
        }

        validate_http_url("remote-write url", &self.remote_write_url)?;

        let scrape_interval = non_zero_millis("scrape interval", self.scrape_interval_ms)?;
        let scrape_timeout = non_zero_millis("scrape timeout", self.scrape_timeout_ms)?;
        let push_timeout = non_zero_millis("push timeout", self.push_timeout_ms)?;
        let push_budget = match self.push_total_budget_ms {
            Some(millis) => non_zero_millis("push total budget", millis)?,
            None => push_timeout.saturating_mul(self.push_max_retries.saturating_add(1)),
        };

        let shared = parse_labels(&self.static_labels)?;
        let targets = parse_targets(&self.targets, &shared)?;

        let push_policy = RetryPolicy::default()
            .with_max_retries(self.push_max_retries)
            .with_retry_on_429(self.push_retry_on_429)
            .with_base_delay(Duration::from_millis(self.push_base_delay_ms))
            .with_timeout(push_timeout)
            .with_total_budget(push_budget);

        let proxy = match self.proxy_listen {
            Some(listen_addr) => {
                validate_http_url("otlp upstream url", &self.otlp_upstream_url)?;
                if self.proxy_body_limit == 0 {
                    return Err(IngestError::Config("proxy body limit must be greater than zero".to_string()));
                }
                Some(ProxyConfig {
                    listen_addr,
                    upstream_url: self.otlp_upstream_url,
                    timeout: non_zero_millis("proxy timeout", self.proxy_timeout_ms)?,
                    body_limit: self.proxy_body_limit,
                })
            }
            None => None,
        };

        Ok(IngestConfig {
            remote_write_url: self.remote_write_url,
            tenant_id,
            targets,
            scrape_interval,
            scrape_timeout,
            add_tenant_label: self.add_tenant_label,
            push_policy,
            proxy,
        })
    }
}

fn non_zero_millis(what: &str, millis: u64) -> IngestResult<Duration> {
    if millis == 0 {
        return Err(IngestError::Config(format!("{what} must be greater than zero")));
    }
    Ok(Duration::from_millis(millis))
}

fn validate_http_url(what: &str, raw: &str) -> IngestResult<Url> {
    let url = Url::parse(raw).map_err(|e| IngestError::Config(format!("{what} '{raw}' is invalid: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(IngestError::Config(format!(
            "{what} '{raw}' must use http or https, not {other}"
        ))),
    }
}

/// Parses `name=value` entries; empty entries are skipped.
fn parse_labels(entries: &[String]) -> IngestResult<LabelSet> {
    let mut labels = LabelSet::new();
    for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let Some((name, value)) = entry.split_once('=') else {
            return Err(IngestError::Config(format!("static label '{entry}' must be name=value")));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(IngestError::Config(format!("static label '{entry}' has an empty name")));
        }
        labels.insert(name, value.trim());
    }
    Ok(labels)
}

fn parse_targets(entries: &[String], shared: &LabelSet) -> IngestResult<Vec<ScrapeTarget>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        let target = parse_target(entry, shared)?;
        if !seen.insert(target.name.clone()) {
            return Err(IngestError::Config(format!("duplicate target name '{}'", target.name)));
        }
        targets.push(target);
    }

    if targets.is_empty() {
        return Err(IngestError::Config("at least one scrape target is required".to_string()));
    }
    Ok(targets)
}

/// Parses `name=url` or a bare URL. A bare URL is named after its
/// `host:port`.
fn parse_target(entry: &str, shared: &LabelSet) -> IngestResult<ScrapeTarget> {
    let (name, raw_url) = match entry.split_once('=') {
        // `=` inside a query string is not a name separator.
        Some((name, url)) if !name.contains("://") => (Some(name.trim()), url.trim()),
        _ => (None, entry),
    };

    let url = validate_http_url("target url", raw_url)?;
    let name = match name {
        Some("") => return Err(IngestError::Config(format!("target '{entry}' has an empty name"))),
        Some(name) => name.to_string(),
        None => default_target_name(&url),
    };

    let mut static_labels = LabelSet::new().with(JOB_LABEL, name.as_str());
    static_labels.merge(shared);

    Ok(ScrapeTarget {
        name,
        url: raw_url.to_string(),
        static_labels,
    })
}

fn default_target_name(url: &Url) -> String {
    let host = url.host_str().unwrap_or("target");
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
