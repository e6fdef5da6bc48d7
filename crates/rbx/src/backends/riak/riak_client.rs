use std::collections::btree_map::Entry;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, trace};

use super::RiakKeyStream;
use crate::app_config::RiakConfig;
use crate::backends::BucketStore;
use crate::common::{FetchedObject, HeaderValue, Headers, WriteMeta};

/// 📡 The HTTP side of a Riak node — one `reqwest::Client`, shared by every worker.
///
/// Cloning is cheap: the inner client is an `Arc` wearing a trench coat.
/// No retries live here. A failed request is reported with its status and URL,
/// and whoever called us decides if that's a shrug or a stop.
#[derive(Debug, Clone)]
pub(crate) struct RiakClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RiakClient {
    /// 🚀 Build the client. No ping, no handshake. Riak finds out we exist on the first GET.
    pub(crate) fn new(config: &RiakConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        // ⏱️ no timeout unless asked for. A hung request costs one worker, not the run.
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. The architect shrugged.")?;

        let base_url = Url::parse(&config.base_url()).with_context(|| {
            format!(
                "💀 '{}' is not a URL we can talk to. Check the host and port.",
                config.base_url()
            )
        })?;

        Ok(Self { client, base_url })
    }

    /// 🔗 `{base}/{segments...}` with every segment percent-encoded.
    /// A key named `a/b c` stays one key, not a directory tour.
    fn url_for(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("💀 '{}' cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// 🚰 Open the streaming key listing for a bucket.
    ///
    /// The response is handed to [`RiakKeyStream`] unread. Only the status is checked
    /// here, so a refused listing fails before a single key is promised.
    pub(crate) async fn stream_keys(&self, bucket: &str) -> Result<RiakKeyStream> {
        let mut url = self.url_for(&["buckets", bucket, "keys"])?;
        url.query_pairs_mut().append_pair("keys", "stream");

        debug!("📡 opening key stream at {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("💀 failed to fetch keys: GET {url} never came back"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("💀 failed to fetch keys: GET {} answered {} ({})", url, status, body);
        }

        Ok(RiakKeyStream::new(response, url))
    }
}

#[async_trait]
impl BucketStore for RiakClient {
    /// 📡 `GET /riak/{bucket}/{key}`. Only a 200 counts. Siblings (300), ghosts (404)
    /// and tantrums (5xx) all come back as errors naming the status and URL.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        let url = self.url_for(&["riak", bucket, key])?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("💀 GET {url} never came back"))?;

        let status = response.status();
        if status != StatusCode::OK {
            anyhow::bail!("💀 GET {} answered {}", url, status);
        }

        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .with_context(|| format!("💀 GET {url} said 200 and then dropped the body"))?
            .to_vec();

        trace!("📦 {} bytes fetched from {}", body.len(), url);
        Ok(FetchedObject { headers, body })
    }

    /// 📥 `PUT /riak/{bucket}/{key}?returnbody=false`.
    ///
    /// Body and content type come from [`WriteMeta::encode_body`]. Indexes, user metadata
    /// and the vclock ride along as `x-riak-*` headers.
    async fn save(&self, bucket: &str, key: &str, data: &Value, meta: &WriteMeta) -> Result<()> {
        let mut url = self.url_for(&["riak", bucket, key])?;
        url.query_pairs_mut().append_pair("returnbody", "false");

        let (body, content_type) = meta.encode_body(data)?;

        let mut request = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(body);
        for (name, value) in meta.headers() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("💀 PUT {url} never came back"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("💀 PUT {} answered {} ({})", url, status, body);
        }
        Ok(())
    }
}

/// 📇 Flatten a `HeaderMap` into record headers. Repeats become lists, in arrival order.
/// Non-UTF-8 header bytes are decoded lossily rather than dropping the whole record.
fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match headers.entry(name.as_str().to_string()) {
            Entry::Occupied(mut existing) => existing.get_mut().push(value),
            Entry::Vacant(slot) => {
                slot.insert(HeaderValue::Single(value));
            }
        }
    }
    headers
}
