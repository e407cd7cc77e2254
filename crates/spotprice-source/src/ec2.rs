//! EC2 implementation of [`PriceSource`].
//!
//! Talks to the EC2 Query API (`DescribeRegions`,
//! `DescribeSpotPriceHistory`) over HTTPS with SigV4-signed GET requests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use spotprice_core::SourceConfig;

use crate::credentials::{Credentials, CredentialsProvider};
use crate::error::{SourceError, SourceResult};
use crate::sigv4::{self, CanonicalRequest};
use crate::source::{HistoryQuery, PricePage, PriceSource, RegionFilter};
use crate::xml;

const API_VERSION: &str = "2016-11-15";
const SERVICE: &str = "ec2";

/// EC2 client settings.
#[derive(Debug, Clone)]
pub struct Ec2Settings {
    pub bootstrap_region: String,
    pub endpoint_override: Option<String>,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub product_descriptions: Vec<String>,
    pub instance_types: Vec<String>,
}

impl From<&SourceConfig> for Ec2Settings {
    fn from(config: &SourceConfig) -> Self {
        Self {
            bootstrap_region: config.bootstrap_region.clone(),
            endpoint_override: config.endpoint_override.clone(),
            page_size: config.page_size,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            product_descriptions: config.product_descriptions.clone(),
            instance_types: config.instance_types.clone(),
        }
    }
}

/// Spot price source backed by the EC2 API.
pub struct Ec2Client {
    http: reqwest::Client,
    credentials: CredentialsProvider,
    settings: Ec2Settings,
    filter: RegionFilter,
}

impl Ec2Client {
    pub fn new(
        settings: Ec2Settings,
        credentials: impl Into<CredentialsProvider>,
        filter: RegionFilter,
    ) -> SourceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            credentials: credentials.into(),
            settings,
            filter,
        })
    }

    /// Build a client from config, resolving credentials through the AWS
    /// chain (environment, shared profile, container, instance role).
    pub fn from_config(config: &SourceConfig, filter: RegionFilter) -> SourceResult<Self> {
        Self::new(Ec2Settings::from(config), CredentialsProvider::from_env()?, filter)
    }

    fn endpoint(&self, region: &str) -> String {
        match &self.settings.endpoint_override {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://ec2.{region}.amazonaws.com"),
        }
    }

    /// Send one signed GET and return the body of a 2xx response.
    async fn call(
        &self,
        region: &str,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> SourceResult<String> {
        params.push(("Action".to_string(), action.to_string()));
        params.push(("Version".to_string(), API_VERSION.to_string()));

        let base = self.endpoint(region);
        let url = reqwest::Url::parse(&format!("{base}/"))
            .map_err(|e| SourceError::Config(format!("endpoint {base}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(SourceError::Config(format!("endpoint {base} has no host"))),
        };

        let credentials: Credentials = self.credentials.credentials().await?;
        let now = Utc::now();
        let amz_date = sigv4::amz_date(now);
        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        let authorization = sigv4::authorization(
            &credentials,
            &CanonicalRequest {
                method: "GET",
                path: "/",
                query: &params,
                headers: &headers,
                payload: b"",
            },
            region,
            SERVICE,
            now,
        )?;

        let request_url = format!("{base}/?{}", sigv4::canonical_query(&params));
        let mut request = self
            .http
            .get(&request_url)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization);
        if let Some(token) = &credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("{action} in {region}: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("{action} in {region}: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(xml::classify_error(status.as_u16(), &body))
        }
    }
}

/// EC2 wants `2024-01-01T00:00:00.000Z`.
fn format_time(ts: i64) -> SourceResult<String> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S.000Z").to_string())
        .ok_or_else(|| SourceError::Config(format!("timestamp {ts} out of range")))
}

#[async_trait]
impl PriceSource for Ec2Client {
    async fn list_regions(&self) -> SourceResult<Vec<String>> {
        let body = self
            .call(&self.settings.bootstrap_region, "DescribeRegions", Vec::new())
            .await?;
        let all = xml::parse_regions(&body)?;
        let total = all.len();
        let regions = self.filter.apply(all);
        debug!(total, kept = regions.len(), "regions listed");
        Ok(regions)
    }

    async fn fetch_price_history(&self, query: &HistoryQuery) -> SourceResult<PricePage> {
        let mut params = vec![
            ("StartTime".to_string(), format_time(query.start_time)?),
            ("MaxResults".to_string(), self.settings.page_size.to_string()),
        ];
        if let Some(end) = query.end_time {
            params.push(("EndTime".to_string(), format_time(end)?));
        }
        if let Some(token) = &query.next_token {
            params.push(("NextToken".to_string(), token.clone()));
        }
        for (i, product) in self.settings.product_descriptions.iter().enumerate() {
            params.push((format!("ProductDescription.{}", i + 1), product.clone()));
        }
        for (i, itype) in self.settings.instance_types.iter().enumerate() {
            params.push((format!("InstanceType.{}", i + 1), itype.clone()));
        }

        let body = self
            .call(&query.region, "DescribeSpotPriceHistory", params)
            .await?;
        let page = xml::parse_price_page(&body)?;
        debug!(
            region = %query.region,
            records = page.records.len(),
            more = page.next_token.is_some(),
            "price history page fetched"
        );
        Ok(page)
    }
}
