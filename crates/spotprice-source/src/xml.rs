//! EC2 Query API response documents.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;

use spotprice_state::SpotPriceRecord;

use crate::error::{SourceError, SourceResult};
use crate::source::PricePage;

/// EC2 wraps every list in `<xxxSet><item>…</item></xxxSet>`.
#[derive(Debug, Deserialize)]
struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRegionsResponse {
    #[serde(default)]
    region_info: ItemSet<RegionItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionItem {
    region_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeSpotPriceHistoryResponse {
    #[serde(default)]
    spot_price_history_set: ItemSet<SpotPriceItem>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotPriceItem {
    instance_type: String,
    product_description: String,
    spot_price: String,
    timestamp: String,
    availability_zone: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "Errors")]
    errors: ErrorList,
}

#[derive(Debug, Deserialize)]
struct ErrorList {
    #[serde(rename = "Error", default)]
    error: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn invalid(what: &str, e: impl std::fmt::Display) -> SourceError {
    SourceError::InvalidResponse(format!("{what}: {e}"))
}

pub(crate) fn parse_regions(body: &str) -> SourceResult<Vec<String>> {
    let doc: DescribeRegionsResponse =
        quick_xml::de::from_str(body).map_err(|e| invalid("DescribeRegions", e))?;
    Ok(doc
        .region_info
        .items
        .into_iter()
        .map(|r| r.region_name)
        .collect())
}

pub(crate) fn parse_price_page(body: &str) -> SourceResult<PricePage> {
    let doc: DescribeSpotPriceHistoryResponse =
        quick_xml::de::from_str(body).map_err(|e| invalid("DescribeSpotPriceHistory", e))?;
    let records = doc
        .spot_price_history_set
        .items
        .into_iter()
        .map(SpotPriceItem::into_record)
        .collect::<SourceResult<Vec<_>>>()?;
    let next_token = doc
        .next_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    Ok(PricePage {
        records,
        next_token,
    })
}

impl SpotPriceItem {
    fn into_record(self) -> SourceResult<SpotPriceRecord> {
        let price = Decimal::from_str_exact(self.spot_price.trim())
            .map_err(|e| invalid(&format!("spot price {:?}", self.spot_price), e))?;
        let timestamp = DateTime::parse_from_rfc3339(self.timestamp.trim())
            .map_err(|e| invalid(&format!("timestamp {:?}", self.timestamp), e))?
            .timestamp();
        Ok(SpotPriceRecord {
            product_description: self.product_description,
            instance_type: self.instance_type,
            availability_zone: self.availability_zone,
            timestamp,
            price,
        })
    }
}

const RATE_LIMIT_CODES: &[&str] = &["RequestLimitExceeded", "Throttling", "ThrottlingException"];

const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "OptInRequired",
    "Blocked",
];

/// Map a non-2xx response to the error taxonomy, preferring the error code
/// in the body over the HTTP status.
pub(crate) fn classify_error(status: u16, body: &str) -> SourceError {
    let parsed = quick_xml::de::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|doc| doc.errors.error.into_iter().next());

    if let Some(err) = parsed {
        let detail = format!("{} (HTTP {status}): {}", err.code, err.message);
        let code = err.code.as_str();
        return if RATE_LIMIT_CODES.contains(&code) {
            SourceError::RateLimited(detail)
        } else if AUTH_CODES.contains(&code) {
            SourceError::Auth(detail)
        } else if status >= 500 {
            SourceError::Unavailable(detail)
        } else {
            SourceError::InvalidResponse(detail)
        };
    }

    let detail = format!("HTTP {status}");
    match status {
        429 | 503 => SourceError::RateLimited(detail),
        401 | 403 => SourceError::Auth(detail),
        s if s >= 500 => SourceError::Unavailable(detail),
        _ => SourceError::InvalidResponse(detail),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub fn regions(names: &[&str]) -> String {
        let items: String = names
            .iter()
            .map(|n| {
                format!(
                    "<item><regionName>{n}</regionName>\
                     <regionEndpoint>ec2.{n}.amazonaws.com</regionEndpoint>\
                     <optInStatus>opt-in-not-required</optInStatus></item>"
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <DescribeRegionsResponse xmlns=\"http://ec2.amazonaws.com/doc/2016-11-15/\">\
             <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>\
             <regionInfo>{items}</regionInfo></DescribeRegionsResponse>"
        )
    }

    /// `(zone, instance_type, timestamp, price)` rows.
    pub fn price_page(rows: &[(&str, &str, &str, &str)], next_token: Option<&str>) -> String {
        let items: String = rows
            .iter()
            .map(|(zone, itype, ts, price)| {
                format!(
                    "<item><instanceType>{itype}</instanceType>\
                     <productDescription>Linux/UNIX</productDescription>\
                     <spotPrice>{price}</spotPrice><timestamp>{ts}</timestamp>\
                     <availabilityZone>{zone}</availabilityZone></item>"
                )
            })
            .collect();
        let token = match next_token {
            Some(t) => format!("<nextToken>{t}</nextToken>"),
            None => String::new(),
        };
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <DescribeSpotPriceHistoryResponse xmlns=\"http://ec2.amazonaws.com/doc/2016-11-15/\">\
             <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>\
             <spotPriceHistorySet>{items}</spotPriceHistorySet>{token}\
             </DescribeSpotPriceHistoryResponse>"
        )
    }

    pub fn error(code: &str, message: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Response><Errors><Error><Code>{code}</Code><Message>{message}</Message></Error>\
             </Errors><RequestID>ea966190-f9aa-478e-9ede-example</RequestID></Response>"
        )
    }
}
