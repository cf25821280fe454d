//! Resource probing - learns size and naming metadata before a transfer

use crate::error::RangepullError;
use rangepull_types::ResourceInfo;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Parse and validate a download URL
pub fn parse_url(url: &str) -> Result<Url, RangepullError> {
    let parsed = Url::parse(url).map_err(|_| RangepullError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(RangepullError::InvalidUrl(url.to_string())),
    }
}

/// Issue a HEAD request and collect what the server reports about `url`
pub async fn probe(client: &Client, url: &Url, timeout: Duration) -> Result<ResourceInfo, RangepullError> {
    info!("Probing URL: {}", url);

    let response = client
        .head(url.as_str())
        .timeout(timeout)
        .send()
        .await
        .map_err(RangepullError::from_request)?;

    let status = response.status();
    if !status.is_success() {
        return Err(RangepullError::ServerError {
            status: status.as_u16(),
            message: format!("probe of {} failed", url),
        });
    }

    let headers = response.headers();
    let size = declared_length(headers);
    debug!("Probe of {} reported size {:?}", url, size);

    let final_url = response.url();
    Ok(ResourceInfo {
        url: url.to_string(),
        final_url: (final_url != url).then(|| final_url.to_string()),
        filename: filename_from_headers(headers).unwrap_or_else(|| filename_from_url(final_url)),
        size,
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        accepts_ranges: headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false),
        error: None,
    })
}

/// Total size of `url`, or [`RangepullError::UnsupportedRange`] when the
/// server does not declare one
pub async fn probe_size(client: &Client, url: &Url, timeout: Duration) -> Result<u64, RangepullError> {
    let info = probe(client, url, timeout).await?;
    info.size.ok_or_else(|| {
        RangepullError::UnsupportedRange(format!("{} did not report a Content-Length", url))
    })
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split("filename=").nth(1))
        .map(|s| s.split(';').next().unwrap_or(s).trim().trim_matches('"'))
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name != "." && name != "..")
}

/// Last non-empty path segment, percent-decoded, or `download`
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rejects_non_http_urls() {
        assert!(parse_url("https://example.com/a.bin").is_ok());
        assert!(matches!(parse_url("ftp://example.com/a"), Err(RangepullError::InvalidUrl(_))));
        assert!(matches!(parse_url("not a url"), Err(RangepullError::InvalidUrl(_))));
    }

    #[test]
    fn filename_comes_from_last_segment() {
        let url = Url::parse("https://cdn.example.com/media/My%20Video.mp4?sig=abc").unwrap();
        assert_eq!(filename_from_url(&url), "My Video.mp4");

        let url = Url::parse("https://cdn.example.com/files/").unwrap();
        assert_eq!(filename_from_url(&url), "files");

        let url = Url::parse("https://cdn.example.com").unwrap();
        assert_eq!(filename_from_url(&url), "download");
    }

    #[test]
    fn content_disposition_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"report.pdf\"; size=10"),
        );
        assert_eq!(filename_from_headers(&headers).as_deref(), Some("report.pdf"));

        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"../../bin/tool.sh\""),
        );
        assert_eq!(filename_from_headers(&headers).as_deref(), Some("tool.sh"));
    }

    #[test]
    fn length_must_parse() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1000000"));
        assert_eq!(declared_length(&headers), Some(1_000_000));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_length(&headers), None);
    }
}
