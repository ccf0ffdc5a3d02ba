use super::RemoteStore;
use crate::errors::{ArtifactError, Result};
use crate::paths::key_to_relative;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::HeaderMap;
use std::time::Duration;
use url::Url;

const VERSION_HEADER: &str = "x-amz-version-id";
/// Marks a token taken from the `ETag` of an unversioned bucket.
const ETAG_PREFIX: &str = "etag:";

/// S3-compatible object store reached over plain HTTP(S).
///
/// `HEAD` reports the object version through `x-amz-version-id`. Unversioned
/// buckets have no such header, so the `ETag` is returned instead as
/// `etag:<value>`. Fetching a real version passes `versionId`; fetching an
/// `etag:` token is a plain `GET` guarded by `If-Match`, and answers
/// [`ArtifactError::Transport`] when the object changed in between.
///
/// This is synchronous (uses `reqwest::blocking`); the client timeout bounds
/// every request.
pub struct HttpStore {
    base_url: Url,
    client: Client,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base)
            .map_err(|e| ArtifactError::transport(format!("invalid store url {base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArtifactError::transport(format!("failed to build http client: {e}")))?;

        Ok(Self { base_url, client })
    }

    fn object_url(&self, path: &str) -> Result<Url> {
        // Validates the key the same way the local cache does.
        let relative = key_to_relative(path)?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        self.base_url
            .join(&relative)
            .map_err(|e| ArtifactError::InvalidPath(format!("{path}: {e}")))
    }

    fn check_status(response: Response, path: &str, version: Option<&str>) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ArtifactError::not_found(path, version));
        }
        if !status.is_success() {
            return Err(ArtifactError::transport(format!(
                "{path}: store answered {status}"
            )));
        }
        Ok(response)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

fn transport(path: &str, err: reqwest::Error) -> ArtifactError {
    if err.is_timeout() {
        ArtifactError::transport(format!("{path}: request timed out"))
    } else {
        ArtifactError::transport(format!("{path}: {err}"))
    }
}

impl RemoteStore for HttpStore {
    fn head(&self, path: &str) -> Result<String> {
        let url = self.object_url(path)?;
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| transport(path, e))?;
        let response = Self::check_status(response, path, None)?;

        let headers = response.headers();
        if let Some(version) = header_value(headers, VERSION_HEADER)
            && version != "null"
        {
            return Ok(version.to_string());
        }
        header_value(headers, reqwest::header::ETAG.as_str())
            .map(|etag| format!("{ETAG_PREFIX}{etag}"))
            .ok_or_else(|| ArtifactError::transport(format!("{path}: no version header")))
    }

    fn fetch(&self, path: &str, version: Option<&str>) -> Result<Vec<u8>> {
        let mut url = self.object_url(path)?;
        let etag = version.and_then(|v| v.strip_prefix(ETAG_PREFIX));
        if let Some(version) = version
            && etag.is_none()
        {
            url.query_pairs_mut().append_pair("versionId", version);
        }

        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_MATCH, format!("\"{etag}\""));
        }

        let response = request.send().map_err(|e| transport(path, e))?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Err(ArtifactError::transport(format!(
                "{path}: object changed since {}",
                version.unwrap_or_default()
            )));
        }
        let response = Self::check_status(response, path, version)?;

        let bytes = response.bytes().map_err(|e| transport(path, e))?;
        Ok(bytes.to_vec())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let url = self.object_url(path)?;
        let response = self
            .client
            .delete(url)
            .send()
            .map_err(|e| transport(path, e))?;
        Self::check_status(response, path, None).map(|_| ())
    }
}
