//! HTTP retrieval of track payloads

use crate::config::HttpSettings;
use crate::error::Result;
use gapless_playback::LoadError;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};

/// Complete payload of one track
#[derive(Debug)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// Final URL after redirects
    pub url: String,
    pub content_type: Option<String>,
}

impl Fetched {
    /// Container hint for the decoder
    pub fn extension(&self) -> Option<String> {
        extension_hint(&self.url, self.content_type.as_deref())
    }
}

/// Build the shared HTTP client
pub fn build_client(settings: &HttpSettings) -> Result<Client> {
    let client = Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(std::time::Duration::from_secs(settings.timeout_secs))
        .build()?;
    Ok(client)
}

/// Follow redirects with a HEAD request
///
/// Falls back to the original URL when the HEAD request fails or is refused.
pub async fn resolve_url(client: &Client, url: &str) -> String {
    match client.head(url).send().await {
        Ok(response) if response.status().is_success() => {
            let resolved = response.url().to_string();
            if resolved != url {
                tracing::debug!(url = %url, resolved = %resolved, "Resolved redirect");
            }
            resolved
        }
        Ok(response) => {
            tracing::debug!(url = %url, status = %response.status(), "HEAD refused, using original URL");
            url.to_string()
        }
        Err(e) => {
            tracing::debug!(url = %url, "HEAD failed, using original URL: {}", e);
            url.to_string()
        }
    }
}

/// Send a GET request, turning non-2xx answers into [`LoadError::Status`]
pub async fn get(client: &Client, url: &str) -> std::result::Result<Response, LoadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LoadError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoadError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response)
}

/// Fetch the whole payload of `url`
pub async fn fetch_bytes(
    client: &Client,
    url: &str,
    resolve_redirects: bool,
) -> std::result::Result<Fetched, LoadError> {
    let target = if resolve_redirects {
        resolve_url(client, url).await
    } else {
        url.to_string()
    };

    let response = get(client, &target).await?;
    let final_url = response.url().to_string();
    let content_type = content_type(&response);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| LoadError::Network(e.to_string()))?;

    tracing::debug!(url = %final_url, bytes = bytes.len(), "Fetched track payload");

    Ok(Fetched {
        bytes: bytes.to_vec(),
        url: final_url,
        content_type,
    })
}

pub(crate) fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
}

/// File extension symphonia should try first
///
/// The content type wins; otherwise the last path segment of the URL.
pub fn extension_hint(url: &str, content_type: Option<&str>) -> Option<String> {
    let from_mime = content_type.and_then(|mime| match mime {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" | "application/ogg" | "audio/vorbis" | "audio/opus" => Some("ogg"),
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Some("wav"),
        "audio/aac" => Some("aac"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    });
    if let Some(ext) = from_mime {
        return Some(ext.to_string());
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5).then(|| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_wins_over_url() {
        assert_eq!(
            extension_hint("https://cdn.example.com/a.bin", Some("audio/flac")),
            Some("flac".to_string())
        );
    }

    #[test]
    fn url_extension_ignores_query() {
        assert_eq!(
            extension_hint("https://cdn.example.com/music/Track.MP3?token=abc.def", None),
            Some("mp3".to_string())
        );
        assert_eq!(extension_hint("https://cdn.example.com/stream", None), None);
        assert_eq!(
            extension_hint("https://cdn.example.com/stream", Some("application/octet-stream")),
            None
        );
    }
}
