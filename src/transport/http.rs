//! The HTTP handshake fallback (spec §4, §9: "HTTP path is handshake-only").
//! A Bayeux server that only speaks long-polling still needs a `/meta/handshake`
//! exchanged somehow before the client gives up on it; this crate only ever
//! uses HTTP for that one request, never for the connect/subscribe cycle.

use reqwest::Client;
use url::Url;

use crate::error::BayeuxError;

/// Derives the HTTP-scheme sibling of a `ws`/`wss` URL (spec §6: "same
/// host/path, `http`/`https`"), since `reqwest` rejects non-`http(s)`
/// schemes outright. A URL that is already `http`/`https` is returned
/// unchanged.
pub fn http_sibling(url: &Url) -> Result<Url, BayeuxError> {
    let mut sibling = url.clone();
    let target = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        "http" | "https" => return Ok(sibling),
        other => {
            return Err(BayeuxError::MalformedObjectData(format!(
                "cannot derive an HTTP handshake URL for scheme {other:?}"
            )))
        }
    };
    sibling
        .set_scheme(target)
        .map_err(|_| BayeuxError::MalformedObjectData(format!("could not rewrite {url} to {target}")))?;
    Ok(sibling)
}

/// Posts a single-element batch containing `body` (already-encoded via
/// [`crate::message::Message::to_http_body`]) to `url` and returns the raw
/// response text, which the caller decodes with
/// [`crate::message::decode_batch`].
pub async fn post_handshake(client: &Client, url: &Url, body: String) -> Result<String, BayeuxError> {
    let response = client
        .post(url.clone())
        .header("Content-Type", "application/json;charset=UTF-8")
        .body(body)
        .send()
        .await
        .map_err(|e| BayeuxError::SocketClosed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BayeuxError::HttpUnexpectedStatusCode(status.as_u16()));
    }

    response.text().await.map_err(|e| BayeuxError::SocketClosed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_left_untouched_by_the_handshake_path() {
        let url = Url::parse("https://example.com/bayeux").unwrap();
        assert_eq!(url.path(), "/bayeux");
    }

    #[test]
    fn ws_and_wss_get_their_http_sibling() {
        let ws = Url::parse("ws://example.com/cometd").unwrap();
        assert_eq!(http_sibling(&ws).unwrap().as_str(), "http://example.com/cometd");

        let wss = Url::parse("wss://example.com:8443/cometd").unwrap();
        assert_eq!(http_sibling(&wss).unwrap().as_str(), "https://example.com:8443/cometd");
    }

    #[test]
    fn an_already_http_url_is_returned_unchanged() {
        let url = Url::parse("https://example.com/bayeux").unwrap();
        assert_eq!(http_sibling(&url).unwrap(), url);
    }
}
