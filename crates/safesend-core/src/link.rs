//! Shareable link format
//!
//! ```text
//! <origin>/download?fileKey=<locator>&serverSecret=<server secret>#<client secret>
//! ```
//!
//! The locator and server secret are percent-encoded query parameters. The
//! client secret lives in the fragment, which user agents never put on the
//! wire, so neither the broker nor the storage backend ever sees it. The
//! fragment is carried verbatim: it is restricted to URL-unreserved
//! characters and never percent-decoded.
//!
//! Every link already handed out depends on this shape staying stable.

use url::Url;

use crate::error::{SafesendError, SafesendResult};

/// Path of the download page links point at
pub const DOWNLOAD_PATH: &str = "/download";
/// Query parameter carrying the object locator
pub const LOCATOR_PARAM: &str = "fileKey";
/// Query parameter carrying the server secret
pub const SERVER_SECRET_PARAM: &str = "serverSecret";

/// The three values a link carries.
#[derive(Clone, PartialEq, Eq)]
pub struct LinkParts {
    pub locator: String,
    pub server_secret: String,
    pub client_secret: String,
}

impl std::fmt::Debug for LinkParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkParts")
            .field("locator", &self.locator)
            .field("server_secret", &"[REDACTED]")
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Build the shareable link for an uploaded object.
pub fn compose_link(
    locator: &str,
    server_secret: &str,
    client_secret: &str,
    base_origin: &str,
) -> SafesendResult<String> {
    if locator.is_empty() {
        return Err(SafesendError::validation("link locator is empty"));
    }
    if server_secret.is_empty() {
        return Err(SafesendError::validation("link server secret is empty"));
    }
    check_fragment(client_secret)?;

    let base = base_origin.trim_end_matches('/');
    let parsed = Url::parse(base)
        .map_err(|e| SafesendError::validation(format!("invalid base origin: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(SafesendError::validation(
            "base origin must be an http(s) origin",
        ));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(SafesendError::validation(
            "base origin must not carry a query or fragment",
        ));
    }

    Ok(format!(
        "{base}{DOWNLOAD_PATH}?{LOCATOR_PARAM}={}&{SERVER_SECRET_PARAM}={}#{client_secret}",
        urlencoding::encode(locator),
        urlencoding::encode(server_secret),
    ))
}

/// Split a shareable link back into its locator and two secrets.
pub fn parse_link(link: &str) -> SafesendResult<LinkParts> {
    let url = Url::parse(link.trim())
        .map_err(|e| SafesendError::validation(format!("link is not a valid URL: {e}")))?;

    if !url.path().ends_with(DOWNLOAD_PATH) {
        return Err(SafesendError::validation(format!(
            "link path must end with {DOWNLOAD_PATH}"
        )));
    }

    let mut locator = None;
    let mut server_secret = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            LOCATOR_PARAM if locator.is_none() => locator = Some(value.into_owned()),
            SERVER_SECRET_PARAM if server_secret.is_none() => {
                server_secret = Some(value.into_owned())
            }
            _ => {}
        }
    }

    let locator = locator
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SafesendError::validation("link is missing fileKey"))?;
    let server_secret = server_secret
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SafesendError::validation("link is missing serverSecret"))?;
    let client_secret = url
        .fragment()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SafesendError::validation("link is missing the #fragment secret"))?;
    check_fragment(client_secret)?;

    Ok(LinkParts {
        locator,
        server_secret,
        client_secret: client_secret.to_string(),
    })
}

fn check_fragment(value: &str) -> SafesendResult<()> {
    if value.is_empty() {
        return Err(SafesendError::validation("link client secret is empty"));
    }
    let unreserved = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~');
    if !value.chars().all(unreserved) {
        return Err(SafesendError::validation(
            "link client secret contains characters outside the URL-unreserved set",
        ));
    }
    Ok(())
}
