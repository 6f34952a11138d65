//! Fetching content documents and their external scripts.

use std::collections::HashMap;
use std::fs;

use thiserror::Error;
use url::Url;

pub const ABOUT_BLANK: &str = "about:blank";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("content server answered with status {0}")]
    Status(u16),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("no content registered for {0}")]
    NotFound(String),
    #[error("invalid content URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Synchronous source of documents and scripts for execution contexts.
pub trait ContentLoader {
    fn load(&self, url: &Url) -> Result<String, ContentError>;
}

/// Loads `http`, `https` and `file` URLs.
pub struct NetworkContentLoader {
    client: reqwest::blocking::Client,
}

impl NetworkContentLoader {
    pub fn new() -> Result<Self, ContentError> {
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
        })
    }
}

impl ContentLoader for NetworkContentLoader {
    fn load(&self, url: &Url) -> Result<String, ContentError> {
        match url.scheme() {
            "http" | "https" => {
                let response = self.client.get(url.clone()).send()?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ContentError::Status(status.as_u16()));
                }
                Ok(response.text()?)
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| ContentError::NotFound(url.to_string()))?;
                Ok(fs::read_to_string(path)?)
            }
            other => Err(ContentError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// In-memory documents keyed by absolute URL.
#[derive(Debug, Default, Clone)]
pub struct StaticContentLoader {
    pages: HashMap<String, String>,
}

impl StaticContentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, contents: &str) -> Self {
        self.insert(url, contents);
        self
    }

    pub fn insert(&mut self, url: &str, contents: &str) {
        self.pages.insert(url.to_string(), contents.to_string());
    }
}

impl ContentLoader for StaticContentLoader {
    fn load(&self, url: &Url) -> Result<String, ContentError> {
        self.pages
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| ContentError::NotFound(url.to_string()))
    }
}

/// Resolve `reference` against `base`. Absolute references ignore the base.
pub fn resolve_url(reference: &str, base: Option<&Url>) -> Result<Url, ContentError> {
    let reference = reference.trim();
    match Url::parse(reference) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(reference).map_err(|source| ContentError::InvalidUrl {
                url: reference.to_string(),
                source,
            }),
            None => Err(ContentError::InvalidUrl {
                url: reference.to_string(),
                source: url::ParseError::RelativeUrlWithoutBase,
            }),
        },
        Err(source) => Err(ContentError::InvalidUrl {
            url: reference.to_string(),
            source,
        }),
    }
}

/// Frames with no source (or `about:blank`) stay empty.
pub fn is_blank(reference: &str) -> bool {
    let trimmed = reference.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ABOUT_BLANK)
}
