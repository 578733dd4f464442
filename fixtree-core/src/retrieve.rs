use crate::error::FetchError;
use crate::path_safety::check_relative;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

pub type Content = Box<dyn Read>;

/// Source of authoritative file content, keyed by manifest-relative path.
///
/// An unknown or unavailable path must be an error, never an empty stream.
pub trait Retriever: Sync {
    fn fetch(&self, rel: &str) -> Result<Content, FetchError>;
}

impl<F> Retriever for F
where
    F: Fn(&str) -> Result<Content, FetchError> + Sync,
{
    fn fetch(&self, rel: &str) -> Result<Content, FetchError> {
        self(rel)
    }
}

/// Serves files from a local directory, e.g. a mirror or a staged release.
#[derive(Clone, Debug)]
pub struct DirRetriever {
    base: PathBuf,
}

impl DirRetriever {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Retriever for DirRetriever {
    fn fetch(&self, rel: &str) -> Result<Content, FetchError> {
        check_relative(rel)?;
        let path = self.base.join(rel);
        let io_err = |source: io::Error| FetchError::Io { path: path.display().to_string(), source };
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(io_err(e)),
        };
        if !f.metadata().map_err(io_err)?.is_file() {
            return Err(FetchError::NotFound(path.display().to_string()));
        }
        tracing::debug!("open {}", path.display());
        Ok(Box::new(BufReader::new(f)))
    }
}

/// Bytes escaped inside one path segment. `/` is left alone because names
/// are split on it first; non-ASCII is always escaped.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// `GET <base_url>/<rel>`. Anything but a successful response is an error.
pub struct HttpRetriever {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { base_url: base_url.into(), agent }
    }

    /// Each `/`-separated segment of `rel` is percent-encoded, so `#`, `?`
    /// and spaces stay part of the requested path.
    pub fn url(&self, rel: &str) -> String {
        let path: Vec<String> =
            rel.trim_start_matches('/').split('/').map(|seg| utf8_percent_encode(seg, SEGMENT).to_string()).collect();
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.join("/"))
    }
}

impl Retriever for HttpRetriever {
    fn fetch(&self, rel: &str) -> Result<Content, FetchError> {
        check_relative(rel)?;
        let url = self.url(rel);
        tracing::debug!("GET {url}");
        let resp = match self.agent.get(&url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => return Err(FetchError::NotFound(url)),
            Err(ureq::Error::StatusCode(code)) => {
                return Err(FetchError::Http(format!("HTTP {code} for {url}")))
            }
            Err(e) => return Err(FetchError::Http(e.to_string())),
        };
        Ok(Box::new(resp.into_body().into_reader()))
    }
}

/// `http://` / `https://` sources go over the network, anything else is a
/// local directory.
pub fn from_source(source: &str) -> Box<dyn Retriever> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Box::new(HttpRetriever::new(source))
    } else {
        Box::new(DirRetriever::new(source))
    }
}
