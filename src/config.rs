//! Server configuration.
//!
//! Loaded once at startup from YAML and read-only afterwards. Directives
//! set on a server act as defaults for each of its locations.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::http::parser::ParseLimits;
use crate::http::request::Method;
use crate::http::response::StatusCode;

/// Environment variable consulted when no path is given on the command line.
pub const CONFIG_ENV: &str = "WEBSERV_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_clients: usize,
    /// Idle seconds before a connection is closed.
    pub keep_alive_timeout: u64,
    pub cgi_timeout_ms: u64,
    pub max_uri_length: usize,
    pub log_level: String,
    pub servers: Vec<ServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_clients: 100,
            keep_alive_timeout: 5,
            cgi_timeout_ms: 1000,
            max_uri_length: 512,
            log_level: "info".to_string(),
            servers: vec![ServerConfig::default()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen: u16,
    #[serde(default = "default_host")]
    pub host: Ipv4Addr,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(flatten)]
    pub directives: Directives,
    #[serde(default)]
    pub locations: Vec<LocationBlock>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: 8080,
            host: default_host(),
            server_names: Vec::new(),
            directives: Directives::default(),
            locations: Vec::new(),
        }
    }
}

fn default_host() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

/// Settings shared by servers and locations; unset means "inherit".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Directives {
    pub root: Option<PathBuf>,
    pub index: Option<Vec<String>>,
    pub autoindex: Option<bool>,
    pub client_max_body_size: Option<usize>,
    pub allowed_methods: Option<Vec<Method>>,
    pub upload_path: Option<PathBuf>,
    pub error_pages: Option<BTreeMap<u16, PathBuf>>,
    /// Extension (with or without the dot) to interpreter.
    pub cgi: Option<BTreeMap<String, PathBuf>>,
    pub redirects: Option<BTreeMap<String, String>>,
    #[serde(rename = "return")]
    pub return_to: Option<Return>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Return {
    pub code: u16,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationBlock {
    pub path: String,
    #[serde(flatten)]
    pub directives: Directives,
}

/// Effective settings for one request after inheritance.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub path: String,
    pub root: PathBuf,
    pub index: Vec<String>,
    pub autoindex: bool,
    pub client_max_body_size: usize,
    pub allowed_methods: Vec<Method>,
    pub upload_path: PathBuf,
    pub error_pages: BTreeMap<u16, PathBuf>,
    pub cgi: BTreeMap<String, PathBuf>,
    pub redirects: BTreeMap<String, String>,
    pub return_to: Option<Return>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self::merged("/", &Directives::default(), None)
    }
}

impl LocationConfig {
    fn merged(path: &str, server: &Directives, location: Option<&Directives>) -> Self {
        macro_rules! pick {
            ($field:ident, $default:expr) => {
                location
                    .and_then(|l| l.$field.clone())
                    .or_else(|| server.$field.clone())
                    .unwrap_or_else(|| $default)
            };
        }

        Self {
            path: path.to_string(),
            root: pick!(root, PathBuf::from("./www")),
            index: pick!(index, vec!["index.html".to_string()]),
            autoindex: pick!(autoindex, false),
            client_max_body_size: pick!(client_max_body_size, 1_000_001),
            allowed_methods: pick!(allowed_methods, vec![Method::GET, Method::POST, Method::DELETE]),
            upload_path: pick!(upload_path, PathBuf::from("./uploads")),
            error_pages: pick!(error_pages, BTreeMap::new()),
            cgi: pick!(cgi, BTreeMap::new()),
            redirects: pick!(redirects, BTreeMap::new()),
            // A return is never inherited from the server by a location.
            return_to: match location {
                Some(l) => l.return_to.clone(),
                None => server.return_to.clone(),
            },
        }
    }

    /// HEAD rides on GET permission.
    pub fn allows(&self, method: Method) -> bool {
        self.allowed_methods.contains(&method)
            || (method == Method::HEAD && self.allowed_methods.contains(&Method::GET))
    }

    /// Interpreter configured for the file's extension, if any.
    pub fn cgi_interpreter(&self, file: &Path) -> Option<&Path> {
        let ext = file.extension()?.to_str()?;
        self.cgi
            .iter()
            .find(|(key, _)| key.trim_start_matches('.') == ext)
            .map(|(_, interpreter)| interpreter.as_path())
    }
}

impl Config {
    /// Reads the file named on the command line or in `WEBSERV_CONFIG`,
    /// falling back to built-in defaults when neither is given.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(text).context("parsing YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.servers.is_empty() {
            bail!("at least one server must be configured");
        }
        if self.max_clients == 0 {
            bail!("max_clients must be greater than zero");
        }
        if self.keep_alive_timeout == 0 {
            bail!("keep_alive_timeout must be greater than zero");
        }
        if self.max_uri_length == 0 {
            bail!("max_uri_length must be greater than zero");
        }

        for server in &self.servers {
            let blocks = std::iter::once(("/", &server.directives))
                .chain(server.locations.iter().map(|l| (l.path.as_str(), &l.directives)));
            for (path, directives) in blocks {
                if !path.starts_with('/') {
                    bail!("location path {path:?} must start with '/'");
                }
                if let Some(ret) = &directives.return_to {
                    if !StatusCode::from_u16(ret.code).is_some_and(|s| s.is_redirect()) {
                        bail!("return code {} in location {path} is not a redirect", ret.code);
                    }
                }
            }
        }
        Ok(())
    }

    /// Distinct bind addresses across all servers, in declaration order.
    pub fn listen_addresses(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = Vec::new();
        for server in &self.servers {
            let addr = SocketAddr::from((server.host, server.listen));
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout)
    }

    pub fn cgi_timeout(&self) -> Duration {
        Duration::from_millis(self.cgi_timeout_ms)
    }

    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits { max_uri_length: self.max_uri_length }
    }

    /// Picks the server for `host`/`port`, then the location for `path`.
    pub fn resolve(&self, host: &str, port: u16, path: &str) -> LocationConfig {
        let Some(server) = self.select_server(host, port) else {
            return LocationConfig::default();
        };

        let exact = server.locations.iter().find(|l| l.path == path);
        let block = exact.or_else(|| {
            server
                .locations
                .iter()
                .filter(|l| prefix_matches(&l.path, path))
                .max_by_key(|l| l.path.len())
        });

        match block {
            Some(l) => LocationConfig::merged(&l.path, &server.directives, Some(&l.directives)),
            None => LocationConfig::merged("/", &server.directives, None),
        }
    }

    fn select_server(&self, host: &str, port: u16) -> Option<&ServerConfig> {
        let mut on_port = self.servers.iter().filter(|s| s.listen == port);
        self.servers
            .iter()
            .filter(|s| s.listen == port)
            .find(|s| s.server_names.iter().any(|n| n.eq_ignore_ascii_case(host)))
            .or_else(|| on_port.next())
            .or_else(|| self.servers.first())
    }
}

/// `/images` matches `/images` and `/images/a.png`, not `/imagesx`.
fn prefix_matches(location: &str, path: &str) -> bool {
    if location == "/" {
        return true;
    }
    let location = location.trim_end_matches('/');
    path == location
        || path
            .strip_prefix(location)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_segment_aligned() {
        assert!(prefix_matches("/", "/anything"));
        assert!(prefix_matches("/images", "/images"));
        assert!(prefix_matches("/images", "/images/a.png"));
        assert!(prefix_matches("/images/", "/images/a.png"));
        assert!(!prefix_matches("/images", "/imagesx"));
    }

    #[test]
    fn head_follows_get() {
        let loc = LocationConfig::default();
        assert!(loc.allows(Method::HEAD));
        assert!(!loc.allows(Method::PUT));
    }
}
