//! Configuration module.
//!
//! This module contains the sync configuration: credentials for both
//! IMAP accounts, the folder mappings, and the worker count. The
//! configuration can be deserialized from a JSON or YAML file, the
//! format being picked from the file extension.

use std::{fs, path::Path, result};

use serde::Deserialize;
use thiserror::Error;

/// Upper bound on the number of parallel upload workers.
pub const MAX_WORKERS: usize = 10;
/// Worker count used when the configuration does not provide one.
pub const DEFAULT_WORKERS: usize = 4;

const DEFAULT_SOURCE_LABEL: &str = "src";
const DEFAULT_DESTINATION_LABEL: &str = "dst";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read config file {1}")]
    ReadConfigFileError(#[source] std::io::Error, String),
    #[error("cannot parse JSON config file {1}")]
    ParseJsonConfigError(#[source] serde_json::Error, String),
    #[error("cannot parse YAML config file {1}")]
    ParseYamlConfigError(#[source] serde_yaml::Error, String),
    #[error("unsupported config file format {0:?}, supported: .json, .yaml, .yml")]
    UnsupportedConfigFormatError(String),
    #[error("{0} is required")]
    MissingValueError(&'static str),
    #[error("invalid server address {0:?}, expected host:port")]
    InvalidServerAddrError(String),
}

pub type Result<T> = result::Result<T, Error>;

/// Connection data for one IMAP account.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Credentials {
    /// Human-readable label used as a log prefix for this account.
    pub label: String,
    /// Server address as `host:port`.
    pub server: String,
    /// Account login.
    pub user: String,
    /// Account password.
    pub pass: String,
    /// Wraps the connection in TLS. Enabled unless set to false.
    pub use_tls: bool,
    /// Trusts any certificate.
    pub insecure: bool,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            label: String::default(),
            server: String::default(),
            user: String::default(),
            pass: String::default(),
            use_tls: true,
            insecure: false,
        }
    }
}

impl Credentials {
    /// Splits the configured server address into its host and port.
    pub fn addr(&self) -> Result<(String, u16)> {
        let (host, port) = self
            .server
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidServerAddrError(self.server.clone()))?;
        let port = port
            .parse()
            .map_err(|_| Error::InvalidServerAddrError(self.server.clone()))?;
        Ok((host.to_owned(), port))
    }
}

/// Source to destination folder pair. Paths are opaque strings whose
/// hierarchy is interpreted with the server-chosen delimiter.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DirectoryMapping {
    #[serde(rename = "src")]
    pub source: String,
    #[serde(rename = "dst")]
    pub destination: String,
}

impl DirectoryMapping {
    pub fn new<S: ToString, D: ToString>(source: S, destination: D) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }
}

/// The whole sync configuration.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of parallel upload workers, bounded to `[1, 10]`.
    pub workers: usize,
    /// Source account credentials.
    pub src: Credentials,
    /// Destination account credentials.
    pub dst: Credentials,
    /// Folder mapping rules.
    #[serde(rename = "map")]
    pub mappings: Vec<DirectoryMapping>,
}

impl Config {
    /// Loads the configuration from the given JSON or YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = fs::read_to_string(path)
            .map_err(|err| Error::ReadConfigFileError(err, display.clone()))?;

        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let config: Config = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .map_err(|err| Error::ParseJsonConfigError(err, display))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|err| Error::ParseYamlConfigError(err, display))?,
            other => return Err(Error::UnsupportedConfigFormatError(other.to_owned())),
        };

        config.finish()
    }

    /// Loads the configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|err| Error::ParseJsonConfigError(err, String::from("<inline>")))?;
        config.finish()
    }

    /// Loads the configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|err| Error::ParseYamlConfigError(err, String::from("<inline>")))?;
        config.finish()
    }

    fn finish(mut self) -> Result<Self> {
        self.normalize();
        self.validate()?;
        Ok(self)
    }

    /// Fills in default labels and bounds the worker count.
    pub fn normalize(&mut self) {
        if self.src.label.is_empty() {
            self.src.label = DEFAULT_SOURCE_LABEL.to_owned();
        }
        if self.dst.label.is_empty() {
            self.dst.label = DEFAULT_DESTINATION_LABEL.to_owned();
        }
        self.workers = normalize_workers(self.workers);
    }

    /// Checks that all required fields are present.
    pub fn validate(&self) -> Result<()> {
        if self.src.server.is_empty() {
            return Err(Error::MissingValueError("source server"));
        }
        if self.src.user.is_empty() {
            return Err(Error::MissingValueError("source user"));
        }
        if self.src.pass.is_empty() {
            return Err(Error::MissingValueError("source password"));
        }
        if self.dst.server.is_empty() {
            return Err(Error::MissingValueError("destination server"));
        }
        if self.dst.user.is_empty() {
            return Err(Error::MissingValueError("destination user"));
        }
        if self.dst.pass.is_empty() {
            return Err(Error::MissingValueError("destination password"));
        }
        Ok(())
    }
}

fn normalize_workers(workers: usize) -> usize {
    if workers == 0 {
        DEFAULT_WORKERS
    } else {
        workers.min(MAX_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            workers: 2,
            src: Credentials {
                label: String::from("src"),
                server: String::from("imap.source.example:993"),
                user: String::from("user@source.example"),
                pass: String::from("password"),
                use_tls: true,
                insecure: false,
            },
            dst: Credentials {
                label: String::from("dst"),
                server: String::from("imap.dest.example:993"),
                user: String::from("user@dest.example"),
                pass: String::from("password"),
                use_tls: true,
                insecure: false,
            },
            mappings: vec![DirectoryMapping::new("INBOX", "INBOX")],
        }
    }

    #[test]
    fn normalize_workers_bounds() {
        assert_eq!(DEFAULT_WORKERS, normalize_workers(0));
        assert_eq!(1, normalize_workers(1));
        assert_eq!(4, normalize_workers(4));
        assert_eq!(MAX_WORKERS, normalize_workers(10));
        assert_eq!(MAX_WORKERS, normalize_workers(64));
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut config = valid_config();
        config.src.server.clear();
        assert!(matches!(
            config.validate(),
            Err(Error::MissingValueError("source server"))
        ));

        let mut config = valid_config();
        config.dst.pass.clear();
        assert!(matches!(
            config.validate(),
            Err(Error::MissingValueError("destination password"))
        ));
    }

    #[test]
    fn normalize_fills_default_labels() {
        let mut config = valid_config();
        config.src.label.clear();
        config.dst.label.clear();
        config.normalize();
        assert_eq!("src", config.src.label);
        assert_eq!("dst", config.dst.label);
    }

    #[test]
    fn from_json_applies_defaults() {
        let config = Config::from_json(
            r#"{
                "src": {"server": "imap.a.example:993", "user": "a", "pass": "pa"},
                "dst": {"server": "imap.b.example:143", "user": "b", "pass": "pb", "use-tls": false},
                "map": [{"src": "INBOX", "dst": "Backup/INBOX"}]
            }"#,
        )
        .unwrap();

        assert_eq!(DEFAULT_WORKERS, config.workers);
        assert_eq!("src", config.src.label);
        assert_eq!("dst", config.dst.label);
        assert!(config.src.use_tls);
        assert!(!config.dst.use_tls);
        assert_eq!(
            vec![DirectoryMapping::new("INBOX", "Backup/INBOX")],
            config.mappings
        );
    }

    #[test]
    fn from_yaml_parses_mappings() {
        let config = Config::from_yaml(
            r#"
workers: 12
src:
  label: cloud
  server: imap.a.example:993
  user: a
  pass: pa
dst:
  server: imap.b.example:993
  user: b
  pass: pb
map:
  - src: INBOX
    dst: INBOX
  - src: Archive
    dst: Backup.Archive
"#,
        )
        .unwrap();

        assert_eq!(MAX_WORKERS, config.workers);
        assert_eq!("cloud", config.src.label);
        assert_eq!(2, config.mappings.len());
        assert_eq!("Backup.Archive", config.mappings[1].destination);
    }

    #[test]
    fn from_json_rejects_incomplete_config() {
        let res = Config::from_json(r#"{"src": {"server": "imap.a.example:993"}}"#);
        assert!(matches!(res, Err(Error::MissingValueError("source user"))));
    }

    #[test]
    fn addr_splits_host_and_port() {
        let creds = Credentials {
            server: String::from("imap.example.com:993"),
            ..Credentials::default()
        };
        assert_eq!(
            (String::from("imap.example.com"), 993),
            creds.addr().unwrap()
        );

        let creds = Credentials {
            server: String::from("imap.example.com"),
            ..Credentials::default()
        };
        assert!(matches!(
            creds.addr(),
            Err(Error::InvalidServerAddrError(_))
        ));
    }
}
