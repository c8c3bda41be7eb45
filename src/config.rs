//! # Resolved Configuration
//!
//! The core never parses YAML or CLI flags itself; it is handed a fully
//! resolved [`Config`] value. This module is the thin collaborator that
//! builds one, merging `--flag` values over an optional YAML file over
//! built-in defaults, in the same field-by-field precedence order the
//! teacher's `BenchmarkConfiguration::from(&Args)` conversion uses.

use std::fs;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use rustls::RootCertStore;
use serde::Deserialize;

use crate::cli::CliArgs;
use crate::error::ConfigError;
use crate::packet::{facility_by_name, severity_by_name, Priority};

/// Destination transport. Only one destination is supported; multi-collector
/// fan-out is an allowed extension but not part of this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
    Tls,
}

impl Protocol {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            "tls" => Ok(Protocol::Tls),
            other => Err(ConfigError::InvalidProtocol(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Destination {
    /// Resolve `host:port` to a concrete socket address. Takes the first
    /// result, matching the teacher's single-address TCP connect pattern.
    pub fn resolve(&self) -> std::io::Result<std::net::SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses for {}:{}", self.host, self.port),
                )
            })
    }
}

/// How a file's tag is derived once a glob pattern resolves to a path.
#[derive(Debug, Clone)]
pub enum TagRule {
    /// Tag is used verbatim.
    Explicit(String),
    /// Tag is extracted from the resolved path with a regex, per the
    /// optional `re:<regex>=<glob>` syntax (§4.4, §9).
    Regex { pattern: Regex, group: TagGroup },
    /// No tag was configured; fall back to the basename of the resolved path.
    Basename,
}

#[derive(Debug, Clone)]
pub enum TagGroup {
    Named(String),
    Index(usize),
}

impl TagRule {
    /// Resolve the tag for a concrete path. A regex rule that fails to
    /// match falls back to the basename, per §9.
    pub fn resolve(&self, path: &Path) -> String {
        let basename = || {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        match self {
            TagRule::Explicit(tag) => tag.clone(),
            TagRule::Basename => basename(),
            TagRule::Regex { pattern, group } => {
                let text = path.to_string_lossy();
                let Some(captures) = pattern.captures(&text) else {
                    return basename();
                };
                let captured = match group {
                    TagGroup::Named(name) => captures.name(name),
                    TagGroup::Index(idx) => captures.get(*idx),
                };
                captured
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(basename)
            }
        }
    }
}

/// A configured glob pattern (or bare path) paired with its tag rule.
#[derive(Debug, Clone)]
pub struct LogFile {
    pub pattern: String,
    pub tag: TagRule,
}

impl LogFile {
    /// Parse one `TAG=PATTERN` / `re:REGEX=PATTERN` / bare `PATTERN` entry,
    /// matching the Go `GetFiles` convention the teacher's CLI positionals
    /// mirror.
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        match entry.split_once('=') {
            Some((tag_part, pattern)) if !tag_part.contains('/') && !tag_part.is_empty() => {
                Ok(Self {
                    pattern: pattern.to_string(),
                    tag: parse_tag_rule(tag_part)?,
                })
            }
            _ => Ok(Self {
                pattern: entry.to_string(),
                tag: TagRule::Basename,
            }),
        }
    }
}

fn parse_tag_rule(tag_part: &str) -> Result<TagRule, ConfigError> {
    if let Some(regex_src) = tag_part.strip_prefix("re:") {
        let pattern =
            Regex::new(regex_src).map_err(|source| ConfigError::InvalidRegex {
                pattern: regex_src.to_string(),
                source,
            })?;
        let group = if pattern
            .capture_names()
            .flatten()
            .any(|name| name == "tag")
        {
            TagGroup::Named("tag".to_string())
        } else {
            TagGroup::Index(1)
        };
        Ok(TagRule::Regex { pattern, group })
    } else {
        Ok(TagRule::Explicit(tag_part.to_string()))
    }
}

/// Fully resolved configuration consumed by the tail engine and transport.
/// Everything here has already been validated; the core never raises a
/// [`ConfigError`] itself.
#[derive(Clone)]
pub struct Config {
    pub destination: Destination,
    pub hostname: String,
    pub severity: Priority,
    pub facility: Priority,
    pub files: Vec<LogFile>,
    pub exclude_files: Vec<Regex>,
    pub exclude_patterns: Vec<Regex>,
    pub new_file_check_interval: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub tcp_max_line_length: usize,
    pub root_cas: Option<Arc<RootCertStore>>,
    pub poll: bool,
    pub reconnect_delay: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("destination", &self.destination)
            .field("hostname", &self.hostname)
            .field("severity", &self.severity)
            .field("facility", &self.facility)
            .field("files", &self.files)
            .field("new_file_check_interval", &self.new_file_check_interval)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

pub const DEFAULT_TCP_MAX_LINE_LENGTH: usize = 99_990;
pub const DEFAULT_PORT: u16 = 514;
const DEFAULT_NEW_FILE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// YAML document shape, matching the Go `ConfigFile` struct. Every field is
/// optional: a bare CLI invocation with no `-c` is valid.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    #[serde(default)]
    files: Vec<FileEntryYaml>,
    destination: Option<DestinationYaml>,
    hostname: Option<String>,
    severity: Option<String>,
    facility: Option<String>,
    #[serde(default)]
    exclude_files: Vec<String>,
    #[serde(default)]
    exclude_patterns: Vec<String>,
    new_file_check_interval: Option<IntervalValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileEntryYaml {
    Plain(String),
    Tagged { tag: String, path: String },
}

#[derive(Debug, Deserialize)]
struct DestinationYaml {
    host: Option<String>,
    port: Option<u16>,
    protocol: Option<String>,
}

/// Accepts either a bare integer (seconds) or a duration string like `"30s"`,
/// since historical revisions of the source disagreed on the representation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntervalValue {
    Seconds(u64),
    Text(String),
}

fn parse_interval(value: &IntervalValue) -> Result<Duration, ConfigError> {
    let duration = match value {
        IntervalValue::Seconds(secs) => Duration::from_secs(*secs),
        IntervalValue::Text(text) => match humantime::parse_duration(text) {
            Ok(d) => d,
            Err(_) => {
                let secs: u64 = text.trim().parse().map_err(|_| {
                    ConfigError::InvalidRefreshInterval {
                        given: text.clone(),
                        reason: "not an integer or a duration string".to_string(),
                    }
                })?;
                Duration::from_secs(secs)
            }
        },
    };
    if duration < Duration::from_secs(1) {
        return Err(ConfigError::InvalidRefreshInterval {
            given: format!("{duration:?}"),
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(duration)
}

impl Config {
    /// Build a [`Config`] from parsed CLI args, merging an optional YAML
    /// file and falling back to built-in defaults. CLI flags win over the
    /// YAML file, which wins over the default, field by field.
    pub fn resolve(args: &CliArgs) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => Some(load_config_file(path)?),
            None => None,
        };
        let file = file.unwrap_or_default();

        let protocol = if args.tls {
            Protocol::Tls
        } else if args.tcp {
            Protocol::Tcp
        } else if let Some(proto) = file
            .destination
            .as_ref()
            .and_then(|d| d.protocol.as_deref())
        {
            Protocol::parse(proto)?
        } else {
            Protocol::Udp
        };

        let host = args
            .dest_host
            .clone()
            .or_else(|| file.destination.as_ref().and_then(|d| d.host.clone()))
            .ok_or_else(|| {
                ConfigError::InvalidProtocol("destination host is required".to_string())
            })?;
        let port = args
            .dest_port
            .or_else(|| file.destination.as_ref().and_then(|d| d.port))
            .unwrap_or(DEFAULT_PORT);

        let hostname = args
            .hostname
            .clone()
            .or_else(|| file.hostname.clone())
            .or_else(|| hostname::get().ok().map(|h| h.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "localhost".to_string());

        let severity_name = args.severity.as_deref().unwrap_or("notice");
        let facility_name = args.facility.as_deref().unwrap_or("user");
        let severity = severity_by_name(severity_name)?;
        let facility = facility_by_name(facility_name)?;

        let mut files: Vec<LogFile> = args
            .files
            .iter()
            .map(|entry| LogFile::parse(entry))
            .collect::<Result<_, _>>()?;
        for entry in &file.files {
            files.push(match entry {
                FileEntryYaml::Plain(pattern) => LogFile {
                    pattern: pattern.clone(),
                    tag: TagRule::Basename,
                },
                FileEntryYaml::Tagged { tag, path } => LogFile {
                    pattern: path.clone(),
                    tag: parse_tag_rule(tag)?,
                },
            });
        }

        let exclude_files = file
            .exclude_files
            .iter()
            .map(|pattern| compile_regex(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude_patterns = file
            .exclude_patterns
            .iter()
            .map(|pattern| compile_regex(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let new_file_check_interval = match (&args.new_file_check_interval, &file.new_file_check_interval) {
            (Some(text), _) => parse_interval(&IntervalValue::Text(text.clone()))?,
            (None, Some(value)) => parse_interval(value)?,
            (None, None) => DEFAULT_NEW_FILE_CHECK_INTERVAL,
        };

        let connect_timeout = args
            .connect_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let write_timeout = args
            .write_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WRITE_TIMEOUT);
        let tcp_max_line_length = args
            .tcp_max_line_length
            .unwrap_or(DEFAULT_TCP_MAX_LINE_LENGTH);

        let root_cas = match &args.ca_bundle {
            Some(path) => Some(Arc::new(load_ca_bundle(path)?)),
            None => None,
        };

        Ok(Config {
            destination: Destination { host, port, protocol },
            hostname,
            severity,
            facility,
            files,
            exclude_files,
            exclude_patterns,
            new_file_check_interval,
            connect_timeout,
            write_timeout,
            tcp_max_line_length,
            root_cas,
            poll: args.poll,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
        path: path.display().to_string(),
        source,
    })
}

fn load_ca_bundle(path: &Path) -> Result<RootCertStore, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::CertBundle {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = std::io::Cursor::new(bytes);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok())
        .collect();
    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ConfigError::CertBundle {
            path: path.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "no parsable certificates found in CA bundle",
            ),
        });
    }
    Ok(store)
}

/// Resolve the default pid-file path the way the Go `GetPidFile` fallback
/// chain does: the first writable candidate directory wins.
pub fn default_pid_file() -> PathBuf {
    let candidates: Vec<PathBuf> = vec![
        PathBuf::from("/var/run"),
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("run")).unwrap_or_default(),
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("tmp")).unwrap_or_default(),
        std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default(),
        std::env::temp_dir(),
    ];
    for dir in candidates {
        if dir.as_os_str().is_empty() {
            continue;
        }
        if dir.is_dir() {
            return dir.join("remote_syslog.pid");
        }
    }
    std::env::temp_dir().join("remote_syslog.pid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_path_with_basename_tag() {
        let lf = LogFile::parse("/var/log/auth.log").unwrap();
        assert!(matches!(lf.tag, TagRule::Basename));
        assert_eq!(lf.pattern, "/var/log/auth.log");
    }

    #[test]
    fn parses_explicit_tag() {
        let lf = LogFile::parse("auth=/var/log/auth.log").unwrap();
        assert_eq!(lf.pattern, "/var/log/auth.log");
        match lf.tag {
            TagRule::Explicit(tag) => assert_eq!(tag, "auth"),
            other => panic!("expected explicit tag, got {other:?}"),
        }
    }

    #[test]
    fn tag_with_slash_is_not_treated_as_a_tag_separator() {
        let lf = LogFile::parse("/var/log/a=b.log").unwrap();
        assert!(matches!(lf.tag, TagRule::Basename));
        assert_eq!(lf.pattern, "/var/log/a=b.log");
    }

    #[test]
    fn parses_regex_tag_rule_with_named_group() {
        let lf = LogFile::parse(r"re:access_(?P<tag>\w+)\.log=/var/log/access_*.log").unwrap();
        match &lf.tag {
            TagRule::Regex { group, .. } => assert!(matches!(group, TagGroup::Named(n) if n == "tag")),
            other => panic!("expected regex tag, got {other:?}"),
        }
        let resolved = lf.tag.resolve(Path::new("/var/log/access_web.log"));
        assert_eq!(resolved, "web");
    }

    #[test]
    fn regex_tag_rule_falls_back_to_basename_on_no_match() {
        let rule = parse_tag_rule(r"re:(?P<tag>\d+)").unwrap();
        let resolved = rule.resolve(Path::new("/var/log/no-digits-here.log"));
        assert_eq!(resolved, "no-digits-here.log");
    }

    #[test]
    fn interval_accepts_bare_seconds() {
        let d = parse_interval(&IntervalValue::Seconds(30)).unwrap();
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn interval_accepts_duration_string() {
        let d = parse_interval(&IntervalValue::Text("30s".to_string())).unwrap();
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn interval_below_one_second_is_rejected() {
        assert!(parse_interval(&IntervalValue::Seconds(0)).is_err());
        assert!(parse_interval(&IntervalValue::Text("500ms".to_string())).is_err());
    }

    #[test]
    fn protocol_parses_known_names_and_rejects_others() {
        assert_eq!(Protocol::parse("udp").unwrap(), Protocol::Udp);
        assert_eq!(Protocol::parse("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::parse("tls").unwrap(), Protocol::Tls);
        assert!(Protocol::parse("sctp").is_err());
    }

    #[test]
    fn yaml_file_entries_support_plain_and_tagged_forms() {
        let yaml = r#"
files:
  - /var/log/syslog
  - tag: auth
    path: /var/log/auth.log
destination:
  host: collector.example.com
  port: 6514
  protocol: tls
"#;
        let parsed: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.destination.unwrap().host.unwrap(), "collector.example.com");
    }
}
