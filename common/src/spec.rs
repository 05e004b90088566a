//! Decoding of `<dir>@<host>:<port>` directory specs.
//!
//! A spec names one directory served by one agent. The encoded source spec is also the
//! identity of a synchronization pair, see [`PairKey`].

use crate::error::{Error, Result};

/// Encoded `<dir>@<host>:<port>` string, kept verbatim.
///
/// Two pairs are the same pair iff their source keys are byte-for-byte equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey(String);

impl PairKey {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.0)
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PairKey {
    fn from(spec: &str) -> Self {
        Self::new(spec)
    }
}

impl From<String> for PairKey {
    fn from(spec: String) -> Self {
        Self(spec)
    }
}

/// Decoded location of a directory on a remote agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub dir: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parses `<dir>@<host>:<port>`.
    ///
    /// The directory ends at the first `@` and the port starts after the last `:`, so host
    /// names may not contain `:` but directories may contain `:`.
    pub fn parse(spec: &str) -> Result<Self> {
        let format_error = |reason| Error::Format {
            spec: spec.to_string(),
            reason,
        };
        let (dir, address) = spec.split_once('@').ok_or_else(|| format_error("missing '@'"))?;
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| format_error("missing ':'"))?;
        if dir.is_empty() {
            return Err(format_error("empty directory"));
        }
        if host.is_empty() {
            return Err(format_error("empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format_error("invalid port"))?;
        if port == 0 {
            return Err(format_error("port 0 is not allowed"));
        }
        Ok(Self {
            dir: dir.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Path of `file` inside this directory, as sent in PULL/PUSH requests.
    pub fn remote_path(&self, file: &str) -> String {
        format!("{}/{}", self.dir, file)
    }

    /// `<dir>/<file>@<host>:<port>`, the form used in result log records.
    pub fn file_location(&self, file: &str) -> String {
        format!("{}/{}@{}:{}", self.dir, file, self.host, self.port)
    }

    /// `<host>:<port>` suitable for a TCP connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.dir, self.host, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_spec() {
        let endpoint = Endpoint::parse("reports@10.0.0.5:4000").unwrap();
        assert_eq!(endpoint.dir, "reports");
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 4000);
        assert_eq!(endpoint.to_string(), "reports@10.0.0.5:4000");
    }

    #[test]
    fn missing_at_is_format_error() {
        match Endpoint::parse("badformat") {
            Err(Error::Format { spec, .. }) => assert_eq!(spec, "badformat"),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn missing_colon_is_format_error() {
        assert!(matches!(
            Endpoint::parse("docs@localhost"),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn rejects_empty_parts_and_bad_ports() {
        for spec in [
            "@host:1",
            "docs@:1",
            "docs@host:",
            "docs@host:port",
            "docs@host:70000",
            "docs@host:0",
        ] {
            assert!(
                matches!(Endpoint::parse(spec), Err(Error::Format { .. })),
                "{spec} should not decode"
            );
        }
    }

    #[test]
    fn locations_and_paths() {
        let endpoint: Endpoint = "/backup@example.org:9002".parse().unwrap();
        assert_eq!(endpoint.remote_path("a.txt"), "/backup/a.txt");
        assert_eq!(
            endpoint.file_location("a.txt"),
            "/backup/a.txt@example.org:9002"
        );
        assert_eq!(endpoint.address(), "example.org:9002");
    }

    #[test]
    fn pair_key_decodes_its_spec() {
        let key = PairKey::from("docs@127.0.0.1:9001");
        assert_eq!(key.decode().unwrap().port, 9001);
        assert_eq!(key.as_str(), "docs@127.0.0.1:9001");
    }
}
