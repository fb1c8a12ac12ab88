//! Allow-lists and resource pattern matching.
//!
//! Each permission kind carries one three-valued allow-list: `Absent` denies
//! everything, `AllowAll` (a granted empty list) allows everything of that
//! kind, and `Only` allows what matches one of its patterns. Matching is
//! performed on canonical forms: paths are lexically normalized before the
//! prefix check so `..` traversal cannot escape a granted root, and network
//! resources have loopback aliases collapsed to one spelling and the default
//! HTTP(S) ports stripped.

use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};

use crate::kind::PermissionKind;

/// A pattern string that could not be parsed into a matchable form.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// The pattern was empty.
    #[error("empty {kind} pattern")]
    Empty {
        /// The kind the pattern was granted for.
        kind: PermissionKind,
    },
    /// A network pattern with an unusable host or port component.
    #[error("invalid network pattern {pattern:?}: {reason}")]
    InvalidNet {
        /// The offending pattern text.
        pattern: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

pub(crate) trait ResourcePattern: Sized {
    fn parse(raw: &str, kind: PermissionKind) -> Result<Self, PatternError>;
    fn matches(&self, resource: &str) -> bool;
}

/// One per-kind allow-list.
pub(crate) enum AllowList<P> {
    /// Never granted; deny (or prompt for) everything.
    Absent,
    /// Granted with an empty pattern list: allow all of this kind.
    AllowAll,
    /// Allow resources matching any of these patterns.
    Only(Vec<P>),
}

impl<P> Default for AllowList<P> {
    fn default() -> Self {
        AllowList::Absent
    }
}

impl<P: ResourcePattern> AllowList<P> {
    pub(crate) fn granted(
        kind: PermissionKind,
        patterns: &[String],
    ) -> Result<Self, PatternError> {
        if patterns.is_empty() {
            return Ok(AllowList::AllowAll);
        }
        // Parsing copies every pattern; callers keep ownership of their
        // input and cannot mutate the list afterwards through it.
        let patterns = patterns
            .iter()
            .map(|raw| {
                if raw.trim().is_empty() {
                    Err(PatternError::Empty { kind })
                } else {
                    P::parse(raw, kind)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AllowList::Only(patterns))
    }

    pub(crate) fn allows(&self, resource: &str) -> bool {
        match self {
            AllowList::Absent => false,
            AllowList::AllowAll => true,
            AllowList::Only(patterns) => patterns.iter().any(|p| p.matches(resource)),
        }
    }
}

/// The five allow-lists of one policy generation.
#[derive(Default)]
pub(crate) struct PolicySnapshot {
    pub(crate) read: AllowList<PathPattern>,
    pub(crate) write: AllowList<PathPattern>,
    pub(crate) net: AllowList<NetPattern>,
    pub(crate) env: AllowList<ExactPattern>,
    pub(crate) run: AllowList<ExactPattern>,
}

impl PolicySnapshot {
    pub(crate) fn allows(&self, kind: PermissionKind, resource: &str) -> bool {
        match kind {
            PermissionKind::Read => self.read.allows(resource),
            PermissionKind::Write => self.write.allows(resource),
            PermissionKind::Net => self.net.allows(resource),
            PermissionKind::Env => self.env.allows(resource),
            PermissionKind::Run => self.run.allows(resource),
        }
    }
}

// ---------------------------------------------------------------------------
// Path patterns
// ---------------------------------------------------------------------------

/// Allows a path root and every descendant of it.
pub(crate) struct PathPattern {
    root: PathBuf,
}

impl ResourcePattern for PathPattern {
    fn parse(raw: &str, _kind: PermissionKind) -> Result<Self, PatternError> {
        Ok(Self {
            root: canonical_path(Path::new(raw)),
        })
    }

    fn matches(&self, resource: &str) -> bool {
        let request = canonical_path(Path::new(resource));
        request == self.root || request.starts_with(&self.root)
    }
}

/// Resolve a path against the current directory and normalize it lexically.
///
/// Normalization is lexical on purpose: patterns and requests routinely name
/// paths that do not exist yet, and a `..` component must be resolved before
/// the prefix check so it can never smuggle a request outside the granted
/// root.
pub(crate) fn canonical_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    normalize_path(&absolute)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut normalized =
        if let Some(component @ Component::Prefix(..)) = components.peek().cloned() {
            components.next();
            PathBuf::from(component.as_os_str())
        } else {
            PathBuf::new()
        };
    for component in components {
        match component {
            Component::Prefix(..) => unreachable!("prefix is only valid at the start"),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

// ---------------------------------------------------------------------------
// Network patterns
// ---------------------------------------------------------------------------

/// Allows a host, or a `*.domain` family of hosts, optionally pinned to a
/// port.
pub(crate) struct NetPattern {
    host: String,
    port: Option<u16>,
    wildcard: bool,
}

impl ResourcePattern for NetPattern {
    fn parse(raw: &str, _kind: PermissionKind) -> Result<Self, PatternError> {
        let (rest, wildcard) = match raw.strip_prefix("*.") {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        let (host, port) = split_host_port(rest).ok_or_else(|| PatternError::InvalidNet {
            pattern: raw.to_string(),
            reason: "expected host or host:port",
        })?;
        if host.is_empty() {
            return Err(PatternError::InvalidNet {
                pattern: raw.to_string(),
                reason: "empty host",
            });
        }
        Ok(Self {
            host: canonical_host(&host),
            port: strip_default_port(port),
            wildcard,
        })
    }

    fn matches(&self, resource: &str) -> bool {
        let Some((host, port)) = split_host_port(resource) else {
            return false;
        };
        let host = canonical_host(&host);
        let port = strip_default_port(port);

        let host_ok = if self.wildcard {
            // The apex counts as part of its own wildcard family.
            host == self.host || host.ends_with(&format!(".{}", self.host))
        } else {
            host == self.host
        };
        if !host_ok {
            return false;
        }
        match self.port {
            Some(expected) => port == Some(expected),
            // A bare loopback grant covers every local port; for any other
            // host a portless pattern only matches a portless (or default
            // 80/443) request.
            None => is_loopback_host(&self.host) || port.is_none(),
        }
    }
}

/// Split `host`, `host:port`, `[v6]` or `[v6]:port`. Returns `None` for
/// shapes that cannot name a network endpoint.
fn split_host_port(input: &str) -> Option<(String, Option<u16>)> {
    if let Some(rest) = input.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail.strip_prefix(':') {
            Some(port) => Some((host.to_string(), Some(port.parse().ok()?))),
            None if tail.is_empty() => Some((host.to_string(), None)),
            None => None,
        };
    }
    // More than one colon without brackets: a bare IPv6 address.
    if input.matches(':').count() > 1 {
        return Some((input.to_string(), None));
    }
    match input.split_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse().ok()?))),
        None => Some((input.to_string(), None)),
    }
}

/// Collapse every loopback alias (`localhost`, `127.0.0.1`, `::1`, ...) to
/// the single spelling `localhost`; lowercase everything else.
fn canonical_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    if host == "localhost" {
        return host;
    }
    if let Ok(ip) = host.parse::<IpAddr>()
        && ip.is_loopback()
    {
        return "localhost".to_string();
    }
    host
}

fn is_loopback_host(canonical: &str) -> bool {
    canonical == "localhost"
}

/// Ports 80 and 443 are equivalent to "no port".
fn strip_default_port(port: Option<u16>) -> Option<u16> {
    match port {
        Some(80) | Some(443) => None,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Exact patterns (env, run)
// ---------------------------------------------------------------------------

/// Exact, case-sensitive string match.
pub(crate) struct ExactPattern {
    value: String,
}

impl ResourcePattern for ExactPattern {
    fn parse(raw: &str, _kind: PermissionKind) -> Result<Self, PatternError> {
        Ok(Self {
            value: raw.to_string(),
        })
    }

    fn matches(&self, resource: &str) -> bool {
        self.value == resource
    }
}
