use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LocationError, Result};
use crate::normalize::{last_component, normalize_abs, normalize_rel, parent_abs, parent_rel};
use crate::url;

pub const FILE_PROTOCOL: &str = "file";
pub const ARCHIVE_PROTOCOL: &str = "archive";
pub const QUERY_PROTOCOL: &str = "query";

/// One overlay layer of a [`Location`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload {
    protocol: String,
    path: String,
}

impl Payload {
    pub(crate) fn from_parts(protocol: String, path: String) -> Self {
        Self { protocol, path }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Overlay-relative path; empty for the overlay root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// An immutable address: a normalized absolute base path plus a stack of
/// payload overlays, innermost last.
///
/// `file:///data/a.zip//archive:docs/readme.txt` is `readme.txt` inside the
/// `docs` directory of the archive `/data/a.zip`. Overlays nest, so an
/// archive inside an archive is just a second `archive` payload.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    protocol: String,
    base_path: String,
    payloads: Vec<Payload>,
}

impl Location {
    pub(crate) fn from_parts(protocol: String, base_path: String, payloads: Vec<Payload>) -> Self {
        Self {
            protocol,
            base_path,
            payloads,
        }
    }

    /// Parse the canonical URL form produced by [`Location::as_url`].
    pub fn from_url(text: &str) -> Result<Self> {
        url::parse(text)
    }

    /// A `file` location with no payloads. Relative paths are resolved
    /// against the current directory; symlinks are not followed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path).map_err(|e| LocationError::Resolve {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_parts(
            FILE_PROTOCOL.to_string(),
            normalize_abs(&absolute.to_string_lossy()),
            Vec::new(),
        ))
    }

    /// Push a new overlay, e.g. "open this file as an archive".
    pub fn with_payload(&self, protocol: &str, path: &str) -> Result<Self> {
        if !url::is_valid_protocol(protocol) {
            return Err(LocationError::InvalidProtocol(protocol.to_string()));
        }
        let mut location = self.clone();
        location
            .payloads
            .push(Payload::from_parts(protocol.to_string(), normalize_rel(path)));
        Ok(location)
    }

    /// Append `child` to the innermost active path.
    pub fn join(&self, child: &str) -> Self {
        let mut location = self.clone();
        match location.payloads.last_mut() {
            Some(payload) => payload.path = normalize_rel(&format!("{}/{}", payload.path, child)),
            None => location.base_path = normalize_abs(&format!("{}/{}", location.base_path, child)),
        }
        location
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn innermost(&self) -> Option<&Payload> {
        self.payloads.last()
    }

    /// The path that [`Location::join`] and [`Location::parent`] operate on.
    pub fn innermost_path(&self) -> &str {
        self.payloads
            .last()
            .map(|p| p.path.as_str())
            .unwrap_or(&self.base_path)
    }

    pub fn has_payload(&self) -> bool {
        !self.payloads.is_empty()
    }

    pub fn has_stdio_name(&self) -> bool {
        self.protocol == FILE_PROTOCOL && self.payloads.is_empty()
    }

    /// The literal OS path. Only plain `file` locations have one.
    pub fn get_stdio_name(&self) -> Result<PathBuf> {
        if self.has_stdio_name() {
            Ok(PathBuf::from(&self.base_path))
        } else {
            Err(LocationError::NoStdioName(self.as_url()))
        }
    }

    pub fn is_root(&self) -> bool {
        self.payloads.is_empty() && self.base_path == "/"
    }

    /// One step up. A non-empty payload path loses its last component; an
    /// empty one (the overlay root) drops the whole payload, landing on the
    /// file that houses the overlay. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut parent = self.clone();
        match parent.payloads.last_mut() {
            None => parent.base_path = parent_abs(&self.base_path),
            Some(payload) if payload.path.is_empty() => {
                parent.payloads.pop();
            }
            Some(payload) => payload.path = parent_rel(&payload.path),
        }
        parent
    }

    /// The location housing this one: the innermost payload removed.
    pub fn origin(&self) -> Option<Self> {
        if self.payloads.is_empty() {
            return None;
        }
        let mut origin = self.clone();
        origin.payloads.pop();
        Some(origin)
    }

    /// Collapse a trailing overlay-root marker.
    pub fn pure(&self) -> Self {
        let mut pure = self.clone();
        if pure.payloads.last().is_some_and(Payload::is_root) {
            pure.payloads.pop();
        }
        pure
    }

    /// The innermost overlay's root: same stack, innermost path emptied.
    /// Every location inside one archive shares this value.
    pub fn archive_root(&self) -> Option<Self> {
        let mut root = self.clone();
        root.payloads.last_mut()?.path.clear();
        Some(root)
    }

    /// `[root, ..., parent, self]`.
    pub fn ancestry(&self) -> Vec<Self> {
        let mut chain = vec![self.clone()];
        loop {
            let current = &chain[chain.len() - 1];
            let parent = current.parent();
            if &parent == current {
                break;
            }
            chain.push(parent);
        }
        chain.reverse();
        chain
    }

    pub fn basename(&self) -> String {
        match self.payloads.last() {
            Some(payload) if payload.path.is_empty() => {
                let dir = self.origin().map(|o| o.basename()).unwrap_or_default();
                format!("{}{}{}", dir, url::PAYLOAD_SEPARATOR, payload.protocol)
            }
            Some(payload) => last_component(&payload.path).to_string(),
            None if self.base_path == "/" => "/".to_string(),
            None => last_component(&self.base_path).to_string(),
        }
    }

    /// Canonical, percent-encoded form. Round-trips through [`Location::from_url`].
    pub fn as_url(&self) -> String {
        url::format(self)
    }

    /// Display-only path-like form, not encoded and not parseable.
    pub fn as_path(&self) -> String {
        let mut path = self.base_path.clone();
        for payload in &self.payloads {
            path.push_str(url::PAYLOAD_SEPARATOR);
            path.push_str(&payload.protocol);
            if !payload.path.is_empty() {
                path.push(':');
                path.push_str(&payload.path);
            }
        }
        path
    }

    pub fn as_human(&self) -> String {
        if self.protocol == FILE_PROTOCOL {
            self.as_path()
        } else {
            self.as_url()
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_human())
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_url(s)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_url())
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_url(&text).map_err(serde::de::Error::custom)
    }
}
