//! Stream identity and its canonical string encoding.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gateway_protocol::StreamKind;
use std::fmt;

use crate::error::StreamKeyError;

/// Identity tuple for a single telemetry stream. Two keys are equal iff
/// every field compares equal; `Hash` and `Eq` are derived so this can be
/// used directly as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub tenant_id: String,
    pub kind: StreamKind,
    pub farm_id: String,
    pub site_id: String,
    pub cage_id: Option<String>,
}

impl StreamKey {
    pub fn new(
        tenant_id: impl Into<String>,
        kind: StreamKind,
        farm_id: impl Into<String>,
        site_id: impl Into<String>,
        cage_id: Option<String>,
    ) -> Result<Self, StreamKeyError> {
        let key = Self {
            tenant_id: tenant_id.into(),
            kind,
            farm_id: farm_id.into(),
            site_id: site_id.into(),
            cage_id,
        };
        key.validate()?;
        Ok(key)
    }

    fn validate(&self) -> Result<(), StreamKeyError> {
        if self.tenant_id.is_empty() {
            return Err(StreamKeyError::EmptyField("tenant_id"));
        }
        if self.farm_id.is_empty() {
            return Err(StreamKeyError::EmptyField("farm_id"));
        }
        if self.site_id.is_empty() {
            return Err(StreamKeyError::EmptyField("site_id"));
        }
        if matches!(&self.cage_id, Some(c) if c.is_empty()) {
            return Err(StreamKeyError::EmptyField("cage_id"));
        }
        Ok(())
    }

    /// Canonical string form: `tenant:kind:farm:site[:cage]`. Fields that
    /// contain `:` or start with `~` are base64 (URL-safe, unpadded) encoded
    /// and prefixed with `~` so the split-on-`:` parse stays unambiguous.
    pub fn canonical(&self) -> String {
        let mut parts = vec![
            encode_field(&self.tenant_id),
            self.kind.as_str().to_owned(),
            encode_field(&self.farm_id),
            encode_field(&self.site_id),
        ];
        if let Some(cage) = &self.cage_id {
            parts.push(encode_field(cage));
        }
        parts.join(":")
    }

    pub fn parse(s: &str) -> Result<Self, StreamKeyError> {
        let parts: Vec<&str> = s.split(':').collect();
        let (tenant, kind, farm, site, cage) = match parts.as_slice() {
            [t, k, f, s] => (*t, *k, *f, *s, None),
            [t, k, f, s, c] => (*t, *k, *f, *s, Some(*c)),
            _ => return Err(StreamKeyError::MalformedCanonical(s.to_owned())),
        };
        let kind = StreamKind::parse(kind).ok_or(StreamKeyError::UnknownKind(kind.to_owned()))?;
        let cage = cage.map(decode_field).transpose()?;
        StreamKey::new(decode_field(tenant)?, kind, decode_field(farm)?, decode_field(site)?, cage)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn encode_field(s: &str) -> String {
    if s.contains(':') || s.starts_with('~') {
        format!("~{}", URL_SAFE_NO_PAD.encode(s))
    } else {
        s.to_owned()
    }
}

fn decode_field(s: &str) -> Result<String, StreamKeyError> {
    match s.strip_prefix('~') {
        Some(rest) => {
            let bytes = URL_SAFE_NO_PAD
                .decode(rest)
                .map_err(|_| StreamKeyError::MalformedCanonical(s.to_owned()))?;
            String::from_utf8(bytes).map_err(|_| StreamKeyError::MalformedCanonical(s.to_owned()))
        }
        None => Ok(s.to_owned()),
    }
}
