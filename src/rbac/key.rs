use std::fmt;
use std::str::FromStr;

/// A permission triple. The canonical form is `"<service>:<entity>:<action>"`;
/// matching is exact and case-sensitive, with no wildcard semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionKey {
    pub service: String,
    pub entity: String,
    pub action: String,
}

impl PermissionKey {
    pub fn new(
        service: impl Into<String>,
        entity: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            entity: entity.into(),
            action: action.into(),
        }
    }

    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.service, self.entity, self.action)
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.entity, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(service), Some(entity), Some(action), None)
                if !service.is_empty() && !entity.is_empty() && !action.is_empty() =>
            {
                Ok(Self::new(service, entity, action))
            }
            _ => anyhow::bail!("malformed permission key: {s}"),
        }
    }
}

impl serde::Serialize for PermissionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> serde::Deserialize<'de> for PermissionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
