//! Event model.

use serde::{Deserialize, Deserializer};

/// What a routing event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AddPublicEndpoint,
    RemovePublicEndpoint,
    DeleteApplication,
    AddAlias,
    RemoveAlias,
    AddSsl,
    RemoveSsl,
    ReinitStart,
    ReinitEnd,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddPublicEndpoint => "add_public_endpoint",
            Self::RemovePublicEndpoint => "remove_public_endpoint",
            Self::DeleteApplication => "delete_application",
            Self::AddAlias => "add_alias",
            Self::RemoveAlias => "remove_alias",
            Self::AddSsl => "add_ssl",
            Self::RemoveSsl => "remove_ssl",
            Self::ReinitStart => "reinit_start",
            Self::ReinitEnd => "reinit_end",
        }
    }

    /// Reinit markers are not tied to an application.
    pub fn is_reinit(&self) -> bool {
        matches!(self, Self::ReinitStart | Self::ReinitEnd)
    }

    /// Fields the action cannot be handled without.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::AddPublicEndpoint => &["app_name", "namespace", "public_address", "public_port"],
            Self::RemovePublicEndpoint => &["app_name", "namespace", "public_address", "public_port"],
            Self::DeleteApplication => &["app_name", "namespace"],
            Self::AddAlias | Self::RemoveAlias | Self::RemoveSsl => &["app_name", "namespace", "alias"],
            Self::AddSsl => &["app_name", "namespace", "alias", "ssl", "private_key"],
            Self::ReinitStart | Self::ReinitEnd => &[],
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded routing event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Event {
    pub action: Action,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "public_ip")]
    pub public_address: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub public_port: Option<u16>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub alias: Option<String>,
    /// PEM certificate for `add_ssl`.
    #[serde(default)]
    pub ssl: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub gear_size: Option<String>,
}

impl Event {
    /// Value of a named field, if set.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "app_name" => self.app_name.as_deref(),
            "namespace" => self.namespace.as_deref(),
            "public_address" => self.public_address.as_deref(),
            "alias" => self.alias.as_deref(),
            "ssl" => self.ssl.as_deref(),
            "private_key" => self.private_key.as_deref(),
            "gear_size" => self.gear_size.as_deref(),
            "public_port" => self.public_port.map(|_| ""),
            _ => None,
        }
    }

    pub fn app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or_default()
    }

    pub fn public_address(&self) -> &str {
        self.public_address.as_deref().unwrap_or_default()
    }
}

/// Ports arrive as integers, numeric strings, empty strings or null.
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(n)) => u16::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("port out of range: {}", n))),
        Some(Port::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Port::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", s))),
    }
}
