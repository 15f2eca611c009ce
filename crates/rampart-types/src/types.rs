use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A player's game profile (UUID + name + properties).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    #[serde(rename = "id", with = "undashed_uuid")]
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl GameProfile {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Profile used when a player is not authenticated: the UUID is
    /// derived from the name, so it is stable across sessions.
    pub fn offline(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(offline_uuid(&name), name)
    }

    /// The profile id without dashes, as Mojang and BungeeCord expect it.
    pub fn undashed_id(&self) -> String {
        self.uuid.simple().to_string()
    }

    pub fn with_property(mut self, property: ProfileProperty) -> Self {
        self.properties.push(property);
        self
    }
}

impl ProfileProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            signature: None,
        }
    }
}

/// UUIDv3 of `OfflinePlayer:<name>` in the nil namespace.
pub fn offline_uuid(name: &str) -> Uuid {
    Uuid::new_v3(&Uuid::nil(), format!("OfflinePlayer:{}", name).as_bytes())
}

/// Mojang returns ids without dashes; accept both when reading.
mod undashed_uuid {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(uuid: &Uuid, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&uuid.simple().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Uuid, D::Error> {
        let s = String::deserialize(d)?;
        Uuid::parse_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Text component for chat and disconnect messages (simplified JSON text).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextComponent {
    #[serde(default)]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub translate: Option<String>,
    #[serde(rename = "with", skip_serializing_if = "Vec::is_empty", default)]
    pub args: Vec<TextComponent>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extra: Vec<TextComponent>,
}

impl TextComponent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A translatable component rendered client-side from `key` and `args`.
    pub fn translatable(key: impl Into<String>, args: Vec<TextComponent>) -> Self {
        Self {
            translate: Some(key.into()),
            args,
            ..Default::default()
        }
    }

    pub fn colored(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn append(mut self, child: TextComponent) -> Self {
        self.extra.push(child);
        self
    }

    /// Lenient parse of a JSON text component as sent by servers.
    /// Plain strings and arrays are accepted; unknown fields are dropped.
    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::plain(json),
        }
    }

    fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::plain(s),
            serde_json::Value::Array(items) => {
                let mut items = items.into_iter().map(Self::from_value);
                let mut first = items.next().unwrap_or_default();
                first.extra.extend(items);
                first
            }
            serde_json::Value::Object(_) => {
                serde_json::from_value(value).unwrap_or_else(|_| Self::plain(""))
            }
            other => Self::plain(other.to_string()),
        }
    }

    /// Concatenated visible text, translation keys included verbatim.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        if let Some(key) = &self.translate {
            out.push_str(key);
        }
        for child in &self.extra {
            child.collect_text(out);
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"text":""}"#.to_string())
    }
}
