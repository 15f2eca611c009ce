use crate::codec::{read_string, write_string, CodecError, CodecResult};
use crate::version::Protocol;
use bytes::BytesMut;
use rampart_nbt::NbtValue;
use rampart_types::TextComponent;

const MAX_JSON_COMPONENT: usize = 262144;

/// A chat component as it travels on the wire: JSON text before 1.20.3,
/// a nameless NBT compound from 1.20.3 on. The original form is kept so
/// forwarding does not re-serialize.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentHolder {
    Json(String),
    Nbt(NbtValue),
}

impl ComponentHolder {
    pub fn read(buf: &mut BytesMut, protocol: Protocol) -> CodecResult<Self> {
        if protocol >= Protocol::V1_20_3 {
            let nbt = NbtValue::read_root(buf, false)?
                .ok_or_else(|| CodecError::BadData("empty component".into()))?;
            return Ok(ComponentHolder::Nbt(nbt));
        }
        Ok(ComponentHolder::Json(read_string(buf, MAX_JSON_COMPONENT)?))
    }

    pub fn write(&self, buf: &mut BytesMut, protocol: Protocol) {
        if protocol >= Protocol::V1_20_3 {
            self.to_nbt().write_root_network(buf);
        } else {
            write_string(buf, &self.to_json_string());
        }
    }

    pub fn to_json_string(&self) -> String {
        match self {
            ComponentHolder::Json(s) => s.clone(),
            ComponentHolder::Nbt(n) => n.to_json().to_string(),
        }
    }

    pub fn to_nbt(&self) -> NbtValue {
        match self {
            ComponentHolder::Nbt(n) => n.clone(),
            ComponentHolder::Json(s) => match serde_json::from_str::<serde_json::Value>(s) {
                Ok(v) => NbtValue::from_json(&v),
                Err(_) => NbtValue::Compound(vec![("text".into(), NbtValue::String(s.clone()))]),
            },
        }
    }

    pub fn to_text(&self) -> TextComponent {
        TextComponent::from_json(&self.to_json_string())
    }
}

impl From<&TextComponent> for ComponentHolder {
    fn from(c: &TextComponent) -> Self {
        ComponentHolder::Json(c.to_json())
    }
}

impl From<TextComponent> for ComponentHolder {
    fn from(c: TextComponent) -> Self {
        ComponentHolder::Json(c.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_before_1_20_3() {
        let holder = ComponentHolder::from(TextComponent::plain("bye"));
        let mut buf = BytesMut::new();
        holder.write(&mut buf, Protocol::V1_20_2);
        let back = ComponentHolder::read(&mut buf, Protocol::V1_20_2).unwrap();
        assert_eq!(back.to_text().plain_text(), "bye");
    }

    #[test]
    fn test_nbt_from_1_20_3() {
        let holder = ComponentHolder::from(TextComponent::plain("bye").colored("red"));
        let mut buf = BytesMut::new();
        holder.write(&mut buf, Protocol::V1_20_3);
        // network NBT starts with the compound tag, no name
        assert_eq!(buf[0], 10);
        let back = ComponentHolder::read(&mut buf, Protocol::V1_20_3).unwrap();
        let text = back.to_text();
        assert_eq!(text.text, "bye");
        assert_eq!(text.color.as_deref(), Some("red"));
    }
}
