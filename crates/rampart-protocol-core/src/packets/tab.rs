use super::{CodecContext, PacketCodec, PublicKeyData};
use crate::codec::*;
use crate::component::ComponentHolder;
use crate::version::Protocol;
use bytes::{BufMut, BytesMut};
use rampart_types::{ProfileProperty, TextComponent};
use uuid::Uuid;

fn read_opt_component(buf: &mut BytesMut, p: Protocol) -> CodecResult<Option<ComponentHolder>> {
    if read_bool(buf)? {
        Ok(Some(ComponentHolder::read(buf, p)?))
    } else {
        Ok(None)
    }
}

fn write_opt_component(c: &Option<ComponentHolder>, buf: &mut BytesMut, p: Protocol) {
    match c {
        Some(c) => {
            buf.put_u8(1);
            c.write(buf, p);
        }
        None => buf.put_u8(0),
    }
}

pub const LEGACY_ADD_PLAYER: i32 = 0;
pub const LEGACY_UPDATE_GAMEMODE: i32 = 1;
pub const LEGACY_UPDATE_LATENCY: i32 = 2;
pub const LEGACY_UPDATE_DISPLAY_NAME: i32 = 3;
pub const LEGACY_REMOVE_PLAYER: i32 = 4;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyPlayerListEntry {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
    pub gamemode: i32,
    pub latency: i32,
    pub display_name: Option<ComponentHolder>,
    pub player_key: Option<PublicKeyData>,
}

/// Tab list updates up to 1.19.2. On 1.7 entries are keyed by name only.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPlayerListItem {
    pub action: i32,
    pub items: Vec<LegacyPlayerListEntry>,
}

impl PacketCodec for LegacyPlayerListItem {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        if p < Protocol::V1_8 {
            let name = read_string(buf, DEFAULT_MAX_STRING)?;
            let online = read_bool(buf)?;
            let latency = read_i16(buf)? as i32;
            return Ok(Self {
                action: if online {
                    LEGACY_ADD_PLAYER
                } else {
                    LEGACY_REMOVE_PLAYER
                },
                items: vec![LegacyPlayerListEntry {
                    name,
                    latency,
                    ..Default::default()
                }],
            });
        }
        let action = read_varint(buf)?;
        let count = read_len(buf)?;
        let mut items = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let mut item = LegacyPlayerListEntry {
                uuid: read_uuid(buf)?,
                ..Default::default()
            };
            match action {
                LEGACY_ADD_PLAYER => {
                    item.name = read_string(buf, 16)?;
                    item.properties = read_properties(buf)?;
                    item.gamemode = read_varint(buf)?;
                    item.latency = read_varint(buf)?;
                    item.display_name = read_opt_component(buf, p)?;
                    if p >= Protocol::V1_19 && read_bool(buf)? {
                        item.player_key = Some(PublicKeyData {
                            expires_at: read_i64(buf)?,
                            key: read_byte_array_max(buf, 512)?,
                            signature: read_byte_array_max(buf, 4096)?,
                        });
                    }
                }
                LEGACY_UPDATE_GAMEMODE => item.gamemode = read_varint(buf)?,
                LEGACY_UPDATE_LATENCY => item.latency = read_varint(buf)?,
                LEGACY_UPDATE_DISPLAY_NAME => item.display_name = read_opt_component(buf, p)?,
                LEGACY_REMOVE_PLAYER => {}
                other => {
                    return Err(CodecError::BadData(format!(
                        "unknown player list action {}",
                        other
                    )))
                }
            }
            items.push(item);
        }
        Ok(Self { action, items })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        let p = ctx.protocol;
        if p < Protocol::V1_8 {
            let (name, latency) = self
                .items
                .first()
                .map(|i| (i.name.as_str(), i.latency))
                .unwrap_or(("", 0));
            write_string(buf, name);
            buf.put_u8((self.action != LEGACY_REMOVE_PLAYER) as u8);
            buf.put_i16(latency as i16);
            return;
        }
        write_varint(buf, self.action);
        write_varint(buf, self.items.len() as i32);
        for item in &self.items {
            write_uuid(buf, &item.uuid);
            match self.action {
                LEGACY_ADD_PLAYER => {
                    write_string(buf, &item.name);
                    write_properties(buf, &item.properties);
                    write_varint(buf, item.gamemode);
                    write_varint(buf, item.latency);
                    write_opt_component(&item.display_name, buf, p);
                    if p >= Protocol::V1_19 {
                        match &item.player_key {
                            Some(key) => {
                                buf.put_u8(1);
                                buf.put_i64(key.expires_at);
                                write_byte_array(buf, &key.key);
                                write_byte_array(buf, &key.signature);
                            }
                            None => buf.put_u8(0),
                        }
                    }
                }
                LEGACY_UPDATE_GAMEMODE => write_varint(buf, item.gamemode),
                LEGACY_UPDATE_LATENCY => write_varint(buf, item.latency),
                LEGACY_UPDATE_DISPLAY_NAME => write_opt_component(&item.display_name, buf, p),
                _ => {}
            }
        }
    }
}

/// Action flags of the 1.19.3+ player info packet.
pub mod info_action {
    pub const ADD_PLAYER: u8 = 0x01;
    pub const INITIALIZE_CHAT: u8 = 0x02;
    pub const UPDATE_GAMEMODE: u8 = 0x04;
    pub const UPDATE_LISTED: u8 = 0x08;
    pub const UPDATE_LATENCY: u8 = 0x10;
    pub const UPDATE_DISPLAY_NAME: u8 = 0x20;
    /// 1.21.2+
    pub const UPDATE_LIST_ORDER: u8 = 0x40;
    /// 1.21.4+
    pub const UPDATE_HAT: u8 = 0x80;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSessionData {
    pub session_id: Uuid,
    pub key: PublicKeyData,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertPlayerEntry {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
    pub chat_session: Option<ChatSessionData>,
    pub gamemode: i32,
    pub listed: bool,
    pub latency: i32,
    pub display_name: Option<ComponentHolder>,
    pub list_order: i32,
    pub show_hat: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertPlayerInfo {
    pub actions: u8,
    pub entries: Vec<UpsertPlayerEntry>,
}

impl UpsertPlayerInfo {
    pub fn contains(&self, action: u8) -> bool {
        self.actions & action != 0
    }
}

impl PacketCodec for UpsertPlayerInfo {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        use info_action::*;
        let p = ctx.protocol;
        let actions = read_u8(buf)?;
        let count = read_len(buf)?;
        let mut entries = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let mut e = UpsertPlayerEntry {
                uuid: read_uuid(buf)?,
                ..Default::default()
            };
            if actions & ADD_PLAYER != 0 {
                e.name = read_string(buf, 16)?;
                e.properties = read_properties(buf)?;
            }
            if actions & INITIALIZE_CHAT != 0 && read_bool(buf)? {
                e.chat_session = Some(ChatSessionData {
                    session_id: read_uuid(buf)?,
                    key: PublicKeyData {
                        expires_at: read_i64(buf)?,
                        key: read_byte_array_max(buf, 512)?,
                        signature: read_byte_array_max(buf, 4096)?,
                    },
                });
            }
            if actions & UPDATE_GAMEMODE != 0 {
                e.gamemode = read_varint(buf)?;
            }
            if actions & UPDATE_LISTED != 0 {
                e.listed = read_bool(buf)?;
            }
            if actions & UPDATE_LATENCY != 0 {
                e.latency = read_varint(buf)?;
            }
            if actions & UPDATE_DISPLAY_NAME != 0 {
                e.display_name = read_opt_component(buf, p)?;
            }
            if p >= Protocol::V1_21_2 && actions & UPDATE_LIST_ORDER != 0 {
                e.list_order = read_varint(buf)?;
            }
            if p >= Protocol::V1_21_4 && actions & UPDATE_HAT != 0 {
                e.show_hat = read_bool(buf)?;
            }
            entries.push(e);
        }
        Ok(Self { actions, entries })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        use info_action::*;
        let p = ctx.protocol;
        buf.put_u8(self.actions);
        write_varint(buf, self.entries.len() as i32);
        for e in &self.entries {
            write_uuid(buf, &e.uuid);
            if self.contains(ADD_PLAYER) {
                write_string(buf, &e.name);
                write_properties(buf, &e.properties);
            }
            if self.contains(INITIALIZE_CHAT) {
                match &e.chat_session {
                    Some(session) => {
                        buf.put_u8(1);
                        write_uuid(buf, &session.session_id);
                        buf.put_i64(session.key.expires_at);
                        write_byte_array(buf, &session.key.key);
                        write_byte_array(buf, &session.key.signature);
                    }
                    None => buf.put_u8(0),
                }
            }
            if self.contains(UPDATE_GAMEMODE) {
                write_varint(buf, e.gamemode);
            }
            if self.contains(UPDATE_LISTED) {
                buf.put_u8(e.listed as u8);
            }
            if self.contains(UPDATE_LATENCY) {
                write_varint(buf, e.latency);
            }
            if self.contains(UPDATE_DISPLAY_NAME) {
                write_opt_component(&e.display_name, buf, p);
            }
            if p >= Protocol::V1_21_2 && self.contains(UPDATE_LIST_ORDER) {
                write_varint(buf, e.list_order);
            }
            if p >= Protocol::V1_21_4 && self.contains(UPDATE_HAT) {
                buf.put_u8(e.show_hat as u8);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovePlayerInfo {
    pub players: Vec<Uuid>,
}

impl PacketCodec for RemovePlayerInfo {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let count = read_len(buf)?;
        let mut players = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            players.push(read_uuid(buf)?);
        }
        Ok(Self { players })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_varint(buf, self.players.len() as i32);
        for id in &self.players {
            write_uuid(buf, id);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderAndFooter {
    pub header: ComponentHolder,
    pub footer: ComponentHolder,
}

impl HeaderAndFooter {
    /// Clears both lines on the client.
    pub fn reset() -> Self {
        let empty = TextComponent::translatable("", Vec::new());
        Self {
            header: ComponentHolder::from(&empty),
            footer: ComponentHolder::from(&empty),
        }
    }
}

impl PacketCodec for HeaderAndFooter {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            header: ComponentHolder::read(buf, ctx.protocol)?,
            footer: ComponentHolder::read(buf, ctx.protocol)?,
        })
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        self.header.write(buf, ctx.protocol);
        self.footer.write(buf, ctx.protocol);
    }
}

/// Title actions using the 1.11+ numbering.
pub mod title_action {
    pub const SET_TITLE: i32 = 0;
    pub const SET_SUBTITLE: i32 = 1;
    pub const SET_ACTION_BAR: i32 = 2;
    pub const SET_TIMES: i32 = 3;
    pub const HIDE: i32 = 4;
    pub const RESET: i32 = 5;
}

/// The single multiplexed title packet used from 1.8 to 1.16.4.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyTitle {
    pub action: i32,
    pub component: Option<ComponentHolder>,
    pub fade_in: i32,
    pub stay: i32,
    pub fade_out: i32,
}

impl LegacyTitle {
    pub fn reset() -> Self {
        Self {
            action: title_action::RESET,
            component: None,
            fade_in: 0,
            stay: 0,
            fade_out: 0,
        }
    }
}

impl PacketCodec for LegacyTitle {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        use title_action::*;
        let mut action = read_varint(buf)?;
        // no action bar before 1.11, later actions are shifted down by one
        if ctx.protocol < Protocol::V1_11 && action >= SET_ACTION_BAR {
            action += 1;
        }
        let mut title = LegacyTitle {
            action,
            ..LegacyTitle::reset()
        };
        match action {
            SET_TITLE | SET_SUBTITLE | SET_ACTION_BAR => {
                title.component = Some(ComponentHolder::read(buf, ctx.protocol)?);
            }
            SET_TIMES => {
                title.fade_in = read_i32(buf)?;
                title.stay = read_i32(buf)?;
                title.fade_out = read_i32(buf)?;
            }
            _ => {}
        }
        Ok(title)
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        use title_action::*;
        let mut action = self.action;
        if ctx.protocol < Protocol::V1_11 && action > SET_ACTION_BAR {
            action -= 1;
        }
        write_varint(buf, action);
        match self.action {
            SET_TITLE | SET_SUBTITLE | SET_ACTION_BAR => {
                let empty = ComponentHolder::Json(r#"{"text":""}"#.into());
                self.component.as_ref().unwrap_or(&empty).write(buf, ctx.protocol);
            }
            SET_TIMES => {
                buf.put_i32(self.fade_in);
                buf.put_i32(self.stay);
                buf.put_i32(self.fade_out);
            }
            _ => {}
        }
    }
}

/// 1.17+ title clear; `reset` also restores default timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleClear {
    pub reset: bool,
}

impl PacketCodec for TitleClear {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            reset: read_bool(buf)?,
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        buf.put_u8(self.reset as u8);
    }
}

pub const BOSS_BAR_ADD: i32 = 0;
pub const BOSS_BAR_REMOVE: i32 = 1;

/// Boss bar update. Only the id and action are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BossBar {
    pub uuid: Uuid,
    pub action: i32,
    pub rest: Vec<u8>,
}

impl BossBar {
    pub fn remove(uuid: Uuid) -> Self {
        Self {
            uuid,
            action: BOSS_BAR_REMOVE,
            rest: Vec::new(),
        }
    }
}

impl PacketCodec for BossBar {
    fn decode(_ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        Ok(Self {
            uuid: read_uuid(buf)?,
            action: read_varint(buf)?,
            rest: read_remaining(buf),
        })
    }

    fn encode(&self, _ctx: &CodecContext, buf: &mut BytesMut) {
        write_uuid(buf, &self.uuid);
        write_varint(buf, self.action);
        buf.put_slice(&self.rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Direction, State};

    fn ctx(p: Protocol) -> CodecContext {
        CodecContext::new(p, Direction::ClientBound, State::Play)
    }

    #[test]
    fn test_legacy_title_reset_action_number() {
        let mut buf = BytesMut::new();
        LegacyTitle::reset().encode(&ctx(Protocol::V1_8), &mut buf);
        assert_eq!(read_varint(&mut buf).unwrap(), 4);

        let mut buf = BytesMut::new();
        LegacyTitle::reset().encode(&ctx(Protocol::V1_12_2), &mut buf);
        assert_eq!(read_varint(&mut buf).unwrap(), 5);

        let mut buf = BytesMut::new();
        write_varint(&mut buf, 4);
        let t = LegacyTitle::decode(&ctx(Protocol::V1_9), &mut buf).unwrap();
        assert_eq!(t.action, title_action::RESET);
    }

    #[test]
    fn test_legacy_player_list_add_and_remove() {
        let id = Uuid::new_v4();
        let add = LegacyPlayerListItem {
            action: LEGACY_ADD_PLAYER,
            items: vec![LegacyPlayerListEntry {
                uuid: id,
                name: "Bob".into(),
                gamemode: 1,
                latency: 30,
                display_name: Some(ComponentHolder::Json(r#"{"text":"B"}"#.into())),
                ..Default::default()
            }],
        };
        for p in [Protocol::V1_12_2, Protocol::V1_19_1] {
            let mut buf = BytesMut::new();
            add.encode(&ctx(p), &mut buf);
            assert_eq!(LegacyPlayerListItem::decode(&ctx(p), &mut buf).unwrap(), add);
            assert!(buf.is_empty());
        }

        let remove = LegacyPlayerListItem {
            action: LEGACY_REMOVE_PLAYER,
            items: vec![LegacyPlayerListEntry {
                uuid: id,
                ..Default::default()
            }],
        };
        let mut buf = BytesMut::new();
        remove.encode(&ctx(Protocol::V1_16_4), &mut buf);
        assert_eq!(buf.len(), 2 + 16);
    }

    #[test]
    fn test_upsert_player_info_actions() {
        use info_action::*;
        let info = UpsertPlayerInfo {
            actions: ADD_PLAYER | UPDATE_LISTED | UPDATE_LATENCY | UPDATE_LIST_ORDER,
            entries: vec![UpsertPlayerEntry {
                uuid: Uuid::new_v4(),
                name: "Carol".into(),
                listed: true,
                latency: 12,
                list_order: 3,
                ..Default::default()
            }],
        };
        let mut buf = BytesMut::new();
        info.encode(&ctx(Protocol::V1_21_2), &mut buf);
        assert_eq!(UpsertPlayerInfo::decode(&ctx(Protocol::V1_21_2), &mut buf).unwrap(), info);

        let mut buf = BytesMut::new();
        info.encode(&ctx(Protocol::V1_20_3), &mut buf);
        let back = UpsertPlayerInfo::decode(&ctx(Protocol::V1_20_3), &mut buf).unwrap();
        assert_eq!(back.entries[0].list_order, 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_boss_bar_keeps_tail() {
        let bar = BossBar {
            uuid: Uuid::new_v4(),
            action: BOSS_BAR_ADD,
            rest: vec![1, 2, 3],
        };
        let mut buf = BytesMut::new();
        bar.encode(&ctx(Protocol::V1_20_3), &mut buf);
        assert_eq!(BossBar::decode(&ctx(Protocol::V1_20_3), &mut buf).unwrap(), bar);
    }
}
