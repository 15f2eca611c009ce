use super::{CodecContext, PacketCodec};
use crate::codec::*;
use crate::version::Protocol;
use bytes::{BufMut, BytesMut};
use rampart_nbt::NbtValue;

/// Dimension identity on 1.16+.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionInfo {
    pub registry_identifier: String,
    pub level_name: Option<String>,
    pub is_flat: bool,
    pub is_debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathPosition {
    pub dimension: String,
    pub position: i64,
}

impl DeathPosition {
    fn read(buf: &mut BytesMut) -> CodecResult<Option<Self>> {
        if !read_bool(buf)? {
            return Ok(None);
        }
        Ok(Some(Self {
            dimension: read_string(buf, DEFAULT_MAX_STRING)?,
            position: read_i64(buf)?,
        }))
    }

    fn write(pos: &Option<Self>, buf: &mut BytesMut) {
        match pos {
            Some(pos) => {
                buf.put_u8(1);
                write_string(buf, &pos.dimension);
                buf.put_i64(pos.position);
            }
            None => buf.put_u8(0),
        }
    }
}

fn read_compound(buf: &mut BytesMut, protocol: Protocol) -> CodecResult<NbtValue> {
    let named = protocol < Protocol::V1_20_2;
    Ok(NbtValue::read_root(buf, named)?.unwrap_or(NbtValue::Compound(Vec::new())))
}

fn write_compound(nbt: &Option<NbtValue>, buf: &mut BytesMut, protocol: Protocol) {
    let empty = NbtValue::Compound(Vec::new());
    let nbt = nbt.as_ref().unwrap_or(&empty);
    if protocol < Protocol::V1_20_2 {
        nbt.write_root_named("", buf);
    } else {
        nbt.write_root_network(buf);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinGame {
    pub entity_id: i32,
    pub gamemode: i16,
    pub hardcore: bool,
    /// Numeric dimension before 1.16, dimension type id from 1.20.5.
    pub dimension: i32,
    pub partial_hashed_seed: i64,
    pub difficulty: u8,
    pub max_players: i32,
    pub level_type: Option<String>,
    pub view_distance: i32,
    pub reduced_debug_info: bool,
    pub show_respawn_screen: bool,
    pub do_limited_crafting: bool,
    pub level_names: Vec<String>,
    pub registry: Option<NbtValue>,
    pub dimension_info: Option<DimensionInfo>,
    /// 1.16.2 - 1.18.2 carry the full dimension type inline.
    pub current_dimension_data: Option<NbtValue>,
    pub previous_gamemode: i16,
    pub simulation_distance: i32,
    pub last_death_position: Option<DeathPosition>,
    pub portal_cooldown: i32,
    pub sea_level: i32,
    pub enforces_secure_chat: bool,
}

impl JoinGame {
    fn decode_legacy(&mut self, p: Protocol, buf: &mut BytesMut) -> CodecResult<()> {
        self.entity_id = read_i32(buf)?;
        let gamemode = read_u8(buf)? as i16;
        self.hardcore = gamemode & 0x08 != 0;
        self.gamemode = gamemode & !0x08;
        self.dimension = if p >= Protocol::V1_9_1 {
            read_i32(buf)?
        } else {
            read_i8(buf)? as i32
        };
        if p <= Protocol::V1_13_2 {
            self.difficulty = read_u8(buf)?;
        }
        if p >= Protocol::V1_15 {
            self.partial_hashed_seed = read_i64(buf)?;
        }
        self.max_players = read_u8(buf)? as i32;
        self.level_type = Some(read_string(buf, 16)?);
        if p >= Protocol::V1_14 {
            self.view_distance = read_varint(buf)?;
        }
        if p >= Protocol::V1_8 {
            self.reduced_debug_info = read_bool(buf)?;
        }
        if p >= Protocol::V1_15 {
            self.show_respawn_screen = read_bool(buf)?;
        }
        Ok(())
    }

    fn encode_legacy(&self, p: Protocol, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        let mut gamemode = self.gamemode as u8;
        if self.hardcore {
            gamemode |= 0x08;
        }
        buf.put_u8(gamemode);
        if p >= Protocol::V1_9_1 {
            buf.put_i32(self.dimension);
        } else {
            buf.put_i8(self.dimension as i8);
        }
        if p <= Protocol::V1_13_2 {
            buf.put_u8(self.difficulty);
        }
        if p >= Protocol::V1_15 {
            buf.put_i64(self.partial_hashed_seed);
        }
        buf.put_u8(self.max_players as u8);
        write_string(buf, self.level_type.as_deref().unwrap_or("default"));
        if p >= Protocol::V1_14 {
            write_varint(buf, self.view_distance);
        }
        if p >= Protocol::V1_8 {
            buf.put_u8(self.reduced_debug_info as u8);
        }
        if p >= Protocol::V1_15 {
            buf.put_u8(self.show_respawn_screen as u8);
        }
    }

    fn decode_116(&mut self, p: Protocol, buf: &mut BytesMut) -> CodecResult<()> {
        self.entity_id = read_i32(buf)?;
        if p >= Protocol::V1_16_2 {
            self.hardcore = read_bool(buf)?;
            self.gamemode = read_u8(buf)? as i16;
        } else {
            let gamemode = read_u8(buf)? as i16;
            self.hardcore = gamemode & 0x08 != 0;
            self.gamemode = gamemode & !0x08;
        }
        self.previous_gamemode = read_i8(buf)? as i16;
        self.level_names = read_string_array(buf)?;
        self.registry = Some(read_compound(buf, p)?);
        let (identifier, level_name) = if p >= Protocol::V1_16_2 && p < Protocol::V1_19 {
            self.current_dimension_data = Some(read_compound(buf, p)?);
            (read_string(buf, DEFAULT_MAX_STRING)?, None)
        } else {
            (
                read_string(buf, DEFAULT_MAX_STRING)?,
                Some(read_string(buf, DEFAULT_MAX_STRING)?),
            )
        };
        self.partial_hashed_seed = read_i64(buf)?;
        self.max_players = if p >= Protocol::V1_16_2 {
            read_varint(buf)?
        } else {
            read_u8(buf)? as i32
        };
        self.view_distance = read_varint(buf)?;
        if p >= Protocol::V1_18 {
            self.simulation_distance = read_varint(buf)?;
        }
        self.reduced_debug_info = read_bool(buf)?;
        self.show_respawn_screen = read_bool(buf)?;
        let is_debug = read_bool(buf)?;
        let is_flat = read_bool(buf)?;
        self.dimension_info = Some(DimensionInfo {
            registry_identifier: identifier,
            level_name,
            is_flat,
            is_debug,
        });
        if p >= Protocol::V1_19 {
            self.last_death_position = DeathPosition::read(buf)?;
        }
        if p >= Protocol::V1_20 {
            self.portal_cooldown = read_varint(buf)?;
        }
        Ok(())
    }

    fn encode_116(&self, p: Protocol, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        if p >= Protocol::V1_16_2 {
            buf.put_u8(self.hardcore as u8);
            buf.put_u8(self.gamemode as u8);
        } else {
            let mut gamemode = self.gamemode as u8;
            if self.hardcore {
                gamemode |= 0x08;
            }
            buf.put_u8(gamemode);
        }
        buf.put_i8(self.previous_gamemode as i8);
        write_string_array(buf, &self.level_names);
        write_compound(&self.registry, buf, p);
        let info = self.dimension_info.clone().unwrap_or_default();
        if p >= Protocol::V1_16_2 && p < Protocol::V1_19 {
            write_compound(&self.current_dimension_data, buf, p);
            write_string(buf, &info.registry_identifier);
        } else {
            write_string(buf, &info.registry_identifier);
            write_string(buf, info.level_name.as_deref().unwrap_or_default());
        }
        buf.put_i64(self.partial_hashed_seed);
        if p >= Protocol::V1_16_2 {
            write_varint(buf, self.max_players);
        } else {
            buf.put_u8(self.max_players as u8);
        }
        write_varint(buf, self.view_distance);
        if p >= Protocol::V1_18 {
            write_varint(buf, self.simulation_distance);
        }
        buf.put_u8(self.reduced_debug_info as u8);
        buf.put_u8(self.show_respawn_screen as u8);
        buf.put_u8(info.is_debug as u8);
        buf.put_u8(info.is_flat as u8);
        if p >= Protocol::V1_19 {
            DeathPosition::write(&self.last_death_position, buf);
        }
        if p >= Protocol::V1_20 {
            write_varint(buf, self.portal_cooldown);
        }
    }

    fn decode_1202(&mut self, p: Protocol, buf: &mut BytesMut) -> CodecResult<()> {
        self.entity_id = read_i32(buf)?;
        self.hardcore = read_bool(buf)?;
        self.level_names = read_string_array(buf)?;
        self.max_players = read_varint(buf)?;
        self.view_distance = read_varint(buf)?;
        self.simulation_distance = read_varint(buf)?;
        self.reduced_debug_info = read_bool(buf)?;
        self.show_respawn_screen = read_bool(buf)?;
        self.do_limited_crafting = read_bool(buf)?;
        let mut identifier = String::new();
        if p >= Protocol::V1_20_5 {
            self.dimension = read_varint(buf)?;
        } else {
            identifier = read_string(buf, DEFAULT_MAX_STRING)?;
        }
        let level_name = read_string(buf, DEFAULT_MAX_STRING)?;
        self.partial_hashed_seed = read_i64(buf)?;
        self.gamemode = read_u8(buf)? as i16;
        self.previous_gamemode = read_i8(buf)? as i16;
        let is_debug = read_bool(buf)?;
        let is_flat = read_bool(buf)?;
        self.dimension_info = Some(DimensionInfo {
            registry_identifier: identifier,
            level_name: Some(level_name),
            is_flat,
            is_debug,
        });
        self.last_death_position = DeathPosition::read(buf)?;
        self.portal_cooldown = read_varint(buf)?;
        if p >= Protocol::V1_21_2 {
            self.sea_level = read_varint(buf)?;
        }
        if p >= Protocol::V1_20_5 {
            self.enforces_secure_chat = read_bool(buf)?;
        }
        Ok(())
    }

    fn encode_1202(&self, p: Protocol, buf: &mut BytesMut) {
        buf.put_i32(self.entity_id);
        buf.put_u8(self.hardcore as u8);
        write_string_array(buf, &self.level_names);
        write_varint(buf, self.max_players);
        write_varint(buf, self.view_distance);
        write_varint(buf, self.simulation_distance);
        buf.put_u8(self.reduced_debug_info as u8);
        buf.put_u8(self.show_respawn_screen as u8);
        buf.put_u8(self.do_limited_crafting as u8);
        let info = self.dimension_info.clone().unwrap_or_default();
        if p >= Protocol::V1_20_5 {
            write_varint(buf, self.dimension);
        } else {
            write_string(buf, &info.registry_identifier);
        }
        write_string(buf, info.level_name.as_deref().unwrap_or_default());
        buf.put_i64(self.partial_hashed_seed);
        buf.put_u8(self.gamemode as u8);
        buf.put_i8(self.previous_gamemode as i8);
        buf.put_u8(info.is_debug as u8);
        buf.put_u8(info.is_flat as u8);
        DeathPosition::write(&self.last_death_position, buf);
        write_varint(buf, self.portal_cooldown);
        if p >= Protocol::V1_21_2 {
            write_varint(buf, self.sea_level);
        }
        if p >= Protocol::V1_20_5 {
            buf.put_u8(self.enforces_secure_chat as u8);
        }
    }
}

impl PacketCodec for JoinGame {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        let mut join = JoinGame::default();
        if p >= Protocol::V1_20_2 {
            join.decode_1202(p, buf)?;
        } else if p >= Protocol::V1_16 {
            join.decode_116(p, buf)?;
        } else {
            join.decode_legacy(p, buf)?;
        }
        Ok(join)
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        let p = ctx.protocol;
        if p >= Protocol::V1_20_2 {
            self.encode_1202(p, buf);
        } else if p >= Protocol::V1_16 {
            self.encode_116(p, buf);
        } else {
            self.encode_legacy(p, buf);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Respawn {
    pub dimension: i32,
    pub partial_hashed_seed: i64,
    pub difficulty: u8,
    pub gamemode: i16,
    pub level_type: String,
    pub data_to_keep: u8,
    pub dimension_info: Option<DimensionInfo>,
    pub previous_gamemode: i16,
    pub current_dimension_data: Option<NbtValue>,
    pub last_death_position: Option<DeathPosition>,
    pub portal_cooldown: i32,
    pub sea_level: i32,
}

impl Respawn {
    /// The respawn that moves a client into the world described by `join`.
    pub fn from_join_game(join: &JoinGame) -> Self {
        Self {
            dimension: join.dimension,
            partial_hashed_seed: join.partial_hashed_seed,
            difficulty: join.difficulty,
            gamemode: join.gamemode,
            level_type: join.level_type.clone().unwrap_or_else(|| "default".into()),
            data_to_keep: 0,
            dimension_info: join.dimension_info.clone(),
            previous_gamemode: join.previous_gamemode,
            current_dimension_data: join.current_dimension_data.clone(),
            last_death_position: join.last_death_position.clone(),
            portal_cooldown: join.portal_cooldown,
            sea_level: join.sea_level,
        }
    }
}

impl PacketCodec for Respawn {
    fn decode(ctx: &CodecContext, buf: &mut BytesMut) -> CodecResult<Self> {
        let p = ctx.protocol;
        let mut r = Respawn::default();
        let mut identifier = String::new();
        let mut level_name = None;
        if p >= Protocol::V1_16 {
            if p >= Protocol::V1_16_2 && p < Protocol::V1_19 {
                r.current_dimension_data = Some(read_compound(buf, p)?);
                identifier = read_string(buf, DEFAULT_MAX_STRING)?;
            } else {
                if p >= Protocol::V1_20_5 {
                    r.dimension = read_varint(buf)?;
                } else {
                    identifier = read_string(buf, DEFAULT_MAX_STRING)?;
                }
                level_name = Some(read_string(buf, DEFAULT_MAX_STRING)?);
            }
        } else {
            r.dimension = read_i32(buf)?;
        }
        if p <= Protocol::V1_13_2 {
            r.difficulty = read_u8(buf)?;
        }
        if p >= Protocol::V1_15 {
            r.partial_hashed_seed = read_i64(buf)?;
        }
        r.gamemode = read_u8(buf)? as i16;
        if p >= Protocol::V1_16 {
            r.previous_gamemode = read_i8(buf)? as i16;
            let is_debug = read_bool(buf)?;
            let is_flat = read_bool(buf)?;
            r.dimension_info = Some(DimensionInfo {
                registry_identifier: identifier,
                level_name,
                is_flat,
                is_debug,
            });
            if p < Protocol::V1_19_3 {
                r.data_to_keep = read_bool(buf)? as u8;
            } else if p < Protocol::V1_20_2 {
                r.data_to_keep = read_u8(buf)?;
            }
        } else {
            r.level_type = read_string(buf, 16)?;
        }
        if p >= Protocol::V1_19 {
            r.last_death_position = DeathPosition::read(buf)?;
        }
        if p >= Protocol::V1_20 {
            r.portal_cooldown = read_varint(buf)?;
        }
        if p >= Protocol::V1_21_2 {
            r.sea_level = read_varint(buf)?;
        }
        if p >= Protocol::V1_20_2 {
            r.data_to_keep = read_u8(buf)?;
        }
        Ok(r)
    }

    fn encode(&self, ctx: &CodecContext, buf: &mut BytesMut) {
        let p = ctx.protocol;
        let info = self.dimension_info.clone().unwrap_or_default();
        if p >= Protocol::V1_16 {
            if p >= Protocol::V1_16_2 && p < Protocol::V1_19 {
                write_compound(&self.current_dimension_data, buf, p);
                write_string(buf, &info.registry_identifier);
            } else {
                if p >= Protocol::V1_20_5 {
                    write_varint(buf, self.dimension);
                } else {
                    write_string(buf, &info.registry_identifier);
                }
                write_string(buf, info.level_name.as_deref().unwrap_or_default());
            }
        } else {
            buf.put_i32(self.dimension);
        }
        if p <= Protocol::V1_13_2 {
            buf.put_u8(self.difficulty);
        }
        if p >= Protocol::V1_15 {
            buf.put_i64(self.partial_hashed_seed);
        }
        buf.put_u8(self.gamemode as u8);
        if p >= Protocol::V1_16 {
            buf.put_i8(self.previous_gamemode as i8);
            buf.put_u8(info.is_debug as u8);
            buf.put_u8(info.is_flat as u8);
            if p < Protocol::V1_19_3 {
                buf.put_u8((self.data_to_keep != 0) as u8);
            } else if p < Protocol::V1_20_2 {
                buf.put_u8(self.data_to_keep);
            }
        } else {
            write_string(buf, &self.level_type);
        }
        if p >= Protocol::V1_19 {
            DeathPosition::write(&self.last_death_position, buf);
        }
        if p >= Protocol::V1_20 {
            write_varint(buf, self.portal_cooldown);
        }
        if p >= Protocol::V1_21_2 {
            write_varint(buf, self.sea_level);
        }
        if p >= Protocol::V1_20_2 {
            buf.put_u8(self.data_to_keep);
        }
    }
}
