//! Tracks what the current backend has added to the client's tab list and
//! boss bar overlay, so a server switch can remove it again.

use parking_lot::Mutex;
use rampart_protocol_core::{
    info_action, BossBar, LegacyPlayerListEntry, LegacyPlayerListItem, Packet, Protocol,
    RemovePlayerInfo, BOSS_BAR_ADD, BOSS_BAR_REMOVE, LEGACY_ADD_PLAYER, LEGACY_REMOVE_PLAYER,
};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Default)]
struct Tracked {
    /// (id, name); 1.7 entries have a nil id and are keyed by name.
    entries: HashSet<(Uuid, String)>,
    boss_bars: HashSet<Uuid>,
}

#[derive(Default)]
pub struct TabList {
    tracked: Mutex<Tracked>,
}

impl TabList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a clientbound packet from the backend.
    pub fn observe(&self, packet: &Packet) {
        let mut tracked = self.tracked.lock();
        match packet {
            Packet::LegacyPlayerListItem(list) => match list.action {
                LEGACY_ADD_PLAYER => {
                    for item in &list.items {
                        tracked.entries.insert((item.uuid, item.name.clone()));
                    }
                }
                LEGACY_REMOVE_PLAYER => {
                    for item in &list.items {
                        if item.uuid.is_nil() {
                            tracked.entries.retain(|(_, name)| *name != item.name);
                        } else {
                            tracked.entries.retain(|(id, _)| *id != item.uuid);
                        }
                    }
                }
                _ => {}
            },
            Packet::UpsertPlayerInfo(info) if info.contains(info_action::ADD_PLAYER) => {
                for entry in &info.entries {
                    tracked.entries.insert((entry.uuid, entry.name.clone()));
                }
            }
            Packet::RemovePlayerInfo(remove) => {
                let gone: HashSet<&Uuid> = remove.players.iter().collect();
                tracked.entries.retain(|(id, _)| !gone.contains(id));
            }
            Packet::BossBar(bar) => match bar.action {
                BOSS_BAR_ADD => {
                    tracked.boss_bars.insert(bar.uuid);
                }
                BOSS_BAR_REMOVE => {
                    tracked.boss_bars.remove(&bar.uuid);
                }
                _ => {}
            },
            _ => {}
        }
    }

    pub fn entry_count(&self) -> usize {
        self.tracked.lock().entries.len()
    }

    /// Packets that remove every tracked tab entry, and forget them.
    pub fn clear_packets(&self, protocol: Protocol) -> Vec<Packet> {
        let entries = std::mem::take(&mut self.tracked.lock().entries);
        if entries.is_empty() {
            return Vec::new();
        }
        if protocol >= Protocol::V1_19_3 {
            return vec![RemovePlayerInfo {
                players: entries.into_iter().map(|(id, _)| id).collect(),
            }
            .into()];
        }
        let items: Vec<LegacyPlayerListEntry> = entries
            .into_iter()
            .map(|(uuid, name)| LegacyPlayerListEntry {
                uuid,
                name,
                ..Default::default()
            })
            .collect();
        if protocol < Protocol::V1_8 {
            // one entry per packet on 1.7
            return items
                .into_iter()
                .map(|item| {
                    LegacyPlayerListItem {
                        action: LEGACY_REMOVE_PLAYER,
                        items: vec![item],
                    }
                    .into()
                })
                .collect();
        }
        vec![LegacyPlayerListItem {
            action: LEGACY_REMOVE_PLAYER,
            items,
        }
        .into()]
    }

    /// Removal packets for every boss bar the backend added.
    pub fn clear_boss_bars(&self) -> Vec<Packet> {
        std::mem::take(&mut self.tracked.lock().boss_bars)
            .into_iter()
            .map(|id| BossBar::remove(id).into())
            .collect()
    }
}
