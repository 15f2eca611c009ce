use std::fmt;

/// A Minecraft protocol version number as sent in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Protocol(pub i32);

/// A known protocol revision and the game versions that speak it.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub protocol: Protocol,
    pub names: &'static [&'static str],
}

impl Protocol {
    pub const UNKNOWN: Protocol = Protocol(0);
    pub const LEGACY: Protocol = Protocol(-2);

    pub const V1_7_2: Protocol = Protocol(4);
    pub const V1_7_6: Protocol = Protocol(5);
    pub const V1_8: Protocol = Protocol(47);
    pub const V1_9: Protocol = Protocol(107);
    pub const V1_9_1: Protocol = Protocol(108);
    pub const V1_9_2: Protocol = Protocol(109);
    pub const V1_9_4: Protocol = Protocol(110);
    pub const V1_10: Protocol = Protocol(210);
    pub const V1_11: Protocol = Protocol(315);
    pub const V1_11_1: Protocol = Protocol(316);
    pub const V1_12: Protocol = Protocol(335);
    pub const V1_12_1: Protocol = Protocol(338);
    pub const V1_12_2: Protocol = Protocol(340);
    pub const V1_13: Protocol = Protocol(393);
    pub const V1_13_1: Protocol = Protocol(401);
    pub const V1_13_2: Protocol = Protocol(404);
    pub const V1_14: Protocol = Protocol(477);
    pub const V1_14_1: Protocol = Protocol(480);
    pub const V1_14_2: Protocol = Protocol(485);
    pub const V1_14_3: Protocol = Protocol(490);
    pub const V1_14_4: Protocol = Protocol(498);
    pub const V1_15: Protocol = Protocol(573);
    pub const V1_15_1: Protocol = Protocol(575);
    pub const V1_15_2: Protocol = Protocol(578);
    pub const V1_16: Protocol = Protocol(735);
    pub const V1_16_1: Protocol = Protocol(736);
    pub const V1_16_2: Protocol = Protocol(751);
    pub const V1_16_3: Protocol = Protocol(753);
    pub const V1_16_4: Protocol = Protocol(754);
    pub const V1_17: Protocol = Protocol(755);
    pub const V1_17_1: Protocol = Protocol(756);
    pub const V1_18: Protocol = Protocol(757);
    pub const V1_18_2: Protocol = Protocol(758);
    pub const V1_19: Protocol = Protocol(759);
    pub const V1_19_1: Protocol = Protocol(760);
    pub const V1_19_3: Protocol = Protocol(761);
    pub const V1_19_4: Protocol = Protocol(762);
    pub const V1_20: Protocol = Protocol(763);
    pub const V1_20_2: Protocol = Protocol(764);
    pub const V1_20_3: Protocol = Protocol(765);
    pub const V1_20_5: Protocol = Protocol(766);
    pub const V1_21: Protocol = Protocol(767);
    pub const V1_21_2: Protocol = Protocol(768);
    pub const V1_21_4: Protocol = Protocol(769);

    pub const MINIMUM: Protocol = Protocol::V1_7_2;
    pub const MAXIMUM: Protocol = Protocol::V1_21_4;

    /// Sentinels are never registered and never resolve through fallback.
    pub fn is_sentinel(self) -> bool {
        self == Protocol::UNKNOWN || self == Protocol::LEGACY
    }

    pub fn is_supported(self) -> bool {
        version(self).is_some()
    }

    pub fn version(self) -> Option<&'static Version> {
        version(self)
    }

    /// First game version name, e.g. "1.20.3" for 765.
    pub fn name(self) -> &'static str {
        match version(self) {
            Some(v) => v.names[0],
            None if self == Protocol::LEGACY => "Legacy",
            None => "Unknown",
        }
    }

    /// Inclusive range check, `lo <= self <= hi`.
    pub fn between(self, lo: Protocol, hi: Protocol) -> bool {
        self >= lo && self <= hi
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

macro_rules! v {
    ($p:ident, $($name:literal),+) => {
        Version { protocol: Protocol::$p, names: &[$($name),+] }
    };
}

/// Every supported revision, oldest first.
pub static SUPPORTED_VERSIONS: &[Version] = &[
    v!(V1_7_2, "1.7.2"),
    v!(V1_7_6, "1.7.6", "1.7.7", "1.7.8", "1.7.9", "1.7.10"),
    v!(V1_8, "1.8", "1.8.1", "1.8.2", "1.8.3", "1.8.4", "1.8.5", "1.8.6", "1.8.7", "1.8.8", "1.8.9"),
    v!(V1_9, "1.9"),
    v!(V1_9_1, "1.9.1"),
    v!(V1_9_2, "1.9.2"),
    v!(V1_9_4, "1.9.3", "1.9.4"),
    v!(V1_10, "1.10", "1.10.1", "1.10.2"),
    v!(V1_11, "1.11"),
    v!(V1_11_1, "1.11.1", "1.11.2"),
    v!(V1_12, "1.12"),
    v!(V1_12_1, "1.12.1"),
    v!(V1_12_2, "1.12.2"),
    v!(V1_13, "1.13"),
    v!(V1_13_1, "1.13.1"),
    v!(V1_13_2, "1.13.2"),
    v!(V1_14, "1.14"),
    v!(V1_14_1, "1.14.1"),
    v!(V1_14_2, "1.14.2"),
    v!(V1_14_3, "1.14.3"),
    v!(V1_14_4, "1.14.4"),
    v!(V1_15, "1.15"),
    v!(V1_15_1, "1.15.1"),
    v!(V1_15_2, "1.15.2"),
    v!(V1_16, "1.16"),
    v!(V1_16_1, "1.16.1"),
    v!(V1_16_2, "1.16.2"),
    v!(V1_16_3, "1.16.3"),
    v!(V1_16_4, "1.16.4", "1.16.5"),
    v!(V1_17, "1.17"),
    v!(V1_17_1, "1.17.1"),
    v!(V1_18, "1.18", "1.18.1"),
    v!(V1_18_2, "1.18.2"),
    v!(V1_19, "1.19"),
    v!(V1_19_1, "1.19.1", "1.19.2"),
    v!(V1_19_3, "1.19.3"),
    v!(V1_19_4, "1.19.4"),
    v!(V1_20, "1.20", "1.20.1"),
    v!(V1_20_2, "1.20.2"),
    v!(V1_20_3, "1.20.3", "1.20.4"),
    v!(V1_20_5, "1.20.5", "1.20.6"),
    v!(V1_21, "1.21", "1.21.1"),
    v!(V1_21_2, "1.21.2", "1.21.3"),
    v!(V1_21_4, "1.21.4"),
];

pub fn version(protocol: Protocol) -> Option<&'static Version> {
    SUPPORTED_VERSIONS
        .binary_search_by(|v| v.protocol.cmp(&protocol))
        .ok()
        .map(|i| &SUPPORTED_VERSIONS[i])
}

/// Supported protocols in `[from, to]`, in order.
pub fn range(from: Protocol, to: Protocol) -> impl Iterator<Item = Protocol> {
    SUPPORTED_VERSIONS
        .iter()
        .map(|v| v.protocol)
        .filter(move |p| *p >= from && *p <= to)
}

/// "1.7.2-1.21.4", used in status responses and outdated-client kicks.
pub fn supported_range_string() -> String {
    let last = SUPPORTED_VERSIONS[SUPPORTED_VERSIONS.len() - 1].names;
    format!(
        "{}-{}",
        SUPPORTED_VERSIONS[0].names[0],
        last[last.len() - 1]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_sorted_and_unique() {
        for pair in SUPPORTED_VERSIONS.windows(2) {
            assert!(pair[0].protocol < pair[1].protocol);
        }
        assert_eq!(SUPPORTED_VERSIONS[0].protocol, Protocol::MINIMUM);
        assert_eq!(
            SUPPORTED_VERSIONS[SUPPORTED_VERSIONS.len() - 1].protocol,
            Protocol::MAXIMUM
        );
    }

    #[test]
    fn test_lookup() {
        assert_eq!(Protocol(765).name(), "1.20.3");
        assert_eq!(Protocol(754).version().unwrap().names, &["1.16.4", "1.16.5"]);
        assert!(!Protocol(0).is_supported());
        assert!(!Protocol(500).is_supported());
        assert_eq!(Protocol::UNKNOWN.name(), "Unknown");
        assert!(Protocol::LEGACY.is_sentinel());
    }

    #[test]
    fn test_range() {
        let r: Vec<_> = range(Protocol::V1_19, Protocol::V1_19_4).collect();
        assert_eq!(
            r,
            vec![
                Protocol::V1_19,
                Protocol::V1_19_1,
                Protocol::V1_19_3,
                Protocol::V1_19_4
            ]
        );
        assert_eq!(supported_range_string(), "1.7.2-1.21.4");
    }
}
