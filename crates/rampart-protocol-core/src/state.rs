use std::fmt;

/// The state of a Minecraft protocol connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Handshake,
    Status,
    Login,
    /// Only exists for protocols >= 1.20.2.
    Config,
    Play,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Handshake,
        State::Status,
        State::Login,
        State::Config,
        State::Play,
    ];
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Handshake => "handshake",
            State::Status => "status",
            State::Login => "login",
            State::Config => "config",
            State::Play => "play",
        })
    }
}

/// Which way a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    ServerBound,
    /// Server to client.
    ClientBound,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::ServerBound => Direction::ClientBound,
            Direction::ClientBound => Direction::ServerBound,
        }
    }
}

/// Handshake intent (`next` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Status,
    Login,
    Transfer,
}

impl Intent {
    pub fn from_handshake_next(next: i32) -> Option<Self> {
        match next {
            1 => Some(Intent::Status),
            2 => Some(Intent::Login),
            3 => Some(Intent::Transfer),
            _ => None,
        }
    }

    pub fn as_next(self) -> i32 {
        match self {
            Intent::Status => 1,
            Intent::Login => 2,
            Intent::Transfer => 3,
        }
    }
}
