use std::fmt;

use hostbus_net::ClientId;

/// Where an inbound call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The embedded local renderer, or no particular origin.
    Local,
    /// One network client.
    Client(ClientId),
}

impl Origin {
    /// The destination that reaches only this origin, for replies.
    pub fn reply_to(self) -> Destination {
        match self {
            Origin::Local => Destination::Local,
            Origin::Client(id) => Destination::Client(id),
        }
    }

    pub fn client(self) -> Option<ClientId> {
        match self {
            Origin::Local => None,
            Origin::Client(id) => Some(id),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Client(id) => write!(f, "{id}"),
        }
    }
}

/// Where an outbound event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The local renderer and every network client.
    All,
    /// The embedded local renderer only.
    Local,
    /// One network client.
    Client(ClientId),
}
