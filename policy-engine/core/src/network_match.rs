use ipnet::IpNet;
use std::net::IpAddr;

/// Matches an address against a set of networks, e.g. an authorization policy's `ipBlocks`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetworkMatch {
    /// A network to match against.
    pub net: IpNet,

    /// Networks to exclude from the match.
    pub except: Vec<IpNet>,
}

// === impl NetworkMatch ===

impl NetworkMatch {
    /// Parses a CIDR or a bare address, which is treated as a single-host network.
    pub fn parse(s: &str) -> Result<Self, ipnet::AddrParseError> {
        match s.parse::<IpNet>() {
            Ok(net) => Ok(net.into()),
            Err(error) => s.parse::<IpAddr>().map(Into::into).map_err(|_| error),
        }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.net.contains(&addr) && !self.except.iter().any(|net| net.contains(&addr))
    }
}

impl From<IpAddr> for NetworkMatch {
    fn from(net: IpAddr) -> Self {
        IpNet::from(net).into()
    }
}

impl From<IpNet> for NetworkMatch {
    fn from(net: IpNet) -> Self {
        Self {
            net,
            except: vec![],
        }
    }
}
