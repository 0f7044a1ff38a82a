//! Peer identity plus the addresses it can be dialed on.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A peer and the set of addresses it listens on.
pub struct AddrInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl AddrInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }

    /// Every address with the `/p2p/<peer-id>` suffix appended, the form
    /// written to bootstrap files.
    pub fn p2p_addrs(&self) -> Vec<Multiaddr> {
        self.addrs
            .iter()
            .map(|addr| addr.clone().with(Protocol::P2p(self.peer_id)))
            .collect()
    }

    /// Parse a list of p2p multiaddrs, merging addresses that belong to the
    /// same peer. Blank lines and lines that can't possibly be a multiaddr
    /// are skipped.
    pub fn parse_list<I, S>(lines: I) -> Result<Vec<AddrInfo>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut infos: Vec<AddrInfo> = Vec::new();

        for line in lines {
            let line = line.as_ref().trim();
            if line.split('/').count() < 4 {
                continue;
            }

            let parsed: AddrInfo = line.parse()?;

            match infos.iter_mut().find(|info| info.peer_id == parsed.peer_id) {
                Some(info) => info.addrs.extend(parsed.addrs),
                None => infos.push(parsed),
            }
        }

        Ok(infos)
    }
}

impl FromStr for AddrInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        #[cfg(feature = "legacy-ipfs-addrs")]
        let s = s.replace("/ipfs/", "/p2p/");

        let mut addr: Multiaddr = s
            .parse()
            .map_err(|error| Error::validation(format!("invalid multiaddr {s}: {error}")))?;

        match addr.pop() {
            Some(Protocol::P2p(peer_id)) => Ok(AddrInfo::new(peer_id, vec![addr])),
            _ => Err(Error::validation(format!(
                "multiaddr {s} does not end with /p2p/<peer-id>"
            ))),
        }
    }
}

impl Display for AddrInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: [", self.peer_id)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{addr}")?;
        }
        write!(f, "]}}")
    }
}
