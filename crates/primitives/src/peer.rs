use libp2p_identity::PeerId;
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};

/// A peer address record as exchanged by the announce/lookup protocols
/// (spec.md §6 "peer_info").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "ID", with = "peer_id_serde")]
    pub id: PeerId,
    #[serde(rename = "Addrs")]
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    #[must_use]
    pub const fn new(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }
}

mod peer_id_serde {
    use libp2p_identity::PeerId;
    use serde::de::Error as SerdeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(peer_id: &PeerId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&peer_id.to_base58())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PeerId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| D::Error::custom("invalid peer id"))
    }
}

#[cfg(test)]
mod tests {
    use libp2p_identity::Keypair;

    use super::*;

    #[test]
    fn peer_info_json_round_trips() {
        let id = Keypair::generate_ed25519().public().to_peer_id();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let info = PeerInfo::new(id, vec![addr]);

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"ID\""));
        assert!(json.contains("\"Addrs\""));

        let decoded: PeerInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, info);
    }
}
