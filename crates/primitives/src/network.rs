//! Dogecoin networks and their Base58 version bytes.

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Regtest];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Self::Mainnet),
            "testnet" | "test" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    pub const fn pubkey_hash_prefix(self) -> u8 {
        match self {
            Self::Mainnet => 0x1e,
            Self::Testnet | Self::Regtest => 0x71,
        }
    }

    pub const fn script_hash_prefix(self) -> u8 {
        match self {
            Self::Mainnet => 0x16,
            Self::Testnet | Self::Regtest => 0xc4,
        }
    }

    pub const fn default_rpc_port(self) -> u16 {
        match self {
            Self::Mainnet => 22555,
            Self::Testnet => 44555,
            Self::Regtest => 18332,
        }
    }
}
