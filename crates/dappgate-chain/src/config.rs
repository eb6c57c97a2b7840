//! Built-in chain table and public endpoints.
//!
//! Substrate chains list several community RPC providers; the first entry is
//! the default and the rest are used when an endpoint is unreachable.
//! Cardano endpoints point at Blockfrost and need a `project_id` query parameter.

use crate::chains::ChainInfo;
use dappgate_core::ChainFamily;

/// Get the RPC endpoints for a built-in chain.
pub fn get_rpc_endpoints(slug: &str) -> &'static [&'static str] {
    match slug {
        "ethereum" => &[
            "https://ethereum-rpc.publicnode.com",
            "https://eth.llamarpc.com",
            "https://rpc.ankr.com/eth",
        ],
        "sepolia" => &[
            "https://ethereum-sepolia-rpc.publicnode.com",
            "https://rpc.sepolia.org",
        ],
        "base" => &["https://mainnet.base.org", "https://base-rpc.publicnode.com"],
        "moonbeam" => &[
            "https://rpc.api.moonbeam.network",
            "wss://wss.api.moonbeam.network",
        ],
        "polkadot" => &[
            "wss://rpc.ibp.network/polkadot",
            "wss://polkadot.dotters.network",
            "wss://rpc-polkadot.luckyfriday.io",
            "wss://dot-rpc.stakeworld.io",
            "wss://polkadot-rpc.dwellir.com",
        ],
        "kusama" => &[
            "wss://rpc.ibp.network/kusama",
            "wss://kusama.dotters.network",
            "wss://rpc-kusama.luckyfriday.io",
            "wss://ksm-rpc.stakeworld.io",
            "wss://kusama-rpc.dwellir.com",
        ],
        "westend" => &[
            "wss://westend-rpc.polkadot.io",
            "wss://westend-rpc.dwellir.com",
            "wss://rpc.ibp.network/westend",
            "wss://westend.dotters.network",
        ],
        "asset-hub-polkadot" => &[
            "wss://polkadot-asset-hub-rpc.polkadot.io",
            "wss://rpc-asset-hub-polkadot.luckyfriday.io",
            "wss://sys.ibp.network/asset-hub-polkadot",
            "wss://asset-hub-polkadot-rpc.dwellir.com",
        ],
        "cardano" => &["https://cardano-mainnet.blockfrost.io/api/v0"],
        "cardano-preprod" => &["https://cardano-preprod.blockfrost.io/api/v0"],
        _ => &[],
    }
}

/// Get the light client chain spec URL for a built-in Substrate chain.
///
/// Use as `light:<url>` in an endpoint override.
pub fn get_chain_spec_url(slug: &str) -> Option<&'static str> {
    match slug {
        "polkadot" => Some(
            "https://raw.githubusercontent.com/paritytech/subxt/master/artifacts/demo_chain_specs/polkadot.json",
        ),
        "kusama" => Some("https://raw.githubusercontent.com/nickvntaele/chainspecs/main/kusama.json"),
        "westend" => Some("https://raw.githubusercontent.com/nickvntaele/chainspecs/main/westend.json"),
        _ => None,
    }
}

fn endpoints(slug: &str) -> Vec<String> {
    get_rpc_endpoints(slug).iter().map(|s| s.to_string()).collect()
}

fn evm(slug: &str, name: &str, chain_id: u64, symbol: &str, explorer: &str, active: bool) -> ChainInfo {
    ChainInfo {
        slug: slug.to_string(),
        name: name.to_string(),
        family: ChainFamily::Evm,
        evm_chain_id: Some(chain_id),
        genesis_hash: None,
        cardano_network_id: None,
        rpc_urls: endpoints(slug),
        explorer_urls: vec![explorer.to_string()],
        native_symbol: symbol.to_string(),
        native_decimals: 18,
        active,
        custom: false,
    }
}

fn substrate(slug: &str, name: &str, genesis: &str, symbol: &str, decimals: u8, active: bool) -> ChainInfo {
    ChainInfo {
        slug: slug.to_string(),
        name: name.to_string(),
        family: ChainFamily::Substrate,
        evm_chain_id: None,
        genesis_hash: Some(genesis.to_string()),
        cardano_network_id: None,
        rpc_urls: endpoints(slug),
        explorer_urls: Vec::new(),
        native_symbol: symbol.to_string(),
        native_decimals: decimals,
        active,
        custom: false,
    }
}

fn cardano(slug: &str, name: &str, network_id: u8, active: bool) -> ChainInfo {
    ChainInfo {
        slug: slug.to_string(),
        name: name.to_string(),
        family: ChainFamily::Cardano,
        evm_chain_id: None,
        genesis_hash: None,
        cardano_network_id: Some(network_id),
        rpc_urls: endpoints(slug),
        explorer_urls: vec!["https://cardanoscan.io".to_string()],
        native_symbol: "ADA".to_string(),
        native_decimals: 6,
        active,
        custom: false,
    }
}

/// The built-in chain table.
pub fn default_chains() -> Vec<ChainInfo> {
    vec![
        evm("ethereum", "Ethereum", 1, "ETH", "https://etherscan.io", true),
        evm("sepolia", "Sepolia", 11_155_111, "ETH", "https://sepolia.etherscan.io", false),
        evm("base", "Base", 8453, "ETH", "https://basescan.org", false),
        evm("moonbeam", "Moonbeam", 1284, "GLMR", "https://moonbeam.moonscan.io", false),
        substrate(
            "polkadot",
            "Polkadot",
            "0x91b171bb158e2d3848fa23a9f1c25182fb8e20313b2c1eb49219da7a70ce90c3",
            "DOT",
            10,
            true,
        ),
        substrate(
            "kusama",
            "Kusama",
            "0xb0a8d493285c2df73290dfb7e61f870f17b41801197a149ca93654499ea3dafe",
            "KSM",
            12,
            false,
        ),
        substrate(
            "westend",
            "Westend",
            "0xe143f23803ac50e8f6f8e62695d1ce9e4e1d68aa36c1cd2cfd15340213f3423e",
            "WND",
            12,
            false,
        ),
        substrate(
            "asset-hub-polkadot",
            "Polkadot Asset Hub",
            "0x68d56f15f85d3136970ec16946040bc1752654e906147f7e43e9d539d7c3de2f",
            "DOT",
            10,
            false,
        ),
        cardano("cardano", "Cardano", 1, true),
        cardano("cardano-preprod", "Cardano Preprod", 0, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_chain_has_endpoints() {
        for chain in default_chains() {
            assert!(!chain.rpc_urls.is_empty(), "{} has no endpoints", chain.slug);
        }
    }

    #[test]
    fn test_substrate_endpoints_are_websockets() {
        for slug in ["polkadot", "kusama", "westend", "asset-hub-polkadot"] {
            for url in get_rpc_endpoints(slug) {
                assert!(url.starts_with("wss://"), "{}", url);
            }
        }
    }

    #[test]
    fn test_unknown_slug() {
        assert!(get_rpc_endpoints("nope").is_empty());
        assert!(get_chain_spec_url("ethereum").is_none());
    }

    #[test]
    fn test_family_specific_ids() {
        for chain in default_chains() {
            match chain.family {
                ChainFamily::Evm => assert!(chain.evm_chain_id.is_some()),
                ChainFamily::Substrate => assert!(chain.genesis_hash.is_some()),
                ChainFamily::Cardano => assert!(chain.cardano_network_id.is_some()),
            }
        }
    }
}
