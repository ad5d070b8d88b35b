use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::error::UpstreamError;
use crate::models::Hash;
use crate::rpc::JsonRpcClient;

/// Blockhash plus the last block height at which it is still accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Ledger queries the chain state tracker depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_slot(&self) -> Result<u64, UpstreamError>;

    async fn get_latest_blockhash(&self) -> Result<RecentBlockhash, UpstreamError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashValue {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

/// Solana JSON-RPC client at `confirmed` commitment.
pub struct RpcChainClient {
    rpc: JsonRpcClient,
}

impl RpcChainClient {
    pub fn new(rpc_url: Url) -> Result<Self, UpstreamError> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, Duration::from_secs(10))?,
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_slot(&self) -> Result<u64, UpstreamError> {
        self.rpc
            .call("getSlot", [json!({ "commitment": "confirmed" })])
            .await
    }

    async fn get_latest_blockhash(&self) -> Result<RecentBlockhash, UpstreamError> {
        let response: WithContext<BlockhashValue> = self
            .rpc
            .call("getLatestBlockhash", [json!({ "commitment": "confirmed" })])
            .await?;

        parse_blockhash(response.value)
    }
}

fn parse_blockhash(value: BlockhashValue) -> Result<RecentBlockhash, UpstreamError> {
    let blockhash = value
        .blockhash
        .parse::<Hash>()
        .map_err(|e| UpstreamError::Decode {
            method: "getLatestBlockhash".to_string(),
            reason: e.to_string(),
        })?;

    Ok(RecentBlockhash {
        blockhash,
        last_valid_block_height: value.last_valid_block_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_blockhash_response_decodes() {
        let raw = r#"{
            "context": { "slot": 2792 },
            "value": {
                "blockhash": "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N",
                "lastValidBlockHeight": 3090
            }
        }"#;
        let response: WithContext<BlockhashValue> = serde_json::from_str(raw).unwrap();
        let recent = parse_blockhash(response.value).unwrap();
        assert_eq!(recent.last_valid_block_height, 3090);
        assert_eq!(
            recent.blockhash.to_string(),
            "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N"
        );
    }

    #[test]
    fn test_invalid_blockhash_is_decode_error() {
        let err = parse_blockhash(BlockhashValue {
            blockhash: "not-base58!".to_string(),
            last_valid_block_height: 1,
        })
        .unwrap_err();
        assert!(matches!(err, UpstreamError::Decode { .. }));
    }
}
