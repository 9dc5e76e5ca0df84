use crate::constants;

/// Per-index parameters that can be changed for each wallet.
#[derive(Clone)]
pub struct Params {
    /// Identifier of the owning wallet. Every key written by the index is
    /// prefixed with this id so that many indexes can share one store.
    pub wallet_id: String,
    /// Capacity of the in-memory coin cache, in entries.
    pub coin_cache_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            wallet_id: "primary".to_string(),
            coin_cache_size: constants::DEFAULT_COIN_CACHE_SIZE,
        }
    }
}

impl Params {
    /// Parameters for the wallet with the given id.
    pub fn with_wallet_id(wallet_id: &str) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            ..Default::default()
        }
    }
}
