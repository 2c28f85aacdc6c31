//! ERC-721 enumeration over batched reads.

use alloy::primitives::{Address, U256};
use alloy::sol;
use serde::Serialize;

use super::{Contract, ReadPath};
use crate::config::consts::MAX_OWNED_TOKENS;
use crate::error::{Error, Result};

sol! {
    interface IERC721 {
        function ownerOf(uint256 tokenId) external view returns (address);
        function tokenURI(uint256 tokenId) external view returns (string);
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nft {
    pub token_id: U256,
    pub owner: Address,
    pub token_uri: String,
}

/// Tokens plus the path the reads went through. Sequential if any batch fell back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftPage {
    pub nfts: Vec<Nft>,
    pub path: ReadPath,
}

fn combine(a: ReadPath, b: ReadPath) -> ReadPath {
    match (a, b) {
        (ReadPath::Multicall, ReadPath::Multicall) => ReadPath::Multicall,
        _ => ReadPath::Sequential,
    }
}

impl<'a> Contract<'a> {
    async fn hydrate(&self, token_ids: Vec<U256>, owners: Option<Vec<Address>>) -> Result<NftPage> {
        let uri_calls: Vec<_> = token_ids
            .iter()
            .map(|id| IERC721::tokenURICall { tokenId: *id })
            .collect();
        let uris = self.read_batch(&uri_calls).await?;

        let (owners, path) = match owners {
            Some(owners) => (owners, uris.path),
            None => {
                let owner_calls: Vec<_> = token_ids
                    .iter()
                    .map(|id| IERC721::ownerOfCall { tokenId: *id })
                    .collect();
                let owners = self.read_batch(&owner_calls).await?;
                (owners.values, combine(uris.path, owners.path))
            }
        };

        let nfts = token_ids
            .into_iter()
            .zip(owners)
            .zip(uris.values)
            .map(|((token_id, owner), token_uri)| Nft {
                token_id,
                owner,
                token_uri,
            })
            .collect();
        Ok(NftPage { nfts, path })
    }

    /// Tokens with ids in `start..end`, at most [`MAX_OWNED_TOKENS`] of them.
    pub async fn get_all_721(&self, start: u64, end: u64) -> Result<NftPage> {
        if end < start {
            return Err(Error::InvalidInput(format!(
                "token range end {end} is before start {start}"
            )));
        }
        if end - start > MAX_OWNED_TOKENS {
            return Err(Error::InvalidInput(format!(
                "token range {start}..{end} exceeds {MAX_OWNED_TOKENS} tokens"
            )));
        }
        let token_ids = (start..end).map(U256::from).collect();
        self.hydrate(token_ids, None).await
    }

    /// Every token held by `owner`, via `tokenOfOwnerByIndex`.
    ///
    /// Balances above [`MAX_OWNED_TOKENS`] are rejected before any token is read.
    pub async fn get_owned_721(&self, owner: Address) -> Result<NftPage> {
        let balance = self.read(&IERC721::balanceOfCall { owner }).await?;
        let count = u64::try_from(balance)
            .ok()
            .filter(|count| *count <= MAX_OWNED_TOKENS)
            .ok_or_else(|| {
                Error::AbiMismatch(format!(
                    "balanceOf({owner}) returned {balance}, more than {MAX_OWNED_TOKENS} tokens"
                ))
            })?;

        let index_calls: Vec<_> = (0..count)
            .map(|i| IERC721::tokenOfOwnerByIndexCall {
                owner,
                index: U256::from(i),
            })
            .collect();
        let ids = self.read_batch(&index_calls).await?;

        let owners = vec![owner; ids.values.len()];
        let mut page = self.hydrate(ids.values, Some(owners)).await?;
        page.path = combine(page.path, ids.path);
        Ok(page)
    }
}
