//! Solidity definitions of every typed message the wallet core signs.
//!
//! Field order and types are fixed by the verifying contracts' type hashes. Each schema
//! also exposes its field list as a constant so callers (and tests) can inspect the
//! exact layout without going through the ABI machinery.

use alloy::sol;

pub type FieldList = &'static [(&'static str, &'static str)];

pub mod forwarder {
    use super::*;

    sol! {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct ForwardRequest {
            address from;
            address to;
            uint256 value;
            uint256 gas;
            uint256 nonce;
            bytes data;
        }
    }

    pub const FIELDS: FieldList = &[
        ("from", "address"),
        ("to", "address"),
        ("value", "uint256"),
        ("gas", "uint256"),
        ("nonce", "uint256"),
        ("data", "bytes"),
    ];
}

pub mod token_erc20 {
    use super::*;

    sol! {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct MintRequest {
            address to;
            address primarySaleRecipient;
            uint256 quantity;
            uint256 price;
            address currency;
            uint128 validityStartTimestamp;
            uint128 validityEndTimestamp;
            bytes32 uid;
        }
    }

    pub const FIELDS: FieldList = &[
        ("to", "address"),
        ("primarySaleRecipient", "address"),
        ("quantity", "uint256"),
        ("price", "uint256"),
        ("currency", "address"),
        ("validityStartTimestamp", "uint128"),
        ("validityEndTimestamp", "uint128"),
        ("uid", "bytes32"),
    ];
}

pub mod token_erc721 {
    use super::*;

    sol! {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct MintRequest {
            address to;
            address royaltyRecipient;
            uint256 royaltyBps;
            address primarySaleRecipient;
            string uri;
            uint256 price;
            address currency;
            uint128 validityStartTimestamp;
            uint128 validityEndTimestamp;
            bytes32 uid;
        }
    }

    pub const FIELDS: FieldList = &[
        ("to", "address"),
        ("royaltyRecipient", "address"),
        ("royaltyBps", "uint256"),
        ("primarySaleRecipient", "address"),
        ("uri", "string"),
        ("price", "uint256"),
        ("currency", "address"),
        ("validityStartTimestamp", "uint128"),
        ("validityEndTimestamp", "uint128"),
        ("uid", "bytes32"),
    ];
}

pub mod token_erc1155 {
    use super::*;

    sol! {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct MintRequest {
            address to;
            address royaltyRecipient;
            uint256 royaltyBps;
            address primarySaleRecipient;
            uint256 tokenId;
            string uri;
            uint256 quantity;
            uint256 pricePerToken;
            address currency;
            uint128 validityStartTimestamp;
            uint128 validityEndTimestamp;
            bytes32 uid;
        }
    }

    pub const FIELDS: FieldList = &[
        ("to", "address"),
        ("royaltyRecipient", "address"),
        ("royaltyBps", "uint256"),
        ("primarySaleRecipient", "address"),
        ("tokenId", "uint256"),
        ("uri", "string"),
        ("quantity", "uint256"),
        ("pricePerToken", "uint256"),
        ("currency", "address"),
        ("validityStartTimestamp", "uint128"),
        ("validityEndTimestamp", "uint128"),
        ("uid", "bytes32"),
    ];
}

pub mod account {
    use super::*;

    sol! {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct SignerPermissionRequest {
            address signer;
            uint8 isAdmin;
            address[] approvedTargets;
            uint256 nativeTokenLimitPerTransaction;
            uint128 permissionStartTimestamp;
            uint128 permissionEndTimestamp;
            uint128 reqValidityStartTimestamp;
            uint128 reqValidityEndTimestamp;
            bytes32 uid;
        }

        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct AccountMessage {
            bytes message;
        }
    }

    pub const SIGNER_PERMISSION_FIELDS: FieldList = &[
        ("signer", "address"),
        ("isAdmin", "uint8"),
        ("approvedTargets", "address[]"),
        ("nativeTokenLimitPerTransaction", "uint256"),
        ("permissionStartTimestamp", "uint128"),
        ("permissionEndTimestamp", "uint128"),
        ("reqValidityStartTimestamp", "uint128"),
        ("reqValidityEndTimestamp", "uint128"),
        ("uid", "bytes32"),
    ];

    pub const ACCOUNT_MESSAGE_FIELDS: FieldList = &[("message", "bytes")];
}

pub mod zksync {
    use super::*;

    sol! {
        #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct Transaction {
            uint256 txType;
            uint256 from;
            uint256 to;
            uint256 gasLimit;
            uint256 gasPerPubdataByteLimit;
            uint256 maxFeePerGas;
            uint256 maxPriorityFeePerGas;
            uint256 paymaster;
            uint256 nonce;
            uint256 value;
            bytes data;
            bytes32[] factoryDeps;
            bytes paymasterInput;
        }
    }

    pub const FIELDS: FieldList = &[
        ("txType", "uint256"),
        ("from", "uint256"),
        ("to", "uint256"),
        ("gasLimit", "uint256"),
        ("gasPerPubdataByteLimit", "uint256"),
        ("maxFeePerGas", "uint256"),
        ("maxPriorityFeePerGas", "uint256"),
        ("paymaster", "uint256"),
        ("nonce", "uint256"),
        ("value", "uint256"),
        ("data", "bytes"),
        ("factoryDeps", "bytes32[]"),
        ("paymasterInput", "bytes"),
    ];
}
