//! EIP-712 typed data for the closed set of messages the wallet core signs.
//!
//! Every schema is a `sol!` struct, so hashing goes through the same encoding the
//! verifying contract uses. [`TypedDataRequest`] is the tagged union handed to signing
//! strategies; [`TypedDataRequest::to_typed_data`] renders the JSON form external wallets
//! expect for `eth_signTypedData_v4`.
//!
//! Uid fields are opaque to this module. Callers supply them and the verifying contract
//! enforces uniqueness.

use alloy::dyn_abi::TypedData;
use alloy::primitives::{Address, Signature, B256, U256};
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use alloy::sol_types::{Eip712Domain, SolStruct};
use std::borrow::Cow;

use crate::config::consts::{
    ACCOUNT_DOMAIN_NAME, ACCOUNT_DOMAIN_VERSION, ZKSYNC_DOMAIN_NAME, ZKSYNC_DOMAIN_VERSION,
};
use crate::config::GaslessOptions;
use crate::error::{Error, Result};

pub mod schemas;

pub use schemas::account::{AccountMessage, SignerPermissionRequest};
pub use schemas::forwarder::ForwardRequest;
pub use schemas::zksync::Transaction as ZkSyncTransaction;
pub use schemas::FieldList;

pub fn build_domain(
    name: &str,
    version: &str,
    chain_id: u64,
    verifying_contract: Option<Address>,
) -> Eip712Domain {
    Eip712Domain::new(
        Some(Cow::Owned(name.to_string())),
        Some(Cow::Owned(version.to_string())),
        Some(U256::from(chain_id)),
        verifying_contract,
        None,
    )
}

/// Domain of the trusted forwarder used for gasless sends.
pub fn forwarder_domain(options: &GaslessOptions, chain_id: u64) -> Eip712Domain {
    build_domain(
        &options.domain_name,
        &options.domain_version,
        chain_id,
        Some(options.forwarder_address),
    )
}

/// Domain of a smart account, used for permission requests and personal messages.
pub fn account_domain(chain_id: u64, account: Address) -> Eip712Domain {
    build_domain(
        ACCOUNT_DOMAIN_NAME,
        ACCOUNT_DOMAIN_VERSION,
        chain_id,
        Some(account),
    )
}

pub fn zksync_domain(chain_id: u64) -> Eip712Domain {
    build_domain(ZKSYNC_DOMAIN_NAME, ZKSYNC_DOMAIN_VERSION, chain_id, None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    ForwardRequest,
    TokenErc20Mint,
    TokenErc721Mint,
    TokenErc1155Mint,
    SignerPermissionRequest,
    AccountMessage,
    ZkSyncTransaction,
}

impl Schema {
    pub const ALL: [Schema; 7] = [
        Schema::ForwardRequest,
        Schema::TokenErc20Mint,
        Schema::TokenErc721Mint,
        Schema::TokenErc1155Mint,
        Schema::SignerPermissionRequest,
        Schema::AccountMessage,
        Schema::ZkSyncTransaction,
    ];

    pub fn primary_type(&self) -> &'static str {
        match self {
            Schema::ForwardRequest => "ForwardRequest",
            Schema::TokenErc20Mint | Schema::TokenErc721Mint | Schema::TokenErc1155Mint => {
                "MintRequest"
            }
            Schema::SignerPermissionRequest => "SignerPermissionRequest",
            Schema::AccountMessage => "AccountMessage",
            Schema::ZkSyncTransaction => "Transaction",
        }
    }

    pub fn fields(&self) -> FieldList {
        match self {
            Schema::ForwardRequest => schemas::forwarder::FIELDS,
            Schema::TokenErc20Mint => schemas::token_erc20::FIELDS,
            Schema::TokenErc721Mint => schemas::token_erc721::FIELDS,
            Schema::TokenErc1155Mint => schemas::token_erc1155::FIELDS,
            Schema::SignerPermissionRequest => schemas::account::SIGNER_PERMISSION_FIELDS,
            Schema::AccountMessage => schemas::account::ACCOUNT_MESSAGE_FIELDS,
            Schema::ZkSyncTransaction => schemas::zksync::FIELDS,
        }
    }

    /// `Name(type field,...)` as hashed into the type hash.
    pub fn encode_type(&self) -> String {
        let fields: Vec<String> = self
            .fields()
            .iter()
            .map(|(name, ty)| format!("{ty} {name}"))
            .collect();
        format!("{}({})", self.primary_type(), fields.join(","))
    }
}

/// A message to be signed under one of the supported schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedDataRequest {
    Forward(ForwardRequest),
    TokenErc20Mint(schemas::token_erc20::MintRequest),
    TokenErc721Mint(schemas::token_erc721::MintRequest),
    TokenErc1155Mint(schemas::token_erc1155::MintRequest),
    SignerPermission(SignerPermissionRequest),
    AccountMessage(AccountMessage),
    ZkSyncTransaction(ZkSyncTransaction),
}

macro_rules! with_struct {
    ($request:expr, $inner:ident => $body:expr) => {
        match $request {
            TypedDataRequest::Forward($inner) => $body,
            TypedDataRequest::TokenErc20Mint($inner) => $body,
            TypedDataRequest::TokenErc721Mint($inner) => $body,
            TypedDataRequest::TokenErc1155Mint($inner) => $body,
            TypedDataRequest::SignerPermission($inner) => $body,
            TypedDataRequest::AccountMessage($inner) => $body,
            TypedDataRequest::ZkSyncTransaction($inner) => $body,
        }
    };
}

impl TypedDataRequest {
    pub fn schema(&self) -> Schema {
        match self {
            TypedDataRequest::Forward(_) => Schema::ForwardRequest,
            TypedDataRequest::TokenErc20Mint(_) => Schema::TokenErc20Mint,
            TypedDataRequest::TokenErc721Mint(_) => Schema::TokenErc721Mint,
            TypedDataRequest::TokenErc1155Mint(_) => Schema::TokenErc1155Mint,
            TypedDataRequest::SignerPermission(_) => Schema::SignerPermissionRequest,
            TypedDataRequest::AccountMessage(_) => Schema::AccountMessage,
            TypedDataRequest::ZkSyncTransaction(_) => Schema::ZkSyncTransaction,
        }
    }

    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        with_struct!(self, message => message.eip712_signing_hash(domain))
    }

    /// JSON typed data in the `eth_signTypedData_v4` layout.
    pub fn to_typed_data(&self, domain: &Eip712Domain) -> TypedData {
        with_struct!(self, message => TypedData::from_struct(message, Some(domain.clone())))
    }

    pub fn sign(&self, signer: &PrivateKeySigner, domain: &Eip712Domain) -> Result<Signature> {
        Ok(signer.sign_hash_sync(&self.signing_hash(domain))?)
    }

    pub fn recover(&self, domain: &Eip712Domain, signature: &[u8]) -> Result<Address> {
        let signature = parse_signature(signature)?;
        signature
            .recover_address_from_prehash(&self.signing_hash(domain))
            .map_err(|e| Error::Signer(e.to_string()))
    }

    pub fn verify(&self, domain: &Eip712Domain, signature: &[u8], expected: Address) -> bool {
        self.recover(domain, signature)
            .map(|recovered| recovered == expected)
            .unwrap_or(false)
    }
}

impl From<ForwardRequest> for TypedDataRequest {
    fn from(value: ForwardRequest) -> Self {
        TypedDataRequest::Forward(value)
    }
}

impl From<SignerPermissionRequest> for TypedDataRequest {
    fn from(value: SignerPermissionRequest) -> Self {
        TypedDataRequest::SignerPermission(value)
    }
}

impl From<AccountMessage> for TypedDataRequest {
    fn from(value: AccountMessage) -> Self {
        TypedDataRequest::AccountMessage(value)
    }
}

/// A request bound to the domain it will be verified under.
#[derive(Debug, Clone)]
pub struct TypedMessage {
    pub domain: Eip712Domain,
    pub request: TypedDataRequest,
}

impl TypedMessage {
    pub fn new(domain: Eip712Domain, request: impl Into<TypedDataRequest>) -> Self {
        Self {
            domain,
            request: request.into(),
        }
    }

    pub fn signing_hash(&self) -> B256 {
        self.request.signing_hash(&self.domain)
    }

    pub fn to_typed_data(&self) -> TypedData {
        self.request.to_typed_data(&self.domain)
    }
}

/// Parse a 65 byte `r || s || v` signature, accepting v as 0/1 or 27/28.
pub fn parse_signature(signature: &[u8]) -> Result<Signature> {
    Signature::try_from(signature).map_err(|e| Error::Signer(format!("invalid signature: {e}")))
}
