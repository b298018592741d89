use crate::{
    config::ContractConfig,
    contracts::{ICarbonToken, IForestToken, IMarketplace},
    error::{Result, WalletError},
    provider::ChainProvider,
    types::{BlockRange, ContractKind, Direction},
};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_rpc_types_eth::{Filter, TransactionRequest};
use alloy_sol_types::{SolCall, SolEvent};
use tracing::info;

/// Typed handles to the four fixed contracts, all bound to one account's
/// signer. Rebuilt wholesale on every account or chain transition; handles
/// from a previous session must never be patched or reused.
#[derive(Debug, Clone)]
pub struct ContractBindings<P> {
    account: Address,
    pub forest_token: ForestTokenHandle<P>,
    pub carbon_credit: TokenHandle<P>,
    pub stablecoin: TokenHandle<P>,
    pub marketplace: MarketplaceHandle<P>,
}

impl<P: ChainProvider> ContractBindings<P> {
    /// The account whose signer backs every handle in this set.
    #[must_use]
    pub const fn account(&self) -> Address {
        self.account
    }

    #[must_use]
    pub fn token(&self, kind: ContractKind) -> Option<&TokenHandle<P>> {
        match kind {
            ContractKind::Stablecoin => Some(&self.stablecoin),
            ContractKind::CarbonCredit => Some(&self.carbon_credit),
            ContractKind::ForestToken | ContractKind::Marketplace => None,
        }
    }
}

/// Builds the full set of contract handles for `(provider, account)`.
pub async fn build_bindings<P: ChainProvider>(
    provider: P,
    account: Address,
    contracts: &ContractConfig,
) -> Result<ContractBindings<P>> {
    let signer = provider
        .signer_account(account)
        .await
        .map_err(|e| WalletError::Binding(e.to_string()))?;

    info!("initializing contract bindings for {signer}");

    Ok(ContractBindings {
        account: signer,
        forest_token: ForestTokenHandle {
            target: CallTarget::new(contracts.forest_token, signer, provider.clone()),
        },
        carbon_credit: TokenHandle {
            kind: ContractKind::CarbonCredit,
            target: CallTarget::new(contracts.carbon_credit, signer, provider.clone()),
        },
        stablecoin: TokenHandle {
            kind: ContractKind::Stablecoin,
            target: CallTarget::new(contracts.stablecoin, signer, provider.clone()),
        },
        marketplace: MarketplaceHandle {
            target: CallTarget::new(contracts.marketplace, signer, provider),
        },
    })
}

/// Shared call/send plumbing for one contract address and one signer.
#[derive(Debug, Clone)]
struct CallTarget<P> {
    address: Address,
    account: Address,
    provider: P,
}

impl<P: ChainProvider> CallTarget<P> {
    const fn new(address: Address, account: Address, provider: P) -> Self {
        Self {
            address,
            account,
            provider,
        }
    }

    async fn call(&self, data: Vec<u8>) -> Result<Bytes> {
        self.provider.call(self.address, data.into()).await
    }

    async fn send(&self, data: Vec<u8>) -> Result<TxHash> {
        let request = TransactionRequest {
            from: Some(self.account),
            to: Some(self.address.into()),
            input: Bytes::from(data).into(),
            ..Default::default()
        };
        self.provider.send_transaction(request).await
    }
}

/// ERC-20 handle for the stablecoin and carbon-credit tokens.
#[derive(Debug, Clone)]
pub struct TokenHandle<P> {
    kind: ContractKind,
    target: CallTarget<P>,
}

impl<P: ChainProvider> TokenHandle<P> {
    #[must_use]
    pub const fn kind(&self) -> ContractKind {
        self.kind
    }

    #[must_use]
    pub const fn address(&self) -> Address {
        self.target.address
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256> {
        let data = ICarbonToken::balanceOfCall { owner }.abi_encode();
        let raw = self.target.call(data).await?;
        ICarbonToken::balanceOfCall::abi_decode_returns(&raw)
            .map_err(|e| WalletError::Decode(e.to_string()))
    }

    pub async fn transfer(&self, to: Address, value: U256) -> Result<TxHash> {
        let data = ICarbonToken::transferCall { to, value }.abi_encode();
        self.target.send(data).await
    }

    pub async fn approve(&self, spender: Address, value: U256) -> Result<TxHash> {
        let data = ICarbonToken::approveCall { spender, value }.abi_encode();
        self.target.send(data).await
    }

    /// Historical `Transfer` filter with the bound account pinned on the
    /// sent or received side.
    #[must_use]
    pub fn transfer_filter(&self, direction: Direction, range: BlockRange) -> Filter {
        let account_topic = self.target.account.into_word();
        let filter = Filter::new()
            .address(self.target.address)
            .event_signature(ICarbonToken::Transfer::SIGNATURE_HASH)
            .from_block(range.from)
            .to_block(range.to);
        match direction {
            Direction::Sent => filter.topic1(account_topic),
            Direction::Received => filter.topic2(account_topic),
        }
    }

    /// Live `Transfer` filter over the whole contract, both directions.
    #[must_use]
    pub fn transfer_event_filter(&self) -> Filter {
        Filter::new()
            .address(self.target.address)
            .event_signature(ICarbonToken::Transfer::SIGNATURE_HASH)
    }
}

/// Handle for the forest parcel token.
#[derive(Debug, Clone)]
pub struct ForestTokenHandle<P> {
    target: CallTarget<P>,
}

impl<P: ChainProvider> ForestTokenHandle<P> {
    #[must_use]
    pub const fn address(&self) -> Address {
        self.target.address
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256> {
        let data = IForestToken::balanceOfCall { owner }.abi_encode();
        let raw = self.target.call(data).await?;
        IForestToken::balanceOfCall::abi_decode_returns(&raw)
            .map_err(|e| WalletError::Decode(e.to_string()))
    }

    /// Mints a new parcel; subject to the contract's owner access control.
    pub async fn mint_parcel(
        &self,
        to: Address,
        token_id: U256,
        metadata: String,
        yield_amount: U256,
    ) -> Result<TxHash> {
        let data = IForestToken::mintParcelCall {
            to,
            tokenId: token_id,
            metadata,
            yieldAmount: yield_amount,
        }
        .abi_encode();
        self.target.send(data).await
    }
}

/// Handle for the marketplace escrow contract.
#[derive(Debug, Clone)]
pub struct MarketplaceHandle<P> {
    target: CallTarget<P>,
}

impl<P: ChainProvider> MarketplaceHandle<P> {
    #[must_use]
    pub const fn address(&self) -> Address {
        self.target.address
    }

    pub async fn list_token(&self, token_id: U256, amount: U256, price: U256) -> Result<TxHash> {
        let data = IMarketplace::listTokenCall {
            tokenId: token_id,
            amount,
            price,
        }
        .abi_encode();
        self.target.send(data).await
    }

    pub async fn buy_token(&self, listing_id: U256, amount: U256) -> Result<TxHash> {
        let data = IMarketplace::buyTokenCall {
            listingId: listing_id,
            amount,
        }
        .abi_encode();
        self.target.send(data).await
    }

    pub async fn cancel_listing(&self, listing_id: U256) -> Result<TxHash> {
        let data = IMarketplace::cancelListingCall {
            listingId: listing_id,
        }
        .abi_encode();
        self.target.send(data).await
    }
}
