use crate::config::ContractConfig;
use alloy_primitives::Address;
use alloy_sol_types::{sol, SolInterface};

/// Decimals declared by both fungible tokens.
pub const TOKEN_DECIMALS: u8 = 18;

sol! {
    /// ERC-20 surface shared by the stablecoin and the carbon-credit token.
    interface ICarbonToken {
        function balanceOf(address owner) external view returns (uint256);
        function transfer(address to, uint256 value) external returns (bool);
        function approve(address spender, uint256 value) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);

        #[derive(Debug, PartialEq, Eq)]
        event Transfer(address indexed from, address indexed to, uint256 value);

        #[derive(Debug, PartialEq, Eq)]
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }
}

sol! {
    interface IForestToken {
        function mintParcel(address to, uint256 tokenId, string metadata, uint256 yieldAmount) external;

        function balanceOf(address owner) external view returns (uint256);

        function owner() external view returns (address);

        #[derive(Debug, PartialEq, Eq)]
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

sol! {
    interface IMarketplace {
        function listToken(uint256 tokenId, uint256 amount, uint256 price) external;

        function buyToken(uint256 listingId, uint256 amount) external;

        function cancelListing(uint256 listingId) external;

        #[derive(Debug, PartialEq, Eq)]
        event TokenListed(uint256 indexed listingId, address indexed seller, uint256 amount, uint256 price);

        #[derive(Debug, PartialEq, Eq)]
        event TokenSold(uint256 indexed listingId, address indexed buyer, uint256 amount, uint256 price);
    }
}

fn erc20_method(input: &[u8]) -> Option<&'static str> {
    use ICarbonToken::ICarbonTokenCalls as Calls;
    Some(match Calls::abi_decode(input).ok()? {
        Calls::balanceOf(_) => "balanceOf",
        Calls::transfer(_) => "transfer",
        Calls::approve(_) => "approve",
        Calls::allowance(_) => "allowance",
    })
}

fn marketplace_method(input: &[u8]) -> Option<&'static str> {
    use IMarketplace::IMarketplaceCalls as Calls;
    Some(match Calls::abi_decode(input).ok()? {
        Calls::listToken(_) => "listToken",
        Calls::buyToken(_) => "buyToken",
        Calls::cancelListing(_) => "cancelListing",
    })
}

fn forest_method(input: &[u8]) -> Option<&'static str> {
    use IForestToken::IForestTokenCalls as Calls;
    Some(match Calls::abi_decode(input).ok()? {
        Calls::mintParcel(_) => "mintParcel",
        Calls::balanceOf(_) => "balanceOf",
        Calls::owner(_) => "owner",
    })
}

/// Decodes the method name of a failed transaction's calldata against the
/// known contract interfaces, stablecoin first, then carbon credit, then the
/// remaining contracts. Returns `None` when no interface matches; callers
/// degrade to a generic description rather than failing the scan.
#[must_use]
pub fn decode_failed_call(
    to: Option<Address>,
    input: &[u8],
    contracts: &ContractConfig,
) -> Option<&'static str> {
    match to {
        Some(addr) if addr == contracts.stablecoin || addr == contracts.carbon_credit => {
            erc20_method(input)
        }
        Some(addr) if addr == contracts.marketplace => marketplace_method(input),
        Some(addr) if addr == contracts.forest_token => forest_method(input),
        _ => erc20_method(input)
            .or_else(|| marketplace_method(input))
            .or_else(|| forest_method(input)),
    }
}
