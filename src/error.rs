use crate::types::BlockRange;
use serde::Deserialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("No wallet provider detected; install or enable a wallet and retry")]
    NoProviderFound,

    #[error("Wallet connection rejected by user")]
    ConnectionRejected,

    #[error("Action rejected by user: {0}")]
    ActionRejected(String),

    #[error("Failed to initialize contracts: {0}")]
    Binding(String),

    #[error("Block range too large for node (suggested: {suggested:?})")]
    RangeTooLarge { suggested: Option<BlockRange> },

    #[error("Block range {0} could not be scanned after back-off")]
    RangeUnrecoverable(BlockRange),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] alloy_transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WalletError {
    /// True when the error represents the user declining a wallet prompt.
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        matches!(self, Self::ConnectionRejected | Self::ActionRejected(_))
    }
}

/// JSON-RPC error code nodes return when a log query spans too many blocks.
const CODE_RANGE_TOO_LARGE: i64 = -32005;
/// EIP-1193 code for a user-rejected request.
const CODE_USER_REJECTED: i64 = 4001;

/// Node-suggested valid sub-range carried in the -32005 error payload,
/// hex-encoded block numbers.
#[derive(Debug, Deserialize)]
struct SuggestedRange {
    from: String,
    to: String,
}

impl SuggestedRange {
    fn into_range(self) -> Option<BlockRange> {
        let from = parse_hex_block(&self.from)?;
        let to = parse_hex_block(&self.to)?;
        (from <= to).then_some(BlockRange::new(from, to))
    }
}

fn parse_hex_block(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Whether a raw provider message describes a user-declined prompt. Kept next
/// to [`classify_rpc_error`] so the wallet sentinel strings live in one place.
#[must_use]
pub fn is_rejection_message(message: &str) -> bool {
    message.contains("ACTION_REJECTED") || message.to_lowercase().contains("rejected")
}

/// Maps provider-specific JSON-RPC error shapes onto the closed [`WalletError`]
/// taxonomy. All sentinel codes and magic strings are confined to this function
/// so node quirks do not leak through component boundaries.
#[must_use]
pub fn classify_rpc_error(err: alloy_transport::TransportError) -> WalletError {
    if let alloy_json_rpc::RpcError::ErrorResp(payload) = &err {
        if payload.code == CODE_RANGE_TOO_LARGE {
            let suggested = payload
                .data
                .as_ref()
                .and_then(|raw| serde_json::from_str::<SuggestedRange>(raw.get()).ok())
                .and_then(SuggestedRange::into_range);
            return WalletError::RangeTooLarge { suggested };
        }

        if payload.code == CODE_USER_REJECTED || is_rejection_message(&payload.message) {
            return WalletError::ActionRejected(payload.message.to_string());
        }
    }

    WalletError::Rpc(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_json_rpc::{ErrorPayload, RpcError};
    use serde_json::value::RawValue;

    fn payload_error(code: i64, message: &str, data: Option<&str>) -> alloy_transport::TransportError {
        RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.to_string().into(),
            data: data.map(|d| RawValue::from_string(d.to_string()).unwrap()),
        })
    }

    #[test]
    fn classifies_range_error_with_suggested_window() {
        let err = payload_error(
            -32005,
            "query returned more than 10000 results",
            Some(r#"{"from":"0x64","to":"0xc8"}"#),
        );
        match classify_rpc_error(err) {
            WalletError::RangeTooLarge { suggested } => {
                assert_eq!(suggested, Some(BlockRange::new(100, 200)));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classifies_range_error_without_payload_data() {
        let err = payload_error(-32005, "block range too wide", None);
        assert!(matches!(
            classify_rpc_error(err),
            WalletError::RangeTooLarge { suggested: None }
        ));
    }

    #[test]
    fn classifies_user_rejection_by_code_and_sentinel() {
        let by_code = payload_error(4001, "User denied transaction signature", None);
        assert!(classify_rpc_error(by_code).is_user_rejection());

        let by_message = payload_error(-32603, "ACTION_REJECTED", None);
        assert!(classify_rpc_error(by_message).is_user_rejection());
    }

    #[test]
    fn rejection_sentinels_are_recognized_in_raw_messages() {
        assert!(is_rejection_message("ACTION_REJECTED"));
        assert!(is_rejection_message("User rejected the request"));
        assert!(!is_rejection_message("execution reverted"));
    }

    #[test]
    fn other_rpc_errors_pass_through() {
        let err = payload_error(-32601, "method not found", None);
        assert!(matches!(classify_rpc_error(err), WalletError::Rpc(_)));
    }
}
