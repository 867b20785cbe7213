//! Required-params checks for request kinds.

use serde_json::Value;

use keyward_core::RequestError;
use keyward_core::protocol::{Params, RequestKind};

/// Check that `params` carries what `kind` needs before any slot is opened.
pub fn validate(kind: RequestKind, params: &Params) -> Result<(), RequestError> {
    let ok = match kind {
        RequestKind::SendBsv => non_empty_array(params, "data"),
        RequestKind::TransferOrdinal => {
            non_empty_str(params, "address") && non_empty_str(params, "outpoint")
        }
        RequestKind::PurchaseOrdinal => non_empty_str(params, "outpoint"),
        RequestKind::SignMessage => non_empty_str(params, "message"),
        RequestKind::Broadcast => non_empty_str(params, "rawtx"),
        RequestKind::GetSignatures => {
            non_empty_str(params, "rawtx") && non_empty_array(params, "sigRequests")
        }
        RequestKind::GenerateTaggedKeys => {
            non_empty_str(params, "label") && non_empty_str(params, "id")
        }
        RequestKind::Encrypt => {
            non_empty_str(params, "message") && non_empty_array(params, "pubKeys")
        }
        RequestKind::Decrypt => non_empty_array(params, "messages"),
        RequestKind::GetTaggedKeys => non_empty_str(params, "label"),
        _ => true,
    };
    if ok { Ok(()) } else { Err(RequestError::Validation) }
}

fn non_empty_str(params: &Params, key: &str) -> bool {
    params
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

fn non_empty_array(params: &Params, key: &str) -> bool {
    params
        .get(key)
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty())
}
