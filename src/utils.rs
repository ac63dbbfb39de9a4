//! Utility functions for identifiers and hashing

use crate::error::{LedgerError, Result};
use bech32::Bech32m;
use uuid7::uuid7;

pub const ORDER_HRP: &str = "order_";
pub const RECEIVABLE_HRP: &str = "rec_";

// construct a unique, time ordered key then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| LedgerError::Identifier(e.to_string()))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| LedgerError::Identifier(e.to_string()))?;
    Ok(encode)
}

pub fn new_order_no() -> Result<String> {
    new_uuid_to_bech32(ORDER_HRP)
}

pub fn new_receivable_no() -> Result<String> {
    new_uuid_to_bech32(RECEIVABLE_HRP)
}

/// Hex encoded sha256 of a CBOR encodable value
pub fn digest_of<T: minicbor::Encode<()>>(value: &T) -> Result<String> {
    let cbor = minicbor::to_vec(value)?;
    Ok(sha256::digest(&cbor))
}
