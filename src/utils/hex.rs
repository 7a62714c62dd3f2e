use alloy::primitives::{Address, B256, U256};
use std::str::FromStr;

/// Parse an unsigned 256-bit quantity from the literal forms that configs
/// and edit expressions carry: decimal, `0x` hex, and the SMT-style
/// `#x`/`#b` atoms.
pub fn to_u256(raw: &str) -> Option<U256> {
    let raw = raw.trim();
    let (digits, radix) = if let Some(hex) = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("#x"))
    {
        (hex, 16)
    } else if let Some(bits) = raw.strip_prefix("#b") {
        (bits, 2)
    } else {
        (raw, 10)
    };
    if digits.is_empty() {
        return None;
    }
    U256::from_str_radix(digits, radix).ok()
}

/// Parse a 20-byte address. Only 0x-prefixed 40-hex-char strings qualify, so
/// plain numbers and short hex atoms never get mistaken for addresses.
pub fn parse_address(s: &str) -> Option<Address> {
    let s = s.trim();
    let hex = s.strip_prefix("0x")?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str(s).ok()
}

/// Parse a 32-byte word from 0x-prefixed hex.
pub fn parse_b256(s: &str) -> Option<B256> {
    let s = s.trim();
    let hex = s.strip_prefix("0x")?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    B256::from_str(s).ok()
}

/// Canonical lowercase form used for map keys and artifact output.
pub fn format_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_slice()))
}
