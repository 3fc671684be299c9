use crate::error::EngineError;

/// Transaction ids are 32-byte hashes rendered as 64 hex characters.
pub const TXID_HEX_LEN: usize = 64;

/// Reject txids that cannot possibly exist before touching the ledger.
pub fn validate_txid(txid: &str) -> Result<(), EngineError> {
    if txid.len() != TXID_HEX_LEN {
        return Err(EngineError::validation(
            "txid",
            format!("expected {TXID_HEX_LEN} hex characters, got {}", txid.len()),
        ));
    }
    if !txid.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(EngineError::validation("txid", "contains non-hex characters"));
    }
    Ok(())
}

/// First 12 characters, for narratives and log lines.
pub fn short_txid(txid: &str) -> &str {
    txid.get(..12).unwrap_or(txid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hex() {
        assert!(validate_txid(&"a1".repeat(32)).is_ok());
        assert!(validate_txid(&"AF".repeat(32)).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        let err = validate_txid("abc").unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "txid", .. }));
    }

    #[test]
    fn rejects_non_hex() {
        let txid = format!("{}zz", "a".repeat(62));
        assert!(matches!(
            validate_txid(&txid),
            Err(EngineError::Validation { field: "txid", .. })
        ));
    }

    #[test]
    fn multibyte_input_is_rejected_not_panicking() {
        let txid = "é".repeat(32);
        assert_eq!(txid.len(), 64);
        assert!(validate_txid(&txid).is_err());
    }

    #[test]
    fn short_form() {
        assert_eq!(short_txid(&"ab".repeat(32)), "abababababab");
        assert_eq!(short_txid("abc"), "abc");
    }
}
