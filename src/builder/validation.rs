use super::error::BuilderError;

/// `spec.md` §4.D "Validation": "only `mainnet`, `testnet-10`".
pub fn validate_network_id(network_id: &str) -> Result<(), BuilderError> {
    match network_id {
        "mainnet" | "testnet-10" => Ok(()),
        other => Err(BuilderError::UnsupportedNetwork(other.to_string())),
    }
}

/// Only the `kastle` wallet is modelled; any other value is rejected.
pub fn validate_wallet(wallet: &str) -> Result<(), BuilderError> {
    if wallet == "kastle" {
        Ok(())
    } else {
        Err(BuilderError::UnsupportedWallet(wallet.to_string()))
    }
}

/// `kaspa:…` for mainnet, `kaspatest:…` for testnet-10.
pub fn validate_from_address(address: &str, network_id: &str) -> Result<(), BuilderError> {
    let expected_prefix = match network_id {
        "mainnet" => "kaspa:",
        "testnet-10" => "kaspatest:",
        _ => return Err(BuilderError::InvalidAddress),
    };
    if address.starts_with(expected_prefix) && address.len() > expected_prefix.len() {
        Ok(())
    } else {
        Err(BuilderError::InvalidAddress)
    }
}

pub fn validate_outputs(outputs: &[(String, rust_decimal::Decimal)]) -> Result<(), BuilderError> {
    if outputs.is_empty() {
        return Err(BuilderError::EmptyOutputs);
    }
    for (_, amount) in outputs {
        if *amount <= rust_decimal::Decimal::ZERO {
            return Err(BuilderError::NonPositiveOutput);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn rejects_unsupported_network() {
        assert!(validate_network_id("devnet").is_err());
        assert!(validate_network_id("mainnet").is_ok());
    }

    #[test]
    fn rejects_wrong_prefix_for_network() {
        assert!(validate_from_address("kaspatest:abc", "mainnet").is_err());
        assert!(validate_from_address("kaspa:abc", "mainnet").is_ok());
    }

    #[test]
    fn rejects_empty_or_non_positive_outputs() {
        assert!(validate_outputs(&[]).is_err());
        assert!(validate_outputs(&[("kaspa:a".to_string(), Decimal::ZERO)]).is_err());
        assert!(validate_outputs(&[("kaspa:a".to_string(), Decimal::ONE)]).is_ok());
    }
}
