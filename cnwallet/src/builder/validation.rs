//! Checks run before any input selection, daemon request or signing

use cn_sync::crypto::CryptoOracle;
use cn_sync::primitives::PublicKey;
use cnconfig::MixinLimits;

use crate::error::ValidationError;

/// A payment id is 32 bytes of hex, the empty string means none
pub fn validate_payment_id(payment_id: &str) -> Result<(), ValidationError> {
    if payment_id.is_empty() {
        return Ok(());
    }
    if payment_id.len() != 64 || !payment_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidPaymentId);
    }
    Ok(())
}

pub fn validate_mixin(
    mixin: u64,
    height: u64,
    mixin_limits: &MixinLimits,
) -> Result<(), ValidationError> {
    mixin_limits
        .validate(mixin, height)
        .map_err(|(min, max)| ValidationError::MixinOutOfRange { mixin, min, max })
}

pub fn validate_fee(fee: u64, minimum_fee: u64) -> Result<(), ValidationError> {
    if fee < minimum_fee {
        return Err(ValidationError::FeeTooSmall {
            fee,
            minimum: minimum_fee,
        });
    }
    Ok(())
}

/// Decodes a text address into `(public_spend_key, public_view_key)`
pub fn validate_address<O: CryptoOracle>(
    oracle: &O,
    address: &str,
    address_prefix: u64,
) -> Result<(PublicKey, PublicKey), ValidationError> {
    oracle
        .decode_address(address, address_prefix)
        .map_err(|_| ValidationError::InvalidAddress(address.to_string()))
}

/// Checks every `(address, amount)` pair and returns the decoded destinations with the total
pub fn validate_destinations<O: CryptoOracle>(
    oracle: &O,
    destinations: &[(String, u64)],
    address_prefix: u64,
) -> Result<(Vec<(PublicKey, PublicKey, u64)>, u64), ValidationError> {
    if destinations.is_empty() {
        return Err(ValidationError::NoDestinations);
    }

    let mut total: u64 = 0;
    let mut decoded = Vec::with_capacity(destinations.len());
    for (address, amount) in destinations {
        if *amount == 0 {
            return Err(ValidationError::NonPositiveOutputAmount);
        }
        total = total
            .checked_add(*amount)
            .ok_or(ValidationError::OutputSumOverflow)?;
        let (public_spend_key, public_view_key) =
            validate_address(oracle, address, address_prefix)?;
        decoded.push((public_spend_key, public_view_key, *amount));
    }

    Ok((decoded, total))
}

/// Sums `amounts`, failing with `overflow` if the sum does not fit
pub(crate) fn checked_sum(
    amounts: impl IntoIterator<Item = u64>,
    overflow: ValidationError,
) -> Result<u64, ValidationError> {
    amounts
        .into_iter()
        .try_fold(0u64, |sum, amount| sum.checked_add(amount))
        .ok_or(overflow)
}

#[cfg(test)]
mod tests {
    use cn_sync::mocks::MockOracle;
    use cnconfig::MixinLimit;
    use test_case::test_case;

    use super::*;

    #[test_case("" => true ; "empty")]
    #[test_case(&"ab".repeat(32) => true ; "hex")]
    #[test_case(&"ab".repeat(31) => false ; "short")]
    #[test_case(&"zz".repeat(32) => false ; "not hex")]
    fn payment_ids(payment_id: &str) -> bool {
        validate_payment_id(payment_id).is_ok()
    }

    #[test]
    fn mixin_limits_change_with_height() {
        let limits = MixinLimits::new(vec![
            MixinLimit::new(0, 0, 7, 3),
            MixinLimit::new(1000, 3, 5, 3),
        ]);
        assert!(validate_mixin(0, 10, &limits).is_ok());
        assert_eq!(
            validate_mixin(0, 2000, &limits),
            Err(ValidationError::MixinOutOfRange {
                mixin: 0,
                min: 3,
                max: 5
            })
        );
    }

    #[test]
    fn fee_must_reach_minimum() {
        assert!(validate_fee(10, 10).is_ok());
        assert!(matches!(
            validate_fee(9, 10),
            Err(ValidationError::FeeTooSmall { fee: 9, minimum: 10 })
        ));
    }

    #[test]
    fn destinations_are_decoded_and_summed() {
        let oracle = MockOracle::default();
        let spend = oracle.keys_from_seed(1).public_key;
        let view = oracle.keys_from_seed(2).public_key;
        let address = oracle.encode_address(&spend, &view, 7);

        let (decoded, total) =
            validate_destinations(&oracle, &[(address.clone(), 5), (address.clone(), 6)], 7)
                .unwrap();
        assert_eq!(decoded, vec![(spend, view, 5), (spend, view, 6)]);
        assert_eq!(total, 11);

        assert_eq!(
            validate_destinations(&oracle, &[], 7),
            Err(ValidationError::NoDestinations)
        );
        assert_eq!(
            validate_destinations(&oracle, &[(address.clone(), 0)], 7),
            Err(ValidationError::NonPositiveOutputAmount)
        );
        assert_eq!(
            validate_destinations(&oracle, &[(address.clone(), u64::MAX), (address.clone(), 1)], 7),
            Err(ValidationError::OutputSumOverflow)
        );
        assert!(matches!(
            validate_destinations(&oracle, &[(address, 5)], 8),
            Err(ValidationError::InvalidAddress(_))
        ));
    }
}
