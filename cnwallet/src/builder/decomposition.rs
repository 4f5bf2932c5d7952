//! Splitting amounts into commonly seen denominations

/// Splits `amount` into one output per non zero decimal digit, scaled by its place value.
///
/// Denominations above `maximum_output_amount` are further split into chunks of at most that
/// size. 1234 becomes `[4, 30, 200, 1000]`.
pub fn split_amount_into_denominations(amount: u64, maximum_output_amount: u64) -> Vec<u64> {
    let mut denominations = Vec::new();
    let mut remaining = amount;
    let mut multiplier: u64 = 1;

    while remaining > 0 {
        let denomination = multiplier.saturating_mul(remaining % 10);

        if maximum_output_amount > 0 && denomination > maximum_output_amount {
            let chunks = denomination / maximum_output_amount;
            denominations.extend(std::iter::repeat(maximum_output_amount).take(chunks as usize));
            let rest = denomination % maximum_output_amount;
            if rest != 0 {
                denominations.push(rest);
            }
        } else if denomination != 0 {
            denominations.push(denomination);
        }

        remaining /= 10;
        multiplier = multiplier.saturating_mul(10);
    }

    denominations
}

/// Number of outputs [`split_amount_into_denominations`] produces, without building them
pub fn denomination_count(amount: u64, maximum_output_amount: u64) -> u64 {
    let mut count: u64 = 0;
    let mut remaining = amount;
    let mut multiplier: u64 = 1;

    while remaining > 0 {
        let denomination = multiplier.saturating_mul(remaining % 10);

        if maximum_output_amount > 0 && denomination > maximum_output_amount {
            let chunks = denomination / maximum_output_amount
                + u64::from(denomination % maximum_output_amount != 0);
            count = count.saturating_add(chunks);
        } else if denomination != 0 {
            count += 1;
        }

        remaining /= 10;
        multiplier = multiplier.saturating_mul(10);
    }

    count
}
