//! Money arithmetic for barter valuations
//!
//! Amounts are integers in minor currency units (1/100 of the display unit) so
//! that sums over many lines never drift. Every operation that can overflow is
//! checked and reported as a validation failure instead of wrapping.
use super::error::ValidationError;
use std::fmt;

/// Signed money amount in minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

const MINOR_PER_MAJOR: i64 = 100;

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }
    /// Whole display units, e.g. `Amount::whole(20)` is 20.00
    pub const fn whole(units: i64) -> Self {
        Self(units.saturating_mul(MINOR_PER_MAJOR))
    }
    pub const fn minor(&self) -> i64 {
        self.0
    }
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
    pub fn checked_times(self, quantity: u32) -> Option<Amount> {
        self.0.checked_mul(i64::from(quantity)).map(Amount)
    }
}

/// `quantity * unit_price`
pub fn line_total(quantity: u32, unit_price: Amount) -> Result<Amount, ValidationError> {
    unit_price
        .checked_times(quantity)
        .ok_or(ValidationError::ValueOverflow)
}

/// Sum a sequence of amounts, failing on overflow
pub fn checked_sum<I>(amounts: I) -> Result<Amount, ValidationError>
where
    I: IntoIterator<Item = Amount>,
{
    amounts
        .into_iter()
        .try_fold(Amount::ZERO, |acc, next| acc.checked_add(next))
        .ok_or(ValidationError::ValueOverflow)
}

/// `target - offered`; positive means the offer still falls short of the target
pub fn value_difference(target: Amount, offered: Amount) -> Result<Amount, ValidationError> {
    target
        .checked_sub(offered)
        .ok_or(ValidationError::ValueOverflow)
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_PER_MAJOR as u64;
        write!(f, "{sign}{}.{:02}", abs / per, abs % per)
    }
}

impl<C> minicbor::Encode<C> for Amount {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Amount {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Amount(d.i64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_units_scale_to_minor() {
        assert_eq!(Amount::whole(20).minor(), 2_000);
        assert_eq!(Amount::whole(-3).minor(), -300);
    }

    #[test]
    fn display_formats_two_decimals() {
        assert_eq!(Amount::whole(60).to_string(), "60.00");
        assert_eq!(Amount::from_minor(1_005).to_string(), "10.05");
        assert_eq!(Amount::from_minor(-5).to_string(), "-0.05");
        assert_eq!(Amount::from_minor(i64::MIN).to_string(), "-92233720368547758.08");
    }

    #[test]
    fn line_total_multiplies() {
        assert_eq!(line_total(3, Amount::whole(20)).unwrap(), Amount::whole(60));
        assert_eq!(line_total(0, Amount::whole(20)).unwrap(), Amount::ZERO);
    }

    #[test]
    fn overflow_is_a_validation_failure() {
        let huge = Amount::from_minor(i64::MAX / 2 + 1);

        assert!(matches!(
            line_total(2, huge),
            Err(ValidationError::ValueOverflow)
        ));
        assert!(matches!(
            checked_sum([huge, huge]),
            Err(ValidationError::ValueOverflow)
        ));
        assert!(matches!(
            value_difference(Amount::from_minor(i64::MIN), Amount::whole(1)),
            Err(ValidationError::ValueOverflow)
        ));
    }

    #[test]
    fn value_difference_sign() {
        assert_eq!(
            value_difference(Amount::whole(60), Amount::whole(50)).unwrap(),
            Amount::whole(10)
        );
        assert!(
            value_difference(Amount::whole(40), Amount::whole(50))
                .unwrap()
                .is_negative()
        );
    }
}
