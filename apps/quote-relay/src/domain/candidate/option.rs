//! Option Contract Symbols
//!
//! Detects compact option symbols of the form
//!
//! ```text
//! <UNDERLYING><YY><MM><DD><C|P><STRIKE>      RELIANCE251230C2500
//! ```
//!
//! and re-encodes them into the month-abbreviated form used by the
//! derivatives feed:
//!
//! ```text
//! <UNDERLYING><DD><MMM><YY><STRIKE><CE|PE>   RELIANCE30DEC252500CE
//! ```

use chrono::NaiveDate;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRight {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionRight {
    /// Suffix used by the derivatives feed.
    #[must_use]
    pub const fn feed_suffix(self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }
}

/// A parsed option contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionContract {
    /// Underlying symbol.
    pub underlying: String,
    /// Two-digit expiry year.
    pub year: u8,
    /// Expiry month (1-12).
    pub month: u8,
    /// Expiry day (1-31).
    pub day: u8,
    /// Call or put.
    pub right: OptionRight,
    /// Strike exactly as written in the input.
    pub strike: String,
}

impl OptionContract {
    /// Parse a compact option symbol. Input must already be uppercase.
    ///
    /// Returns `None` for anything that is not an option contract, including
    /// impossible expiry dates (month 13, day 00, February 31).
    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        let digits_at = symbol.find(|c: char| c.is_ascii_digit())?;
        let (underlying, rest) = symbol.split_at(digits_at);

        if !underlying.starts_with(|c: char| c.is_ascii_uppercase())
            || !underlying
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '&' || c == '-')
        {
            return None;
        }

        let bytes = rest.as_bytes();
        if bytes.len() < 8 || !bytes[..6].iter().all(u8::is_ascii_digit) {
            return None;
        }

        let year = two_digits(&bytes[0..2])?;
        let month = two_digits(&bytes[2..4])?;
        let day = two_digits(&bytes[4..6])?;
        NaiveDate::from_ymd_opt(2000 + i32::from(year), u32::from(month), u32::from(day))?;

        let right = match bytes[6] {
            b'C' => OptionRight::Call,
            b'P' => OptionRight::Put,
            _ => return None,
        };

        let strike = &rest[7..];
        if !is_strike(strike) {
            return None;
        }

        Some(Self {
            underlying: underlying.to_string(),
            year,
            month,
            day,
            right,
            strike: strike.to_string(),
        })
    }

    /// Symbol in the derivatives feed's month-abbreviated encoding.
    #[must_use]
    pub fn feed_symbol(&self) -> String {
        let month = usize::from(self.month)
            .checked_sub(1)
            .and_then(|index| MONTHS.get(index))
            .copied()
            .unwrap_or_default();
        format!(
            "{}{:02}{}{:02}{}{}",
            self.underlying,
            self.day,
            month,
            self.year,
            self.strike,
            self.right.feed_suffix()
        )
    }
}

fn two_digits(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [tens @ b'0'..=b'9', ones @ b'0'..=b'9'] => Some((tens - b'0') * 10 + (ones - b'0')),
        _ => None,
    }
}

/// Digits with at most one decimal point, not starting or ending with it.
fn is_strike(raw: &str) -> bool {
    let mut dots = 0;
    for c in raw.chars() {
        match c {
            '0'..='9' => {}
            '.' => dots += 1,
            _ => return false,
        }
    }
    dots <= 1 && !raw.is_empty() && !raw.starts_with('.') && !raw.ends_with('.')
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("RELIANCE251230C2500", "RELIANCE30DEC252500CE" ; "call")]
    #[test_case("NIFTY250109P23000", "NIFTY09JAN2523000PE" ; "put")]
    #[test_case("BANKNIFTY250626C52500.5", "BANKNIFTY26JUN2552500.5CE" ; "fractional strike")]
    #[test_case("M&M250327C3000", "M&M27MAR253000CE" ; "ampersand underlying")]
    fn reencodes_option_symbols(input: &str, expected: &str) {
        let contract = OptionContract::parse(input).unwrap();
        assert_eq!(contract.feed_symbol(), expected);
    }

    #[test_case("RELIANCE" ; "plain equity")]
    #[test_case("RELIANCE251330C2500" ; "month thirteen")]
    #[test_case("RELIANCE251200C2500" ; "day zero")]
    #[test_case("RELIANCE250231C2500" ; "february thirty first")]
    #[test_case("RELIANCE250229C2500" ; "february twenty ninth outside a leap year")]
    #[test_case("RELIANCE251230X2500" ; "bad right")]
    #[test_case("RELIANCE251230C" ; "missing strike")]
    #[test_case("RELIANCE251230C25.0.0" ; "two decimal points")]
    #[test_case("251230C2500" ; "missing underlying")]
    #[test_case("BTCUSD" ; "crypto pair")]
    fn rejects_non_options(input: &str) {
        assert!(OptionContract::parse(input).is_none());
    }

    #[test]
    fn accepts_leap_day() {
        let contract = OptionContract::parse("NIFTY280229C22000").unwrap();
        assert_eq!(contract.feed_symbol(), "NIFTY29FEB2822000CE");
    }

    #[test]
    fn parses_fields() {
        let contract = OptionContract::parse("INFY260115P1500").unwrap();
        assert_eq!(contract.underlying, "INFY");
        assert_eq!(contract.year, 26);
        assert_eq!(contract.month, 1);
        assert_eq!(contract.day, 15);
        assert_eq!(contract.right, OptionRight::Put);
        assert_eq!(contract.strike, "1500");
    }
}
