use once_cell::sync::Lazy;
use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use thiserror::Error;

static PRICE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d{1,2})?$").expect("valid regex"));

const VOUCHER_CHARS: usize = 16;
const VOUCHER_GROUP: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
  #[error("amount must match 0.00 format")]
  InvalidFormat,
  #[error("amount exceeds supported range")]
  OutOfRange,
}

pub fn parse_money_to_cents(input: &str) -> Result<i64, MoneyError> {
  if !PRICE_PATTERN.is_match(input.trim()) {
    return Err(MoneyError::InvalidFormat);
  }

  let mut parts = input.trim().split('.');
  let major = parts
    .next()
    .and_then(|p| p.parse::<i64>().ok())
    .ok_or(MoneyError::InvalidFormat)?;

  let minor = match parts.next() {
    None => 0,
    Some(minor) => {
      if minor.len() == 1 {
        (minor.to_owned() + "0")
          .parse::<i64>()
          .map_err(|_| MoneyError::OutOfRange)?
      } else {
        minor[.. 2].parse::<i64>().map_err(|_| MoneyError::OutOfRange)?
      }
    },
  };

  major
    .checked_mul(100)
    .and_then(|value| value.checked_add(minor))
    .ok_or(MoneyError::OutOfRange)
}

pub fn format_cents(amount: i64, currency: &str) -> String {
  format!("{currency} {:.2}", (amount as f64) / 100.0)
}

/// Voucher codes look like `A1B2-C3D4-E5F6-G7H8`. Uniqueness is
/// probabilistic, not enforced.
pub fn generate_voucher_code(rng: &mut impl Rng) -> String {
  let chars: Vec<char> = (0 .. VOUCHER_CHARS)
    .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_uppercase())
    .collect();
  chars
    .chunks(VOUCHER_GROUP)
    .map(|group| group.iter().collect::<String>())
    .collect::<Vec<_>>()
    .join("-")
}

#[cfg(test)]
mod tests {
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use super::MoneyError;
  use super::format_cents;
  use super::generate_voucher_code;
  use super::parse_money_to_cents;

  #[test]
  fn parses_valid_amounts() {
    assert_eq!(parse_money_to_cents("10"), Ok(1000));
    assert_eq!(parse_money_to_cents("10.5"), Ok(1050));
    assert_eq!(parse_money_to_cents("10.55"), Ok(1055));
  }

  #[test]
  fn rejects_invalid_formats() {
    assert_eq!(parse_money_to_cents("abc"), Err(MoneyError::InvalidFormat));
    assert_eq!(parse_money_to_cents("10.555"), Err(MoneyError::InvalidFormat));
  }

  #[test]
  fn formats_currency() {
    assert_eq!(format_cents(1234, "USD"), "USD 12.34");
    assert_eq!(format_cents(50, "EUR"), "EUR 0.50");
  }

  #[test]
  fn voucher_code_has_expected_shape() {
    let mut rng = StdRng::seed_from_u64(7);
    let code = generate_voucher_code(&mut rng);
    assert_eq!(code.len(), 19);
    let groups: Vec<&str> = code.split('-').collect();
    assert_eq!(groups.len(), 4);
    for group in groups {
      assert_eq!(group.len(), 4);
      assert!(group.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
  }

  #[test]
  fn voucher_codes_are_deterministic_per_seed() {
    let mut first = StdRng::seed_from_u64(42);
    let mut second = StdRng::seed_from_u64(42);
    assert_eq!(generate_voucher_code(&mut first), generate_voucher_code(&mut second));
  }

  #[test]
  fn voucher_codes_differ_between_draws() {
    let mut rng = StdRng::seed_from_u64(1);
    assert_ne!(generate_voucher_code(&mut rng), generate_voucher_code(&mut rng));
  }
}
