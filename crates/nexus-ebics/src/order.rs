//! Upload order ids.
//!
//! A 6-character id, two uppercase letters and four digits, drawn from a
//! per-subscriber sequence. The space holds 26²·10⁴ ids; exhaustion is an
//! explicit error instead of a silent wrap, because a reused id makes the
//! bank reject (or worse, misattribute) the order.

use crate::error::{Error, Result};

/// Number of distinct order ids per subscriber.
pub const ORDER_ID_SPACE: i64 = 26 * 26 * 10_000;

/// Encode sequence position `seq` (0-based) as an order id.
pub fn encode_order_id(seq: i64) -> Result<String> {
  if !(0..ORDER_ID_SPACE).contains(&seq) {
    return Err(Error::OrderIdOverflow);
  }
  let letters = seq / 10_000;
  let first = (letters / 26) as u8;
  let second = (letters % 26) as u8;
  Ok(format!(
    "{}{}{:04}",
    (b'A' + first) as char,
    (b'A' + second) as char,
    seq % 10_000
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encodes_the_corners() {
    assert_eq!(encode_order_id(0).unwrap(), "AA0000");
    assert_eq!(encode_order_id(1).unwrap(), "AA0001");
    assert_eq!(encode_order_id(10_000).unwrap(), "AB0000");
    assert_eq!(encode_order_id(26 * 10_000).unwrap(), "BA0000");
    assert_eq!(encode_order_id(ORDER_ID_SPACE - 1).unwrap(), "ZZ9999");
  }

  #[test]
  fn overflow_is_an_error_not_a_wrap() {
    assert!(matches!(
      encode_order_id(ORDER_ID_SPACE),
      Err(Error::OrderIdOverflow)
    ));
    assert!(matches!(encode_order_id(-1), Err(Error::OrderIdOverflow)));
  }
}
