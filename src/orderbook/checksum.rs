//! CRC32 integrity digest over the top of an order book.
//!
//! For the 10 best asks (ascending) followed by the 10 best bids
//! (descending), price and quantity are rendered at the pair's precision,
//! the decimal point is removed and leading zeros are stripped. The
//! concatenation is hashed with CRC32.

use rust_decimal::Decimal;

use super::book::PriceLevel;

/// Levels per side covered by the exchange checksum, independent of the
/// subscribed depth.
pub const CHECKSUM_LEVELS: usize = 10;

/// Renders one price or quantity as it enters the checksum.
pub fn fragment(value: &Decimal) -> String {
    let text = value.to_string().replace('.', "");
    text.trim_start_matches('0').to_string()
}

/// Computes the checksum over best-first level iterators.
pub fn compute<'a>(
    asks: impl IntoIterator<Item = &'a PriceLevel>,
    bids: impl IntoIterator<Item = &'a PriceLevel>,
) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for level in asks
        .into_iter()
        .take(CHECKSUM_LEVELS)
        .chain(bids.into_iter().take(CHECKSUM_LEVELS))
    {
        hasher.update(fragment(&level.price).as_bytes());
        hasher.update(fragment(&level.qty).as_bytes());
    }
    hasher.finalize()
}
