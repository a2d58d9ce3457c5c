//! Coin amounts in koinu.

pub type CoinAmount = i64;

pub const COIN: CoinAmount = 100_000_000;

/// Formats koinu as a fixed 8-decimal coin string, e.g. `12.50000000`.
pub fn format_coins(amount: CoinAmount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let coin = COIN as u64;
    format!("{sign}{}.{:08}", abs / coin, abs % coin)
}
