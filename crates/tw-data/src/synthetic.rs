//! Deterministic synthetic bar series for tests and demos.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;

use tw_types::Bar;

/// Generate `count` daily bars as a seeded random walk starting at
/// `start_price`. The symbol participates in the seed so different symbols
/// produce different but reproducible series.
pub fn random_walk(
    symbol: &str,
    start: DateTime<Utc>,
    count: usize,
    start_price: f64,
    seed: u64,
) -> Vec<Bar> {
    let symbol_salt: u64 = symbol.bytes().map(|b| b as u64).sum();
    let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(symbol_salt));

    let mut bars = Vec::with_capacity(count);
    let mut price = start_price;

    for i in 0..count {
        let open = price;
        let drift: f64 = rng.gen_range(-0.02..0.02);
        let close = (open * (1.0 + drift)).max(0.01);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = rng.gen_range(100_000..1_000_000);

        bars.push(Bar::new(
            start + Duration::days(i as i64),
            dec(open),
            dec(high),
            dec(low),
            dec(close),
            Decimal::from(volume),
        ));
        price = close;
    }

    bars
}

/// Generate daily bars whose closes follow the supplied sequence exactly.
/// High/low wrap the close by a fixed band so ATR-style indicators stay
/// well defined.
pub fn bars_from_closes(start: DateTime<Utc>, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar::new(
                start + Duration::days(i as i64),
                dec(open),
                dec(close.max(open) * 1.005),
                dec(close.min(open) * 0.995),
                dec(close),
                Decimal::from(500_000),
            )
        })
        .collect()
}

fn dec(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default()
}
