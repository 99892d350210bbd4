//! Stop and take-profit price math for option premium trades

/// Protective stop a fixed fraction below the entry premium
pub fn stop_price(entry: f64, stop_loss_pct: f64) -> f64 {
    entry * (1.0 - stop_loss_pct)
}

/// Take-profit ladder in R multiples of the stop distance, one level per lot.
///
/// 1 lot exits at 4R, 2 lots at 3R and 4R. From 3 lots the lots are split
/// evenly over 2R/3R/4R; a remainder of one goes to 3R, a remainder of two to
/// 3R and 4R. Levels are sorted ascending.
pub fn take_profit_ladder(entry: f64, lots: u32, stop_loss_pct: f64) -> Vec<f64> {
    let risk = entry - stop_price(entry, stop_loss_pct);
    let level = |multiple: f64| entry + risk * multiple;

    let (at_2r, at_3r, at_4r) = match lots {
        0 => (0, 0, 0),
        1 => (0, 0, 1),
        2 => (0, 1, 1),
        _ => {
            let base = lots / 3;
            match lots % 3 {
                1 => (base, base + 1, base),
                2 => (base, base + 1, base + 1),
                _ => (base, base, base),
            }
        }
    };

    let mut ladder = Vec::with_capacity(lots as usize);
    ladder.extend(std::iter::repeat(level(2.0)).take(at_2r as usize));
    ladder.extend(std::iter::repeat(level(3.0)).take(at_3r as usize));
    ladder.extend(std::iter::repeat(level(4.0)).take(at_4r as usize));
    ladder.sort_by(|a, b| a.total_cmp(b));
    ladder
}

/// Round a price to one decimal for order submission
pub fn round_price(price: f64) -> f64 {
    (price * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_stop_is_ten_percent_below() {
        assert!((stop_price(120.0, 0.10) - 108.0).abs() < 1e-9);
    }

    #[test]
    fn test_ladder_by_lot_count() {
        assert!(approx(&take_profit_ladder(120.0, 1, 0.10), &[168.0]));
        assert!(approx(&take_profit_ladder(120.0, 2, 0.10), &[156.0, 168.0]));
        assert!(approx(&take_profit_ladder(120.0, 3, 0.10), &[144.0, 156.0, 168.0]));
        assert!(approx(&take_profit_ladder(120.0, 4, 0.10), &[144.0, 156.0, 156.0, 168.0]));
        assert!(approx(
            &take_profit_ladder(120.0, 5, 0.10),
            &[144.0, 156.0, 156.0, 168.0, 168.0]
        ));
    }

    #[test]
    fn test_ladder_has_one_level_per_lot() {
        for lots in 1..=10 {
            let ladder = take_profit_ladder(100.0, lots, 0.10);
            assert_eq!(ladder.len(), lots as usize);
            assert!(ladder.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_round_price() {
        assert_eq!(round_price(108.04), 108.0);
        assert_eq!(round_price(106.92), 106.9);
    }
}
