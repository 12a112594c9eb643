use serde::{Deserialize, Serialize};

pub const SATOSHIS_PER_COIN: f64 = 1e8;

/// Wallet balance at the time of a report, in satoshis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub tx_count: u64,
    pub unconfirmed: i64,
    pub confirmed: i64,
}

impl BalanceSnapshot {
    pub fn unconfirmed_coins(&self) -> f64 {
        satoshis_to_coins(self.unconfirmed)
    }

    pub fn confirmed_coins(&self) -> f64 {
        satoshis_to_coins(self.confirmed)
    }
}

pub fn satoshis_to_coins(satoshis: i64) -> f64 {
    satoshis as f64 / SATOSHIS_PER_COIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_conversion() {
        let snapshot = BalanceSnapshot {
            tx_count: 3,
            unconfirmed: 150_000_000,
            confirmed: 987_654_321,
        };

        assert_eq!(snapshot.unconfirmed_coins(), 1.5);
        assert_eq!(snapshot.confirmed_coins(), 9.87654321);
    }

    #[test]
    fn test_zero_balance() {
        let snapshot = BalanceSnapshot::default();
        assert_eq!(snapshot.confirmed_coins(), 0.0);
        assert_eq!(snapshot.tx_count, 0);
    }
}
