//! Per-side price → volume map.
//!
//! Keys are `Price` (numeric ordering), so best-first iteration never
//! depends on the string form of a price. Zero or negative volume
//! removes the level; the map never holds an entry with volume ≤ 0.

use bookcast_core::{Price, PriceLevel, Side, Size};
use std::collections::BTreeMap;

/// Effect of applying one level to a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChange {
    /// Level inserted or its volume replaced.
    Upserted,
    /// Existing level removed.
    Removed,
    /// Removal of a price that was not present.
    Unchanged,
}

/// Ordered levels for one side of one symbol.
#[derive(Debug, Clone)]
pub struct LevelMap {
    side: Side,
    levels: BTreeMap<Price, Size>,
}

impl LevelMap {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, price: &Price) -> Option<Size> {
        self.levels.get(price).copied()
    }

    /// Upsert when `volume > 0`, otherwise delete the price if present.
    pub fn apply(&mut self, level: PriceLevel) -> LevelChange {
        if level.volume.is_positive() {
            self.levels.insert(level.price, level.volume);
            LevelChange::Upserted
        } else if self.levels.remove(&level.price).is_some() {
            LevelChange::Removed
        } else {
            LevelChange::Unchanged
        }
    }

    /// Replace every level wholesale.
    pub fn replace<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = PriceLevel>,
    {
        self.levels.clear();
        for level in levels {
            self.apply(level);
        }
    }

    /// Up to `depth` levels, best first.
    pub fn top(&self, depth: usize) -> Vec<PriceLevel> {
        let to_level = |(price, volume): (&Price, &Size)| PriceLevel::new(*price, *volume);
        match self.side {
            Side::Ask => self.levels.iter().take(depth).map(to_level).collect(),
            Side::Bid => self.levels.iter().rev().take(depth).map(to_level).collect(),
        }
    }

    /// Iterate over all levels in ascending price order.
    pub fn iter(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.levels
            .iter()
            .map(|(price, volume)| PriceLevel::new(*price, *volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn level(px: Decimal, vol: Decimal) -> PriceLevel {
        PriceLevel::new(Price::new(px), Size::new(vol))
    }

    #[test]
    fn test_upsert_and_replace_volume() {
        let mut map = LevelMap::new(Side::Bid);
        assert_eq!(map.apply(level(dec!(100), dec!(1))), LevelChange::Upserted);
        assert_eq!(map.apply(level(dec!(100), dec!(4))), LevelChange::Upserted);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Price::new(dec!(100))), Some(Size::new(dec!(4))));
    }

    #[test]
    fn test_zero_volume_removes_level() {
        let mut map = LevelMap::new(Side::Ask);
        map.apply(level(dec!(101), dec!(3)));

        assert_eq!(map.apply(level(dec!(101), dec!(0))), LevelChange::Removed);
        assert!(map.is_empty());
    }

    #[test]
    fn test_removing_absent_price_is_noop() {
        let mut map = LevelMap::new(Side::Ask);
        map.apply(level(dec!(101), dec!(3)));

        assert_eq!(map.apply(level(dec!(99), dec!(0))), LevelChange::Unchanged);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_scale_variants_share_a_key() {
        let mut map = LevelMap::new(Side::Bid);
        map.apply(level(dec!(100.0), dec!(1)));
        map.apply(level(dec!(100.00), dec!(0)));
        assert!(map.is_empty());
    }

    #[test]
    fn test_top_is_best_first_per_side() {
        let mut asks = LevelMap::new(Side::Ask);
        let mut bids = LevelMap::new(Side::Bid);
        for px in [dec!(9.5), dec!(10.0), dec!(100.25), dec!(11)] {
            asks.apply(level(px, dec!(1)));
            bids.apply(level(px, dec!(1)));
        }

        assert_eq!(asks.top(1)[0].price, Price::new(dec!(9.5)));
        assert_eq!(bids.top(1)[0].price, Price::new(dec!(100.25)));

        let ask_prices: Vec<Decimal> = asks.top(3).iter().map(|l| l.price.inner()).collect();
        assert_eq!(ask_prices, vec![dec!(9.5), dec!(10.0), dec!(11)]);

        let bid_prices: Vec<Decimal> = bids.top(2).iter().map(|l| l.price.inner()).collect();
        assert_eq!(bid_prices, vec![dec!(100.25), dec!(11)]);
    }

    #[test]
    fn test_replace_drops_previous_levels() {
        let mut map = LevelMap::new(Side::Bid);
        map.apply(level(dec!(1), dec!(1)));
        map.apply(level(dec!(2), dec!(1)));

        map.replace(vec![level(dec!(3), dec!(5)), level(dec!(4), dec!(0))]);

        let prices: Vec<Decimal> = map.iter().map(|l| l.price.inner()).collect();
        assert_eq!(prices, vec![dec!(3)]);
    }

    proptest! {
        #[test]
        fn prop_no_entry_with_non_positive_volume(
            ops in prop::collection::vec((0u32..50, -3i64..10), 0..200)
        ) {
            let mut map = LevelMap::new(Side::Ask);
            for (px, vol) in ops {
                map.apply(level(Decimal::from(px), Decimal::from(vol)));
                prop_assert!(map.iter().all(|l| l.volume.is_positive()));
            }
        }
    }
}
