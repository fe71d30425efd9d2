//! Partition the panel into independent market groups.
//!
//! The stacked layout yields one group per (commodity, regime) with the
//! endogenous pair (price, conflict intensity). The pivoted layout yields one
//! group per commodity with the north and south prices side by side, plus the
//! regional conflict intensities as exogenous regressors when the variant asks
//! for them.

use crate::config::{PipelineConfig, RegimeLayout};
use crate::panel::PanelRow;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifies a group in logs and results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    /// Commodity name
    pub commodity: String,
    /// Exchange-rate regime; `None` for pivoted groups
    pub regime: Option<String>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.regime {
            Some(regime) => write!(f, "{}|{}", self.commodity, regime),
            None => write!(f, "{}", self.commodity),
        }
    }
}

/// A date-indexed variable of one group, with the per-region data it was averaged from.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupVariable {
    /// Variable name as reported in results
    pub name: String,
    /// Cross-region mean per date
    pub series: BTreeMap<NaiveDate, f64>,
    /// Values per region and date
    pub regional: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl GroupVariable {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: BTreeMap::new(),
            regional: BTreeMap::new(),
        }
    }

    fn push(&mut self, region: &str, date: NaiveDate, value: f64) {
        if value.is_finite() {
            self.regional
                .entry(region.to_string())
                .or_default()
                .insert(date, value);
        }
    }

    /// Recompute the mean series from the regional values.
    fn finish(mut self) -> Self {
        let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for values in self.regional.values() {
            for (&date, &value) in values {
                let entry = sums.entry(date).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        self.series = sums
            .into_iter()
            .map(|(date, (sum, count))| (date, sum / count as f64))
            .collect();
        self
    }

    /// Series values in date order
    pub fn values(&self) -> Vec<f64> {
        self.series.values().copied().collect()
    }
}

/// Endogenous and exogenous columns restricted to their common dates.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedData {
    /// Common dates, increasing
    pub dates: Vec<NaiveDate>,
    /// One column per endogenous variable
    pub endogenous: Vec<Vec<f64>>,
    /// Exogenous columns covering every common date
    pub exogenous: Vec<(String, Vec<f64>)>,
}

/// One independent unit of analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketGroup {
    /// Group identifier
    pub key: GroupKey,
    /// Panel rows that fed the group
    pub n_rows: usize,
    /// Exactly two endogenous variables
    pub endogenous: Vec<GroupVariable>,
    /// Exogenous regressors, possibly none
    pub exogenous: Vec<GroupVariable>,
}

impl MarketGroup {
    /// Dates on which every endogenous variable is observed.
    pub fn common_dates(&self) -> Vec<NaiveDate> {
        let mut iter = self.endogenous.iter();
        let first: BTreeSet<NaiveDate> = match iter.next() {
            Some(var) => var.series.keys().copied().collect(),
            None => return Vec::new(),
        };
        iter.fold(first, |acc, var| {
            acc.into_iter()
                .filter(|d| var.series.contains_key(d))
                .collect()
        })
        .into_iter()
        .collect()
    }

    /// Align all columns on the common endogenous dates.
    ///
    /// An exogenous variable missing any of those dates is left out.
    pub fn aligned(&self) -> AlignedData {
        let dates = self.common_dates();
        let endogenous = self
            .endogenous
            .iter()
            .map(|var| dates.iter().map(|d| var.series[d]).collect())
            .collect();
        let exogenous = self
            .exogenous
            .iter()
            .filter_map(|var| {
                let column: Option<Vec<f64>> =
                    dates.iter().map(|d| var.series.get(d).copied()).collect();
                if column.is_none() {
                    log::debug!(
                        "{}: exogenous '{}' does not cover all common dates, left out",
                        self.key,
                        var.name
                    );
                }
                column.map(|c| (var.name.clone(), c))
            })
            .collect();
        AlignedData {
            dates,
            endogenous,
            exogenous,
        }
    }

    /// Names of the endogenous variables in column order
    pub fn endogenous_names(&self) -> Vec<String> {
        self.endogenous.iter().map(|v| v.name.clone()).collect()
    }
}

/// Splits the deduplicated panel into [`MarketGroup`]s.
pub struct GroupPartitioner<'a> {
    config: &'a PipelineConfig,
}

impl<'a> GroupPartitioner<'a> {
    /// Partitioner bound to one configuration
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    fn commodity_selected(&self, commodity: &str) -> bool {
        let wanted = &self.config.data.commodities;
        wanted.is_empty() || wanted.iter().any(|c| c == commodity)
    }

    fn regime_selected(&self, regime: &str) -> bool {
        let wanted = &self.config.data.regimes;
        wanted.is_empty() || wanted.iter().any(|r| r == regime)
    }

    /// Build every group with enough data, in key order.
    pub fn partition(&self, rows: &[PanelRow]) -> Vec<MarketGroup> {
        let candidates = match self.config.analysis.exogenous_spec.layout() {
            RegimeLayout::Stacked => self.stacked(rows),
            RegimeLayout::Pivoted => self.pivoted(rows),
        };

        let min_obs = self.config.analysis.min_common_dates;
        candidates
            .into_iter()
            .filter(|group| {
                if group.n_rows < min_obs {
                    log::warn!(
                        "Skipping group {}: {} rows below minimum {}",
                        group.key,
                        group.n_rows,
                        min_obs
                    );
                    return false;
                }
                let common = group.common_dates().len();
                if common < min_obs {
                    log::warn!(
                        "Skipping group {}: {} common dates below minimum {}",
                        group.key,
                        common,
                        min_obs
                    );
                    return false;
                }
                true
            })
            .collect()
    }

    fn stacked(&self, rows: &[PanelRow]) -> Vec<MarketGroup> {
        let mut buckets: BTreeMap<GroupKey, Vec<&PanelRow>> = BTreeMap::new();
        for row in rows {
            if !self.commodity_selected(&row.commodity)
                || !self.regime_selected(&row.exchange_rate_regime)
            {
                continue;
            }
            let key = GroupKey {
                commodity: row.commodity.clone(),
                regime: Some(row.exchange_rate_regime.clone()),
            };
            buckets.entry(key).or_default().push(row);
        }

        buckets
            .into_iter()
            .map(|(key, rows)| {
                let mut price = GroupVariable::new("usdprice");
                let mut conflict = GroupVariable::new("conflict_intensity");
                for row in &rows {
                    price.push(&row.admin1, row.date, row.usdprice);
                    if let Some(c) = row.conflict_intensity {
                        conflict.push(&row.admin1, row.date, c);
                    }
                }
                MarketGroup {
                    key,
                    n_rows: rows.len(),
                    endogenous: vec![price.finish(), conflict.finish()],
                    exogenous: Vec::new(),
                }
            })
            .collect()
    }

    fn pivoted(&self, rows: &[PanelRow]) -> Vec<MarketGroup> {
        let north = &self.config.data.north_regime;
        let south = &self.config.data.south_regime;
        let with_exogenous = self.config.analysis.exogenous_spec.uses_exogenous();

        let mut buckets: BTreeMap<String, Vec<&PanelRow>> = BTreeMap::new();
        for row in rows {
            if !self.commodity_selected(&row.commodity) {
                continue;
            }
            if &row.exchange_rate_regime != north && &row.exchange_rate_regime != south {
                continue;
            }
            buckets.entry(row.commodity.clone()).or_default().push(row);
        }

        buckets
            .into_iter()
            .map(|(commodity, rows)| {
                let mut north_price = GroupVariable::new(format!("usdprice_{}", north));
                let mut south_price = GroupVariable::new(format!("usdprice_{}", south));
                let mut north_conflict = GroupVariable::new(format!("conflict_intensity_{}", north));
                let mut south_conflict = GroupVariable::new(format!("conflict_intensity_{}", south));
                for row in &rows {
                    let is_north = &row.exchange_rate_regime == north;
                    let (price, conflict) = if is_north {
                        (&mut north_price, &mut north_conflict)
                    } else {
                        (&mut south_price, &mut south_conflict)
                    };
                    price.push(&row.admin1, row.date, row.usdprice);
                    if let Some(c) = row.conflict_intensity {
                        conflict.push(&row.admin1, row.date, c);
                    }
                }

                let exogenous = if with_exogenous {
                    vec![north_conflict.finish(), south_conflict.finish()]
                        .into_iter()
                        .filter(|v| !v.series.is_empty())
                        .collect()
                } else {
                    Vec::new()
                };

                MarketGroup {
                    key: GroupKey {
                        commodity,
                        regime: None,
                    },
                    n_rows: rows.len(),
                    endogenous: vec![north_price.finish(), south_price.finish()],
                    exogenous,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExogenousSpec;

    fn row(month: u32, commodity: &str, region: &str, regime: &str, price: f64) -> PanelRow {
        PanelRow {
            date: NaiveDate::from_ymd_opt(2020 + (month / 12) as i32, month % 12 + 1, 1).unwrap(),
            commodity: commodity.to_string(),
            admin1: region.to_string(),
            exchange_rate_regime: regime.to_string(),
            usdprice: price,
            conflict_intensity: Some(month as f64),
            longitude: None,
            latitude: None,
        }
    }

    fn config(min_obs: usize) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.analysis.min_common_dates = min_obs;
        config
    }

    #[test]
    fn test_group_key_display() {
        let stacked = GroupKey {
            commodity: "wheat".into(),
            regime: Some("north".into()),
        };
        assert_eq!(stacked.to_string(), "wheat|north");
        let pivoted = GroupKey {
            commodity: "wheat".into(),
            regime: None,
        };
        assert_eq!(pivoted.to_string(), "wheat");
    }

    #[test]
    fn test_stacked_groups_average_regions() {
        let mut rows = Vec::new();
        for m in 0..6 {
            rows.push(row(m, "wheat", "A", "north", 1.0));
            rows.push(row(m, "wheat", "B", "north", 3.0));
        }
        let config = config(4);
        let groups = GroupPartitioner::new(&config).partition(&rows);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.n_rows, 12);
        assert_eq!(group.endogenous.len(), 2);
        assert!(group.endogenous[0].values().iter().all(|&v| v == 2.0));
        assert_eq!(group.endogenous[0].regional.len(), 2);
        assert_eq!(group.common_dates().len(), 6);
    }

    #[test]
    fn test_small_group_dropped() {
        let rows: Vec<PanelRow> = (0..5).map(|m| row(m, "sugar", "A", "south", 1.0)).collect();
        let config = config(20);
        assert!(GroupPartitioner::new(&config).partition(&rows).is_empty());
    }

    #[test]
    fn test_pivoted_layout_builds_north_south_pair() {
        let mut rows = Vec::new();
        for m in 0..8 {
            rows.push(row(m, "rice", "A", "north", 1.0 + m as f64));
            rows.push(row(m, "rice", "B", "south", 2.0 + m as f64));
            rows.push(row(m, "rice", "C", "contested", 9.0));
        }
        let config = config(4).with_exogenous_spec(ExogenousSpec::CrossRegionPrice);
        let groups = GroupPartitioner::new(&config).partition(&rows);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.key.regime, None);
        assert_eq!(group.n_rows, 16);
        assert_eq!(group.endogenous_names(), vec!["usdprice_north", "usdprice_south"]);
        assert_eq!(group.exogenous.len(), 2);

        let aligned = group.aligned();
        assert_eq!(aligned.dates.len(), 8);
        assert_eq!(aligned.endogenous[1][0], 2.0);
        assert_eq!(aligned.exogenous.len(), 2);
    }

    #[test]
    fn test_filters_restrict_commodities() {
        let mut rows = Vec::new();
        for m in 0..6 {
            rows.push(row(m, "wheat", "A", "north", 1.0));
            rows.push(row(m, "sugar", "A", "north", 1.0));
        }
        let mut config = config(4);
        config.data.commodities = vec!["sugar".to_string()];
        let groups = GroupPartitioner::new(&config).partition(&rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key.commodity, "sugar");
    }
}
