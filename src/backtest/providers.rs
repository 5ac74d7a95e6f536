use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::HistoricalDataProvider;
use crate::strategy::{fuse_weighted, BarInput, ModelOutput, SignalPair};
use crate::Result;

/// One historical bar with its fused model probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub close: f64,
    pub long_prob: f64,
    pub short_prob: f64,
    #[serde(default)]
    pub money_flow_ratio: f64,
    #[serde(default)]
    pub volatility: f64,
}

impl Bar {
    pub fn signals(&self) -> SignalPair {
        SignalPair { long_prob: self.long_prob, short_prob: self.short_prob }
    }

    /// Engine input for this bar with the given equity and (possibly smoothed) signals.
    pub fn to_input(&self, equity: f64, signals: SignalPair) -> BarInput {
        BarInput {
            price: self.close,
            equity,
            long_prob: signals.long_prob,
            short_prob: signals.short_prob,
            money_flow_ratio: self.money_flow_ratio,
            volatility: self.volatility,
        }
    }
}

/// CSV provider. Expected header:
/// `timestamp,close,long_prob,short_prob,money_flow_ratio,volatility`
#[derive(Debug, Default, Clone, Copy)]
pub struct CSVHistoricalDataProvider;

impl CSVHistoricalDataProvider {
    pub fn new() -> Self {
        Self
    }
}

impl HistoricalDataProvider for CSVHistoricalDataProvider {
    fn load(&self, data_file: &Path) -> Result<Vec<Bar>> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(data_file)
            .map_err(|e| crate::Error::DataError(format!("CSV read error ({}): {e}", data_file.display())))?;
        let mut out = Vec::new();
        for rec in rdr.deserialize::<Bar>() {
            let row = rec.map_err(|e| crate::Error::DataError(format!("CSV parse error: {e}")))?;
            out.push(row);
        }
        if out.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(crate::Error::DataError("bars must be strictly increasing by timestamp".to_string()));
        }
        Ok(out)
    }
}

/// One model's prediction for one bar, as stored in a per-model CSV.
#[derive(Debug, Deserialize)]
struct ModelRow {
    timestamp: i64,
    close: f64,
    #[serde(default)]
    money_flow_ratio: f64,
    #[serde(default)]
    volatility: f64,
    model: String,
    short_prob: f64,
    long_prob: f64,
}

/// Reads per-model predictions and fuses them into one bar per timestamp.
/// Expected header:
/// `timestamp,close,money_flow_ratio,volatility,model,short_prob,long_prob`
///
/// Rows of the same bar must be contiguous.
#[derive(Debug, Default, Clone)]
pub struct ModelOutputsProvider {
    weights: BTreeMap<String, f64>,
}

impl ModelOutputsProvider {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    fn fuse(&self, head: &ModelRow, outputs: &[ModelOutput]) -> Result<Bar> {
        let pair = fuse_weighted(outputs, &self.weights)?;
        Ok(Bar {
            timestamp: head.timestamp,
            close: head.close,
            long_prob: pair.long_prob.clamp(0.0, 1.0),
            short_prob: pair.short_prob.clamp(0.0, 1.0),
            money_flow_ratio: head.money_flow_ratio,
            volatility: head.volatility,
        })
    }
}

impl HistoricalDataProvider for ModelOutputsProvider {
    fn load(&self, data_file: &Path) -> Result<Vec<Bar>> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(data_file)
            .map_err(|e| crate::Error::DataError(format!("CSV read error ({}): {e}", data_file.display())))?;

        let mut out = Vec::new();
        let mut head: Option<ModelRow> = None;
        let mut outputs: Vec<ModelOutput> = Vec::new();
        for rec in rdr.deserialize::<ModelRow>() {
            let row = rec.map_err(|e| crate::Error::DataError(format!("CSV parse error: {e}")))?;
            if let Some(h) = head.as_ref() {
                if h.timestamp != row.timestamp {
                    out.push(self.fuse(h, &outputs)?);
                    outputs.clear();
                    head = None;
                }
            }
            outputs.push(ModelOutput::new(&row.model, row.short_prob, row.long_prob));
            if head.is_none() {
                head = Some(row);
            }
        }
        if let Some(h) = head.as_ref() {
            out.push(self.fuse(h, &outputs)?);
        }
        if out.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(crate::Error::DataError("model rows must be grouped and sorted by timestamp".to_string()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_rows_and_defaults_missing_features() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "timestamp,close,long_prob,short_prob,money_flow_ratio,volatility").unwrap();
        writeln!(tmp, "1,100.0,0.7,0.2,5.0,0.01").unwrap();
        writeln!(tmp, "2,101.5,0.4,0.5,2.5,0.02").unwrap();

        let bars = CSVHistoricalDataProvider::new().load(tmp.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 100.0);
        assert_eq!(bars[0].money_flow_ratio, 5.0);
        assert_eq!(bars[1].volatility, 0.02);

        let mut bare = tempfile::NamedTempFile::new().unwrap();
        writeln!(bare, "timestamp,close,long_prob,short_prob").unwrap();
        writeln!(bare, "1,100.0,0.7,0.2").unwrap();
        let bars = CSVHistoricalDataProvider::new().load(bare.path()).unwrap();
        assert_eq!(bars[0].money_flow_ratio, 0.0);
        assert_eq!(bars[0].volatility, 0.0);

        let input = bars[0].to_input(1000.0, bars[0].signals());
        assert_eq!(input.price, 100.0);
        assert_eq!(input.equity, 1000.0);
    }

    #[test]
    fn rejects_unsorted_duplicate_and_malformed() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "timestamp,close,long_prob,short_prob,money_flow_ratio,volatility").unwrap();
        writeln!(tmp, "2,100.0,0.7,0.2,5.0,0.01").unwrap();
        writeln!(tmp, "1,100.0,0.7,0.2,5.0,0.01").unwrap();
        assert!(CSVHistoricalDataProvider.load(tmp.path()).is_err());

        let mut dup = tempfile::NamedTempFile::new().unwrap();
        writeln!(dup, "timestamp,close,long_prob,short_prob,money_flow_ratio,volatility").unwrap();
        writeln!(dup, "1,100.0,0.7,0.2,5.0,0.01").unwrap();
        writeln!(dup, "1,100.0,0.7,0.2,5.0,0.01").unwrap();
        assert!(matches!(CSVHistoricalDataProvider.load(dup.path()), Err(crate::Error::DataError(_))));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "timestamp,close,long_prob,short_prob").unwrap();
        writeln!(bad, "1,abc,0.7,0.2").unwrap();
        assert!(CSVHistoricalDataProvider.load(bad.path()).is_err());
    }

    #[test]
    fn fuses_model_rows_per_bar() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "timestamp,close,money_flow_ratio,volatility,model,short_prob,long_prob").unwrap();
        writeln!(tmp, "1,100.0,5.0,0.01,lgbm,0.4,0.6").unwrap();
        writeln!(tmp, "1,100.0,5.0,0.01,xgb,0.2,0.8").unwrap();
        writeln!(tmp, "2,101.0,4.0,0.02,lgbm,0.5,0.5").unwrap();

        let weights: BTreeMap<String, f64> = [("lgbm".to_string(), 3.0), ("xgb".to_string(), 1.0)].into();
        let bars = ModelOutputsProvider::new(weights).load(tmp.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert!((bars[0].long_prob - 0.65).abs() < 1e-12);
        assert!((bars[0].short_prob - 0.35).abs() < 1e-12);
        assert_eq!(bars[1].close, 101.0);
        assert_eq!(bars[1].money_flow_ratio, 4.0);

        let plain = ModelOutputsProvider::default().load(tmp.path()).unwrap();
        assert!((plain[0].long_prob - 0.7).abs() < 1e-12);
    }
}
