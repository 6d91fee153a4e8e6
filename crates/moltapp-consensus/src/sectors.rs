use std::collections::BTreeMap;

use moltapp_models::{ConsensusSignal, TradeAction};
use serde::{Deserialize, Serialize};

const SECTORS: &[(&str, &str)] = &[
    ("AAPLx", "Technology"),
    ("MSFTx", "Technology"),
    ("GOOGLx", "Technology"),
    ("METAx", "Technology"),
    ("NVDAx", "Semiconductors"),
    ("AMDx", "Semiconductors"),
    ("AVGOx", "Semiconductors"),
    ("AMZNx", "Consumer"),
    ("NFLXx", "Consumer"),
    ("TSLAx", "Automotive"),
    ("COINx", "Crypto"),
    ("MSTRx", "Crypto"),
    ("HOODx", "Fintech"),
    ("JPMx", "Financials"),
    ("GMEx", "Retail"),
    ("SPYx", "Index"),
    ("QQQx", "Index"),
];

pub const UNKNOWN_SECTOR: &str = "Other";

pub fn sector_for(symbol: &str) -> &'static str {
    SECTORS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, sector)| *sector)
        .unwrap_or(UNKNOWN_SECTOR)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
}

/// Consensus signals aggregated by sector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorSentiment {
    pub sector: String,
    pub bullish_signals: u32,
    pub bearish_signals: u32,
    pub neutral_signals: u32,
    /// Bullish minus bearish.
    pub net_score: i64,
    pub sentiment: SentimentLabel,
    pub average_confidence: u8,
    pub symbols: Vec<String>,
}

/// Aggregate per-symbol signals by sector. MARKET signals carry no sector and are skipped.
pub fn aggregate_sector_sentiment<'a>(
    signals: impl IntoIterator<Item = &'a ConsensusSignal>,
) -> Vec<SectorSentiment> {
    #[derive(Default)]
    struct Tally {
        bullish: u32,
        bearish: u32,
        neutral: u32,
        confidence_sum: u64,
        symbols: Vec<String>,
    }

    let mut tallies: BTreeMap<&'static str, Tally> = BTreeMap::new();
    for signal in signals {
        if signal.is_market_wide() {
            continue;
        }
        let tally = tallies.entry(sector_for(&signal.symbol)).or_default();
        match signal.action {
            TradeAction::Buy => tally.bullish += 1,
            TradeAction::Sell => tally.bearish += 1,
            TradeAction::Hold => tally.neutral += 1,
        }
        tally.confidence_sum += u64::from(signal.confidence);
        if !tally.symbols.contains(&signal.symbol) {
            tally.symbols.push(signal.symbol.clone());
        }
    }

    tallies
        .into_iter()
        .map(|(sector, t)| {
            let count = u64::from(t.bullish + t.bearish + t.neutral);
            let net_score = i64::from(t.bullish) - i64::from(t.bearish);
            let sentiment = match net_score {
                n if n > 0 => SentimentLabel::Bullish,
                n if n < 0 => SentimentLabel::Bearish,
                _ => SentimentLabel::Neutral,
            };
            SectorSentiment {
                sector: sector.to_string(),
                bullish_signals: t.bullish,
                bearish_signals: t.bearish,
                neutral_signals: t.neutral,
                net_score,
                sentiment,
                average_confidence: (t.confidence_sum as f64 / count.max(1) as f64).round() as u8,
                symbols: t.symbols,
            }
        })
        .collect()
}
