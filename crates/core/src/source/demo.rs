use crate::domain::broker::BrokerSnapshot;

struct DemoBroker {
    name: &'static str,
    country: &'static str,
    rating: f64,
    min_deposit: f64,
    avg_spread: Option<f64>,
    max_leverage: Option<&'static str>,
    platforms: &'static [&'static str],
    regulations: &'static [&'static str],
}

const DEMO_BROKERS: &[DemoBroker] = &[
    DemoBroker {
        name: "IC Markets",
        country: "Australia",
        rating: 4.8,
        min_deposit: 200.0,
        avg_spread: Some(0.1),
        max_leverage: Some("1:500"),
        platforms: &["MT4", "MT5", "cTrader"],
        regulations: &["ASIC", "CySEC"],
    },
    DemoBroker {
        name: "Pepperstone",
        country: "Australia",
        rating: 4.7,
        min_deposit: 0.0,
        avg_spread: Some(0.2),
        max_leverage: Some("1:500"),
        platforms: &["MT4", "MT5", "cTrader", "TradingView"],
        regulations: &["FCA", "ASIC", "CySEC"],
    },
    DemoBroker {
        name: "IG",
        country: "United Kingdom",
        rating: 4.6,
        min_deposit: 250.0,
        avg_spread: Some(0.6),
        max_leverage: Some("1:30"),
        platforms: &["MT4", "ProRealTime"],
        regulations: &["FCA", "ASIC", "CFTC", "NFA"],
    },
    DemoBroker {
        name: "XM",
        country: "Cyprus",
        rating: 4.4,
        min_deposit: 5.0,
        avg_spread: Some(1.6),
        max_leverage: Some("1:1000"),
        platforms: &["MT4", "MT5"],
        regulations: &["CySEC", "ASIC"],
    },
    DemoBroker {
        name: "OANDA",
        country: "United States",
        rating: 4.3,
        min_deposit: 0.0,
        avg_spread: Some(1.0),
        max_leverage: Some("1:50"),
        platforms: &["MT4", "TradingView"],
        regulations: &["CFTC", "NFA", "FCA"],
    },
    DemoBroker {
        name: "FBS",
        country: "Belize",
        rating: 3.9,
        min_deposit: 1.0,
        avg_spread: None,
        max_leverage: Some("1:3000"),
        platforms: &["MT4", "MT5"],
        regulations: &["CySEC"],
    },
];

/// A small, plausible catalog used for seeding and offline chats.
pub fn demo_catalog() -> Vec<BrokerSnapshot> {
    DEMO_BROKERS
        .iter()
        .enumerate()
        .map(|(idx, d)| BrokerSnapshot {
            id: format!("demo-{:02}", idx + 1),
            name: d.name.to_string(),
            country: Some(d.country.to_string()),
            rating: Some(d.rating),
            min_deposit: Some(d.min_deposit),
            avg_spread: d.avg_spread,
            max_leverage: d.max_leverage.map(str::to_string),
            platforms: d.platforms.iter().map(|s| s.to_string()).collect(),
            regulations: d.regulations.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}
