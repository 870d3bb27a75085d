use crate::chat::intent::{
    account_kind, feature_kind, platform_in, regulator_in, AccountKind, FeatureKind,
    IntentCategory, Regulator,
};
use crate::domain::broker::BrokerSnapshot;
use std::fmt::Write;

const TOP_N: usize = 3;
const MICRO_DEPOSIT_CEILING: f64 = 100.0;

pub const GREETINGS: [&str; 3] = [
    "Hello! I'm your broker analysis assistant. Ask me about top-rated brokers, spreads, leverage, regulation or trading platforms.",
    "Hi there! Looking for a broker? I can compare ratings, costs, regulators and platforms for you.",
    "Welcome! Tell me what matters most to you in a broker and I'll pull the best matches from our database.",
];

pub const UNAVAILABLE_REPLY: &str =
    "I'm having trouble reaching our broker database right now. Please try again in a moment.";

pub const TECHNICAL_DIFFICULTIES_REPLY: &str =
    "Sorry, I'm experiencing technical difficulties at the moment. Please try again shortly.";

pub const FOLLOW_UP_REPLY: &str = "Happy to go deeper. Which part should I clarify? You can ask about spreads, leverage, minimum deposits, regulation, platforms or account types, or name a specific broker.";

const REGULATION_PROMPT: &str = "Which regulator do you care about? I can filter brokers by FCA (UK), CySEC (Cyprus/EU), ASIC (Australia) or CFTC/NFA (US).";

const PLATFORM_PROMPT: &str = "Which trading platform do you use? I can find brokers offering MT4, MT5 or cTrader.";

const ACCOUNT_PROMPT: &str = "I can help with demo accounts (practice without risk) and micro accounts (low minimum deposit). Which one are you interested in?";

/// The reply for anything we do not recognise.
pub fn help_menu() -> String {
    [
        "I can help you compare forex and CFD brokers. Try asking:",
        "- \"Recommend a broker\" for our top-rated picks",
        "- \"Lowest spreads\", \"highest leverage\" or \"minimum deposit\" to rank by cost",
        "- \"FCA regulated brokers\" (also CySEC, ASIC, CFTC/NFA)",
        "- \"Brokers with MT4\" (also MT5, cTrader)",
        "- \"Demo account\" or \"micro account\"",
    ]
    .join("\n")
}

/// Renders the reply for an already-classified message. `brokers` must be rating-ordered; an
/// empty slice means the catalog is unavailable. `greeting_index` picks the greeting variant.
pub fn compose(
    intent: IntentCategory,
    message: &str,
    brokers: &[BrokerSnapshot],
    greeting_index: usize,
) -> anyhow::Result<String> {
    match intent {
        IntentCategory::ContextualFollowup => Ok(FOLLOW_UP_REPLY.to_string()),
        IntentCategory::Greeting => Ok(GREETINGS[greeting_index % GREETINGS.len()].to_string()),
        IntentCategory::Fallback => Ok(help_menu()),
        _ if brokers.is_empty() => Ok(UNAVAILABLE_REPLY.to_string()),
        IntentCategory::BrokerRecommendation => recommendation(brokers),
        IntentCategory::FeatureQuery => feature(feature_kind(message), brokers),
        IntentCategory::RegulationQuery => match regulator_in(message) {
            Some(regulator) => regulation(regulator, brokers),
            None => Ok(REGULATION_PROMPT.to_string()),
        },
        IntentCategory::PlatformQuery => match platform_in(message) {
            Some(platform) => platform_reply(platform, brokers),
            None => Ok(PLATFORM_PROMPT.to_string()),
        },
        IntentCategory::AccountTypeQuery => account(account_kind(message), brokers),
    }
}

fn recommendation(brokers: &[BrokerSnapshot]) -> anyhow::Result<String> {
    let mut out = String::from("Here are the top-rated brokers in our database:\n");
    for (idx, b) in brokers.iter().take(TOP_N).enumerate() {
        write_summary(&mut out, idx + 1, b)?;
    }
    out.push_str("\nWant me to narrow these down by spread, leverage or regulation?");
    Ok(out)
}

/// Top brokers for a cost feature, skipping brokers with no value for it. Spread and deposit
/// rank ascending, leverage descending. Ties keep rating order.
pub fn rank_by_feature(brokers: &[BrokerSnapshot], kind: FeatureKind) -> Vec<&BrokerSnapshot> {
    let key = |b: &BrokerSnapshot| match kind {
        FeatureKind::Spread => b.avg_spread,
        FeatureKind::Deposit => b.min_deposit,
        FeatureKind::Leverage => b.leverage_ratio(),
    };

    let mut keyed: Vec<(f64, &BrokerSnapshot)> =
        brokers.iter().filter_map(|b| key(b).map(|k| (k, b))).collect();
    keyed.sort_by(|(x, _), (y, _)| {
        let ord = x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal);
        match kind {
            FeatureKind::Leverage => ord.reverse(),
            FeatureKind::Spread | FeatureKind::Deposit => ord,
        }
    });
    keyed.into_iter().take(TOP_N).map(|(_, b)| b).collect()
}

fn feature(kind: FeatureKind, brokers: &[BrokerSnapshot]) -> anyhow::Result<String> {
    let ranked = rank_by_feature(brokers, kind);
    let heading = match kind {
        FeatureKind::Spread => "Brokers with the lowest average spreads:",
        FeatureKind::Leverage => "Brokers offering the highest leverage:",
        FeatureKind::Deposit => "Brokers with the lowest minimum deposits:",
    };
    if ranked.is_empty() {
        return Ok(format!(
            "I don't have {} data for the brokers in our database yet.",
            match kind {
                FeatureKind::Spread => "spread",
                FeatureKind::Leverage => "leverage",
                FeatureKind::Deposit => "deposit",
            }
        ));
    }

    let mut out = format!("{heading}\n");
    for (idx, b) in ranked.into_iter().enumerate() {
        let n = idx + 1;
        match kind {
            FeatureKind::Spread => {
                writeln!(out, "{n}. {}: {} pips average spread", b.name, fmt_opt(b.avg_spread))?
            }
            FeatureKind::Leverage => writeln!(
                out,
                "{n}. {}: up to {}",
                b.name,
                b.max_leverage.as_deref().unwrap_or("n/a")
            )?,
            FeatureKind::Deposit => {
                writeln!(out, "{n}. {}: ${} minimum deposit", b.name, fmt_opt(b.min_deposit))?
            }
        }
    }
    if kind == FeatureKind::Leverage {
        out.push_str("\nHigh leverage magnifies losses as well as gains; trade carefully.");
    }
    Ok(out.trim_end().to_string())
}

/// Top brokers whose regulation list mentions the regulator (case-insensitive substring).
pub fn filter_by_regulator<'a>(
    brokers: &'a [BrokerSnapshot],
    regulator: &Regulator,
) -> Vec<&'a BrokerSnapshot> {
    brokers
        .iter()
        .filter(|b| regulator.listed_as.iter().any(|l| b.is_regulated_by(l)))
        .take(TOP_N)
        .collect()
}

fn regulation(regulator: &Regulator, brokers: &[BrokerSnapshot]) -> anyhow::Result<String> {
    let matches = filter_by_regulator(brokers, regulator);
    if matches.is_empty() {
        return Ok(format!(
            "I couldn't find any {} regulated brokers in our current listings.",
            regulator.label
        ));
    }

    let mut out = format!("Top {} regulated brokers:\n", regulator.label);
    for (idx, b) in matches.into_iter().enumerate() {
        writeln!(
            out,
            "{}. {} ({}/5), regulated by {}",
            idx + 1,
            b.name,
            fmt_opt(b.rating),
            b.regulation_label()
        )?;
    }
    Ok(out.trim_end().to_string())
}

fn platform_reply(platform: &str, brokers: &[BrokerSnapshot]) -> anyhow::Result<String> {
    let matches: Vec<&BrokerSnapshot> = brokers
        .iter()
        .filter(|b| b.supports_platform(platform))
        .take(TOP_N)
        .collect();
    if matches.is_empty() {
        return Ok(format!(
            "I couldn't find any brokers offering {platform} in our current listings."
        ));
    }

    let mut out = format!("Top brokers offering {platform}:\n");
    for (idx, b) in matches.into_iter().enumerate() {
        writeln!(
            out,
            "{}. {} ({}/5), platforms: {}",
            idx + 1,
            b.name,
            fmt_opt(b.rating),
            b.platform_label()
        )?;
    }
    Ok(out.trim_end().to_string())
}

fn account(kind: AccountKind, brokers: &[BrokerSnapshot]) -> anyhow::Result<String> {
    let (heading, picks): (&str, Vec<&BrokerSnapshot>) = match kind {
        AccountKind::Demo => (
            "These top-rated brokers all offer free demo accounts:",
            brokers.iter().take(TOP_N).collect(),
        ),
        AccountKind::Micro => (
            "Brokers suited to micro accounts (minimum deposit of $100 or less):",
            brokers
                .iter()
                .filter(|b| b.min_deposit.is_some_and(|d| d <= MICRO_DEPOSIT_CEILING))
                .take(TOP_N)
                .collect(),
        ),
        AccountKind::Other => return Ok(ACCOUNT_PROMPT.to_string()),
    };

    if picks.is_empty() {
        return Ok(
            "I couldn't find brokers with a minimum deposit of $100 or less right now.".to_string(),
        );
    }

    let mut out = format!("{heading}\n");
    for (idx, b) in picks.into_iter().enumerate() {
        write_summary(&mut out, idx + 1, b)?;
    }
    Ok(out.trim_end().to_string())
}

fn write_summary(out: &mut String, n: usize, b: &BrokerSnapshot) -> std::fmt::Result {
    write!(
        out,
        "{n}. {} ({}/5), minimum deposit ${}",
        b.name,
        fmt_opt(b.rating),
        fmt_opt(b.min_deposit)
    )?;
    if let Some(leverage) = b.max_leverage.as_deref() {
        write!(out, ", leverage up to {leverage}")?;
    }
    writeln!(out)
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}
