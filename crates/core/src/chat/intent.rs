use crate::domain::conversation::ContextBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentCategory {
    ContextualFollowup,
    Greeting,
    BrokerRecommendation,
    FeatureQuery,
    RegulationQuery,
    PlatformQuery,
    AccountTypeQuery,
    Fallback,
}

impl IntentCategory {
    /// Whether the reply for this intent is rendered from the broker catalog.
    pub fn needs_brokers(self) -> bool {
        !matches!(
            self,
            IntentCategory::ContextualFollowup | IntentCategory::Greeting | IntentCategory::Fallback
        )
    }
}

const FOLLOW_UP_PHRASES: &[&str] = &[
    "more",
    "tell me",
    "details",
    "what about",
    "how about",
    "confused",
    "clarify",
];

const BROKER_CONTEXT_TERMS: &[&str] = &[
    "broker", "spread", "leverage", "deposit", "regulat", "platform", "account",
];

const GREETING_PHRASES: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "greetings",
    "good morning",
    "good afternoon",
    "good evening",
];

const RECOMMENDATION_PHRASES: &[&str] = &[
    "recommend",
    "suggest",
    "best broker",
    "top broker",
    "good broker",
    "which broker",
    "find a broker",
    "find me a broker",
    "brokers for",
    "broker for",
];

const FEATURE_PHRASES: &[&str] = &[
    "spread",
    "leverage",
    "deposit",
    "minimum",
    "fee",
    "fees",
    "commission",
    "cost",
    "cheap",
];

const REGULATION_PHRASES: &[&str] = &[
    "regulat",
    "licens",
    "authority",
    "fca",
    "cysec",
    "asic",
    "cftc",
    "nfa",
    "safe",
    "trust",
];

const PLATFORM_PHRASES: &[&str] = &[
    "platform",
    "mt4",
    "mt5",
    "metatrader",
    "ctrader",
    "tradingview",
];

const ACCOUNT_PHRASES: &[&str] = &["account", "demo", "micro", "islamic", "ecn"];

/// Evaluated top to bottom; the first table whose keywords hit wins.
const INTENT_TABLE: &[(&[&str], IntentCategory)] = &[
    (GREETING_PHRASES, IntentCategory::Greeting),
    (RECOMMENDATION_PHRASES, IntentCategory::BrokerRecommendation),
    (FEATURE_PHRASES, IntentCategory::FeatureQuery),
    (REGULATION_PHRASES, IntentCategory::RegulationQuery),
    (PLATFORM_PHRASES, IntentCategory::PlatformQuery),
    (ACCOUNT_PHRASES, IntentCategory::AccountTypeQuery),
];

/// Maps a raw message to exactly one intent. Pure in `(message, context)`.
pub fn classify(message: &str, context: &ContextBuffer) -> IntentCategory {
    let msg = message.to_lowercase();

    if is_contextual_followup(&msg, &context.joined_lowercase()) {
        return IntentCategory::ContextualFollowup;
    }

    INTENT_TABLE
        .iter()
        .find(|(keywords, _)| contains_any(&msg, keywords))
        .map(|(_, category)| *category)
        .unwrap_or(IntentCategory::Fallback)
}

fn is_contextual_followup(msg: &str, context: &str) -> bool {
    !context.is_empty()
        && contains_any(msg, FOLLOW_UP_PHRASES)
        && contains_any(context, BROKER_CONTEXT_TERMS)
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| contains_keyword(text, kw))
}

/// Keyword must start a word. Short keywords (three chars or fewer) must also end one, so "hi"
/// does not fire inside "which" or "highest".
///
/// This deliberately replaces plain substring matching. As a consequence "unregulated" is not a
/// regulation query and "which" is not a greeting.
pub(crate) fn contains_keyword(text: &str, keyword: &str) -> bool {
    let whole_word = keyword.chars().count() <= 3;
    text.match_indices(keyword).any(|(start, _)| {
        let starts_word = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let end = start + keyword.len();
        let ends_word = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        starts_word && (!whole_word || ends_word)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Spread,
    Leverage,
    Deposit,
}

/// Spread, then leverage, then deposit. Generic cost questions ("fees", "cheap") rank by spread.
pub fn feature_kind(message: &str) -> FeatureKind {
    let msg = message.to_lowercase();
    if contains_keyword(&msg, "spread") {
        FeatureKind::Spread
    } else if contains_keyword(&msg, "leverage") {
        FeatureKind::Leverage
    } else if contains_keyword(&msg, "deposit") || contains_keyword(&msg, "minimum") {
        FeatureKind::Deposit
    } else {
        FeatureKind::Spread
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Regulator {
    pub label: &'static str,
    /// Any of these appearing in a broker's regulation list counts as a match.
    pub listed_as: &'static [&'static str],
}

static REGULATORS: &[(&str, Regulator)] = &[
    (
        "fca",
        Regulator {
            label: "FCA",
            listed_as: &["FCA"],
        },
    ),
    (
        "cysec",
        Regulator {
            label: "CySEC",
            listed_as: &["CySEC"],
        },
    ),
    (
        "asic",
        Regulator {
            label: "ASIC",
            listed_as: &["ASIC"],
        },
    ),
    (
        "cftc",
        Regulator {
            label: "CFTC/NFA",
            listed_as: &["CFTC", "NFA"],
        },
    ),
    (
        "nfa",
        Regulator {
            label: "CFTC/NFA",
            listed_as: &["CFTC", "NFA"],
        },
    ),
];

pub fn regulator_in(message: &str) -> Option<&'static Regulator> {
    let msg = message.to_lowercase();
    REGULATORS
        .iter()
        .find(|(kw, _)| contains_keyword(&msg, kw))
        .map(|(_, reg)| reg)
}

static PLATFORMS: &[(&str, &str)] = &[
    ("mt4", "MT4"),
    ("metatrader 4", "MT4"),
    ("mt5", "MT5"),
    ("metatrader 5", "MT5"),
    ("ctrader", "cTrader"),
];

pub fn platform_in(message: &str) -> Option<&'static str> {
    let msg = message.to_lowercase();
    PLATFORMS
        .iter()
        .find(|(kw, _)| contains_keyword(&msg, kw))
        .map(|(_, label)| *label)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Demo,
    Micro,
    Other,
}

pub fn account_kind(message: &str) -> AccountKind {
    let msg = message.to_lowercase();
    if contains_keyword(&msg, "demo") {
        AccountKind::Demo
    } else if contains_keyword(&msg, "micro") {
        AccountKind::Micro
    } else {
        AccountKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> ContextBuffer {
        ContextBuffer::default()
    }

    fn broker_context() -> ContextBuffer {
        let mut ctx = ContextBuffer::default();
        ctx.push_exchange(
            "recommend a broker",
            "Here are the top-rated brokers in our database: ...",
        );
        ctx
    }

    #[test]
    fn greetings_without_context_are_greetings() {
        for msg in [
            "hello",
            "Hi!",
            "hey there, can you help with leverage?",
            "Good morning",
            "hi, recommend a broker",
        ] {
            assert_eq!(classify(msg, &empty()), IntentCategory::Greeting, "{msg}");
        }
    }

    #[test]
    fn short_greeting_does_not_fire_inside_other_words() {
        assert_eq!(
            classify("which broker has the highest leverage", &empty()),
            IntentCategory::BrokerRecommendation
        );
        assert_eq!(
            classify("this spread looks high", &empty()),
            IntentCategory::FeatureQuery
        );
    }

    #[test]
    fn followup_with_broker_context_wins_over_everything() {
        let ctx = broker_context();
        for msg in [
            "tell me more",
            "hello, tell me more about the spread",
            "what about FCA?",
            "I'm confused",
            "can you clarify the demo account part",
        ] {
            assert_eq!(
                classify(msg, &ctx),
                IntentCategory::ContextualFollowup,
                "{msg}"
            );
        }
    }

    #[test]
    fn followup_phrase_without_context_falls_through() {
        assert_eq!(
            classify("tell me about cysec brokers", &empty()),
            IntentCategory::RegulationQuery
        );
        assert_eq!(classify("more please", &empty()), IntentCategory::Fallback);
    }

    #[test]
    fn followup_needs_broker_terms_in_context() {
        let mut ctx = ContextBuffer::default();
        ctx.push_exchange("what's the weather", "I can only help with trading questions.");
        assert_eq!(classify("tell me more", &ctx), IntentCategory::Fallback);
    }

    #[test]
    fn ordered_predicates_pick_first_match() {
        let ctx = empty();
        assert_eq!(
            classify("recommend a broker with low spreads", &ctx),
            IntentCategory::BrokerRecommendation
        );
        assert_eq!(
            classify("lowest spread under FCA", &ctx),
            IntentCategory::FeatureQuery
        );
        assert_eq!(
            classify("Is an FCA licence on MT4 possible?", &ctx),
            IntentCategory::RegulationQuery
        );
        assert_eq!(
            classify("does anyone offer cTrader", &ctx),
            IntentCategory::PlatformQuery
        );
        assert_eq!(
            classify("I want a demo account", &ctx),
            IntentCategory::AccountTypeQuery
        );
    }

    #[test]
    fn empty_or_blank_message_is_fallback() {
        assert_eq!(classify("", &empty()), IntentCategory::Fallback);
        assert_eq!(classify("   \n\t", &empty()), IntentCategory::Fallback);
        assert_eq!(classify("   ", &broker_context()), IntentCategory::Fallback);
    }

    #[test]
    fn classification_is_deterministic() {
        let ctx = broker_context();
        let first = classify("how about leverage", &ctx);
        for _ in 0..10 {
            assert_eq!(classify("how about leverage", &ctx), first);
        }
    }

    #[test]
    fn sub_classifiers() {
        assert_eq!(feature_kind("lowest spreads"), FeatureKind::Spread);
        assert_eq!(feature_kind("max leverage"), FeatureKind::Leverage);
        assert_eq!(feature_kind("minimum deposit"), FeatureKind::Deposit);
        assert_eq!(feature_kind("cheap fees"), FeatureKind::Spread);

        assert_eq!(regulator_in("regulated by CySEC").unwrap().label, "CySEC");
        assert_eq!(regulator_in("nfa members").unwrap().label, "CFTC/NFA");
        assert!(regulator_in("is it regulated?").is_none());

        assert_eq!(platform_in("MetaTrader 5 support"), Some("MT5"));
        assert_eq!(platform_in("ctrader please"), Some("cTrader"));
        assert_eq!(platform_in("which platform"), None);

        assert_eq!(account_kind("Demo account?"), AccountKind::Demo);
        assert_eq!(account_kind("micro lots"), AccountKind::Micro);
        assert_eq!(account_kind("islamic account"), AccountKind::Other);
    }

    #[test]
    fn keyword_boundaries() {
        assert!(contains_keyword("hi there", "hi"));
        assert!(!contains_keyword("this", "hi"));
        assert!(!contains_keyword("highest", "hi"));
        assert!(contains_keyword("regulated brokers", "regulat"));
        assert!(!contains_keyword("unregulated", "regulat"));
        assert!(contains_keyword("(mt4)", "mt4"));
    }
}
