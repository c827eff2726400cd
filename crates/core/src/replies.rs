use rand::Rng;

use crate::modes::PromptMode;

/// Static product help, returned without a model call when the user asks
/// what TrackCrow is.
pub const HELP_TEXT: &str = "TrackCrow is your personal expense assistant. \
Tell me about an expense in plain words (\"I spent 200 on lunch today\") and I'll record it, \
or ask me questions like \"how much did I spend on food this month\", \
\"what was my biggest expense last week\", or \"compare food vs travel this month\".";

/// Fixed reply after the classifier failed schema validation twice in a row.
pub const COULD_NOT_UNDERSTAND: &str =
    "Sorry, I couldn't understand your request. Could you rephrase it?";

/// Rotating polite replies for input that is not an expense query.
pub const IRRELEVANT_REPLIES: &[&str] = &[
    "I'm your expense assistant, so that one's outside my lane. Ask me about your spending!",
    "That doesn't look like an expense question. Try something like \"how much did I spend this week?\"",
    "I can only help with your expenses and spending insights. What would you like to know about them?",
    "Hmm, I don't have an answer for that. I'm best at recording expenses and analyzing your spending.",
];

/// Picks one entry from a pool. The random source is injected so tests can
/// pin the selection.
pub fn pick_variant<'a>(pool: &[&'a str], rng: &mut impl Rng) -> &'a str {
    if pool.is_empty() {
        return "";
    }
    pool[rng.gen_range(0..pool.len())]
}

/// Detects the static product-help question without involving the model.
pub fn is_help_query(text: &str) -> bool {
    let mut normalized = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            normalized.extend(ch.to_lowercase());
        } else {
            normalized.push(' ');
        }
    }
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.contains("what is trackcrow") || normalized == "trackcrow help"
}

pub fn mode_mismatch_reply(correct: Option<PromptMode>) -> String {
    match correct {
        Some(mode) => {
            format!("That request belongs in {mode} mode. Switch to {mode} mode and try again.")
        }
        None => "That looks like a different type of command than this mode supports.".to_owned(),
    }
}

pub fn unknown_intent_reply(name: &str) -> String {
    format!("I understood that as `{name}`, but I don't have a handler for it yet.")
}

pub fn tool_failure_reply(tool_name: &str, error_text: &str) -> String {
    format!("I couldn't complete `{tool_name}`: {error_text}")
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::modes::PromptMode;
    use crate::replies::{
        is_help_query, mode_mismatch_reply, pick_variant, tool_failure_reply,
        unknown_intent_reply, IRRELEVANT_REPLIES,
    };

    #[test]
    fn variant_selection_is_deterministic_with_a_seeded_source() {
        let mut first = StdRng::seed_from_u64(7);
        let mut second = StdRng::seed_from_u64(7);

        assert_eq!(
            pick_variant(IRRELEVANT_REPLIES, &mut first),
            pick_variant(IRRELEVANT_REPLIES, &mut second)
        );
    }

    #[test]
    fn every_variant_is_reachable() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = vec![false; IRRELEVANT_REPLIES.len()];
        for _ in 0..200 {
            let choice = pick_variant(IRRELEVANT_REPLIES, &mut rng);
            let index = IRRELEVANT_REPLIES
                .iter()
                .position(|candidate| *candidate == choice)
                .expect("choice should come from the pool");
            seen[index] = true;
        }
        assert!(seen.iter().all(|reached| *reached));
    }

    #[test]
    fn empty_pool_returns_an_empty_reply() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(pick_variant(&[], &mut rng), "");
    }

    #[test]
    fn help_detection_ignores_case_and_punctuation() {
        assert!(is_help_query("what is trackcrow"));
        assert!(is_help_query("What is TrackCrow?"));
        assert!(is_help_query("hey, what is trackcrow exactly"));
        assert!(!is_help_query("what is the weather"));
        assert!(!is_help_query("I spent 200 on lunch"));
    }

    #[test]
    fn mode_mismatch_names_the_correct_bucket() {
        let reply = mode_mismatch_reply(Some(PromptMode::Analytics));
        assert!(reply.contains("analytics"));

        let fallback = mode_mismatch_reply(None);
        assert!(fallback.contains("different type of command"));
    }

    #[test]
    fn failure_replies_embed_their_context() {
        assert!(unknown_intent_reply("payBills").contains("payBills"));
        let failure = tool_failure_reply("recordExpense", "store unavailable");
        assert!(failure.contains("recordExpense"));
        assert!(failure.contains("store unavailable"));
    }
}
