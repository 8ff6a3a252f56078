//! Lexicon-based sentiment tagger.
//!
//! Pure and deterministic: the same input text always yields the same label,
//! with no I/O. Sits on the synchronous message path, so it is a handful of
//! hash lookups per token and nothing more.

use crate::messages::Sentiment;

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "awesome", "amazing", "love", "loved", "like", "liked",
    "happy", "glad", "thanks", "thank", "helpful", "perfect", "wonderful", "fantastic",
    "nice", "cool", "best", "works", "working", "solved", "yes",
];

const NEGATIVE: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "hate", "hated", "angry", "sad", "broken",
    "worst", "useless", "wrong", "fail", "failed", "failing", "annoying", "slow", "bug",
    "crash", "crashed", "error", "no", "problem", "issue",
];

const NEGATIONS: &[&str] = &["not", "never", "no", "dont", "doesnt", "didnt", "cant", "wont", "isnt"];

/// Classify a text's polarity. Tokenizes on non-alphanumeric boundaries,
/// scores +1 per positive token and -1 per negative token, and flips the
/// polarity of a token immediately preceded by a negation word.
pub fn classify(text: &str) -> Sentiment {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('\'', "").to_lowercase())
        .collect();

    let mut score: i32 = 0;
    for (i, token) in tokens.iter().enumerate() {
        let polarity = if POSITIVE.contains(&token.as_str()) {
            1
        } else if NEGATIVE.contains(&token.as_str()) {
            -1
        } else {
            continue;
        };

        let negated = i > 0 && NEGATIONS.contains(&tokens[i - 1].as_str());
        score += if negated { -polarity } else { polarity };
    }

    match score.cmp(&0) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_text() {
        assert_eq!(classify("This is great, thanks for the help!"), Sentiment::Positive);
    }

    #[test]
    fn negative_text() {
        assert_eq!(classify("this is terrible and the app crashed"), Sentiment::Negative);
    }

    #[test]
    fn neutral_text() {
        assert_eq!(classify("the meeting is at three"), Sentiment::Neutral);
        assert_eq!(classify(""), Sentiment::Neutral);
    }

    #[test]
    fn negation_flips_polarity() {
        assert_eq!(classify("this is not good"), Sentiment::Negative);
        assert_eq!(classify("that was not bad at all"), Sentiment::Positive);
    }

    #[test]
    fn deterministic() {
        let text = "I love it but the error is annoying";
        let first = classify(text);
        for _ in 0..10 {
            assert_eq!(classify(text), first);
        }
    }

    #[test]
    fn mixed_leans_on_balance() {
        // one positive, two negative
        assert_eq!(classify("good idea but broken and slow"), Sentiment::Negative);
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        assert_eq!(classify("GREAT!!!"), Sentiment::Positive);
        assert_eq!(classify("...terrible..."), Sentiment::Negative);
    }
}
