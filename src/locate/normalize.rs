//! Text preparation for matching: character folding, whitespace collapsing,
//! chunking, sentence splitting, keyword extraction, and fuzzy similarity.
//!
//! Everything here is pure string work shared by the strategies and the page
//! snapshot's normalized view.

use std::collections::HashSet;

/// Trailing-period strings that do not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "St.", "vs.", "etc.", "e.g.", "i.e.", "approx.",
    "Fig.", "No.", "al.",
];

/// Function words excluded from keyword anchoring. Only words longer than
/// four characters reach this list.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "being", "below", "between", "could", "during",
    "every", "other", "shall", "should", "their", "there", "these", "those", "through",
    "under", "until", "where", "which", "while", "within", "would",
];

/// Folds quote, dash, and ligature variants to their ASCII forms without
/// touching word boundaries. Byte length may grow (ligature expansion).
pub fn fold_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => out.push('-'),
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => out.push(' '),
            '\u{2026}' => out.push_str("..."),
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            _ => out.push(c),
        }
    }
    out
}

/// Full snippet normalization: fold variants, collapse all whitespace runs
/// (including line breaks) to single spaces, trim.
pub fn normalize_snippet(text: &str) -> String {
    fold_text(text).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits text into word-boundary chunks of roughly `target` characters.
/// A single word longer than the target becomes its own chunk.
pub fn chunk_words(text: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > target {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Splits on `.`/`!`/`?` followed by whitespace and an uppercase letter,
/// guarding common abbreviations. Decimal points never split because no
/// whitespace follows them.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && matches!(chars[j], '.' | '!' | '?') {
                j += 1;
            }
            let mut k = j;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            let saw_whitespace = k > j;
            let upper_next = k < chars.len() && chars[k].is_uppercase();
            let head: String = chars[start..j].iter().collect();
            if saw_whitespace && upper_next && !ends_with_abbreviation(head.trim_end()) {
                let sentence = head.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = k;
                i = k;
                continue;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    let tail: String = chars[start..].iter().collect();
    let tail = tail.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn ends_with_abbreviation(s: &str) -> bool {
    ABBREVIATIONS.iter().any(|abbr| s.ends_with(abbr))
}

/// Up to `max` lowercase words longer than four characters, stop words and
/// duplicates removed, original order kept.
pub fn significant_words(text: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if out.len() == max {
            break;
        }
        let word = token.to_lowercase();
        if word.chars().count() > 4
            && !STOP_WORDS.contains(&word.as_str())
            && seen.insert(word.clone())
        {
            out.push(word);
        }
    }
    out
}

/// Lowercase words with punctuation trimmed from both ends, for token-level
/// window comparison against OCR output.
pub fn match_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Similarity of two strings on a 0–100 scale: twice the longest common
/// subsequence over the combined length, the classic sequence-matcher ratio.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() && b_chars.is_empty() {
        return 100.0;
    }
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(&a_chars, &b_chars);
    200.0 * lcs as f64 / (a_chars.len() + b_chars.len()) as f64
}

/// Best alignment of the shorter string inside the longer, scored 0–100.
/// Windows start at word boundaries of the longer string; a tail window
/// keeps the end reachable.
pub fn partial_ratio(needle: &str, hay: &str) -> f64 {
    let needle_chars: Vec<char> = needle.chars().collect();
    let hay_chars: Vec<char> = hay.chars().collect();
    if needle_chars.is_empty() || hay_chars.is_empty() {
        return 0.0;
    }
    if needle_chars.len() >= hay_chars.len() {
        return ratio(needle, hay);
    }

    let window = needle_chars.len();
    let mut starts: Vec<usize> = vec![0];
    for (i, c) in hay_chars.iter().enumerate().skip(1) {
        if c.is_whitespace() && i + 1 < hay_chars.len() {
            starts.push(i + 1);
        }
    }
    starts.push(hay_chars.len() - window);

    let mut best = 0.0f64;
    for &start in &starts {
        if start + window > hay_chars.len() {
            continue;
        }
        let slice = &hay_chars[start..start + window];
        let lcs = lcs_len(&needle_chars, slice);
        let score = 200.0 * lcs as f64 / (needle_chars.len() + slice.len()) as f64;
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

/// Two-row longest-common-subsequence length.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── folding ──

    #[test]
    fn folds_quotes_dashes_ligatures() {
        assert_eq!(fold_text("\u{201C}eﬃcacy\u{201D}"), "\"efficacy\"");
        assert_eq!(fold_text("12\u{2013}18 years"), "12-18 years");
        assert_eq!(fold_text("don\u{2019}t"), "don't");
        assert_eq!(fold_text("wait\u{2026}"), "wait...");
        assert_eq!(fold_text("non\u{00A0}breaking"), "non breaking");
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(
            normalize_snippet("  spread \n across\t\tlines  "),
            "spread across lines"
        );
    }

    #[test]
    fn fold_keeps_plain_ascii_untouched() {
        let s = "Plain ASCII stays exactly as it was.";
        assert_eq!(fold_text(s), s);
    }

    // ── chunking ──

    #[test]
    fn chunks_break_on_word_boundaries_near_target() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunk_words(text, 20);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20, "chunk too long: {chunk}");
            assert!(!chunk.starts_with(' ') && !chunk.ends_with(' '));
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn oversized_word_is_its_own_chunk() {
        let chunks = chunk_words("tiny extraordinarilyoverlongword end", 10);
        assert_eq!(chunks[1], "extraordinarilyoverlongword");
    }

    // ── sentences ──

    #[test]
    fn splits_on_terminator_whitespace_uppercase() {
        let sentences =
            split_sentences("Subjects must be 18 years. Consent is required! Is that all?");
        assert_eq!(
            sentences,
            vec![
                "Subjects must be 18 years.",
                "Consent is required!",
                "Is that all?"
            ]
        );
    }

    #[test]
    fn abbreviations_and_decimals_do_not_split() {
        let sentences = split_sentences("Dr. Smith reviewed 3.5 mg dosing. Results were stable.");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0], "Dr. Smith reviewed 3.5 mg dosing.");
    }

    #[test]
    fn lowercase_continuation_does_not_split() {
        let sentences = split_sentences("measured at 4 wks. post baseline only");
        assert_eq!(sentences.len(), 1);
    }

    // ── keywords ──

    #[test]
    fn keywords_filter_short_stop_and_duplicate_words() {
        let words = significant_words(
            "The primary endpoint should be overall survival, the primary analysis of survival",
            10,
        );
        assert_eq!(words, vec!["primary", "endpoint", "overall", "survival", "analysis"]);
    }

    #[test]
    fn keywords_cap_at_max() {
        let text = "alphaone betatwo gammathree deltafour epsilonfive zetasix etaseven thetaeight iotanine kappaten lambdaeleven";
        assert_eq!(significant_words(text, 10).len(), 10);
    }

    #[test]
    fn match_words_trim_punctuation_and_lowercase() {
        assert_eq!(
            match_words("Dose: 20mg/day, (oral)."),
            vec!["dose", "20mg/day", "oral"]
        );
    }

    // ── similarity ──

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("exact match", "exact match"), 100.0);
    }

    #[test]
    fn disjoint_strings_score_low() {
        assert!(ratio("abcdef", "uvwxyz") < 20.0);
    }

    #[test]
    fn partial_ratio_finds_embedded_needle() {
        let hay = "prefix words then the exact target phrase appears here and more trails after";
        let score = partial_ratio("the exact target phrase", hay);
        assert!(score >= 95.0, "score = {score}");
    }

    #[test]
    fn partial_ratio_tolerates_small_corruption() {
        let hay = "subjects must weigh at leest 50 kg at screening to be enrolled";
        let score = partial_ratio("must weigh at least 50 kg", hay);
        assert!(score >= 85.0, "score = {score}");
        assert!(score < 100.0);
    }

    #[test]
    fn partial_ratio_rejects_unrelated_text() {
        let score = partial_ratio("completely unrelated phrase", "the quick brown fox jumps over");
        assert!(score < 60.0, "score = {score}");
    }
}
