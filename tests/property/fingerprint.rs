//! Cache keys are stable under prompt formatting noise.

use atelier::cache::{normalize_prompt, CacheKey};
use atelier::Category;
use proptest::prelude::*;

fn words() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-zA-Z0-9]{1,8}", 1..8)
}

/// Same words, arbitrary case and spacing.
fn noisy(words: &[String], upper: &[bool], gaps: &[usize]) -> String {
    let mut out = " ".repeat(gaps.first().copied().unwrap_or(0));
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            out.push_str(&" ".repeat(1 + gaps.get(i).copied().unwrap_or(0)));
        }
        if upper.get(i).copied().unwrap_or(false) {
            out.push_str(&word.to_uppercase());
        } else {
            out.push_str(word);
        }
    }
    out.push('\t');
    out
}

proptest! {
    #[test]
    fn prop_formatting_noise_keeps_the_key(
        words in words(),
        upper in prop::collection::vec(any::<bool>(), 8),
        gaps in prop::collection::vec(0usize..3, 8),
        subject in "[a-z]{1,10}",
    ) {
        let canonical = words.join(" ");
        let messy = noisy(&words, &upper, &gaps);
        prop_assert_eq!(
            CacheKey::fingerprint(&subject, Category::Portrait, &canonical, None),
            CacheKey::fingerprint(&subject, Category::Portrait, &messy, None)
        );
    }

    #[test]
    fn prop_normalization_is_idempotent(prompt in "[a-zA-Z0-9\u{e9}\u{fc}\u{301} \\t\\n]{0,64}") {
        let once = normalize_prompt(&prompt);
        prop_assert_eq!(normalize_prompt(&once), once);
    }

    #[test]
    fn prop_category_and_source_change_the_key(
        words in words(),
        subject in "[a-z]{1,10}",
        source in "[a-z]{1,12}\\.png",
    ) {
        let prompt = words.join(" ");
        let portrait = CacheKey::fingerprint(&subject, Category::Portrait, &prompt, None);
        prop_assert_ne!(
            &portrait,
            &CacheKey::fingerprint(&subject, Category::Scene, &prompt, None)
        );
        prop_assert_ne!(
            &portrait,
            &CacheKey::fingerprint(&subject, Category::Portrait, &prompt, Some(&source))
        );
        prop_assert_eq!(portrait.as_str().len(), 64);
    }
}

#[test]
fn test_composed_and_decomposed_accents_match() {
    let composed = CacheKey::fingerprint("chef", Category::Portrait, "caf\u{e9} owner", None);
    let decomposed = CacheKey::fingerprint("chef", Category::Portrait, "cafe\u{301} owner", None);
    assert_eq!(composed, decomposed);
}
