//! Property-based tests for name normalization and ecommerce routing
//!
//! - Separator and camelCase spellings of a name normalize identically
//! - Fuzzy mapping finds a key under any of those spellings
//! - Every canonical ecommerce event is recognized regardless of case and
//!   space/underscore placement

use adapter_runtime::mapping::{map, normalize};
use adapter_runtime::EcommerceEvent;
use proptest::prelude::*;
use serde_json::json;

/// Strategy for lowercase words long enough to keep camelCase unambiguous
fn words_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{2,8}", 1..5)
}

/// Strategy for a single separator
fn separator_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just(" "), Just("_"), Just("-"), Just(".")]
}

fn camel(words: &[String]) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                word.clone()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect()
}

/// Strategy for an ecommerce event index plus a separator choice per gap
fn ecommerce_strategy() -> impl Strategy<Value = (usize, Vec<&'static str>, bool)> {
    (
        0..EcommerceEvent::ALL.len(),
        prop::collection::vec(prop_oneof![Just(""), Just(" "), Just("_")], 6),
        any::<bool>(),
    )
}

proptest! {
    #[test]
    fn prop_separated_names_normalize_to_words(
        words in words_strategy(),
        separator in separator_strategy(),
    ) {
        let expected = words.join(" ");
        prop_assert_eq!(normalize(&words.join(separator)), expected);
    }

    #[test]
    fn prop_camel_case_normalizes_to_words(words in words_strategy()) {
        let expected = words.join(" ");
        prop_assert_eq!(normalize(&camel(&words)), expected);
    }

    #[test]
    fn prop_normalize_is_idempotent(words in words_strategy(), separator in separator_strategy()) {
        let once = normalize(&words.join(separator));
        prop_assert_eq!(normalize(&once), once.clone());
    }

    #[test]
    fn prop_map_finds_any_spelling(words in words_strategy(), separator in separator_strategy()) {
        let mut entries = serde_json::Map::new();
        entries.insert(words.join(" "), json!("id-1"));
        let table = serde_json::Value::Object(entries);

        prop_assert_eq!(map(&table, &words.join(separator)), vec![json!("id-1")]);
        prop_assert_eq!(map(&table, &camel(&words)), vec![json!("id-1")]);
    }

    #[test]
    fn prop_ecommerce_events_route_regardless_of_spelling(
        (index, separators, upper) in ecommerce_strategy(),
    ) {
        let event = EcommerceEvent::ALL[index];
        let mut name = String::new();
        for (i, word) in event.words().iter().enumerate() {
            if i > 0 {
                name.push_str(separators[i - 1]);
            }
            name.push_str(word);
        }
        if upper {
            name = name.to_uppercase();
        }

        prop_assert!(event.matches(&name), "{} should match {:?}", name, event);
        prop_assert!(EcommerceEvent::route(&name).any(|routed| routed == event));
    }
}
