use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt};
use sdk::types::{ExecutionResult, Language};

// Every error variant yields a static, non-empty hint that does not echo
// the raw detail it was built from.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-z/._]{8,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::LLMProvider(error_str.clone()),
            EngineError::InvalidRequest(error_str.clone()),
            EngineError::FeatureDisabled(error_str.clone()),
            EngineError::Network(error_str.clone()),
            EngineError::PathDenied(std::path::PathBuf::from(&error_str)),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Language tags resolve independently of case and surrounding whitespace.
proptest! {
    #[test]
    fn test_language_tag_case_insensitive(
        tag in prop::sample::select(vec!["python", "py", "bash", "shell", "sh"]),
        upper in prop::collection::vec(any::<bool>(), 6),
        pad in " {0,3}",
    ) {
        let mixed: String = tag
            .chars()
            .zip(upper.iter().cycle())
            .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
            .collect();
        let padded = format!("{}{}{}", pad, mixed, pad);

        prop_assert_eq!(Language::from_tag(&padded), Language::from_tag(tag));
        prop_assert!(Language::from_tag(&padded).is_some());
    }

    #[test]
    fn test_unknown_language_tags_rejected(tag in "[a-z]{3,10}") {
        prop_assume!(!["python", "bash", "shell"].contains(&tag.as_str()));
        prop_assert_eq!(Language::from_tag(&tag), None);
    }
}

// A rejected result never carries output and always keeps the tag verbatim.
proptest! {
    #[test]
    fn test_rejected_result_shape(tag in "\\PC{0,12}", error in "\\PC{1,40}") {
        let result = ExecutionResult::rejected(tag.clone(), error.clone());
        prop_assert!(!result.success);
        prop_assert!(result.output.is_empty());
        prop_assert_eq!(result.language, tag);
        prop_assert_eq!(result.error, error);
    }
}
