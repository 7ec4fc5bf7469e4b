//! Built-in scoring strategies.
//!
//! Every strategy is reachable by name through [`default_registry`]; a few
//! names are aliases that share a constructor but keep their own name (and
//! so their own config section and built-in rubric).

use std::sync::Arc;

use scorecard_core::errors::StrategyError;
use scorecard_core::registry::{StrategyContext, StrategyRegistry};
use scorecard_core::strategy_api::Strategy;

pub mod entity_f1;
pub mod exact_match;
pub mod judge;
pub mod regex_match;
pub mod similarity;
pub mod timing;

type Builder = fn(&StrategyContext) -> Result<Arc<dyn Strategy>, StrategyError>;

const STRATEGIES: &[(&str, Builder)] = &[
    ("truthfulness_external", exact_match::build),
    ("exact_match", exact_match::build),
    ("regex_match", regex_match::build),
    ("entity_recognition", entity_f1::build),
    ("semantic_similarity", similarity::build_semantic),
    ("out_of_domain", similarity::build_out_of_domain),
    ("fluency", similarity::build_fluency),
    ("truthfulness_internal", judge::build),
    ("trustworthiness_internal", judge::build),
    ("llm_judge", judge::build),
    ("turn_around_time", timing::build_turn_around_time),
    ("transactions_per_minute", timing::build_transactions_per_minute),
    ("message_volume_handling", timing::build_message_volume),
    ("mtbf", timing::build_mtbf),
    ("uptime", timing::build_uptime),
];

pub fn default_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for (name, builder) in STRATEGIES {
        registry.register(name, *builder);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use scorecard_core::errors::RegistryError;
    use scorecard_core::providers::backend::fake::FakeBackend;
    use scorecard_core::strategy_api::StrategyParams;

    #[test]
    fn every_name_is_registered_once() {
        let registry = default_registry();
        assert_eq!(registry.names().len(), STRATEGIES.len());
        for (name, _) in STRATEGIES {
            assert!(registry.contains(name), "{}", name);
        }
    }

    #[test]
    fn backendless_strategies_build_without_a_backend() {
        let registry = default_registry();
        for name in ["exact_match", "truthfulness_external", "entity_recognition"] {
            let ctx = StrategyContext::new(name, StrategyParams::default());
            let s = registry.resolve(name, &ctx).unwrap();
            assert_eq!(s.name(), name);
        }
    }

    #[test]
    fn backend_strategies_fail_construction_without_one() {
        let registry = default_registry();
        let ctx = StrategyContext::new("fluency", StrategyParams::default());
        let err = registry.resolve("fluency", &ctx).err().unwrap();
        assert!(matches!(
            err,
            RegistryError::Construction {
                source: StrategyError::Config(_),
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_timeout_fails_construction() {
        let registry = default_registry();
        let params = StrategyParams::default().with("timeout_seconds", 1e30);
        let ctx = StrategyContext::new("semantic_similarity", params)
            .with_backend(Arc::new(FakeBackend::new()));
        let err = registry.resolve("semantic_similarity", &ctx).err().unwrap();
        assert!(matches!(
            err,
            RegistryError::Construction {
                source: StrategyError::Config(_),
                ..
            }
        ));
    }

    #[test]
    fn misspelled_name_gets_a_suggestion() {
        let registry = default_registry();
        let ctx = StrategyContext::new("uptme", StrategyParams::default());
        match registry.resolve("uptme", &ctx).err().unwrap() {
            RegistryError::UnknownStrategy { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("uptime"))
            }
            other => panic!("unexpected: {}", other),
        }
    }
}
