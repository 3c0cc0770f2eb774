//! Circuit Breaker Engine (design components A-D): per-key state machines
//! driven by sliding-window counters, a bounded key->breaker mapping, and a
//! chain-of-responsibility rule evaluator that classifies completed calls.

pub mod config;
pub mod listener;
pub mod mapping;
pub mod rule;
pub mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use listener::CircuitBreakerListener;
pub use mapping::{BreakerKey, CircuitBreakerMapping, MappingMode};
pub use rule::{CallOutcome, Cause, Classification, PendingRule, RuleEvaluator, RuleEvaluatorBuilder, StatusClass};
pub use state::{CircuitBreaker, CircuitState};
