//! Rule evaluator: classifies a completed call as success/failure/ignore
//! (design component D).
//!
//! Modeled as a chain of responsibility, the same shape as the teacher's
//! [`crate::backoff::Backoff`] enum-of-strategies but built with a builder
//! instead of an enum, since each rule pairs an arbitrary predicate with a
//! terminal classification rather than selecting between a fixed set of
//! strategies.

use crate::error::CircuitMeshError;
use reqwest::header::HeaderMap;
use std::sync::Arc;

/// The cause of a failed call, when one is known.
#[derive(Debug, Clone)]
pub enum Cause {
    /// A named exception/error type propagated from the transport or caller.
    Exception { type_name: String },
    /// The call exceeded its deadline.
    TimeoutException,
    /// The call never reached the wire.
    Unprocessed,
}

/// Coarse grouping of HTTP status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    fn of(status: u16) -> Option<Self> {
        match status / 100 {
            1 => Some(Self::Informational),
            2 => Some(Self::Success),
            3 => Some(Self::Redirection),
            4 => Some(Self::ClientError),
            5 => Some(Self::ServerError),
            _ => None,
        }
    }
}

/// What a rule chain (or the absence of one) decided about a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failure,
    Ignore,
    /// No rule matched; the caller applies its own default classification.
    Next,
}

/// Everything a rule may inspect about a completed call.
///
/// `response_body_snippet` holds at most `max_content_length` bytes
/// (see [`RuleEvaluator::max_content_length`]); `truncated` is set whenever
/// the real body exceeded that limit, matching the `TRUNCATED` flag in the
/// design.
#[derive(Debug, Clone, Default)]
pub struct CallOutcome {
    pub status: Option<u16>,
    pub cause: Option<Cause>,
    pub response_headers: HeaderMap,
    pub response_trailers: HeaderMap,
    pub total_duration_ms: u64,
    pub response_body_snippet: Option<Vec<u8>>,
    pub truncated: bool,
}

type HeaderPredicate = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;
type BodyPredicate = Arc<dyn Fn(&[u8], bool) -> bool + Send + Sync>;

enum Predicate {
    Status(u16),
    StatusClass(StatusClass),
    Exception { type_name: Option<String> },
    TimeoutException,
    Unprocessed,
    ResponseHeaders(HeaderPredicate),
    ResponseTrailers(HeaderPredicate),
    TotalDurationMsAtLeast(u64),
    Response(BodyPredicate),
}

impl Predicate {
    fn matches(&self, outcome: &CallOutcome) -> bool {
        match self {
            Self::Status(expected) => outcome.status == Some(*expected),
            Self::StatusClass(class) => {
                outcome.status.and_then(StatusClass::of) == Some(*class)
            }
            Self::Exception { type_name } => match (&outcome.cause, type_name) {
                (Some(Cause::Exception { type_name: actual }), Some(expected)) => actual == expected,
                (Some(Cause::Exception { .. }), None) => true,
                _ => false,
            },
            Self::TimeoutException => matches!(outcome.cause, Some(Cause::TimeoutException)),
            Self::Unprocessed => matches!(outcome.cause, Some(Cause::Unprocessed)),
            Self::ResponseHeaders(pred) => pred(&outcome.response_headers),
            Self::ResponseTrailers(pred) => pred(&outcome.response_trailers),
            Self::TotalDurationMsAtLeast(min) => outcome.total_duration_ms >= *min,
            Self::Response(pred) => {
                let body = outcome.response_body_snippet.as_deref().unwrap_or(&[]);
                pred(body, outcome.truncated)
            }
        }
    }
}

struct Rule {
    predicate: Predicate,
    outcome: Classification,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

/// An ordered chain of rules; the first matching rule's classification wins.
pub struct RuleEvaluator {
    rules: Vec<Rule>,
    max_content_length: usize,
}

impl std::fmt::Debug for RuleEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEvaluator")
            .field("rules", &self.rules)
            .field("max_content_length", &self.max_content_length)
            .finish()
    }
}

impl RuleEvaluator {
    pub fn builder() -> RuleEvaluatorBuilder {
        RuleEvaluatorBuilder::new()
    }

    /// Bodies are aggregated up to this many bytes before a rule that reads
    /// the body is applied; 0 means no rule in this evaluator reads the body.
    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Evaluate the chain left-to-right; returns [`Classification::Next`] if
    /// no rule matched.
    pub fn classify(&self, outcome: &CallOutcome) -> Classification {
        for rule in &self.rules {
            if rule.predicate.matches(outcome) {
                return rule.outcome;
            }
        }
        Classification::Next
    }
}

/// Builder for [`RuleEvaluator`]. Each `on_*` call opens a [`PendingRule`]
/// that must be closed with `then_failure` / `then_success` / `then_ignore`
/// before another predicate (or [`Self::build`]) can be added.
pub struct RuleEvaluatorBuilder {
    rules: Vec<Rule>,
    max_content_length: usize,
}

impl RuleEvaluatorBuilder {
    pub fn new() -> Self {
        Self { rules: Vec::new(), max_content_length: 0 }
    }

    pub fn max_content_length(mut self, bytes: usize) -> Self {
        self.max_content_length = bytes;
        self
    }

    pub fn on_status(self, status: u16) -> PendingRule {
        PendingRule::new(self, Predicate::Status(status))
    }

    pub fn on_status_class(self, class: StatusClass) -> PendingRule {
        PendingRule::new(self, Predicate::StatusClass(class))
    }

    /// `type_name = None` matches any exception cause.
    pub fn on_exception(self, type_name: Option<&str>) -> PendingRule {
        PendingRule::new(self, Predicate::Exception { type_name: type_name.map(String::from) })
    }

    pub fn on_timeout_exception(self) -> PendingRule {
        PendingRule::new(self, Predicate::TimeoutException)
    }

    pub fn on_unprocessed(self) -> PendingRule {
        PendingRule::new(self, Predicate::Unprocessed)
    }

    pub fn on_response_headers(
        self,
        predicate: impl Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    ) -> PendingRule {
        PendingRule::new(self, Predicate::ResponseHeaders(Arc::new(predicate)))
    }

    pub fn on_response_trailers(
        self,
        predicate: impl Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    ) -> PendingRule {
        PendingRule::new(self, Predicate::ResponseTrailers(Arc::new(predicate)))
    }

    pub fn on_total_duration_ms(self, min_ms: u64) -> PendingRule {
        PendingRule::new(self, Predicate::TotalDurationMsAtLeast(min_ms))
    }

    /// `predicate(body, truncated)`; the body passed is the aggregated
    /// snippet, capped at [`Self::max_content_length`].
    pub fn on_response(
        self,
        predicate: impl Fn(&[u8], bool) -> bool + Send + Sync + 'static,
    ) -> PendingRule {
        PendingRule::new(self, Predicate::Response(Arc::new(predicate)))
    }

    /// Rejects a chain that registers an [`Self::on_response`] rule without
    /// ever calling [`Self::max_content_length`] with a positive value: such
    /// a rule would silently evaluate against an empty, always-`truncated`
    /// body forever.
    pub fn build(self) -> Result<RuleEvaluator, CircuitMeshError> {
        let reads_body = self.rules.iter().any(|rule| matches!(rule.predicate, Predicate::Response(_)));
        if reads_body && self.max_content_length == 0 {
            return Err(CircuitMeshError::config(
                "on_response requires max_content_length(n) with n > 0",
            ));
        }
        Ok(RuleEvaluator { rules: self.rules, max_content_length: self.max_content_length })
    }
}

impl Default for RuleEvaluatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A predicate awaiting its terminal classification.
pub struct PendingRule {
    builder: RuleEvaluatorBuilder,
    predicate: Predicate,
}

impl PendingRule {
    fn new(builder: RuleEvaluatorBuilder, predicate: Predicate) -> Self {
        Self { builder, predicate }
    }

    fn commit(mut self, outcome: Classification) -> RuleEvaluatorBuilder {
        self.builder.rules.push(Rule { predicate: self.predicate, outcome });
        self.builder
    }

    pub fn then_failure(self) -> RuleEvaluatorBuilder {
        self.commit(Classification::Failure)
    }

    pub fn then_success(self) -> RuleEvaluatorBuilder {
        self.commit(Classification::Success)
    }

    pub fn then_ignore(self) -> RuleEvaluatorBuilder {
        self.commit(Classification::Ignore)
    }
}
