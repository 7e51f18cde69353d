//! Unsubscribe automation engine.
//!
//! Flow for one message:
//! 1. `extractor::extract()`: ordered candidate mechanisms (no network)
//! 2. `executor::StrategyExecutor`: run each candidate over `HttpTransport`,
//!    recursing into `form::locate_with_intent()` for interstitial pages
//! 3. `classifier::classify()`: map the transport result to an `Outcome`
//! 4. `orchestrator::Orchestrator`: stop at the first decisive outcome and
//!    persist the record through the `StatusStore`

pub mod classifier;
pub mod executor;
pub mod extractor;
pub mod form;
pub mod orchestrator;
pub mod transport;
pub mod types;

pub use classifier::{Vocabulary, classify};
pub use executor::{Execution, StrategyExecutor};
pub use extractor::extract;
pub use orchestrator::{Orchestrator, TriggerResult};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{
    FormMethod, HtmlForm, HttpResponse, Mechanism, MechanismKind, MessageMetadata, Outcome,
    OutcomeRecord, TransportResult, UnsubscribeMethod, UnsubscribeStatus,
};
