pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod http;
pub mod intent;
pub mod llm;
pub mod logging;
pub mod policy;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result, ValidationError};
pub use gateway::{Gateway, IntentResponse, NlQueryResponse, Timings};
pub use guard::{validate, AcceptedSql, ValidationOutcome};
pub use intent::{Intent, IntentClassification, IntentKind};
pub use llm::{LlmClient, SqlGenerator};
pub use policy::{FullyQualifiedName, Policy, PolicyBuilder, TableHint};
