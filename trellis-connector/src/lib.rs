//! Connector-side runtime for Trellis.
//!
//! A connector hosts a set of actions behind the generic execute contract:
//! `POST /api/v1/actions/execute` answers HTTP 200 for every logical
//! outcome, and the connector publishes its action catalog to the engine on
//! startup, retrying with backoff until the engine is reachable. Business
//! logic lives in `ConnectorAction` implementations; everything else is
//! this crate.

pub mod action;
pub mod error;
pub mod register;
pub mod runtime;

pub use action::ConnectorAction;
pub use error::{ConnectorError, ConnectorResult};
pub use register::{engine_url_from_env, register_with_engine, RegistrationOptions};
pub use runtime::ConnectorRuntime;
