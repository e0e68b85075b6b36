//! Domain model: workflow identity, versioned definitions, the parsed
//! workflow document, and execution telemetry.

pub mod definition;
pub mod document;
pub mod execution;
pub mod workflow;

pub use definition::{canonical_json, checksum_of, WorkflowDefinition, DRAFT_VERSION};
pub use document::{Edge, EdgeWhen, Node, NodePolicies, RoutePolicy, WorkflowDocument};
pub use execution::{ActionExecution, ExecutionStatus, WorkflowExecution};
pub use workflow::{Workflow, WorkflowStatus};
