pub mod config;
pub mod domain;
pub mod errors;
pub mod schema;

pub use domain::application::{Application, ApplicationDefinition, ApplicationId};
pub use domain::interaction::{InteractionEntry, Sender};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use schema::{validate, Violation, ViolationKind};
