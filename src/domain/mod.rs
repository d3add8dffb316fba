//! Domain model: resource naming, IAM documents, cloud ports and chat types

pub mod action;
pub mod chat;
pub mod error;
pub mod naming;
pub mod policy;
pub mod ports;
pub mod resources;

pub use error::{CloudError, CloudResult, CloudResultExt};
pub use naming::{ResourceNames, ResourceSuffix};
pub use policy::{PolicyDocument, PolicyKind, RoleKind};
pub use ports::CloudClients;
