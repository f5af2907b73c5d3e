//! Session bookkeeping shared by the terminal bridge and the dashboard

pub mod registry;

pub use registry::{ManagedSession, SessionRegistry};
