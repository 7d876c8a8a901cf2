mod service;

pub use service::{CommandPublisher, ControlCommand, ControlService};
