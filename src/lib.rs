pub mod companion;
pub mod conflict;
pub mod copy_engine;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod outcome;
pub mod params;
pub mod readiness;
pub mod shape;
pub mod share;
pub mod strategy;

pub use engine::CaptureEngine;
pub use error::CaptureError;
pub use outcome::{CaptureOutcome, CloseoutType, RetryCode};
pub use params::{CaptureRequest, ManagerConfig, ParamMap, Perspective};
pub use shape::{DatasetDescriptor, RawDatasetShape};
pub use share::{ConnectionState, ConnectorKind, ShareConnector, SystemShareConnector};
