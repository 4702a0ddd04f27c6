//! Log anomaly detection for CI job artifacts.
//!
//! The first failed build of a job group becomes its baseline; events of
//! later failed builds are compared line by line against that baseline and
//! the ones that look new are reported.

mod events;
mod invoker;
mod model;
mod tokenizer;

pub use events::{import_events, EventRecord};
pub use invoker::{Anomaly, Classification, ClassifierInvoker};
