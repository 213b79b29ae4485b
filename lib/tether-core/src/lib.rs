//! Core runtime primitives for Tether services.
//!
//! - [`pool`]: a bounded pool of reusable async workers.
//! - [`runtime`]: supervision of long-lived, periodically polled tasks.
//! - [`pipeline`]: supervised message-processing stages, chained or fanned out.
//! - [`extension`]: loading tasks by name.
#![deny(warnings)]
#![deny(missing_docs)]

mod collections;

pub mod extension;
pub mod pipeline;
pub mod pool;
pub mod runtime;
