//! Fiber-node channel utilization rollup.
//!
//! Resolves a front-end element's collector topology, batches windowed
//! trend queries against each collector's channel entities, and rolls
//! the samples up into one utilization figure per fiber node, emitted
//! as an incrementally paginated table.

pub mod config;
pub mod nms;
pub mod page;
pub mod rollup;
pub mod topology;
