//! Infrastructure layer
//!
//! Graph backends behind the domain's repository traits.

pub mod graph;
