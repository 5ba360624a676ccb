//! Domain layer

pub mod recall;
