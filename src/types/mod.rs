//! Types that are used across multiple components of the log service.
//!
//! Other types, specific to single components, can be found in the modules of those components, e.g.,
//! [`crate::subscription`].

pub mod data_types;

pub mod operation;
