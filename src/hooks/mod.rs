//! Hooks
//!
//! A hook is a named inbound endpoint (`/h/<id>`) with an ordered chain of
//! components. This module holds the data model and [`HookStore`], which
//! owns hook lifecycle, component attachment and delivery counters.

pub mod store;
pub mod types;

pub use store::{Direction, HookStore, HookStoreError};
pub use types::{
    canonical_header_name, Count, Hook, HookComponent, HookSummary, Request, RECENT_HOURS,
};
