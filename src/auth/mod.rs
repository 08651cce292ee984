//! Usage: Authenticated request pipeline (token store, refresh single-flight, auth events).

pub mod coordinator;
pub mod events;
pub(crate) mod refresh;
pub mod session;
pub mod single_flight;
pub mod token_store;
