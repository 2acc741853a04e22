//! Route handlers, grouped by resource.

pub mod accounts;
pub mod connections;
pub mod tasks;
pub mod transactions;
pub mod users;
