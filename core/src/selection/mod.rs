//! Series selection
//!
//! Matches catalog labels against each role's regex criteria and resolves
//! multiple candidates to a single keeper.

mod criteria;
mod matcher;

pub use criteria::Criteria;
pub use matcher::{match_roles, select_keeper};
