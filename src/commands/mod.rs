pub mod classify;
pub mod extract;
pub mod history;
