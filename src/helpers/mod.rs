pub mod layout;
pub mod xlsx;
