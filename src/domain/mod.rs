pub mod loan;
pub mod money;
pub mod ports;
pub mod transaction;
pub mod user;
pub mod wallet;
