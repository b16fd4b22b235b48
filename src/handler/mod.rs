pub mod balance;
pub mod escrow;
pub mod payment_methods;
pub mod payments;
pub mod withdrawals;
