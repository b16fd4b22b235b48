pub mod audit_service;
pub mod background_jobs;
pub mod error;
pub mod escrow_service;
pub mod payment_method_service;
pub mod payment_provider;
pub mod payment_service;
pub mod risk_service;
pub mod withdrawal_service;
