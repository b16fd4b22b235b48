pub mod clock;
pub mod money;
pub mod signature;
pub mod token;
