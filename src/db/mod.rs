pub mod db;
pub mod ledgerdb;
#[cfg(test)]
pub mod memory;

pub use db::DBClient;
pub use ledgerdb::LedgerExt;
