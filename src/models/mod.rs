pub mod ledgermodels;
pub mod usermodel;
