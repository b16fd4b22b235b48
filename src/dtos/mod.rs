pub mod ledgerdtos;
