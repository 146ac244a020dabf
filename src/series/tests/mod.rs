mod config_tests;
mod index_tests;
