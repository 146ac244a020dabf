mod manager_tests;
mod synchronizer_tests;
mod tick_tests;
