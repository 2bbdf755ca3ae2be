mod helpers;

mod manager_tests;
mod recovery_tests;
