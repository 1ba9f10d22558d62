mod body_tests;
mod client_tests;
