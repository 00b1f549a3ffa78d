//! Integration tests for listing-harvest
//!
//! These tests use wiremock to stand in for the harvested sites.

mod harvest_tests;
mod transport_tests;
