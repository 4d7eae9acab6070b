mod pipeline_tests;
mod property_tests;
pub mod test_helpers;
