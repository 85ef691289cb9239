pub mod estimator;
pub mod histogram;
pub mod report;
