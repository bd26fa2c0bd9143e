pub mod build;
pub mod provisioning;
