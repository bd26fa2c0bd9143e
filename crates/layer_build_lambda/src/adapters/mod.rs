mod blocking;
pub mod local_store;
pub mod object_store;
pub mod resolver;
pub mod s3_store;
