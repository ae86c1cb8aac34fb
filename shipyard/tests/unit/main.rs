//! Engine integration tests, driven through a scripted command runner

mod common;
mod test_cloud_hosted;
mod test_cloud_local;
mod test_local;
mod test_server;
