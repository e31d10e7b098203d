#![allow(dead_code)]

pub mod fixtures;
#[path = "../../src/test_support/sockets.rs"]
pub mod sockets;

/// Binds a mock origin or returns early from the calling test.
macro_rules! require_mock_server {
    () => {
        match $crate::support::sockets::mock_origin().await {
            Some(server) => server,
            None => return,
        }
    };
}

pub(crate) use require_mock_server;
