//! Loopback probe for wiremock-based tests.
//!
//! Compiled into the library's unit tests and, through `#[path]`, into the
//! integration test crates under `tests/`.

use std::net::TcpListener;
use std::sync::OnceLock;

use wiremock::MockServer;

/// Set to `1`, `true` or `yes` to fail instead of skip when loopback is unavailable.
pub const STRICT_SOCKETS_VAR: &str = "STREAMGRAB_REQUIRE_SOCKET_TESTS";

fn loopback_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| TcpListener::bind("127.0.0.1:0").is_ok())
}

fn strict_sockets() -> bool {
    std::env::var(STRICT_SOCKETS_VAR)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Starts a wiremock origin, or `None` when this sandbox cannot bind loopback.
pub async fn mock_origin() -> Option<MockServer> {
    if loopback_available() {
        return Some(MockServer::start().await);
    }
    let test = std::thread::current().name().unwrap_or("<unnamed>").to_string();
    assert!(
        !strict_sockets(),
        "{test}: loopback sockets unavailable and {STRICT_SOCKETS_VAR} is set"
    );
    eprintln!("{test}: skipped, loopback sockets unavailable");
    None
}
