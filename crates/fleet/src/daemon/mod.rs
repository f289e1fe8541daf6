//! Request hosting for `fleet monitor`
//!
//! The monitor owns the state store for as long as it runs and serves other
//! invocations over a Unix socket next to the store. Without a monitor, an
//! invocation hosts its own request in-process with the same handlers.

pub mod handlers;
pub mod server;

pub use handlers::Host;
pub use server::ControlServer;

use std::path::{Path, PathBuf};

/// Control socket path for the store at `state_dir`
pub fn socket_path(state_dir: &Path) -> PathBuf {
    let mut path = state_dir.as_os_str().to_owned();
    path.push(".sock");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_sits_next_to_the_store() {
        assert_eq!(
            socket_path(Path::new("/var/lib/fleet/web.v2")),
            PathBuf::from("/var/lib/fleet/web.v2.sock")
        );
    }
}
