//! Connection multiplexer: one shared handle for persistent datastores,
//! a fresh session-tagged handle per operation for transient ones.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::AdapterError;
use crate::registry::{Registry, SharedConnection};

/// Tag for one transient connection. Minted from a process-wide counter,
/// never reused while the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    pub(crate) fn next() -> SessionId {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// A connection checked out for one operation.
///
/// Consumed by [`release`], so a lease is released exactly once: the
/// transient close cannot be forgotten on one code path and doubled on
/// another.
pub struct Lease {
    pub(crate) conn: SharedConnection,
    pub(crate) session: Option<SessionId>,
}

impl Lease {
    /// The session id, when the datastore is transient.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }
}

/// Guarantee a usable connection for `identity`.
///
/// Persistent: reuse the installed handle while it still reports
/// connected; otherwise connect with the marshalled configuration and
/// install the fresh handle. Establishment is serialized per identity so
/// two concurrent callers cannot double-connect.
///
/// Transient: always connect a new handle under a freshly minted session
/// id; by construction the id is new each call, so concurrent callers
/// never collide.
pub(crate) async fn ensure_connection(
    registry: &Registry,
    driver: &dyn Driver,
    identity: &str,
) -> Result<Lease, AdapterError> {
    if registry.is_persistent(identity)? {
        let gate = registry.connect_gate(identity)?;
        let _establishing = gate.lock().await;

        if let Some(conn) = registry.persistent_handle(identity)? {
            if conn.lock().await.is_connected() {
                debug!(identity, "reusing persistent connection");
                return Ok(Lease {
                    conn,
                    session: None,
                });
            }
        }

        let config = registry.driver_config(identity)?;
        let fresh = driver.connect(&config).await?;
        let conn = registry.install_persistent(identity, fresh)?;
        debug!(identity, "opened persistent connection");
        Ok(Lease {
            conn,
            session: None,
        })
    } else {
        let session = SessionId::next();
        let config = registry.driver_config(identity)?;
        let fresh = driver.connect(&config).await?;
        let conn = registry.install_session(identity, session, fresh)?;
        debug!(identity, session = session.value(), "opened transient connection");
        Ok(Lease {
            conn,
            session: Some(session),
        })
    }
}

/// Return a lease. Persistent handles stay open; transient handles are
/// detached from the registry and closed. Runs on success and failure
/// paths alike.
pub(crate) async fn release(registry: &Registry, identity: &str, lease: Lease) {
    let Some(session) = lease.session else {
        return;
    };
    // Already gone when teardown swept the session first.
    let Some(conn) = registry.remove_session(identity, session) else {
        return;
    };
    drop(lease);
    let mut connection = conn.lock().await;
    if let Err(error) = connection.close().await {
        warn!(identity, session = session.value(), %error, "failed to close transient connection");
    } else {
        debug!(identity, session = session.value(), "closed transient connection");
    }
}
