use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::error::{HostError, HostResult};
use crate::host::{AuthoringHost, DocumentHandle, HostConnector};

struct OpenEntry {
    path: PathBuf,
    opens: u32,
}

/// Owner of the single authoring session of a campaign.
///
/// The host is started lazily on first use. Documents are opened through
/// [`DocumentGuard`]s, which close their handle when dropped. Dropping the
/// session closes whatever is still open and shuts the host down.
pub struct Session {
    connector: Box<dyn HostConnector>,
    host: RefCell<Option<Box<dyn AuthoringHost>>>,
    open: RefCell<BTreeMap<DocumentHandle, OpenEntry>>,
    shut_down: Cell<bool>,
}

impl Session {
    pub fn new(connector: impl HostConnector + 'static) -> Self {
        Self::from_boxed(Box::new(connector))
    }

    pub fn from_boxed(connector: Box<dyn HostConnector>) -> Self {
        Self {
            connector,
            host: RefCell::new(None),
            open: RefCell::new(BTreeMap::new()),
            shut_down: Cell::new(false),
        }
    }

    /// Start the host if it is not running yet
    pub fn ensure_started(&self) -> HostResult<()> {
        if self.shut_down.get() {
            return Err(HostError::SessionUnavailable(
                "session has been shut down".to_string(),
            ));
        }
        let mut host = self.host.borrow_mut();
        if host.is_none() {
            info!("Starting authoring session ({})", self.connector.describe());
            *host = Some(self.connector.connect()?);
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.host.borrow().is_some()
    }

    /// Run one host call. The closure must not call back into the session.
    pub fn with_host<T, F>(&self, f: F) -> HostResult<T>
    where
        F: FnOnce(&mut dyn AuthoringHost) -> HostResult<T>,
    {
        self.ensure_started()?;
        let mut slot = self.host.borrow_mut();
        let host = slot
            .as_mut()
            .ok_or_else(|| HostError::SessionUnavailable("session not started".to_string()))?;
        f(host.as_mut())
    }

    pub fn open(&self, path: &Path, writable: bool) -> HostResult<DocumentGuard<'_>> {
        let handle = self.with_host(|host| host.open(path, writable))?;
        debug!(
            "Opened {} {} ({})",
            path.display(),
            handle,
            if writable { "read-write" } else { "read-only" }
        );
        self.open
            .borrow_mut()
            .entry(handle)
            .or_insert_with(|| OpenEntry {
                path: path.to_path_buf(),
                opens: 0,
            })
            .opens += 1;
        Ok(DocumentGuard {
            session: self,
            handle,
            path: path.to_path_buf(),
            released: false,
        })
    }

    /// Handles currently open through this session
    pub fn open_count(&self) -> usize {
        self.open.borrow().len()
    }

    pub fn open_paths(&self) -> Vec<PathBuf> {
        self.open.borrow().values().map(|e| e.path.clone()).collect()
    }

    fn close_handle(&self, handle: DocumentHandle, save: bool) -> HostResult<()> {
        {
            let mut open = self.open.borrow_mut();
            let Some(entry) = open.get_mut(&handle) else {
                // Already closed by close_all or shutdown
                return Ok(());
            };
            entry.opens -= 1;
            if entry.opens == 0 {
                open.remove(&handle);
            }
        }
        let result = self.with_host(|host| host.close(handle, save));
        self.release_idle();
        result
    }

    /// Close every tracked handle without saving. Returns how many documents were closed.
    pub fn close_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.open.borrow_mut());
        if entries.is_empty() || !self.is_started() {
            return 0;
        }
        let count = entries.len();
        for (handle, entry) in entries {
            for _ in 0..entry.opens {
                if let Err(e) = self.with_host(|host| host.close(handle, false)) {
                    warn!("Failed to close {}: {}", entry.path.display(), e);
                    break;
                }
            }
        }
        self.release_idle();
        debug!("Closed {} open document(s)", count);
        count
    }

    /// Ask the host to reclaim idle native state
    pub fn release_idle(&self) {
        if let Ok(mut slot) = self.host.try_borrow_mut() {
            if let Some(host) = slot.as_mut() {
                host.release_idle();
            }
        }
    }

    /// Close all documents and shut the host down. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }
        let left_open = self.open.borrow().len();
        if left_open > 0 {
            info!("Closing {} document(s) left open before shutdown", left_open);
        }

        // close_all goes through with_host, which refuses once shut_down is set
        self.shut_down.set(false);
        self.close_all();
        self.shut_down.set(true);

        if let Some(mut host) = self.host.borrow_mut().take() {
            info!("Shutting down authoring session");
            if let Err(e) = host.shutdown() {
                warn!("Authoring session shutdown failed: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An open document, closed without saving when dropped
pub struct DocumentGuard<'s> {
    session: &'s Session,
    handle: DocumentHandle,
    path: PathBuf,
    released: bool,
}

impl<'s> DocumentGuard<'s> {
    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a host call against this document
    pub fn with_host<T, F>(&self, f: F) -> HostResult<T>
    where
        F: FnOnce(&mut dyn AuthoringHost, DocumentHandle) -> HostResult<T>,
    {
        let handle = self.handle;
        self.session.with_host(|host| f(host, handle))
    }

    pub fn save(&self) -> HostResult<()> {
        self.with_host(|host, handle| host.save(handle))
    }

    pub fn close(mut self, save: bool) -> HostResult<()> {
        self.released = true;
        self.session.close_handle(self.handle, save)
    }
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.session.close_handle(self.handle, false) {
                warn!("Failed to close {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::json_store::StoredDocument;
    use crate::host::JsonStoreConnector;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Connector that counts how often it is asked to start a host
    struct CountingConnector {
        connects: Rc<Cell<u32>>,
        fail: bool,
    }

    impl HostConnector for CountingConnector {
        fn connect(&self) -> HostResult<Box<dyn AuthoringHost>> {
            self.connects.set(self.connects.get() + 1);
            if self.fail {
                return Err(HostError::SessionUnavailable("not registered".to_string()));
            }
            JsonStoreConnector.connect()
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn fixture(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("BASE_200.ipt");
        StoredDocument::new(Some("ABC_200")).save(&path).unwrap();
        path
    }

    #[test]
    fn test_lazy_start() {
        let temp = TempDir::new().unwrap();
        let part = fixture(&temp);
        let connects = Rc::new(Cell::new(0));
        let session = Session::new(CountingConnector {
            connects: connects.clone(),
            fail: false,
        });
        assert_eq!(connects.get(), 0);
        assert!(!session.is_started());

        let first = session.open(&part, false).unwrap();
        drop(first);
        let _second = session.open(&part, false).unwrap();
        assert_eq!(connects.get(), 1);
    }

    #[test]
    fn test_connect_failure_surfaces() {
        let session = Session::new(CountingConnector {
            connects: Rc::new(Cell::new(0)),
            fail: true,
        });
        assert!(matches!(
            session.ensure_started(),
            Err(HostError::SessionUnavailable(_))
        ));
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let temp = TempDir::new().unwrap();
        let part = fixture(&temp);
        let session = Session::new(JsonStoreConnector);
        {
            let guard = session.open(&part, true).unwrap();
            assert_eq!(guard.path(), part.as_path());
            assert_eq!(session.open_count(), 1);
        }
        assert_eq!(session.open_count(), 0);
    }

    #[test]
    fn test_close_all_then_guard_drop_is_noop() {
        let temp = TempDir::new().unwrap();
        let part = fixture(&temp);
        let session = Session::new(JsonStoreConnector);
        let guard = session.open(&part, false).unwrap();
        let again = session.open(&part, false).unwrap();
        assert_eq!(session.open_count(), 1);

        assert_eq!(session.close_all(), 1);
        assert_eq!(session.open_count(), 0);
        drop(guard);
        drop(again);
        assert_eq!(session.open_count(), 0);
    }

    #[test]
    fn test_shutdown_closes_everything_and_refuses_new_work() {
        let temp = TempDir::new().unwrap();
        let part = fixture(&temp);
        let session = Session::new(JsonStoreConnector);
        let guard = session.open(&part, false).unwrap();

        session.shutdown();
        assert_eq!(session.open_count(), 0);
        assert!(!session.is_started());
        assert!(session.open(&part, false).is_err());
        drop(guard);
    }
}
