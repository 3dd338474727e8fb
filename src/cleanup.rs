//! Best-effort removal of socket files when the process dies on a signal.
//!
//! A bound unix socket leaves its filesystem entry behind if the process is
//! killed. Paths registered here are unlinked from a fatal-signal handler
//! (TERM, INT, HUP) before the signal is re-raised with its default
//! disposition. Clean shutdown paths unlink explicitly and deregister.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Mutex, Once};

static FILES: Mutex<BTreeSet<CString>> = Mutex::new(BTreeSet::new());
static INSTALL: Once = Once::new();

const FATAL_SIGNALS: [libc::c_int; 3] = [libc::SIGTERM, libc::SIGINT, libc::SIGHUP];

/// Register `path` for unlinking if the process dies on a fatal signal.
///
/// Installs the signal handlers on first use. Registering the same path
/// again is a no-op.
pub fn add_file_to_unlink(path: &Path) {
    INSTALL.call_once(install_handlers);
    if let (Ok(cpath), Ok(mut files)) = (to_cstring(path), FILES.lock()) {
        files.insert(cpath);
    }
}

/// Cancel a registration made with [`add_file_to_unlink`].
///
/// Does not remove the file itself; callers unlink explicitly on clean
/// shutdown.
pub fn remove_file_to_unlink(path: &Path) {
    if let (Ok(cpath), Ok(mut files)) = (to_cstring(path), FILES.lock()) {
        files.remove(&cpath);
    }
}

fn to_cstring(path: &Path) -> Result<CString, std::ffi::NulError> {
    CString::new(path.as_os_str().as_bytes())
}

fn install_handlers() {
    for sig in FATAL_SIGNALS {
        unsafe {
            libc::signal(
                sig,
                on_fatal_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }
    }
}

extern "C" fn on_fatal_signal(sig: libc::c_int) {
    // Signal context: only try_lock, and skip the cleanup entirely when the
    // signal landed inside a registry update.
    if let Ok(files) = FILES.try_lock() {
        for path in files.iter() {
            unsafe {
                libc::unlink(path.as_ptr());
            }
        }
    }
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_register_and_cancel() {
        let path = PathBuf::from("/tmp/ctlsock-cleanup-test.sock");

        add_file_to_unlink(&path);
        add_file_to_unlink(&path);
        {
            let files = FILES.lock().unwrap();
            assert_eq!(
                files
                    .iter()
                    .filter(|p| p.as_bytes().ends_with(b"cleanup-test.sock"))
                    .count(),
                1
            );
        }

        remove_file_to_unlink(&path);
        let files = FILES.lock().unwrap();
        assert!(!files
            .iter()
            .any(|p| p.as_bytes().ends_with(b"cleanup-test.sock")));
    }
}
