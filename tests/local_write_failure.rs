//! A write that fails at the file-size limit must leave no trace.
//!
//! `RLIMIT_FSIZE` is process-wide, so this binary holds a single test.

#![cfg(all(unix, feature = "persistent"))]

use std::fs;

use fastcrud::{Document, LocalConfig, LocalStorage, Record, Storage};
use tempfile::tempdir;

fn doc(name: &str) -> Record<Document> {
    Record::new(Document::new().with("name", name).with("body", "x".repeat(200)))
}

fn file_size_limit() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_FSIZE, &mut limit) }, 0);
    limit
}

fn set_file_size_limit(limit: &libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, limit) }, 0);
}

#[test]
fn rejected_write_is_not_replayed_after_later_writes() {
    // Exceeding the limit must surface as EFBIG rather than kill the process.
    unsafe {
        libc::signal(libc::SIGXFSZ, libc::SIG_IGN);
    }

    let dir = tempdir().unwrap();
    let config = LocalConfig {
        base_dir: dir.path().to_path_buf(),
        sync_on_write: true,
        ..LocalConfig::default()
    };
    let store = LocalStorage::<Document>::named("notes", config.clone()).unwrap();
    store.start().unwrap();
    let a = store.create(doc("a")).unwrap();

    let log_len = fs::metadata(store.log_path()).unwrap().len();
    let original = file_size_limit();
    let tight = libc::rlimit {
        rlim_cur: log_len + 10,
        rlim_max: original.rlim_max,
    };
    set_file_size_limit(&tight);
    let rejected = doc("b");
    let result = store.create(rejected.clone());
    set_file_size_limit(&original);

    let err = result.unwrap_err();
    assert!(err.is_unavailable());
    assert!(store.get(rejected.uid).unwrap_err().is_not_found());
    assert_eq!(fs::metadata(store.log_path()).unwrap().len(), log_len);

    let c = store.create(doc("c")).unwrap();
    store.stop().unwrap();

    let reopened = LocalStorage::<Document>::named("notes", config).unwrap();
    reopened.start().unwrap();
    assert!(reopened.get(rejected.uid).unwrap_err().is_not_found());
    assert_eq!(reopened.get(a.uid).unwrap(), a);
    assert_eq!(reopened.get(c.uid).unwrap(), c);
}
