//! Per-session object formatter job manager.
//!
//! A save session enqueues payload IO jobs against objects; the jobs run
//! detached on the blocking pool and the session collects completion once,
//! at top-level close. Empty payloads are reported so the writer can list
//! them instead of keeping zero-byte files. (Reads are not managed here:
//! the loader installs per-link deferred reads instead.)

use crate::formatter::ObjectFormatter;
use bluesky_core::{kernel, Error, LinkId, Object};
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::task::JoinHandle;

pub(crate) struct JobReport {
    pub oid: String,
    pub empty: bool,
    pub err: Option<Error>,
}

/// Session-scoped collector of payload IO jobs.
pub(crate) struct FrmManager {
    jobs: Mutex<Vec<JoinHandle<JobReport>>>,
}

impl FrmManager {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue an async payload save targeting `path`.
    pub fn enqueue_save(&self, obj: Object, fmt: ObjectFormatter, path: PathBuf) {
        let handle = kernel::spawn_blocking(move || {
            let oid = obj.id().to_owned();
            match fmt.save(&obj, &path) {
                Ok(()) => {
                    let empty = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
                    // Only ids with a 128-bit form go into the empty-payload
                    // index; other empties keep their zero-byte file.
                    if empty && LinkId::parse(&oid).is_some() {
                        let _ = std::fs::remove_file(&path);
                    }
                    JobReport {
                        oid,
                        empty,
                        err: None,
                    }
                }
                Err(e) => JobReport {
                    oid,
                    empty: false,
                    err: Some(e),
                },
            }
        });
        self.jobs.lock().push(handle);
    }

    /// Signal session end and collect every job: per-job errors plus the
    /// ids of objects whose payload turned out empty.
    pub async fn wait_jobs_done(
        &self,
        timeout: Option<std::time::Duration>,
    ) -> (Vec<Error>, Vec<String>) {
        let handles: Vec<_> = std::mem::take(&mut *self.jobs.lock());
        let mut errors = Vec::new();
        let mut empty = Vec::new();
        for handle in handles {
            let report = match timeout {
                Some(d) => match tokio::time::timeout(d, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        errors.push(Error::RequestTimeout);
                        continue;
                    }
                },
                None => handle.await,
            };
            match report {
                Ok(report) => {
                    if let Some(e) = report.err {
                        errors.push(e);
                    } else if report.empty {
                        empty.push(report.oid);
                    }
                }
                Err(join_err) => errors.push(Error::Fault(join_err.to_string())),
            }
        }
        (errors, empty)
    }
}
