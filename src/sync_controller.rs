//! Sync controller: the dirty/push/pull state machine.
//!
//! The controller orchestrates the full sync cycle against a dumb remote
//! blob: local edits mark the replica dirty and trigger a push (snapshot,
//! bump version, seal, upload), pushes are verified by an immediate re-pull,
//! and a background poll loop pulls remote changes (fetch, decrypt, merge,
//! apply). An edit session soft-locks pulls so a concurrent remote merge
//! cannot clobber an in-progress local edit; deferred pulls drain when the
//! edit ends or its idle window expires.
//!
//! All failures are converted into a status string plus a tracing diagnostic
//! at this boundary. The `dirty` flag is the push retry mechanism and the
//! poll loop is the pull retry mechanism; there is no backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::SyncConfig;
use crate::envelope;
use crate::error::SyncError;
use crate::merge;
use crate::model::Payload;
use crate::store::ReplicaStore;
use crate::transport::{BlobTransport, Descriptor};
use crate::validation;

/// Push attempts per cycle while the replica stays dirty.
pub const PUSH_RETRY_BUDGET: usize = 3;

/// Result of a push cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Nothing to do: clean replica, missing credentials, or auth-paused.
    Skipped,
    /// Another push loop is in flight; it will pick up the dirty flag.
    Coalesced,
    /// At least one snapshot was uploaded and verified.
    Completed,
    /// The cycle aborted; the replica stays dirty for the next attempt.
    Failed,
}

/// Result of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Credentials absent or invalid.
    Skipped,
    /// An edit session is active; the pull is queued for the edit's end.
    Deferred,
    /// The remote object does not exist yet.
    NoRemote,
    /// Change indicator matched the last seen value; nothing decrypted.
    Unchanged,
    /// Remote merged, no content difference.
    Clean,
    /// Remote merged and applied to the local replica.
    Applied,
    /// The pull aborted before touching the replica.
    Failed,
}

#[derive(Default)]
struct SyncState {
    dirty: bool,
    pushing: bool,
    editing: bool,
    pending_pull: bool,
    auth_blocked: bool,
    last_etag: Option<String>,
    cached_get: Option<(Descriptor, Instant)>,
    last_remote_version: u64,
    edit_deadline: Option<Instant>,
    status: String,
}

/// Orchestrates sync between a [`ReplicaStore`] and a [`BlobTransport`].
pub struct SyncController<T: BlobTransport, S: ReplicaStore> {
    transport: T,
    store: Arc<Mutex<S>>,
    config: Arc<Mutex<SyncConfig>>,
    state: Mutex<SyncState>,
    running: AtomicBool,
}

impl<T: BlobTransport, S: ReplicaStore> SyncController<T, S> {
    pub fn new(transport: T, store: Arc<Mutex<S>>, config: Arc<Mutex<SyncConfig>>) -> Self {
        Self {
            transport,
            store,
            config,
            state: Mutex::new(SyncState::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Current human-readable sync status.
    pub fn status(&self) -> String {
        self.state.lock().unwrap().status.clone()
    }

    /// True while a failed upload or unsynced edit is pending.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().unwrap().dirty
    }

    /// True after the signing proxy rejected the shared secret; cleared by
    /// [`update_config`](Self::update_config) or a forced push.
    pub fn is_auth_blocked(&self) -> bool {
        self.state.lock().unwrap().auth_blocked
    }

    /// Version of the last remote payload seen by a pull.
    pub fn last_remote_version(&self) -> u64 {
        self.state.lock().unwrap().last_remote_version
    }

    fn set_status(&self, status: impl Into<String>) {
        self.state.lock().unwrap().status = status.into();
    }

    fn config_snapshot(&self) -> SyncConfig {
        self.config.lock().unwrap().clone()
    }

    /// Replace the credentials, clearing auth suppression and all cached
    /// remote indicators so the next cycle starts fresh.
    pub fn update_config(&self, new: SyncConfig) {
        *self.config.lock().unwrap() = new;
        let mut st = self.state.lock().unwrap();
        st.auth_blocked = false;
        st.last_etag = None;
        st.cached_get = None;
        st.status = "config updated".to_string();
    }

    /// Mark the replica dirty and attempt a push.
    pub async fn mark_dirty(&self) -> PushOutcome {
        self.state.lock().unwrap().dirty = true;
        self.push(false).await
    }

    /// Begin an edit session: pulls are deferred until [`end_edit`]
    /// (Self::end_edit) or until the idle window expires. Calling again
    /// extends the window.
    pub fn begin_edit(&self) {
        let idle = Duration::from_millis(self.config_snapshot().edit_idle_ms);
        let mut st = self.state.lock().unwrap();
        st.editing = true;
        st.edit_deadline = Some(Instant::now() + idle);
    }

    /// End the edit session, draining any deferred pull and pushing pending
    /// local changes.
    pub async fn end_edit(&self) {
        let (pending, dirty) = {
            let mut st = self.state.lock().unwrap();
            st.editing = false;
            st.edit_deadline = None;
            (std::mem::take(&mut st.pending_pull), st.dirty)
        };
        if pending {
            self.pull().await;
        }
        if dirty {
            self.push(false).await;
        }
    }

    /// Push the local replica to the remote blob.
    ///
    /// Loops up to [`PUSH_RETRY_BUDGET`] attempts while the replica stays
    /// dirty (edits landing mid-upload re-dirty it). Each attempt bumps the
    /// version and persists the bump to the replica before the network step,
    /// so the counter survives a failed upload. A successful cycle ends with
    /// a verification pull that bypasses the change-indicator cache.
    pub async fn push(&self, force: bool) -> PushOutcome {
        let cfg = self.config_snapshot();
        if !cfg.credentials_ready() {
            self.set_status("sync off");
            return PushOutcome::Skipped;
        }
        if let Err(e) = cfg.validate() {
            self.set_status(format!("config error: {}", e));
            return PushOutcome::Skipped;
        }

        {
            let mut st = self.state.lock().unwrap();
            if st.auth_blocked && !force {
                st.status = "auth error - sync paused".to_string();
                return PushOutcome::Skipped;
            }
            if force {
                st.auth_blocked = false;
            }
            if !st.dirty && !force {
                return PushOutcome::Skipped;
            }
            if st.pushing {
                // The in-flight loop re-checks the dirty flag.
                return PushOutcome::Coalesced;
            }
            st.pushing = true;
        }

        let mut uploaded = false;
        let mut failed = false;
        let mut attempts = 0usize;
        loop {
            if attempts >= PUSH_RETRY_BUDGET {
                break;
            }
            let proceed = {
                let mut st = self.state.lock().unwrap();
                let want = st.dirty || (force && attempts == 0);
                if want {
                    st.dirty = false;
                }
                want
            };
            if !proceed {
                break;
            }
            attempts += 1;

            let payload = {
                let mut store = self.store.lock().unwrap();
                let mut payload = store.snapshot();
                payload.bump();
                if let Err(e) = store.set_meta(&payload.meta) {
                    tracing::warn!(error = %e, "failed to persist bumped meta");
                }
                payload
            };
            let version = payload.meta.version;

            let attempt = async {
                let bytes = envelope::seal(&payload, &cfg.passphrase)?;
                validation::validate_payload_size(bytes.len())?;
                let descriptor = self
                    .transport
                    .request_upload_descriptor(
                        &cfg.shared_secret,
                        &cfg.object_key(),
                        "application/json",
                    )
                    .await?;
                self.transport.upload(&descriptor, bytes).await
            }
            .await;

            match attempt {
                Ok(()) => {
                    uploaded = true;
                    tracing::info!(version, "pushed snapshot");
                    self.set_status(format!("saved v{}", version));
                }
                Err(e) => {
                    let mut st = self.state.lock().unwrap();
                    st.dirty = true;
                    if e.is_auth() {
                        st.auth_blocked = true;
                        st.status = "401 unauthorized (shared secret?)".to_string();
                    } else {
                        st.status = format!("push failed: {}", e);
                    }
                    drop(st);
                    tracing::warn!(error = %e, attempt = attempts, "push attempt failed");
                    failed = true;
                    break;
                }
            }
        }

        self.state.lock().unwrap().pushing = false;

        if uploaded {
            // Round-trip the freshly pushed state through the remote merge
            // logic once.
            self.verification_pull().await;
            PushOutcome::Completed
        } else if failed {
            PushOutcome::Failed
        } else {
            PushOutcome::Skipped
        }
    }

    async fn verification_pull(&self) {
        let saved_etag = {
            let mut st = self.state.lock().unwrap();
            st.cached_get = None;
            st.last_etag.take()
        };
        self.pull().await;
        let mut st = self.state.lock().unwrap();
        if st.last_etag.is_none() {
            st.last_etag = saved_etag;
        }
    }

    /// Pull the remote blob and merge it into the local replica.
    pub async fn pull(&self) -> PullOutcome {
        let cfg = self.config_snapshot();
        if !cfg.credentials_ready() {
            self.set_status("sync off");
            return PullOutcome::Skipped;
        }
        if let Err(e) = cfg.validate() {
            self.set_status(format!("config error: {}", e));
            return PullOutcome::Skipped;
        }

        {
            let mut st = self.state.lock().unwrap();
            if st.editing {
                let still_editing = st
                    .edit_deadline
                    .map_or(true, |deadline| Instant::now() < deadline);
                if still_editing {
                    st.pending_pull = true;
                    st.status = "editing - pull deferred".to_string();
                    return PullOutcome::Deferred;
                }
                // Idle window expired without an explicit end_edit.
                st.editing = false;
                st.edit_deadline = None;
                tracing::debug!("edit session expired, resuming pulls");
            }
        }

        let ttl = Duration::from_millis(cfg.sign_ttl_ms);
        let cached = {
            let st = self.state.lock().unwrap();
            st.cached_get
                .as_ref()
                .filter(|(_, at)| at.elapsed() < ttl)
                .map(|(descriptor, _)| descriptor.clone())
        };
        let descriptor = match cached {
            Some(descriptor) => descriptor,
            None => {
                match self
                    .transport
                    .request_download_descriptor(&cfg.shared_secret, &cfg.object_key())
                    .await
                {
                    Ok(descriptor) => {
                        self.state.lock().unwrap().cached_get =
                            Some((descriptor.clone(), Instant::now()));
                        descriptor
                    }
                    Err(e) => return self.fail_pull(e),
                }
            }
        };

        let download = match self.transport.download(&descriptor).await {
            Ok(download) => download,
            Err(SyncError::NotFound(_)) => {
                self.set_status("no remote data");
                return PullOutcome::NoRemote;
            }
            Err(e) => {
                self.state.lock().unwrap().cached_get = None;
                return self.fail_pull(e);
            }
        };

        {
            let st = self.state.lock().unwrap();
            if let (Some(current), Some(seen)) = (&download.change_indicator, &st.last_etag) {
                if current == seen {
                    drop(st);
                    self.set_status("no change");
                    return PullOutcome::Unchanged;
                }
            }
        }

        let document = match envelope::open(&download.bytes, &cfg.passphrase) {
            Ok(document) => document,
            Err(e) => {
                self.set_status(format!("decrypt failed: {}", e));
                tracing::warn!(error = %e, "remote envelope failed to open");
                return PullOutcome::Failed;
            }
        };
        let remote: Payload = match serde_json::from_value(document) {
            Ok(payload) => payload,
            Err(e) => {
                self.set_status("remote payload malformed");
                tracing::warn!(error = %e, "remote payload failed to decode");
                return PullOutcome::Failed;
            }
        };

        {
            let mut st = self.state.lock().unwrap();
            // Re-check after the network awaits: an edit may have started.
            if st.editing {
                st.pending_pull = true;
                st.status = "editing - pull deferred".to_string();
                return PullOutcome::Deferred;
            }
            st.last_etag = download.change_indicator.clone();
            st.last_remote_version = remote.meta.version;
        }

        let changed = {
            let mut store = self.store.lock().unwrap();
            let local = store.snapshot();
            let merged = merge::merge(&local, &remote);
            let changed = merged.data != local.data || merged.finance != local.finance;
            if changed {
                if let Err(e) = store.apply(&merged) {
                    self.set_status(format!("local store error: {}", e));
                    tracing::warn!(error = %e, "failed to apply merged payload");
                    return PullOutcome::Failed;
                }
            }
            changed
        };

        if changed {
            self.set_status(format!("merged remote v{}", remote.meta.version));
            tracing::info!(version = remote.meta.version, "applied remote change");
            PullOutcome::Applied
        } else {
            self.set_status("up to date");
            PullOutcome::Clean
        }
    }

    fn fail_pull(&self, e: SyncError) -> PullOutcome {
        if e.is_auth() {
            self.set_status("401 unauthorized (shared secret?)");
        } else {
            self.set_status(format!("pull failed: {}", e));
        }
        tracing::warn!(error = %e, "pull failed");
        PullOutcome::Failed
    }

    /// Run the background sync loop: an initial pull to hydrate from remote,
    /// a seeding push (so a fresh device populates an empty remote), then a
    /// poll loop until [`stop`](Self::stop).
    pub async fn run(&self) {
        if !self.config_snapshot().auto {
            self.set_status("auto sync off");
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        self.pull().await;
        self.mark_dirty().await;
        while self.running.load(Ordering::SeqCst) {
            let interval = self.config_snapshot().poll_interval_ms;
            tokio::time::sleep(Duration::from_millis(interval)).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.pull().await;
        }
    }

    /// Stop the background sync loop after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
