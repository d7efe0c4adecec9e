//! The change feed.
//!
//! Historical mode scans the sequence store from a cursor and reports
//! each document's latest state in commit order. Live mode registers a
//! listener on a process-wide broadcaster keyed by database name; every
//! committed bulk write re-runs the scan from the listener's cursor.

use crate::database::{Database, DbInner};
use crate::error::CoreResult;
use crate::namespace::{parse_seq, seq_key, Namespace};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use siltdb_revtree::DocMetadata;
use siltdb_storage::Backend;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Predicate deciding whether a change is reported.
pub type ChangesFilter = Arc<dyn Fn(&ChangeRow) -> CoreResult<bool> + Send + Sync>;
/// Callback invoked for each accepted change.
pub type OnChange = Arc<dyn Fn(&ChangeRow) + Send + Sync>;
/// Callback invoked when a live feed completes or fails.
pub type OnComplete = Arc<dyn Fn(CoreResult<ChangesResult>) + Send + Sync>;

/// Options for [`Database::changes`] and [`Database::changes_live`].
#[derive(Clone, Default)]
pub struct ChangesOptions {
    /// Report changes committed after this sequence.
    pub since: u64,
    /// Stop after this many accepted changes.
    pub limit: Option<usize>,
    /// Scan newest-first; `since` is ignored.
    pub descending: bool,
    /// Attach the winning body to each change.
    pub include_docs: bool,
    /// Inline attachment bodies into included docs.
    pub attachments: bool,
    /// Buffer accepted rows into the returned result set.
    pub return_docs: bool,
    /// Report only changes the predicate accepts. A predicate error
    /// aborts the scan and is surfaced through completion.
    pub filter: Option<ChangesFilter>,
    /// Invoked for every accepted change.
    pub on_change: Option<OnChange>,
    /// Live mode only: invoked once on cancel or scan failure.
    pub complete: Option<OnComplete>,
}

impl ChangesOptions {
    /// Options with `return_docs` set, the historical-mode default.
    #[must_use]
    pub fn collecting() -> Self {
        Self {
            return_docs: true,
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for ChangesOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesOptions")
            .field("since", &self.since)
            .field("limit", &self.limit)
            .field("descending", &self.descending)
            .field("include_docs", &self.include_docs)
            .field("return_docs", &self.return_docs)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

/// One reported change.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRow {
    /// Document id.
    pub id: String,
    /// Sequence of the document's latest update.
    pub seq: u64,
    /// Whether the winning revision is a deletion.
    pub deleted: bool,
    /// Revisions reported for this change (the winner).
    pub changes: Vec<String>,
    /// Winning body when `include_docs` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// Result of a historical scan.
#[derive(Debug, Clone)]
pub struct ChangesResult {
    /// Accepted rows, when `return_docs` was set.
    pub results: Vec<ChangeRow>,
    /// Highest sequence the scan consumed.
    pub last_seq: u64,
}

/// Live-feed broadcasters shared across handles, keyed by database name.
static BROADCASTERS: Mutex<BTreeMap<String, Arc<Broadcaster>>> = Mutex::new(BTreeMap::new());

pub(crate) fn broadcaster_for(name: &str) -> Arc<Broadcaster> {
    let mut map = BROADCASTERS.lock();
    map.entry(name.to_string()).or_default().clone()
}

pub(crate) fn drop_broadcaster(name: &str) {
    BROADCASTERS.lock().remove(name);
}

struct Listener {
    db: Weak<DbInner>,
    opts: ChangesOptions,
    last_seq: AtomicU64,
    cancelled: AtomicBool,
    completed: AtomicBool,
    buffered: Mutex<Vec<ChangeRow>>,
}

impl Listener {
    /// Fires completion exactly once; a cancel racing a failing scan
    /// produces a single callback, never two.
    fn complete(&self, outcome: CoreResult<ChangesResult>) {
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(complete) = &self.opts.complete {
            complete(outcome);
        }
    }
}

/// Fan-out point for live change listeners of one database name.
#[derive(Default)]
pub(crate) struct Broadcaster {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Arc<Listener>>>,
}

impl Broadcaster {
    fn subscribe(&self, listener: Arc<Listener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().remove(&id);
    }

    /// Re-runs the historical scan from each listener's cursor. Called
    /// after every committed bulk write, off the write guard.
    pub(crate) fn notify(&self) {
        let listeners: Vec<(u64, Arc<Listener>)> = self
            .listeners
            .lock()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        for (id, listener) in listeners {
            if listener.cancelled.load(Ordering::SeqCst) {
                self.unsubscribe(id);
                continue;
            }
            let Some(inner) = listener.db.upgrade() else {
                self.unsubscribe(id);
                continue;
            };
            let db = Database { inner };
            let since = listener.last_seq.load(Ordering::SeqCst);
            match db.collect_changes(&listener.opts, since, Some(&listener.cancelled)) {
                Ok(outcome) => {
                    listener
                        .last_seq
                        .fetch_max(outcome.last_seq, Ordering::SeqCst);
                    if listener.opts.return_docs && !outcome.results.is_empty() {
                        listener.buffered.lock().extend(outcome.results);
                    }
                }
                Err(err) => {
                    listener.complete(Err(err));
                    self.unsubscribe(id);
                }
            }
        }
    }
}

/// Cancel handle for a live feed.
pub struct ChangesHandle {
    broadcaster: Arc<Broadcaster>,
    id: u64,
    listener: Arc<Listener>,
}

impl ChangesHandle {
    /// Stops the feed.
    ///
    /// Sets the cancellation flag (checked at every scanned row),
    /// removes the listener, and fires `complete` once with the rows
    /// delivered so far.
    pub fn cancel(&self) {
        self.listener.cancelled.store(true, Ordering::SeqCst);
        self.broadcaster.unsubscribe(self.id);
        let results = std::mem::take(&mut *self.listener.buffered.lock());
        let last_seq = self.listener.last_seq.load(Ordering::SeqCst);
        self.listener.complete(Ok(ChangesResult { results, last_seq }));
    }

    /// Whether the feed has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.listener.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ChangesHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Scans committed changes once and returns them.
    pub fn changes(&self, opts: &ChangesOptions) -> CoreResult<ChangesResult> {
        self.ensure_open()?;
        self.collect_changes(opts, opts.since, None)
    }

    /// Starts a live feed: an initial catch-up scan from `opts.since`,
    /// then a re-scan from the cursor after every committed write.
    ///
    /// Rows are delivered through `opts.on_change`; cancel through the
    /// returned handle.
    pub fn changes_live(&self, opts: ChangesOptions) -> CoreResult<ChangesHandle> {
        self.ensure_open()?;
        let listener = Arc::new(Listener {
            db: Arc::downgrade(&self.inner),
            last_seq: AtomicU64::new(opts.since),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            buffered: Mutex::new(Vec::new()),
            opts,
        });

        let outcome =
            self.collect_changes(&listener.opts, listener.opts.since, Some(&listener.cancelled))?;
        listener
            .last_seq
            .fetch_max(outcome.last_seq, Ordering::SeqCst);
        if listener.opts.return_docs {
            listener.buffered.lock().extend(outcome.results);
        }

        let broadcaster = Arc::clone(&self.inner.feed);
        let id = broadcaster.subscribe(Arc::clone(&listener));
        Ok(ChangesHandle {
            broadcaster,
            id,
            listener,
        })
    }

    /// The shared scan behind both modes.
    ///
    /// Ascending scans treat `since` as an exclusive lower bound;
    /// descending scans run newest-first over the whole store. Rows
    /// superseded by a later revision of the same document are skipped.
    pub(crate) fn collect_changes(
        &self,
        opts: &ChangesOptions,
        since: u64,
        cancelled: Option<&AtomicBool>,
    ) -> CoreResult<ChangesResult> {
        self.ensure_open()?;
        let _guard = self.inner.queue.read();

        let mut scan = if opts.descending {
            Namespace::BySeq.scan(None, None)
        } else {
            Namespace::BySeq.scan(Some(seq_key(since).as_bytes()), None)
        };
        scan.reverse = opts.descending;

        let mut metadata_cache: HashMap<String, DocMetadata> = HashMap::new();
        let mut results = Vec::new();
        let mut emitted = 0usize;
        let mut last_seq = if opts.descending { 0 } else { since };

        for (key, bytes) in self.inner.backend.scan(scan)? {
            if cancelled.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                break;
            }
            let Some(seq) = Namespace::BySeq.strip(&key).and_then(parse_seq) else {
                continue;
            };
            if !opts.descending && seq == since {
                continue;
            }

            let body: Value = serde_json::from_slice(&bytes)?;
            let Some(id) = body
                .get("_id")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };

            if !metadata_cache.contains_key(&id) {
                let Some(loaded) = self.load_metadata(&id)? else {
                    continue;
                };
                metadata_cache.insert(id.clone(), loaded);
            }
            let metadata = &metadata_cache[&id];

            // A later revision of this document owns a higher seq row.
            if metadata.seq != Some(seq) {
                continue;
            }
            last_seq = last_seq.max(seq);

            let Some(winner) = metadata.winning() else {
                continue;
            };
            let winner_str = winner.to_string();
            let deleted = metadata.is_deleted();

            // When this row is not the winner (a conflict write bumped the
            // seq), report the winning body instead.
            let row_rev = body.get("_rev").and_then(Value::as_str);
            let winning_body = if row_rev == Some(winner_str.as_str()) {
                body
            } else {
                let Some(&winner_seq) = metadata.rev_map.get(&winner_str) else {
                    continue;
                };
                match self.load_body(winner_seq)? {
                    Some(map) => Value::Object(map),
                    None => continue,
                }
            };

            let mut row = ChangeRow {
                id,
                seq,
                deleted,
                changes: vec![winner_str],
                doc: opts.include_docs.then_some(winning_body),
            };

            if let Some(filter) = &opts.filter {
                if !filter(&row)? {
                    continue;
                }
            }
            if opts.attachments && opts.include_docs {
                if let Some(Value::Object(doc)) = &mut row.doc {
                    self.hydrate_attachments(doc)?;
                }
            }

            if let Some(on_change) = &opts.on_change {
                on_change(&row);
            }
            if opts.return_docs {
                results.push(row);
            }
            emitted += 1;
            if opts.limit.is_some_and(|limit| emitted >= limit) {
                break;
            }
        }

        Ok(ChangesResult { results, last_seq })
    }
}
