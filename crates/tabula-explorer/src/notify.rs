use crate::cache::{CacheKey, EntryStatus};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Coarse phase carried in a [`ChangeNotice`]; listeners re-read the cache
/// for the full state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryPhase {
    Pending,
    Ready,
    Failed,
    /// The entry was discarded wholesale (schema change); re-read from
    /// scratch.
    Invalidated,
}

impl EntryPhase {
    pub(crate) fn of(status: &EntryStatus) -> Option<Self> {
        match status {
            EntryStatus::NotRequested => None,
            EntryStatus::Pending => Some(EntryPhase::Pending),
            EntryStatus::Ready => Some(EntryPhase::Ready),
            EntryStatus::Failed(_) => Some(EntryPhase::Failed),
        }
    }
}

/// What a subscriber wants to hear about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFilter {
    /// Exactly this cache key.
    Exact(CacheKey),
    /// Anything affecting this column: its profiles and any cell block
    /// covering it.
    Column(usize),
    /// The schema (and capability descriptor) only.
    Schema,
}

/// One narrow change notification: a single cache key moved to a new phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeNotice {
    pub key: CacheKey,
    pub phase: EntryPhase,
}

struct Subscriber {
    filter: KeyFilter,
    tx: UnboundedSender<ChangeNotice>,
}

/// Registry mapping cache keys to interested listeners.
///
/// A cache mutation notifies only subscribers whose filter matches the
/// mutated key; the renderer is never asked to repaint the whole grid for a
/// single entry update. Dropped receivers are pruned on the next notify.
pub(crate) struct SubscriptionRegistry {
    subscribers: Vec<Subscriber>,
    cols_per_block: usize,
}

impl SubscriptionRegistry {
    pub(crate) fn new(cols_per_block: usize) -> Self {
        Self {
            subscribers: Vec::new(),
            cols_per_block: cols_per_block.max(1),
        }
    }

    pub(crate) fn subscribe(&mut self, filter: KeyFilter) -> UnboundedReceiver<ChangeNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(Subscriber { filter, tx });
        rx
    }

    pub(crate) fn notify(&mut self, key: CacheKey, phase: EntryPhase) {
        let notice = ChangeNotice { key, phase };
        let cols_per_block = self.cols_per_block;
        self.subscribers.retain(|sub| {
            if !sub.tx.is_closed() && filter_matches(cols_per_block, sub.filter, key) {
                // A send can only fail if the receiver just dropped; prune it.
                return sub.tx.send(notice).is_ok();
            }
            !sub.tx.is_closed()
        });
    }
}

fn filter_matches(cols_per_block: usize, filter: KeyFilter, key: CacheKey) -> bool {
    match filter {
        KeyFilter::Exact(wanted) => wanted == key,
        KeyFilter::Schema => matches!(key, CacheKey::Schema | CacheKey::Capabilities),
        KeyFilter::Column(column) => match key {
            CacheKey::Profile { column: c, .. } => c == column,
            CacheKey::Cells(block) => {
                let first = block.block_col * cols_per_block;
                (first..first + cols_per_block).contains(&column)
            }
            CacheKey::Schema | CacheKey::Capabilities => false,
        },
    }
}
