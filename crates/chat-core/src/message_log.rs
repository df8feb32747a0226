use tokio::sync::watch;

use crate::types::ChatEvent;

/// Append-only, arrival-ordered log of inbound chat events.
///
/// Entries are never reordered, deduplicated or evicted while the session
/// lives. Readers obtained through [`MessageLog::view`] observe the same
/// storage and are notified on every append.
#[derive(Debug)]
pub struct MessageLog {
    items: watch::Sender<Vec<ChatEvent>>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        let (items, _) = watch::channel(Vec::new());
        Self { items }
    }

    /// Append one event and return its index.
    pub fn append(&self, event: ChatEvent) -> usize {
        let mut index = 0;
        self.items.send_modify(|items| {
            index = items.len();
            items.push(event);
        });
        index
    }

    /// Current events in arrival order.
    ///
    /// This borrows the live log; hold it briefly, appends wait on it.
    pub fn all(&self) -> watch::Ref<'_, Vec<ChatEvent>> {
        self.items.borrow()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// A reader handle for rendering layers.
    pub fn view(&self) -> MessageLogView {
        MessageLogView {
            items: self.items.subscribe(),
        }
    }

    /// Empty the log. Only used when the owning session is torn down.
    pub(crate) fn reset(&self) {
        self.items.send_modify(Vec::clear);
    }
}

/// Read side of a [`MessageLog`].
#[derive(Debug, Clone)]
pub struct MessageLogView {
    items: watch::Receiver<Vec<ChatEvent>>,
}

impl MessageLogView {
    /// Current events in arrival order. Re-read after every change.
    ///
    /// The returned guard holds the log's read lock. Do not keep it across an
    /// `.await`: the session cannot append while it is held. Use
    /// [`snapshot`](Self::snapshot) for a copy that outlives the borrow.
    pub fn all(&self) -> watch::Ref<'_, Vec<ChatEvent>> {
        self.items.borrow()
    }

    /// Owned copy of the current events.
    pub fn snapshot(&self) -> Vec<ChatEvent> {
        self.items.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Wait until the log changes. Returns `false` once the log is gone.
    pub async fn changed(&mut self) -> bool {
        self.items.changed().await.is_ok()
    }

    /// Mark the current contents as seen and return a copy of the entries
    /// from `from` onwards.
    pub fn read_from(&mut self, from: usize) -> Vec<ChatEvent> {
        let items = self.items.borrow_and_update();
        items.get(from..).map(<[ChatEvent]>::to_vec).unwrap_or_default()
    }
}
