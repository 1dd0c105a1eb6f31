use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

/// Fixed-capacity, non-blocking FIFO shared between the application and the link runner
///
/// Backed by an embassy `Channel` guarded by a critical section, so pushes and
/// pops from different tasks or threads never interleave and the length never
/// exceeds `N`. A push onto a full queue is rejected; existing elements are
/// never evicted.
pub struct BoundedQueue<T, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub const fn new() -> Self {
        BoundedQueue { channel: Channel::new() }
    }

    /// Appends `item` at the back. On a full queue the item is dropped and false is returned.
    pub fn try_push(&self, item: T) -> bool {
        self.try_push_or_return(item).is_ok()
    }

    /// Appends `item` at the back, handing it back if the queue is full
    pub fn try_push_or_return(&self, item: T) -> Result<(), T> {
        self.channel.try_send(item).map_err(|err| match err {
            TrySendError::Full(rejected) => rejected,
        })
    }

    /// Removes the front element, `None` if the queue is empty
    pub fn try_pop(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
