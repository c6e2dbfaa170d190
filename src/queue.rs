//! A FIFO queue built from two stacks.

/// First-in, first-out queue with amortized `O(1)` `push` and `pop`.
///
/// Pushes land on an incoming stack. Pops are served from an outgoing stack,
/// which is refilled by reversing the incoming stack whenever it runs dry.
/// No element is ever removed from the front of a `Vec`.
#[derive(Debug)]
pub struct Queue<T> {
    incoming: Vec<T>,
    outgoing: Vec<T>,
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Queue {
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Appends `item` to the tail of the queue.
    pub fn push(&mut self, item: T) {
        self.incoming.push(item);
    }

    /// Removes and returns the head of the queue, or `None` if it is empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.outgoing.is_empty() {
            if self.incoming.is_empty() {
                return None;
            }
            // Swap so the incoming stack keeps the (empty) allocation of the
            // outgoing one instead of growing a new one.
            std::mem::swap(&mut self.incoming, &mut self.outgoing);
            self.outgoing.reverse();
        }
        self.outgoing.pop()
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.incoming.len() + self.outgoing.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}
