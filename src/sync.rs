use std::{
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard},
};

/// Mutual exclusion with strict first-come-first-served ordering: if one
/// thread begins waiting strictly before another, it acquires the lock
/// strictly first. A plain mutex is not enough here: under contention it
/// can reorder a client's own LEARN against its subsequent TR.
pub struct OrderedMutex<T> {
    tickets: Mutex<Tickets>,
    turn: Condvar,
    data: Mutex<T>,
}

#[derive(Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

pub struct OrderedMutexGuard<'a, T> {
    data: Option<MutexGuard<'a, T>>,
    lock: &'a OrderedMutex<T>,
    ticketed: bool,
}

impl<T> OrderedMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            tickets: Mutex::new(Tickets::default()),
            turn: Condvar::new(),
            data: Mutex::new(value),
        }
    }

    /// Blocks until every earlier waiter has held and released the lock.
    pub fn lock(&self) -> OrderedMutexGuard<'_, T> {
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            tickets = self.turn.wait(tickets).unwrap();
        }
        drop(tickets);
        OrderedMutexGuard {
            data: Some(self.data.lock().unwrap()),
            lock: self,
            ticketed: true,
        }
    }

    /// Bypasses the ticket queue. Forced shutdown only; jumping the queue
    /// violates the fairness contract for every waiter behind us.
    pub fn lock_unordered(&self) -> OrderedMutexGuard<'_, T> {
        OrderedMutexGuard {
            data: Some(self.data.lock().unwrap()),
            lock: self,
            ticketed: false,
        }
    }
}

impl<T> Deref for OrderedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data.as_ref().unwrap()
    }
}

impl<T> DerefMut for OrderedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data.as_mut().unwrap()
    }
}

impl<T> Drop for OrderedMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Release the data before admitting the next ticket holder.
        self.data.take();
        if self.ticketed {
            let mut tickets = self.lock.tickets.lock().unwrap();
            tickets.serving += 1;
            drop(tickets);
            self.lock.turn.notify_all();
        }
    }
}
