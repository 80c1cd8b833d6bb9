//! Notification plumbing.
//!
//! The virtualiser never calls into the kernel's IPC primitives
//! directly; it only decides *who* needs waking up and lets the host
//! environment turn that into whatever notification mechanism the
//! underlying component framework provides.

/// Snapshot of the driver's own storage info, as last observed by the
/// host before it delivered a state-change event (§3, §6). The
/// virtualiser inherits `sector_size` and `read_only` from this when
/// it publishes per-client storage info; `ready` drives the readiness
/// coordinator (§4.7).
///
/// A state-change event must be treated as if the driver went
/// down-then-up even when only the up transition is observed (§4.7),
/// which is why the event carries a fresh snapshot rather than a
/// delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverInfo {
    pub sector_size: u32,
    pub capacity: u64,
    pub read_only: bool,
    pub ready: bool,
}

/// Which channel a `notified` call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The state-change channel fired; carries the driver's current
    /// storage info as the host last observed it.
    StateChange(DriverInfo),
    Driver,
    Client(usize),
}

/// Side effect requested by the core: wake a peer.
///
/// `Notifier::notify_driver` corresponds to the original's deferred
/// notification of the driver channel at the end of a client-batch
/// (`notified()`'s `microkit_deferred_notify(DRIVER_CH)` call); the
/// core defers rather than notifying eagerly per-request so that one
/// batch of client requests produces at most one driver notification.
pub trait Notifier {
    fn notify_driver(&mut self);
    fn notify_client(&mut self, client: usize);
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::Notifier;
    use alloc::vec::Vec;

    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        pub driver_notifications: usize,
        pub client_notifications: Vec<usize>,
    }

    impl Notifier for RecordingNotifier {
        fn notify_driver(&mut self) {
            self.driver_notifications += 1;
        }

        fn notify_client(&mut self, client: usize) {
            self.client_notifications.push(client);
        }
    }
}
