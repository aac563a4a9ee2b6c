//! Subscriptions held by a control point.
//!
//! The table does no locking of its own; [`crate::GenaClient`] keeps it
//! behind one mutex and never holds that mutex across an await point.

use std::collections::VecDeque;
use std::time::Duration;

use soap_client::SubscriptionTimeout;
use upnp_core::{JobId, Sid, TimerThread};

use super::sequencer::EventSequencer;

/// One active subscription.
#[derive(Debug)]
pub struct ClientSubscription {
    /// Local SID handed to the application
    pub sid: Sid,
    /// SID the publisher assigned, updated on every renewal
    pub actual_sid: String,
    pub event_url: String,
    /// Timeout asked for on subscribe and on automatic renewals
    pub requested: SubscriptionTimeout,
    /// Timeout most recently granted
    pub granted: SubscriptionTimeout,
    pub renew_job: Option<JobId>,
    /// Job giving up on a missing event key
    pub gap_job: Option<JobId>,
    pub sequencer: EventSequencer,
}

impl ClientSubscription {
    pub fn new(
        actual_sid: String,
        event_url: String,
        requested: SubscriptionTimeout,
        granted: SubscriptionTimeout,
        buffer_limit: usize,
        gap_timeout: Duration,
    ) -> Self {
        Self {
            sid: Sid::new(format!("uuid:{}", uuid::Uuid::new_v4())),
            actual_sid,
            event_url,
            requested,
            granted,
            renew_job: None,
            gap_job: None,
            sequencer: EventSequencer::new(buffer_limit, gap_timeout),
        }
    }

    fn cancel_jobs(&mut self, timer: &TimerThread) {
        for job in [self.renew_job.take(), self.gap_job.take()].into_iter().flatten() {
            timer.cancel(job);
        }
    }
}

#[derive(Debug, Default)]
pub struct ClientSubscriptionTable {
    subscriptions: VecDeque<ClientSubscription>,
}

impl ClientSubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the head.
    pub fn add(&mut self, subscription: ClientSubscription) {
        self.subscriptions.push_front(subscription);
    }

    /// Unlink the subscription and cancel its pending jobs.
    ///
    /// Removing an unknown SID leaves the table untouched.
    pub fn remove_by_sid(&mut self, sid: &Sid, timer: &TimerThread) -> Option<ClientSubscription> {
        let index = self.subscriptions.iter().position(|sub| &sub.sid == sid)?;
        let mut removed = self.subscriptions.remove(index)?;
        removed.cancel_jobs(timer);
        Some(removed)
    }

    pub fn lookup_by_sid(&self, sid: &Sid) -> Option<&ClientSubscription> {
        self.subscriptions.iter().find(|sub| &sub.sid == sid)
    }

    pub fn lookup_by_sid_mut(&mut self, sid: &Sid) -> Option<&mut ClientSubscription> {
        self.subscriptions.iter_mut().find(|sub| &sub.sid == sid)
    }

    /// Find by the publisher's SID, compared as raw bytes.
    pub fn lookup_by_actual_sid(&self, token: &[u8]) -> Option<&ClientSubscription> {
        self.subscriptions
            .iter()
            .find(|sub| sub.actual_sid.as_bytes() == token)
    }

    pub fn lookup_by_actual_sid_mut(&mut self, token: &[u8]) -> Option<&mut ClientSubscription> {
        self.subscriptions
            .iter_mut()
            .find(|sub| sub.actual_sid.as_bytes() == token)
    }

    /// Remove every subscription, cancelling their jobs.
    pub fn drain(&mut self, timer: &TimerThread) -> Vec<ClientSubscription> {
        self.subscriptions
            .drain(..)
            .map(|mut sub| {
                sub.cancel_jobs(timer);
                sub
            })
            .collect()
    }

    pub fn sids(&self) -> Vec<Sid> {
        self.subscriptions.iter().map(|sub| sub.sid.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn subscription(actual: &str) -> ClientSubscription {
        ClientSubscription::new(
            actual.to_string(),
            "http://10.0.0.5:1400/evt".to_string(),
            SubscriptionTimeout::Seconds(300),
            SubscriptionTimeout::Seconds(300),
            10,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let timer = TimerThread::new(10).unwrap();
        let mut table = ClientSubscriptionTable::new();
        let sub = subscription("uuid:remote-1");
        let sid = sub.sid.clone();
        assert!(sid.as_str().starts_with("uuid:"));

        table.add(sub);
        assert!(table.lookup_by_sid(&sid).is_some());
        assert!(table.remove_by_sid(&sid, &timer).is_some());
        assert!(table.lookup_by_sid(&sid).is_none());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let timer = TimerThread::new(10).unwrap();
        let mut table = ClientSubscriptionTable::new();
        table.add(subscription("uuid:remote-1"));

        assert!(table.remove_by_sid(&Sid::from("uuid:missing"), &timer).is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_cancels_renewal_job() {
        let timer = TimerThread::new(10).unwrap();
        let mut table = ClientSubscriptionTable::new();
        let mut sub = subscription("uuid:remote-1");
        let job = timer.schedule(Duration::from_secs(60), async {}).unwrap();
        let gap_job = timer.schedule(Duration::from_secs(30), async {}).unwrap();
        sub.renew_job = Some(job);
        sub.gap_job = Some(gap_job);
        let sid = sub.sid.clone();
        table.add(sub);

        let removed = table.remove_by_sid(&sid, &timer).unwrap();
        assert!(removed.renew_job.is_none());
        assert!(removed.gap_job.is_none());
        assert!(!timer.is_pending(job));
        assert!(!timer.is_pending(gap_job));
        assert!(table.remove_by_sid(&sid, &timer).is_none());
    }

    #[tokio::test]
    async fn test_lookup_by_actual_sid() {
        let mut table = ClientSubscriptionTable::new();
        table.add(subscription("uuid:remote-1"));
        table.add(subscription("uuid:remote-2"));

        let found = table.lookup_by_actual_sid(b"uuid:remote-1").unwrap();
        assert_eq!(found.actual_sid, "uuid:remote-1");
        assert!(table.lookup_by_actual_sid(b"uuid:remote").is_none());

        // Newest first.
        assert_eq!(table.sids().len(), 2);
        assert_eq!(
            table.lookup_by_sid(&table.sids()[0]).unwrap().actual_sid,
            "uuid:remote-2"
        );
    }

    #[test]
    fn test_local_sids_are_unique() {
        let a = subscription("uuid:same");
        let b = subscription("uuid:same");
        assert_ne!(a.sid, b.sid);
    }
}
