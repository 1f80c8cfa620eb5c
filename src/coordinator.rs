//! Single-flight credential refresh.
//!
//! The first request to notice an expired access credential (the leader) calls the refresh
//! endpoint. Later ones park a one-shot channel in the pending queue until the leader settles
//! the cycle. State and queue share one mutex, which is never held across the refresh call.
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::authenticator::{AuthenticateError, Authenticator, RefreshRequest};
use crate::credentials::{CredentialPair, CredentialStore};
use crate::descriptor::RequestDescriptor;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Refreshing,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error("no refresh credential available")]
    MissingRefreshToken,
    #[error("refresh credential rejected: {0}")]
    Rejected(#[from] AuthenticateError),
    #[error("credential refresh ended without an outcome")]
    Interrupted,
    #[error("refresh coordinator lock poisoned")]
    PoisonError,
}

/// Notified when the session cannot be recovered and credentials have been cleared.
///
/// This is where the host decides how to surface a logout (redirect to sign-in, prompt...).
pub trait LogoutHandler {
    fn on_logout(&self, reason: &RefreshError);
}

// Accept closures as LogoutHandler implementations
impl<F> LogoutHandler for F
where
    F: Fn(&RefreshError),
{
    fn on_logout(&self, reason: &RefreshError) {
        self(reason)
    }
}

type RefreshOutcome = Result<Token, RefreshError>;

/// A request suspended until the in-flight refresh settles.
struct PendingRequest {
    resume: mpsc::Sender<RefreshOutcome>,
}

impl PendingRequest {
    // Consumes the entry: it can only ever be resolved or rejected once.
    fn settle(self, outcome: RefreshOutcome) {
        // The waiter only disappears if its thread is gone, nothing left to notify then.
        let _ = self.resume.send(outcome);
    }
}

struct CycleState {
    state: CoordinatorState,
    pending: Vec<PendingRequest>,
}

enum Role {
    Leader,
    Follower(mpsc::Receiver<RefreshOutcome>),
}

pub struct RefreshCoordinator<S, A, L> {
    store: S,
    authenticator: A,
    logout_handler: L,
    cycle: Mutex<CycleState>,
}

impl<S, A, L> RefreshCoordinator<S, A, L>
where
    S: CredentialStore,
    A: Authenticator,
    L: LogoutHandler,
{
    pub fn new(store: S, authenticator: A, logout_handler: L) -> Self {
        Self {
            store,
            authenticator,
            logout_handler,
            cycle: Mutex::new(CycleState {
                state: CoordinatorState::Idle,
                pending: Vec::new(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> CoordinatorState {
        self.lock_cycle().state
    }

    /// Requests currently parked behind the in-flight refresh.
    pub fn pending_requests(&self) -> usize {
        self.lock_cycle().pending.len()
    }

    /// Handles a retryable auth failure of `descriptor`: marks it as retried and returns the
    /// access token to replay it with, once the current (or a new) refresh cycle settles.
    pub fn recover(&self, descriptor: &mut RequestDescriptor) -> RefreshOutcome {
        descriptor.mark_retried();

        let role = {
            let mut cycle = self.cycle.lock().map_err(|_| RefreshError::PoisonError)?;
            match cycle.state {
                CoordinatorState::Refreshing => {
                    let (resume, waiting) = mpsc::channel();
                    cycle.pending.push(PendingRequest { resume });
                    Role::Follower(waiting)
                }
                CoordinatorState::Idle => {
                    cycle.state = CoordinatorState::Refreshing;
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(waiting) => {
                debug!(request_id = %descriptor.id(), "waiting for in-flight credential refresh");
                waiting.recv().unwrap_or(Err(RefreshError::Interrupted))
            }
            Role::Leader => {
                debug!(request_id = %descriptor.id(), "starting credential refresh");
                let mut cycle = RefreshCycle {
                    coordinator: self,
                    settled: false,
                };
                let outcome = self.exchange_refresh_token();
                cycle.settle(outcome)
            }
        }
    }

    fn exchange_refresh_token(&self) -> Result<CredentialPair, RefreshError> {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self
            .authenticator
            .authenticate(RefreshRequest { refresh_token })?;

        Ok(CredentialPair::from(response))
    }

    /// Ends the cycle: back to idle and hands over every parked request, in one lock scope.
    fn end_cycle(&self) -> Vec<PendingRequest> {
        let mut cycle = self.lock_cycle();
        cycle.state = CoordinatorState::Idle;
        mem::take(&mut cycle.pending)
    }

    // Only for ending a cycle and reporting on it: parked requests must be released even if
    // another thread poisoned the lock.
    fn lock_cycle(&self) -> MutexGuard<'_, CycleState> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The leader's handle on a refresh cycle. If the leader unwinds before settling, parked
/// requests are released with [`RefreshError::Interrupted`] instead of waiting forever.
struct RefreshCycle<'a, S, A, L>
where
    S: CredentialStore,
    A: Authenticator,
    L: LogoutHandler,
{
    coordinator: &'a RefreshCoordinator<S, A, L>,
    settled: bool,
}

impl<S, A, L> RefreshCycle<'_, S, A, L>
where
    S: CredentialStore,
    A: Authenticator,
    L: LogoutHandler,
{
    fn settle(&mut self, outcome: Result<CredentialPair, RefreshError>) -> RefreshOutcome {
        let coordinator = self.coordinator;

        let outcome = match outcome {
            Ok(pair) => {
                let access = pair.access.clone();
                coordinator.store.set(pair);
                Ok(access)
            }
            Err(err) => {
                coordinator.store.clear();
                Err(err)
            }
        };

        // A panicking store leaves the cycle unsettled, the drop guard releases the queue then.
        let pending = coordinator.end_cycle();
        self.settled = true;
        match &outcome {
            Ok(_) => info!(waiting = pending.len(), "credentials refreshed"),
            Err(err) => warn!(waiting = pending.len(), "credential refresh failed: {err}"),
        }

        for request in pending {
            request.settle(outcome.clone());
        }

        if let Err(err) = &outcome {
            coordinator.logout_handler.on_logout(err);
        }

        outcome
    }
}

impl<S, A, L> Drop for RefreshCycle<'_, S, A, L>
where
    S: CredentialStore,
    A: Authenticator,
    L: LogoutHandler,
{
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let pending = self.coordinator.end_cycle();
        warn!(
            waiting = pending.len(),
            "credential refresh aborted, releasing waiting requests"
        );
        for request in pending {
            request.settle(Err(RefreshError::Interrupted));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    use assert_matches::assert_matches;
    use http::Uri;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use rstest::rstest;

    use super::*;
    use crate::authenticator::RefreshResponse;
    use crate::authenticator::test::MockAuthenticatorMock;
    use crate::credentials::{CredentialLifetimes, InMemoryCredentialStore, StoredCredentials};

    fn descriptor(path: &'static str) -> RequestDescriptor {
        RequestDescriptor::get(Uri::from_static(path))
    }

    fn refreshed(access: &str, refresh: &str) -> RefreshResponse {
        RefreshResponse {
            access_token: Token::from(access),
            refresh_token: Token::from(refresh),
        }
    }

    /// Holds a valid pair but cannot persist a new one.
    struct ReadOnlyStore;

    impl CredentialStore for ReadOnlyStore {
        fn load(&self) -> StoredCredentials {
            StoredCredentials::issue(
                CredentialPair::new("A1", "R1"),
                &CredentialLifetimes::default(),
            )
        }

        fn set(&self, _: CredentialPair) {
            panic!("credentials volume is read-only");
        }

        fn clear(&self) {}
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(16)]
    fn concurrent_failures_share_one_refresh(#[case] concurrency: usize) {
        let refresh_calls = AtomicUsize::new(0);
        let logouts = AtomicUsize::new(0);
        let (release, released) = mpsc::channel::<()>();
        let released = Mutex::new(released);

        let authenticator = |req: RefreshRequest| -> Result<RefreshResponse, AuthenticateError> {
            refresh_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.refresh_token, Token::from("R1"));
            released.lock().unwrap().recv().unwrap();
            Ok(refreshed("A2", "R2"))
        };
        let coordinator = RefreshCoordinator::new(
            InMemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1")),
            authenticator,
            |_: &RefreshError| {
                logouts.fetch_add(1, Ordering::SeqCst);
            },
        );

        let outcomes: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..concurrency)
                .map(|_| {
                    let coordinator = &coordinator;
                    s.spawn(move || coordinator.recover(&mut descriptor("/albums")))
                })
                .collect();

            wait_until(|| {
                coordinator.state() == CoordinatorState::Refreshing
                    && coordinator.pending_requests() == concurrency - 1
            });
            release.send(()).unwrap();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.len(), concurrency);
        for outcome in outcomes {
            assert_eq!(outcome, Ok(Token::from("A2")));
        }
        assert_eq!(
            coordinator.store().get(),
            Some(CredentialPair::new("A2", "R2"))
        );
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert_eq!(coordinator.pending_requests(), 0);
        assert_eq!(logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejected_refresh_fails_every_waiter_and_logs_out_once() {
        let logouts = AtomicUsize::new(0);
        let (release, released) = mpsc::channel::<()>();
        let released = Mutex::new(released);

        let authenticator = |_: RefreshRequest| -> Result<RefreshResponse, AuthenticateError> {
            released.lock().unwrap().recv().unwrap();
            Err(AuthenticateError::HttpResponseError(401, "revoked".into()))
        };
        let coordinator = RefreshCoordinator::new(
            InMemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1")),
            authenticator,
            |reason: &RefreshError| {
                assert_matches!(reason, RefreshError::Rejected(_));
                logouts.fetch_add(1, Ordering::SeqCst);
            },
        );

        let outcomes: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = ["/albums", "/kids", "/photos"]
                .into_iter()
                .map(|path| {
                    let coordinator = &coordinator;
                    s.spawn(move || coordinator.recover(&mut descriptor(path)))
                })
                .collect();

            wait_until(|| coordinator.pending_requests() == 2);
            release.send(()).unwrap();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for outcome in outcomes {
            assert_eq!(
                outcome,
                Err(RefreshError::Rejected(AuthenticateError::HttpResponseError(
                    401,
                    "revoked".into()
                )))
            );
        }
        assert!(coordinator.store().load().is_empty());
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert_eq!(coordinator.pending_requests(), 0);
    }

    #[test]
    fn missing_refresh_token_never_calls_the_endpoint() {
        let logouts = AtomicUsize::new(0);
        let mut authenticator = MockAuthenticatorMock::new();
        authenticator.expect_authenticate().never();

        let coordinator = RefreshCoordinator::new(
            InMemoryCredentialStore::default(),
            authenticator,
            |reason: &RefreshError| {
                assert_eq!(reason, &RefreshError::MissingRefreshToken);
                logouts.fetch_add(1, Ordering::SeqCst);
            },
        );
        let mut request = descriptor("/albums");

        let outcome = coordinator.recover(&mut request);

        assert_eq!(outcome, Err(RefreshError::MissingRefreshToken));
        assert!(request.is_retried());
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }

    #[test]
    fn settled_cycle_lets_later_failures_start_a_new_one() {
        let mut sequence = Sequence::new();
        let mut authenticator = MockAuthenticatorMock::new();
        authenticator
            .expect_authenticate()
            .once()
            .in_sequence(&mut sequence)
            .with(eq(RefreshRequest {
                refresh_token: Token::from("R1"),
            }))
            .returning(|_| Ok(refreshed("A2", "R2")));
        authenticator
            .expect_authenticate()
            .once()
            .in_sequence(&mut sequence)
            .with(eq(RefreshRequest {
                refresh_token: Token::from("R2"),
            }))
            .returning(|_| Ok(refreshed("A3", "R3")));

        let logouts = AtomicUsize::new(0);
        let coordinator = RefreshCoordinator::new(
            InMemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1")),
            authenticator,
            |_: &RefreshError| {
                logouts.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(
            coordinator.recover(&mut descriptor("/albums")),
            Ok(Token::from("A2"))
        );
        assert_eq!(
            coordinator.recover(&mut descriptor("/kids")),
            Ok(Token::from("A3"))
        );
        assert_eq!(
            coordinator.store().get(),
            Some(CredentialPair::new("A3", "R3"))
        );
        assert_eq!(logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn aborted_refresh_releases_waiters() {
        let (release, released) = mpsc::channel::<()>();
        let released = Mutex::new(released);

        let authenticator = |_: RefreshRequest| -> Result<RefreshResponse, AuthenticateError> {
            released.lock().unwrap().recv().unwrap();
            panic!("refresh endpoint client blew up");
        };
        let coordinator = RefreshCoordinator::new(
            InMemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1")),
            authenticator,
            |_: &RefreshError| {},
        );

        thread::scope(|s| {
            let leader = s.spawn(|| coordinator.recover(&mut descriptor("/albums")));
            wait_until(|| coordinator.state() == CoordinatorState::Refreshing);

            let follower = s.spawn(|| coordinator.recover(&mut descriptor("/kids")));
            wait_until(|| coordinator.pending_requests() == 1);
            release.send(()).unwrap();

            assert!(leader.join().is_err());
            assert_eq!(follower.join().unwrap(), Err(RefreshError::Interrupted));
        });

        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert_eq!(coordinator.pending_requests(), 0);
    }

    #[test]
    fn failing_store_write_still_releases_waiters() {
        let (release, released) = mpsc::channel::<()>();
        let released = Mutex::new(released);

        let authenticator = |_: RefreshRequest| -> Result<RefreshResponse, AuthenticateError> {
            released.lock().unwrap().recv().unwrap();
            Ok(refreshed("A2", "R2"))
        };
        let coordinator =
            RefreshCoordinator::new(ReadOnlyStore, authenticator, |_: &RefreshError| {});

        thread::scope(|s| {
            let leader = s.spawn(|| coordinator.recover(&mut descriptor("/albums")));
            wait_until(|| coordinator.state() == CoordinatorState::Refreshing);

            let follower = s.spawn(|| coordinator.recover(&mut descriptor("/kids")));
            wait_until(|| coordinator.pending_requests() == 1);
            release.send(()).unwrap();

            assert!(leader.join().is_err());
            assert_eq!(follower.join().unwrap(), Err(RefreshError::Interrupted));
        });

        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert_eq!(coordinator.pending_requests(), 0);
    }

    #[test]
    fn poisoned_coordinator_fails_without_refreshing() {
        let refresh_calls = AtomicUsize::new(0);
        let authenticator = |_: RefreshRequest| -> Result<RefreshResponse, AuthenticateError> {
            refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(refreshed("A2", "R2"))
        };
        let coordinator = RefreshCoordinator::new(
            InMemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1")),
            authenticator,
            |_: &RefreshError| {},
        );

        thread::scope(|s| {
            let poisoner = s.spawn(|| {
                let _cycle = coordinator.cycle.lock().unwrap();
                panic!("panicked while holding the cycle lock");
            });
            assert!(poisoner.join().is_err());
        });

        let mut request = descriptor("/albums");
        assert_eq!(
            coordinator.recover(&mut request),
            Err(RefreshError::PoisonError)
        );
        assert!(request.is_retried());
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
    }
}
