//! Concurrency-testing primitives: fire a set of prepared requests with
//! optional barrier release and per-member deadlines, then promote one
//! response to primary. Every member outcome is kept as race evidence
//! even though only the primary feeds the session.

use crate::http::client::Dispatch;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::workflow::mutation::PickPrimary;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

#[derive(Debug)]
pub struct MemberOutcome {
    pub index: u32,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub elapsed_ms: u128,
    pub started_at: String,
    pub completed_at: String,
}

impl MemberOutcome {
    pub fn succeeded(&self) -> bool {
        self.response.as_ref().map(HttpResponse::is_success).unwrap_or(false)
    }
}

/// Dispatch every prepared request concurrently. With `barrier` set, no
/// request starts before every request is ready to start. Each member has
/// an individual deadline; exceeding it finalizes that member as a timeout
/// without touching its siblings. Outcomes come back in member order.
pub async fn run_members(
    dispatch: Arc<dyn Dispatch>,
    requests: Vec<HttpRequest>,
    barrier: bool,
    timeout_ms: u64,
) -> Vec<MemberOutcome> {
    let count = requests.len();
    let release = barrier.then(|| Arc::new(Barrier::new(count)));
    let deadline = Duration::from_millis(timeout_ms);

    let mut handles = Vec::with_capacity(count);
    for (index, request) in requests.into_iter().enumerate() {
        let dispatch = Arc::clone(&dispatch);
        let release = release.clone();
        handles.push(tokio::spawn(async move {
            if let Some(barrier) = release {
                barrier.wait().await;
            }

            let started_at = chrono::Utc::now().to_rfc3339();
            let start = Instant::now();
            let sent = request.clone();
            let (response, error, timed_out) =
                match tokio::time::timeout(deadline, dispatch.dispatch(sent)).await {
                    Ok(Ok(resp)) => (Some(resp), None, false),
                    Ok(Err(e)) => (None, Some(e.to_string()), false),
                    Err(_) => (
                        None,
                        Some(format!("member exceeded {timeout_ms}ms deadline")),
                        true,
                    ),
                };

            MemberOutcome {
                index: index as u32,
                request,
                response,
                error,
                timed_out,
                elapsed_ms: start.elapsed().as_millis(),
                started_at,
                completed_at: chrono::Utc::now().to_rfc3339(),
            }
        }));
    }

    let mut outcomes = Vec::with_capacity(count);
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::warn!(error = %e, "concurrency member task failed to join"),
        }
    }
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

/// Select the primary member. Member 0 is the anchor under the anchor_*
/// policies. Ties on elapsed time break deterministically by member index.
pub fn pick_primary(members: &[MemberOutcome], policy: PickPrimary) -> Option<usize> {
    let earliest = |pred: &dyn Fn(&MemberOutcome) -> bool| -> Option<usize> {
        members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.response.is_some() && pred(m))
            .min_by_key(|(i, m)| (m.elapsed_ms, *i))
            .map(|(i, _)| i)
    };
    let earliest_success = || earliest(&|m: &MemberOutcome| m.succeeded());
    let earliest_any = || earliest(&|_| true);

    match policy {
        PickPrimary::FirstSuccess => earliest_success(),
        PickPrimary::First => earliest_any(),
        PickPrimary::MajoritySuccess => {
            let successes = members.iter().filter(|m| m.succeeded()).count();
            if successes * 2 > members.len() {
                earliest_success()
            } else {
                earliest_any()
            }
        }
        PickPrimary::AnchorFirst => members.first().map(|_| 0),
        PickPrimary::AnchorFirstSuccess => {
            if members.is_empty() {
                None
            } else if members[0].succeeded() {
                Some(0)
            } else {
                earliest_success().or(Some(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use reqwest::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Scripted transport: responds with a fixed status sequence, in call
    /// order, with an optional per-call delay.
    struct Scripted {
        statuses: Vec<u16>,
        calls: AtomicUsize,
        delay_ms: u64,
    }

    #[async_trait]
    impl Dispatch for Scripted {
        async fn dispatch(&self, _req: HttpRequest) -> Result<HttpResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let status = self.statuses[n % self.statuses.len()];
            Ok(HttpResponse::for_test(status, b"{}"))
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::new(Method::GET, Url::parse("https://api.example.test/race").unwrap())
    }

    fn outcome(index: u32, status: Option<u16>, elapsed_ms: u128) -> MemberOutcome {
        MemberOutcome {
            index,
            request: request(),
            response: status.map(|s| HttpResponse::for_test(s, b"")),
            error: status.is_none().then(|| "boom".to_string()),
            timed_out: false,
            elapsed_ms,
            started_at: String::new(),
            completed_at: String::new(),
        }
    }

    #[tokio::test]
    async fn all_members_complete_and_keep_order() {
        let dispatch = Arc::new(Scripted {
            statuses: vec![200, 409, 409, 409, 409],
            calls: AtomicUsize::new(0),
            delay_ms: 0,
        });
        let requests = (0..5).map(|_| request()).collect();

        let members = run_members(dispatch, requests, true, 2_000).await;
        assert_eq!(members.len(), 5);
        for (i, m) in members.iter().enumerate() {
            assert_eq!(m.index as usize, i);
            assert!(m.response.is_some());
        }
        assert_eq!(members.iter().filter(|m| m.succeeded()).count(), 1);
    }

    #[tokio::test]
    async fn slow_members_time_out_without_stalling_siblings() {
        let dispatch = Arc::new(Scripted {
            statuses: vec![200],
            calls: AtomicUsize::new(0),
            delay_ms: 200,
        });
        let requests = (0..3).map(|_| request()).collect();

        let members = run_members(dispatch, requests, false, 20).await;
        assert_eq!(members.len(), 3);
        for m in &members {
            assert!(m.timed_out);
            assert!(m.response.is_none());
        }
    }

    #[test]
    fn first_success_picks_earliest_2xx() {
        let members = vec![
            outcome(0, Some(500), 5),
            outcome(1, Some(200), 30),
            outcome(2, Some(201), 10),
        ];
        assert_eq!(pick_primary(&members, PickPrimary::FirstSuccess), Some(2));
        assert_eq!(pick_primary(&members, PickPrimary::First), Some(0));
    }

    #[test]
    fn first_success_ties_break_by_member_index() {
        let members = vec![
            outcome(0, Some(500), 10),
            outcome(1, Some(200), 10),
            outcome(2, Some(200), 10),
        ];
        assert_eq!(pick_primary(&members, PickPrimary::FirstSuccess), Some(1));
    }

    #[test]
    fn majority_success_needs_a_strict_majority() {
        let minority = vec![
            outcome(0, Some(200), 50),
            outcome(1, Some(409), 10),
            outcome(2, Some(409), 20),
        ];
        // One of three succeeded: earliest overall wins.
        assert_eq!(pick_primary(&minority, PickPrimary::MajoritySuccess), Some(1));

        let majority = vec![
            outcome(0, Some(200), 50),
            outcome(1, Some(200), 10),
            outcome(2, Some(409), 5),
        ];
        assert_eq!(pick_primary(&majority, PickPrimary::MajoritySuccess), Some(1));
    }

    #[test]
    fn no_response_yields_no_primary_for_success_policies() {
        let members = vec![outcome(0, None, 1), outcome(1, None, 2)];
        assert_eq!(pick_primary(&members, PickPrimary::FirstSuccess), None);
        assert_eq!(pick_primary(&members, PickPrimary::First), None);
    }

    #[test]
    fn anchor_policies_prefer_the_anchor() {
        let anchor_failed = vec![
            outcome(0, Some(409), 5),
            outcome(1, Some(200), 50),
        ];
        assert_eq!(pick_primary(&anchor_failed, PickPrimary::AnchorFirst), Some(0));
        assert_eq!(
            pick_primary(&anchor_failed, PickPrimary::AnchorFirstSuccess),
            Some(1)
        );

        let anchor_ok = vec![outcome(0, Some(200), 50), outcome(1, Some(200), 5)];
        assert_eq!(pick_primary(&anchor_ok, PickPrimary::AnchorFirstSuccess), Some(0));
    }
}
