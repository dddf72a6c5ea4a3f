//! Tests for the service dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;

use super::ServiceDispatcher;
use crate::protocol::{ErrorKind, Request};
use crate::service::{
    Completion, FnService, IdentityService, ServiceFailure, ServiceRequest, TransformService,
};

fn request(text: &str) -> Request {
    Request::new("/test", vec![String::from("--test")], text)
}

fn soon() -> Instant {
    Instant::now() + Duration::from_secs(2)
}

fn dispatcher(service: impl TransformService + 'static) -> ServiceDispatcher {
    ServiceDispatcher::new(Arc::new(service)).expect("dispatcher starts")
}

#[test]
fn identity_service_round_trips() {
    let dispatcher = dispatcher(IdentityService);
    let text = dispatcher.dispatch(request("hello"), soon()).expect("dispatch");
    assert_eq!(text, "hello");
}

#[rstest]
#[case::serial(false)]
#[case::reentrant(true)]
fn reported_failure_is_a_service_error(#[case] reentrant: bool) {
    let service = FnService::new("failing", |_: ServiceRequest| {
        Err(ServiceFailure::new("formatter exploded"))
    });
    let dispatcher = if reentrant {
        dispatcher(service.reentrant())
    } else {
        dispatcher(service)
    };
    let error = dispatcher
        .dispatch(request("x"), soon())
        .expect_err("service fails");
    assert_eq!(error.kind(), ErrorKind::Service);
    assert_eq!(error.to_string(), "formatter exploded");
}

#[test]
fn panicking_service_is_a_service_error_and_worker_survives() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let dispatcher = dispatcher(FnService::new("flaky", move |request: ServiceRequest| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first call panics");
        }
        Ok(request.text)
    }));

    let error = dispatcher
        .dispatch(request("x"), soon())
        .expect_err("panic surfaces");
    assert_eq!(error.kind(), ErrorKind::Service);

    let text = dispatcher.dispatch(request("again"), soon()).expect("worker alive");
    assert_eq!(text, "again");
}

struct DroppingService;

impl TransformService for DroppingService {
    fn invoke(&self, _request: ServiceRequest, completion: Completion) {
        drop(completion);
    }

    fn name(&self) -> &str {
        "dropping"
    }
}

#[test]
fn dropped_completion_is_a_service_error() {
    let error = dispatcher(DroppingService)
        .dispatch(request("x"), soon())
        .expect_err("no result");
    assert_eq!(error.kind(), ErrorKind::Service);
}

struct DeferredService;

impl TransformService for DeferredService {
    fn invoke(&self, request: ServiceRequest, completion: Completion) {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completion.complete(Ok(request.text.to_uppercase()));
        });
    }

    fn name(&self) -> &str {
        "deferred"
    }
}

#[test]
fn completion_may_arrive_from_another_thread() {
    let text = dispatcher(DeferredService)
        .dispatch(request("later"), soon())
        .expect("deferred completion");
    assert_eq!(text, "LATER");
}

#[test]
fn slow_service_times_out() {
    let dispatcher = dispatcher(FnService::new("slow", |request: ServiceRequest| {
        thread::sleep(Duration::from_millis(500));
        Ok(request.text)
    }));
    let started = Instant::now();
    let error = dispatcher
        .dispatch(request("x"), Instant::now() + Duration::from_millis(50))
        .expect_err("deadline passes");
    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_millis(400));
}

fn overlap_probe(reentrant: bool) -> usize {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (active_ref, peak_ref) = (Arc::clone(&active), Arc::clone(&peak));
    let service = FnService::new("probe", move |request: ServiceRequest| {
        let now = active_ref.fetch_add(1, Ordering::SeqCst) + 1;
        peak_ref.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        active_ref.fetch_sub(1, Ordering::SeqCst);
        Ok(request.text)
    });
    let dispatcher = Arc::new(if reentrant {
        dispatcher(service.reentrant())
    } else {
        dispatcher(service)
    });

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.dispatch(request("x"), soon()))
        })
        .collect();
    for caller in callers {
        caller.join().expect("caller thread").expect("dispatch");
    }
    peak.load(Ordering::SeqCst)
}

#[test]
fn non_reentrant_invocations_never_overlap() {
    assert_eq!(overlap_probe(false), 1);
}

#[test]
fn reentrant_invocations_may_overlap() {
    assert!(overlap_probe(true) > 1);
}

#[test]
fn already_expired_request_is_a_timeout() {
    let error = dispatcher(IdentityService)
        .dispatch(request("x"), Instant::now())
        .expect_err("already expired");
    assert_eq!(error.kind(), ErrorKind::Timeout);
}

#[test]
fn queued_jobs_past_their_deadline_are_skipped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let dispatcher = Arc::new(dispatcher(FnService::new(
        "counted",
        move |request: ServiceRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(150));
            Ok(request.text)
        },
    )));

    let first = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.dispatch(request("first"), soon()))
    };
    thread::sleep(Duration::from_millis(30));
    let error = dispatcher
        .dispatch(request("second"), Instant::now() + Duration::from_millis(50))
        .expect_err("queued behind the first request");
    assert_eq!(error.kind(), ErrorKind::Timeout);

    assert_eq!(first.join().expect("first caller").expect("first"), "first");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
