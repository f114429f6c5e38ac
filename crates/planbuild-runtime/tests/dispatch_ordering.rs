//! Ordering and concurrency guarantees of per-path dispatch.
//!
//! - Builds for one path run one at a time, in enqueue order, even across
//!   separate build invocations.
//! - Builds for different paths run in parallel.
//! - Every completed build reports `finished=true` exactly once.

use planbuild_core::{BuildConfig, StreamMessage};
use planbuild_runtime::{MemoryPlanStore, PlanBuilder, PlanRegistry};
use planbuild_test_utils::{
    at, auth, build, drain, edit_marker, finished_paths, max_in_flight, max_in_flight_for,
    plan_key, GatedEditService,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn setup(service: Arc<GatedEditService>) -> (PlanBuilder, Arc<MemoryPlanStore>) {
    let store = Arc::new(MemoryPlanStore::new());
    let builder = PlanBuilder::new(
        Arc::new(PlanRegistry::new(BuildConfig::default()).unwrap()),
        store.clone(),
        service,
    );
    (builder, store)
}

#[tokio::test]
async fn two_edits_on_one_path_run_back_to_back() {
    let service = Arc::new(GatedEditService::new());
    let (builder, store) = setup(service.clone());
    let plan = plan_key();

    let runtime = builder.registry().get_or_create(&plan);
    runtime.commit_file("src/lib.rs", "base\n", at(1)).await.unwrap();
    let mut rx = runtime.subscribe();

    store.add_pending(&plan, build("src/lib.rs", "first", ""));
    store.add_pending(&plan, build("src/lib.rs", "second", ""));

    assert_eq!(builder.build(&plan, &auth()).await.unwrap(), 1);
    builder.wait_all(&plan).await.unwrap();

    let contents: Vec<String> = store
        .results_for("src/lib.rs")
        .into_iter()
        .map(|r| r.content)
        .collect();
    assert_eq!(
        contents,
        vec![
            format!("base\n{}", edit_marker("first")),
            format!("base\n{}{}", edit_marker("first"), edit_marker("second")),
        ]
    );

    let messages = drain(&mut rx);
    assert_eq!(finished_paths(&messages), vec!["src/lib.rs", "src/lib.rs"]);
    assert_eq!(max_in_flight_for(&messages, "src/lib.rs"), 1);
    assert_eq!(service.max_concurrent_for("src/lib.rs"), 1);
    assert_eq!(runtime.active_pipelines(), 0);
}

#[tokio::test]
async fn finished_message_follows_its_own_result() {
    let service = Arc::new(GatedEditService::new());
    let (builder, store) = setup(service);
    let plan = plan_key();

    let runtime = builder.registry().get_or_create(&plan);
    runtime.commit_file("a.txt", "a\n", at(1)).await.unwrap();
    let mut rx = runtime.subscribe();

    for description in ["one", "two", "three"] {
        store.add_pending(&plan, build("a.txt", description, ""));
    }

    builder.build(&plan, &auth()).await.unwrap();
    builder.wait_all(&plan).await.unwrap();

    // Each build opens with finished=false and closes with finished=true
    // before the next build starts.
    let mut open = false;
    let mut finished = 0;
    for msg in drain(&mut rx) {
        let StreamMessage::BuildInfo(info) = msg else {
            panic!("unexpected failure: {msg:?}");
        };
        if info.finished {
            assert!(open, "finished without a start");
            open = false;
            finished += 1;
        } else if info.num_tokens == 0 {
            assert!(!open, "build started while another was open");
            open = true;
        }
    }
    assert_eq!(finished, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paths_build_in_parallel_but_never_overlap_themselves() {
    let service = Arc::new(GatedEditService::new().with_delay(Duration::from_millis(50)));
    let (builder, store) = setup(service.clone());
    let plan = plan_key();
    let runtime = builder.registry().get_or_create(&plan);
    let mut rx = runtime.subscribe();

    let paths = ["a.rs", "b.rs", "c.rs", "d.rs"];
    for path in paths {
        runtime.commit_file(path, "base\n", at(1)).await.unwrap();
        for n in 0..3 {
            store.add_pending(&plan, build(path, &format!("{path}-{n}"), ""));
        }
    }

    assert_eq!(builder.build(&plan, &auth()).await.unwrap(), paths.len());
    builder.wait_all(&plan).await.unwrap();

    let messages = drain(&mut rx);
    for path in paths {
        assert_eq!(max_in_flight_for(&messages, path), 1, "{path} overlapped");
        assert_eq!(service.max_concurrent_for(path), 1, "{path} overlapped");
        assert_eq!(
            service.descriptions_for(path),
            vec![format!("{path}-0"), format!("{path}-1"), format!("{path}-2")]
        );
        assert_eq!(store.results_for(path).len(), 3);
    }
    assert!(max_in_flight(&messages) <= paths.len());
    assert!(max_in_flight(&messages) >= 2, "paths did not run in parallel");
    assert!(service.max_concurrent() >= 2, "paths did not run in parallel");
}

#[tokio::test]
async fn later_invocation_joins_running_pipeline() {
    let service = Arc::new(GatedEditService::new());
    service.hold("a.rs");
    let (builder, store) = setup(service.clone());
    let plan = plan_key();

    let runtime = builder.registry().get_or_create(&plan);
    runtime.commit_file("a.rs", "base\n", at(1)).await.unwrap();
    let mut rx = runtime.subscribe();

    store.add_pending(&plan, build("a.rs", "e1", ""));
    store.add_pending(&plan, build("a.rs", "e2", ""));
    builder.build(&plan, &auth()).await.unwrap();
    assert_eq!(runtime.active_pipelines(), 1);

    store.add_pending(&plan, build("a.rs", "e3", ""));
    assert_eq!(builder.build(&plan, &auth()).await.unwrap(), 1);
    assert_eq!(runtime.active_pipelines(), 1);

    service.release("a.rs", 3);
    builder.wait_all(&plan).await.unwrap();

    assert_eq!(service.descriptions_for("a.rs"), vec!["e1", "e2", "e3"]);
    let messages = drain(&mut rx);
    assert_eq!(finished_paths(&messages).len(), 3);
    assert_eq!(max_in_flight_for(&messages, "a.rs"), 1);
    let last = store.results_for("a.rs").pop().unwrap();
    assert_eq!(
        last.content,
        format!("base\n{}{}{}", edit_marker("e1"), edit_marker("e2"), edit_marker("e3"))
    );
}

#[tokio::test]
async fn completion_signal_means_dispatch_accepted() {
    let service = Arc::new(GatedEditService::new());
    service.hold("a.rs");
    let (builder, store) = setup(service.clone());
    let plan = plan_key();

    let runtime = builder.registry().get_or_create(&plan);
    runtime.commit_file("a.rs", "base\n", at(1)).await.unwrap();
    store.add_pending(&plan, build("a.rs", "held", ""));

    builder.build(&plan, &auth()).await.unwrap();

    // Signal fires while the file is still held.
    assert_eq!(runtime.wait_done().await.unwrap(), Ok(()));
    assert_eq!(runtime.active_pipelines(), 1);
    assert!(store.results().is_empty());

    service.release("a.rs", 1);
    runtime.wait_idle().await.unwrap();
    assert_eq!(store.results().len(), 1);
}

#[tokio::test]
async fn empty_plan_returns_zero_and_signals() {
    let service = Arc::new(GatedEditService::new());
    let (builder, store) = setup(service.clone());
    let plan = plan_key();
    let mut done = builder.registry().get_or_create(&plan).subscribe_done();

    assert_eq!(builder.build(&plan, &auth()).await.unwrap(), 0);
    done.changed().await.unwrap();
    assert_eq!(*done.borrow(), Some(Ok(())));
    assert!(store.statuses().is_empty());
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn late_subscriber_sees_last_completion() {
    let service = Arc::new(GatedEditService::new());
    let (builder, store) = setup(service);
    let plan = plan_key();
    let runtime = builder.registry().get_or_create(&plan);
    runtime.commit_file("a.rs", "base\n", at(1)).await.unwrap();
    store.add_pending(&plan, build("a.rs", "e1", ""));

    builder.build(&plan, &auth()).await.unwrap();
    builder.wait_all(&plan).await.unwrap();

    // Subscribed only after the invocation returned and the file finished.
    let done = runtime.subscribe_done();
    assert_eq!(*done.borrow(), Some(Ok(())));
    assert_eq!(runtime.last_done(), Some(Ok(())));
}
