//! End-to-end dispatch behavior: fan-out, priorities, sentinels, first-result
//! mode, dependency caching, and exception routing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eventvisor::{
    val, Args, Context, Depends, Event, EventBus, ExceptionEvent, Flow, HandlerError, HandlerFn,
    Param,
    SubscriberInfo,
};

struct TestEvent {
    foo: String,
    bar: String,
}

#[async_trait]
impl Event for TestEvent {
    async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
        ctx.insert("foo", val(self.foo.clone()));
        ctx.insert("bar", val(self.bar.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn test_basic_dispatch_injects_declared_params() {
    let bus = EventBus::default();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    bus.on::<TestEvent>(HandlerFn::arc(
        "basic",
        vec![
            Param::of::<String>("foo"),
            Param::of::<String>("bar"),
            Param::any("ctx"),
            Param::any("event"),
        ],
        move |args: Args| {
            let log = Arc::clone(&log);
            async move {
                let foo = args.get::<String>("foo")?;
                let bar = args.get::<String>("bar")?;
                let ctx = args.get::<Context>("ctx")?;
                let event = args.get::<TestEvent>("event")?;

                assert_eq!(*foo, "f");
                assert_eq!(*bar, "b");
                assert_eq!(*ctx.get_as::<String>("foo").unwrap(), "f");
                assert_eq!(event.foo, "f");

                log.lock().unwrap().push(format!("{foo}/{bar}"));
                Ok(Flow::Nothing)
            }
        },
    ))
    .attach()
    .unwrap();

    bus.publish(TestEvent {
        foo: "f".into(),
        bar: "b".into(),
    })
    .join()
    .await;

    // Invoked exactly once per publish.
    assert_eq!(*seen.lock().unwrap(), vec!["f/b".to_string()]);
}

fn recorder(
    name: &'static str,
    mark: u32,
    log: &Arc<Mutex<Vec<u32>>>,
) -> Arc<dyn eventvisor::Handle> {
    let log = Arc::clone(log);
    HandlerFn::arc(name, Vec::new(), move |_args| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(mark);
            Ok(Flow::Nothing)
        }
    })
}

#[tokio::test]
async fn test_stop_is_local_to_the_subscriber() {
    let bus = EventBus::default();
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    bus.on::<TestEvent>(HandlerFn::arc("a-stop", Vec::new(), |_args| async {
        Ok(Flow::Stop)
    }))
    .priority(10)
    .attach()
    .unwrap();
    bus.on::<TestEvent>(recorder("b", 2, &log))
        .priority(10)
        .attach()
        .unwrap();
    bus.on::<TestEvent>(recorder("c", 3, &log))
        .priority(12)
        .attach()
        .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;

    let mut seen = log.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![2, 3]);
}

#[tokio::test]
async fn test_block_skips_later_cohorts_but_not_its_own() {
    let bus = EventBus::default();
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    bus.on::<TestEvent>(HandlerFn::arc("a-block", Vec::new(), |_args| async {
        Ok(Flow::Block)
    }))
    .priority(10)
    .attach()
    .unwrap();
    bus.on::<TestEvent>(recorder("b", 2, &log))
        .priority(10)
        .attach()
        .unwrap();
    bus.on::<TestEvent>(recorder("c", 3, &log))
        .priority(12)
        .attach()
        .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;

    // B shares the blocking cohort and still runs; C never does.
    assert_eq!(log.lock().unwrap().clone(), vec![2]);
}

#[tokio::test]
async fn test_priority_monotonicity_is_a_barrier() {
    let bus = EventBus::default();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let slow = Arc::clone(&log);
    bus.on::<TestEvent>(HandlerFn::arc("slow", Vec::new(), move |_args| {
        let slow = Arc::clone(&slow);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow.lock().unwrap().push("early");
            Ok(Flow::Nothing)
        }
    }))
    .priority(10)
    .attach()
    .unwrap();

    let fast = Arc::clone(&log);
    bus.on::<TestEvent>(HandlerFn::arc("fast", Vec::new(), move |_args| {
        let fast = Arc::clone(&fast);
        async move {
            fast.lock().unwrap().push("late");
            Ok(Flow::Nothing)
        }
    }))
    .priority(20)
    .attach()
    .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;

    // The later cohort is scheduled only after the earlier one settled.
    assert_eq!(log.lock().unwrap().clone(), vec!["early", "late"]);
}

#[tokio::test]
async fn test_depends_cache_shares_one_invocation_per_dispatch() {
    let bus = EventBus::default();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let fresh: Arc<dyn eventvisor::Handle> =
        HandlerFn::arc("fresh-value", Vec::new(), move |_args| {
            let counter = Arc::clone(&counter);
            async move {
                // A different value on every call; caching makes both
                // parameters observe the same one.
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(Flow::value(n))
            }
        });
    let dep = Depends::new(fresh).cached();

    let observed: Arc<Mutex<Vec<(u32, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&observed);
    bus.on::<TestEvent>(HandlerFn::arc(
        "depends",
        vec![
            Param::of::<u32>("x").depends(dep.clone()),
            Param::of::<u32>("y").depends(dep),
        ],
        move |args: Args| {
            let log = Arc::clone(&log);
            async move {
                let x = *args.get::<u32>("x")?;
                let y = *args.get::<u32>("y")?;
                log.lock().unwrap().push((x, y));
                Ok(Flow::Nothing)
            }
        },
    ))
    .attach()
    .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;

    let pairs = observed.lock().unwrap().clone();
    assert_eq!(pairs.len(), 1);
    let (x, y) = pairs[0];
    assert_eq!(x, y);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_post_returns_first_value_in_registration_order() {
    let bus = EventBus::default();

    bus.on::<TestEvent>(HandlerFn::arc("silent", Vec::new(), |_args| async {
        Ok(Flow::Nothing)
    }))
    .priority(10)
    .attach()
    .unwrap();
    bus.on::<TestEvent>(HandlerFn::arc("answer", Vec::new(), |_args| async {
        Ok(Flow::value(41_i32))
    }))
    .priority(16)
    .attach()
    .unwrap();
    bus.on::<TestEvent>(HandlerFn::arc("too-late", Vec::new(), |_args| async {
        Ok(Flow::value(99_i32))
    }))
    .priority(20)
    .attach()
    .unwrap();

    let out = bus
        .post(TestEvent {
            foo: String::new(),
            bar: String::new(),
        })
        .result_as::<i32>()
        .await;
    assert_eq!(out.map(|v| *v), Some(41));
}

#[tokio::test]
async fn test_post_block_terminates_with_no_result() {
    let bus = EventBus::default();

    bus.on::<TestEvent>(HandlerFn::arc("blocker", Vec::new(), |_args| async {
        Ok(Flow::Block)
    }))
    .priority(10)
    .attach()
    .unwrap();
    bus.on::<TestEvent>(HandlerFn::arc("answer", Vec::new(), |_args| async {
        Ok(Flow::value(7_i32))
    }))
    .priority(20)
    .attach()
    .unwrap();

    let out = bus
        .post(TestEvent {
            foo: String::new(),
            bar: String::new(),
        })
        .result()
        .await;
    assert!(out.is_none());
}

#[tokio::test]
async fn test_exception_routing_carries_origin_subscriber_error() {
    let bus = EventBus::default();

    bus.on::<TestEvent>(HandlerFn::arc("raiser", Vec::new(), |_args| async {
        Err(HandlerError::Failure("boom".into()))
    }))
    .attach()
    .unwrap();

    let seen: Arc<Mutex<Vec<(String, String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    bus.on::<ExceptionEvent>(HandlerFn::arc(
        "exception-watch",
        vec![
            Param::any("origin"),
            Param::of::<SubscriberInfo>("subscriber"),
            Param::any("exception"),
        ],
        move |args: Args| {
            let log = Arc::clone(&log);
            async move {
                let origin = args.get::<Arc<str>>("origin")?;
                let sub = args.get::<SubscriberInfo>("subscriber")?;
                let err = args.get::<Arc<HandlerError>>("exception")?;
                log.lock()
                    .unwrap()
                    .push((origin.to_string(), sub.name.to_string(), err.to_string()));
                Ok(Flow::Nothing)
            }
        },
    ))
    .attach()
    .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;

    let entries = seen.lock().unwrap().clone();
    assert_eq!(entries.len(), 1);
    let (origin, sub, err) = &entries[0];
    assert_eq!(origin, &*<TestEvent as Event>::id());
    assert_eq!(sub, "raiser");
    assert!(err.contains("boom"));
}

#[tokio::test]
async fn test_exception_subscriber_failures_do_not_loop() {
    let bus = EventBus::default();

    bus.on::<TestEvent>(HandlerFn::arc("raiser", Vec::new(), |_args| async {
        Err(HandlerError::Failure("boom".into()))
    }))
    .attach()
    .unwrap();

    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    bus.on::<ExceptionEvent>(HandlerFn::arc(
        "bad-exception-watch",
        Vec::new(),
        move |_args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::Failure("watcher broke too".into()))
            }
        },
    ))
    .attach()
    .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;

    // One exception event for the original failure; the watcher's own
    // failure is swallowed rather than republished.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disabled_scope_is_skipped() {
    let bus = EventBus::default();
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let ui = bus.scope("ui");
    bus.on_in::<TestEvent>(&ui, recorder("ui-sub", 1, &log))
        .attach()
        .unwrap();
    bus.on::<TestEvent>(recorder("global-sub", 2, &log))
        .attach()
        .unwrap();

    ui.disable();
    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;
    assert_eq!(log.lock().unwrap().clone(), vec![2]);

    ui.enable();
    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    })
    .join()
    .await;
    let mut seen = log.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 2]);
}

#[tokio::test]
async fn test_once_subscriber_fires_exactly_once() {
    let bus = EventBus::default();
    let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    bus.on::<TestEvent>(recorder("once-sub", 1, &log))
        .once()
        .attach()
        .unwrap();

    for _ in 0..3 {
        bus.publish(TestEvent {
            foo: String::new(),
            bar: String::new(),
        })
        .join()
        .await;
    }
    assert_eq!(log.lock().unwrap().clone(), vec![1]);
    assert!(bus.global_scope().is_empty());
}

#[tokio::test]
async fn test_shutdown_within_grace() {
    let bus = EventBus::default();
    bus.on::<TestEvent>(HandlerFn::arc("sleepy", Vec::new(), |_args| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Flow::Nothing)
    }))
    .attach()
    .unwrap();

    bus.publish(TestEvent {
        foo: String::new(),
        bar: String::new(),
    });
    bus.shutdown().await.unwrap();
}
