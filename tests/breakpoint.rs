//! Breakpoint behavior: wait resolution, timeout defaults, iteration, and
//! cancellation-safe teardown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventvisor::{
    cast, val, Args, Context, Event, EventBus, Flow, Handle, HandlerError, HandlerFn, Param,
    StepOut,
};

struct Msg {
    text: String,
}

#[async_trait]
impl Event for Msg {
    async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
        ctx.insert("text", val(self.text.clone()));
        Ok(())
    }
}

/// Produces a value only for the magic message.
fn continue_handler() -> Arc<dyn Handle> {
    HandlerFn::arc(
        "continue-watch",
        vec![Param::of::<String>("text")],
        |args: Args| async move {
            let text = args.get::<String>("text")?;
            if &*text == "continue!" {
                Ok(Flow::value(format!("resumed:{text}")))
            } else {
                Ok(Flow::Nothing)
            }
        },
    )
}

async fn publish_text(bus: &EventBus, text: &str) {
    bus.publish(Msg { text: text.into() }).join().await;
}

#[tokio::test]
async fn test_wait_resolves_on_matching_event() {
    let bus = EventBus::default();
    let step = Arc::new(StepOut::on::<Msg>(&bus, continue_handler()));

    let waiter = {
        let step = Arc::clone(&step);
        tokio::spawn(async move { step.wait(Some(Duration::from_secs(2)), None).await })
    };
    // Let the wait install its temporary subscriber.
    tokio::time::sleep(Duration::from_millis(20)).await;

    publish_text(&bus, "hello").await;
    publish_text(&bus, "wait").await;
    publish_text(&bus, "continue!").await;

    let got = waiter.await.unwrap().unwrap().expect("value");
    assert_eq!(*cast::<String>(&got).unwrap(), "resumed:continue!");

    // Teardown disposed the temporary subscriber.
    assert!(bus.global_scope().is_empty());
}

#[tokio::test]
async fn test_wait_timeout_yields_default() {
    let bus = EventBus::default();
    let step = Arc::new(StepOut::on::<Msg>(&bus, continue_handler()));

    let waiter = {
        let step = Arc::clone(&step);
        tokio::spawn(async move {
            step.wait(Some(Duration::from_millis(100)), Some(val(false)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    publish_text(&bus, "end.").await;

    let got = waiter.await.unwrap().unwrap().expect("default");
    assert!(!*cast::<bool>(&got).unwrap());
    assert!(bus.global_scope().is_empty());
}

#[tokio::test]
async fn test_iteration_yields_until_default_then_user_breaks() {
    let bus = EventBus::default();
    let step = Arc::new(StepOut::on::<Msg>(&bus, continue_handler()));

    let looped = {
        let step = Arc::clone(&step);
        tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut iter = step.iter(Some(Duration::from_millis(150)), Some(val(false)));
            while let Some(v) = iter.next().await {
                if let Some(flag) = cast::<bool>(&v) {
                    if !*flag {
                        break;
                    }
                }
                collected.push((*cast::<String>(&v).unwrap()).clone());
            }
            collected
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    publish_text(&bus, "continue!").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    publish_text(&bus, "continue!").await;
    // No further matching event: the next wait times out into the default
    // and the loop body breaks on it.

    let collected = looped.await.unwrap();
    assert_eq!(collected.len(), 2);
    assert!(collected.iter().all(|s| s == "resumed:continue!"));
}

#[tokio::test]
async fn test_block_stops_propagation_of_the_resolving_event() {
    let bus = EventBus::default();

    // A later-priority observer that must not see the resolving event.
    let observed = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let log = Arc::clone(&observed);
    bus.on::<Msg>(HandlerFn::arc(
        "late-observer",
        vec![Param::of::<String>("text")],
        move |args: Args| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push((*args.get::<String>("text")?).clone());
                Ok(Flow::Nothing)
            }
        },
    ))
    .priority(32)
    .attach()
    .unwrap();

    let step = Arc::new(StepOut::on::<Msg>(&bus, continue_handler()).block());
    let waiter = {
        let step = Arc::clone(&step);
        tokio::spawn(async move { step.wait(Some(Duration::from_secs(2)), None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    publish_text(&bus, "hello").await;
    publish_text(&bus, "continue!").await;

    let got = waiter.await.unwrap().unwrap().expect("value");
    assert_eq!(*cast::<String>(&got).unwrap(), "resumed:continue!");

    // The observer saw the pass-through event, not the blocked one.
    assert_eq!(observed.lock().unwrap().clone(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn test_wrap_restores_priority_after_wait() {
    let bus = EventBus::default();
    let sub = bus
        .on::<Msg>(continue_handler())
        .priority(24)
        .attach()
        .unwrap();

    let step = Arc::new(StepOut::wrap(Arc::clone(&sub)).priority(1));
    let waiter = {
        let step = Arc::clone(&step);
        tokio::spawn(async move { step.wait(Some(Duration::from_millis(100)), None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sub.priority(), 1);

    let out = waiter.await.unwrap().unwrap();
    assert!(out.is_none());
    // The wrapped subscriber survives with its original priority.
    assert_eq!(sub.priority(), 24);
    assert!(sub.is_available());
}

#[tokio::test]
async fn test_disposed_step_out_refuses_wait() {
    let bus = EventBus::default();
    let step = StepOut::on::<Msg>(&bus, continue_handler());
    step.dispose();
    assert!(step.wait(None, None).await.is_err());

    let mut iter = step.iter(Some(Duration::from_millis(10)), None);
    assert!(iter.next().await.is_none());
}
