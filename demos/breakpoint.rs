//! # Breakpoint Example
//!
//! A handler suspends on a [`StepOut`] until a later message says
//! `continue!`, then resumes with that event's value. A second wait times
//! out into its default.
//!
//! ## Run
//! ```bash
//! cargo run --example breakpoint
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventvisor::{
    cast, val, Args, Context, Event, EventBus, Flow, HandlerError, HandlerFn, Param, StepOut,
};

struct Chat {
    msg: String,
}

#[async_trait]
impl Event for Chat {
    async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
        ctx.insert("msg", val(self.msg.clone()));
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = EventBus::default();

    let step = Arc::new(StepOut::on::<Chat>(
        &bus,
        HandlerFn::arc(
            "resume-watch",
            vec![Param::of::<String>("msg")],
            |args: Args| async move {
                let msg = args.get::<String>("msg")?;
                if &*msg == "continue!" {
                    Ok(Flow::value(format!("resumed by {msg:?}")))
                } else {
                    Ok(Flow::Nothing)
                }
            },
        ),
    ));

    let waiter = {
        let step = Arc::clone(&step);
        tokio::spawn(async move {
            println!("waiting for continue! ...");
            let got = step
                .wait(Some(Duration::from_secs(2)), None)
                .await
                .expect("step-out alive");
            if let Some(v) = got {
                println!("woke up: {}", cast::<String>(&v).unwrap());
            }

            // Nothing matches this time; the default arrives instead.
            let fallback = step
                .wait(Some(Duration::from_millis(300)), Some(val(false)))
                .await
                .expect("step-out alive");
            println!("second wait settled with default: {:?}", fallback.is_some());
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    for msg in ["hello", "wait", "continue!", "end."] {
        bus.publish(Chat { msg: msg.into() }).join().await;
    }

    waiter.await?;
    bus.shutdown().await?;
    Ok(())
}
