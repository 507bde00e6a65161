//! # Basic Dispatch Example
//!
//! Publishes a typed event and lets the resolver inject the declared
//! parameters: two gathered attributes, the dispatch context, and the event
//! itself.
//!
//! ## Run
//! ```bash
//! cargo run --example basic
//! ```

use async_trait::async_trait;
use eventvisor::{val, Args, Context, Event, EventBus, Flow, HandlerError, HandlerFn, Param};

struct OrderPlaced {
    order_id: String,
    amount: u64,
}

#[async_trait]
impl Event for OrderPlaced {
    async fn gather(&self, ctx: &mut Context) -> Result<(), HandlerError> {
        ctx.insert("order_id", val(self.order_id.clone()));
        ctx.insert("amount", val(self.amount));
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = EventBus::default();

    bus.on::<OrderPlaced>(HandlerFn::arc(
        "billing",
        vec![
            Param::of::<String>("order_id"),
            Param::of::<u64>("amount"),
        ],
        |args: Args| async move {
            let order_id = args.get::<String>("order_id")?;
            let amount = args.get::<u64>("amount")?;
            println!("billing order {order_id} for {amount} cents");
            Ok(Flow::Nothing)
        },
    ))
    .priority(8)
    .attach()?;

    bus.on::<OrderPlaced>(HandlerFn::arc(
        "audit",
        vec![Param::of::<OrderPlaced>("order"), Param::any("ctx")],
        |args: Args| async move {
            let order = args.get::<OrderPlaced>("order")?;
            let ctx = args.get::<Context>("ctx")?;
            println!(
                "audit: order {} (context keys: {})",
                order.order_id,
                ctx.len()
            );
            Ok(Flow::Nothing)
        },
    ))
    .attach()?;

    bus.publish(OrderPlaced {
        order_id: "ord-42".into(),
        amount: 1299,
    })
    .join()
    .await;

    bus.shutdown().await?;
    Ok(())
}
