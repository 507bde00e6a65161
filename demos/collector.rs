//! # Collector Example
//!
//! Two declared signatures share one synthetic publisher. Values publish as
//! positional argument lists or named field maps; each subscriber only runs
//! when the incoming shape fits its own signature.
//!
//! ## Run
//! ```bash
//! cargo run --example collector
//! ```

use eventvisor::{val, ArgList, Args, CollectGroup, EventBus, FieldMap, Flow, HandlerFn, Param};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bus = EventBus::default();
    let group = CollectGroup::new(&bus, "shapes");

    group.collect(HandlerFn::arc(
        "pair",
        vec![
            Param::of::<i32>("a"),
            Param::of::<i32>("b").or::<String>(),
        ],
        |args: Args| async move {
            let a = *args.get::<i32>("a")?;
            println!("pair: a={a}, b is {}", match args.opt::<i32>("b") {
                Some(n) => format!("int {n}"),
                None => format!("str {:?}", args.get::<String>("b")?),
            });
            Ok(Flow::Nothing)
        },
    ))?;

    group.collect(HandlerFn::arc(
        "named",
        vec![Param::of::<String>("name")],
        |args: Args| async move {
            println!("named: {}", args.get::<String>("name")?);
            Ok(Flow::Nothing)
        },
    ))?;

    // Positional: binds by the pair signature's declared order.
    group
        .publish_args(ArgList::new().with(val(2_i32)).with(val(String::from("2"))))
        .join()
        .await;

    // Named: only the `named` signature fits this shape.
    group
        .publish_map(FieldMap::new().with("name", val(String::from("widget"))))
        .join()
        .await;

    // Required `b` absent: nobody runs.
    group
        .publish_map(FieldMap::new().with("a", val(4_i32)).with("c", val(4_i32)))
        .join()
        .await;

    bus.shutdown().await?;
    Ok(())
}
