mod support;

use proptest::prelude::*;

use common::OrderSide;
use engine::{Engine, PriceFeed, Tick};

use support::{config, context, ScriptedBackend};

#[derive(Debug, Clone)]
enum Event {
    Price(f64),
    Fill,
    CancelFault,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        6 => (1.0f64..100_000.0f64).prop_map(Event::Price),
        2 => Just(Event::Fill),
        1 => Just(Event::CancelFault),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    /// Whatever the market does, the engine never has more than one order
    /// open and its record of that order matches the exchange.
    #[test]
    fn at_most_one_order_and_state_matches_exchange(
        start in 1.0f64..100_000.0f64,
        events in prop::collection::vec(event(), 1..40),
    ) {
        runtime().block_on(async {
            let backend = ScriptedBackend::new();
            let feed = PriceFeed::new();
            feed.on_update(start);
            let (mut engine, _handle) = Engine::new(context(&config(""), backend.clone(), feed.clone()));

            for ev in events {
                match ev {
                    Event::Price(p) => feed.on_update(p),
                    Event::Fill => backend.fill_all(),
                    Event::CancelFault => backend.fail_next_cancels(1),
                }
                engine.tick().await.unwrap();

                let open = backend.open();
                let state = engine.order_state();
                prop_assert!(open.len() <= 1);
                prop_assert_eq!(state.is_active(), state.order_id().is_some());
                prop_assert_eq!(state.is_active(), state.reference_price().is_some());
                if let Some(id) = state.order_id() {
                    prop_assert_eq!(open.len(), 1);
                    prop_assert_eq!(open[0].id.as_str(), id);
                    prop_assert_eq!(Some(open[0].side), state.side());
                }
            }
            Ok(())
        })?;
    }

    /// After every iteration an active order's reference price is never on
    /// the losing side of the market: buys sit at or below it, sells at or
    /// above.
    #[test]
    fn reference_price_tracks_adverse_moves(
        start in 1.0f64..100_000.0f64,
        events in prop::collection::vec(event(), 1..40),
    ) {
        runtime().block_on(async {
            let backend = ScriptedBackend::new();
            let feed = PriceFeed::new();
            feed.on_update(start);
            let (mut engine, _handle) = Engine::new(context(&config(""), backend.clone(), feed.clone()));

            for ev in events {
                if let Event::Price(p) = ev {
                    feed.on_update(p);
                } else if let Event::Fill = ev {
                    backend.fill_all();
                }
                engine.tick().await.unwrap();

                let price = feed.latest().unwrap();
                let state = engine.order_state();
                if let (Some(side), Some(reference)) = (state.side(), state.reference_price()) {
                    match side {
                        OrderSide::Buy => prop_assert!(price >= reference),
                        OrderSide::Sell => prop_assert!(price <= reference),
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Each order placed after a fill takes the opposite side of the filled one.
    #[test]
    fn sides_alternate_across_fills(
        fills in 1usize..12,
        prices in prop::collection::vec(1.0f64..100_000.0f64, 12),
    ) {
        runtime().block_on(async {
            let backend = ScriptedBackend::new();
            let feed = PriceFeed::new();
            feed.on_update(prices[0]);
            let (mut engine, _handle) = Engine::new(context(&config(""), backend.clone(), feed.clone()));

            let mut last_filled: Option<OrderSide> = None;
            for i in 0..fills {
                match engine.tick().await.unwrap() {
                    Tick::Placed { side, .. } => {
                        prop_assert_eq!(side, OrderSide::next_after(last_filled));
                    }
                    other => prop_assert!(false, "expected placement, got {:?}", other),
                }
                feed.on_update(prices[i % prices.len()]);
                backend.fill_all();
                match engine.tick().await.unwrap() {
                    Tick::Filled { side } => last_filled = Some(side),
                    other => prop_assert!(false, "expected fill, got {:?}", other),
                }
            }
            Ok(())
        })?;
    }
}
