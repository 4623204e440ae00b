//! Cross-module scenarios: routing, pooled payloads and cranking together

use std::sync::Arc;
use turbine_core::predicate::input_not_empty;
use turbine_core::{
    CompositePool, CrankOutcome, DynamicPool, DynamicPoolConfig, EventDispatcher, FixedPool,
    FixedPoolConfig, OperandStack, OverflowPolicy, Pool, QueueConfig, QueueKind, Reaction,
    Reactive, Reactor, Token,
};

fn doubler(dispatcher: &EventDispatcher, pool: Arc<dyn Pool>) -> Reactor<()> {
    Reactor::builder("a", ())
        .input("in", QueueConfig::default())
        .output("out")
        .subscribe("in", "numbers")
        .reaction(
            Reaction::new("double")
                .when(input_not_empty("in"))
                .then(move |ports, _| {
                    let Some(message) = ports.input("in")?.pop() else {
                        return Ok(());
                    };
                    let value = message.payload.peek_i64()?;
                    let doubled = pool.alloc_i64(&OperandStack::new(), value * 2)?;
                    ports.output("out")?.send(&doubled);
                    Ok(())
                }),
        )
        .build(dispatcher)
        .unwrap()
}

fn sink(dispatcher: &EventDispatcher) -> Reactor<Vec<i64>> {
    Reactor::builder("b", Vec::new())
        .input("in", QueueConfig::default())
        .reaction(
            Reaction::new("collect")
                .when(input_not_empty("in"))
                .then(|ports, seen: &mut Vec<i64>| {
                    if let Some(message) = ports.input("in")?.pop() {
                        seen.push(message.payload.peek_i64()?);
                    }
                    Ok(())
                }),
        )
        .build(dispatcher)
        .unwrap()
}

#[test]
fn test_doubling_edge_delivers_one_message() {
    let pool: Arc<dyn Pool> = Arc::new(DynamicPool::new("ints", DynamicPoolConfig::new(8, 8, 1024)));
    let dispatcher = EventDispatcher::new();
    let a = doubler(&dispatcher, Arc::clone(&pool));
    let b = sink(&dispatcher);
    dispatcher
        .register(
            b.input("in").unwrap().subscriber(),
            a.output("out").unwrap().event(),
        )
        .unwrap();
    a.start().unwrap();
    b.start().unwrap();

    let five = pool.alloc_i64(&OperandStack::new(), 5).unwrap();
    dispatcher
        .lookup(&Token::new("driver"))
        .send(&Token::new("numbers"), &five);
    drop(five);

    assert_eq!(a.crank(), CrankOutcome::Reacted(Token::new("double")));

    let inbox = b.input("in").unwrap();
    assert_eq!(inbox.size(), 1);
    let message = inbox.peek().unwrap();
    assert_eq!(message.event, Token::new("a.out"));
    assert_eq!(message.payload.peek_i64().unwrap(), 10);
    drop(message);

    assert!(b.crank().did_work());
    assert_eq!(b.inspect(|seen| seen.clone()), vec![10]);
    assert_eq!(pool.stats().outstanding_allocations, 0);
}

#[test]
fn test_crank_progress_matches_message_count() {
    let pool: Arc<dyn Pool> = Arc::new(DynamicPool::new("ints", DynamicPoolConfig::default()));
    let dispatcher = EventDispatcher::new();
    let b = Reactor::builder("b", Vec::new())
        .input("in", QueueConfig::new(QueueKind::Linked, 64))
        .subscribe("in", "numbers")
        .reaction(
            Reaction::new("collect")
                .when(input_not_empty("in"))
                .then(|ports, seen: &mut Vec<i64>| {
                    if let Some(message) = ports.input("in")?.pop() {
                        seen.push(message.payload.peek_i64()?);
                    }
                    Ok(())
                }),
        )
        .build(&dispatcher)
        .unwrap();
    b.start().unwrap();

    let sender = dispatcher.lookup(&Token::new("driver"));
    for v in 0..17 {
        sender.send(
            &Token::new("numbers"),
            &pool.alloc_i64(&OperandStack::new(), v).unwrap(),
        );
    }

    let reacted = (0..40).filter(|_| b.crank().did_work()).count();
    assert_eq!(reacted, 17);
    assert_eq!(b.inspect(|seen| seen.clone()), (0..17).collect::<Vec<_>>());
}

#[test]
fn test_composite_pool_backs_fan_out() {
    let small: Arc<dyn Pool> = Arc::new(FixedPool::new("small", FixedPoolConfig::new(8, 2)));
    let overflow: Arc<dyn Pool> = Arc::new(DynamicPool::new("overflow", DynamicPoolConfig::new(1, 64, 4096)));
    let pool = CompositePool::new("composite", vec![small, overflow]);

    let dispatcher = EventDispatcher::new();
    let boxes: Vec<_> = (0..3)
        .map(|i| {
            let name = format!("s{}", i);
            let queue = QueueConfig::new(QueueKind::Array, 2)
                .with_overflow(OverflowPolicy::DropOldest)
                .build(&Token::new(&name))
                .unwrap();
            dispatcher.bind(name.as_str(), queue.clone()).unwrap();
            dispatcher
                .register(&Token::new(&name), &Token::new("e"))
                .unwrap();
            queue
        })
        .collect();

    let sender = dispatcher.lookup(&Token::new("pub"));
    for v in 0..5 {
        let stack = pool.alloc_i64(&OperandStack::new(), v).unwrap();
        sender.send(&Token::new("e"), &stack);
    }

    // Every mailbox kept the last two values; three allocations were evicted
    for queue in &boxes {
        let values: Vec<i64> = std::iter::from_fn(|| queue.pop())
            .map(|m| m.payload.peek_i64().unwrap())
            .collect();
        assert_eq!(values, vec![3, 4]);
    }
    assert_eq!(pool.stats().outstanding_allocations, 0);
}
