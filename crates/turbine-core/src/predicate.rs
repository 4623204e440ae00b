//! Precondition combinators for reactions
//!
//! Each function returns a closure usable with [`Reaction::when`]. Limits
//! such as counting and rate limiting are wrapped around a precondition
//! explicitly rather than configured on the reaction.
//!
//! [`Reaction::when`]: crate::Reaction::when

use crate::inflow::Message;
use crate::reactor::Ports;
use crate::Token;
use std::time::{Duration, Instant};

/// Holds when the named input has at least one message
pub fn input_not_empty<S: 'static>(
    input: impl Into<Token>,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    let input = input.into();
    move |ports: &Ports, _: &S| {
        ports
            .input(input.as_str())
            .is_ok_and(|port| !port.is_empty())
    }
}

/// Holds when the head of the named input satisfies `test`
pub fn input_head_is<S: 'static>(
    input: impl Into<Token>,
    test: impl Fn(&Message) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    let input = input.into();
    move |ports: &Ports, _: &S| {
        ports
            .input(input.as_str())
            .ok()
            .and_then(|port| port.peek())
            .is_some_and(|head| test(&head))
    }
}

/// Holds when the named output exists and no subscribed mailbox is full
pub fn output_not_full<S: 'static>(
    output: impl Into<Token>,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    let output = output.into();
    move |ports: &Ports, _: &S| {
        ports
            .output(output.as_str())
            .is_ok_and(|port| !port.is_saturated())
    }
}

/// Always holds
pub fn always<S: 'static>() -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    |_: &Ports, _: &S| true
}

/// Holds when the reactor state satisfies `test`
pub fn state_is<S: 'static>(
    test: impl Fn(&S) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    move |_: &Ports, state: &S| test(state)
}

/// Both hold; `b` is not evaluated when `a` fails
pub fn and<S: 'static>(
    mut a: impl FnMut(&Ports, &S) -> bool + Send + 'static,
    mut b: impl FnMut(&Ports, &S) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    move |ports: &Ports, state: &S| a(ports, state) && b(ports, state)
}

/// Either holds; `b` is not evaluated when `a` holds
pub fn or<S: 'static>(
    mut a: impl FnMut(&Ports, &S) -> bool + Send + 'static,
    mut b: impl FnMut(&Ports, &S) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    move |ports: &Ports, state: &S| a(ports, state) || b(ports, state)
}

pub fn not<S: 'static>(
    mut inner: impl FnMut(&Ports, &S) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    move |ports: &Ports, state: &S| !inner(ports, state)
}

/// Holds at most `limit` times, then never again
pub fn at_most<S: 'static>(
    limit: usize,
    mut inner: impl FnMut(&Ports, &S) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    let mut passed = 0usize;
    move |ports: &Ports, state: &S| {
        if passed >= limit || !inner(ports, state) {
            return false;
        }
        passed += 1;
        true
    }
}

/// Holds at most once per `interval`
///
/// `inner` is evaluated first; a failed evaluation does not consume the
/// interval.
pub fn rate_limited<S: 'static>(
    interval: Duration,
    mut inner: impl FnMut(&Ports, &S) -> bool + Send + 'static,
) -> impl FnMut(&Ports, &S) -> bool + Send + 'static {
    let mut last: Option<Instant> = None;
    move |ports: &Ports, state: &S| {
        if !inner(ports, state) {
            return false;
        }
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < interval) {
            return false;
        }
        last = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CrankOutcome, DynamicPool, DynamicPoolConfig, EventDispatcher, OperandStack, Pool,
        QueueConfig, Reaction, Reactive, Reactor,
    };

    fn t(name: &str) -> Token {
        Token::new(name)
    }

    /// Reactor whose single reaction drains one message and records its value
    fn recorder(
        dispatcher: &EventDispatcher,
        when: impl FnMut(&Ports, &Vec<i64>) -> bool + Send + 'static,
    ) -> Reactor<Vec<i64>> {
        let reactor = Reactor::builder("rec", Vec::new())
            .input("in", QueueConfig::default())
            .subscribe("in", "e")
            .reaction(Reaction::new("record").when(when).then(|ports, seen: &mut Vec<i64>| {
                if let Some(message) = ports.input("in")?.pop() {
                    seen.push(message.payload.peek_i64()?);
                }
                Ok(())
            }))
            .build(dispatcher)
            .unwrap();
        reactor.start().unwrap();
        reactor
    }

    fn feed(dispatcher: &EventDispatcher, pool: &DynamicPool, values: &[i64]) {
        let sender = dispatcher.lookup(&t("pub"));
        for v in values {
            sender.send(&t("e"), &pool.alloc_i64(&OperandStack::new(), *v).unwrap());
        }
    }

    fn pool() -> DynamicPool {
        DynamicPool::new("p", DynamicPoolConfig::default())
    }

    #[test]
    fn test_input_head_is() {
        let dispatcher = EventDispatcher::new();
        let pool = pool();
        let reactor = recorder(
            &dispatcher,
            input_head_is("in", |m| m.payload.peek_i64().is_ok_and(|v| v % 2 == 0)),
        );
        feed(&dispatcher, &pool, &[2, 3, 4]);
        assert!(reactor.crank().did_work());
        assert_eq!(reactor.crank(), CrankOutcome::Idle);
        assert_eq!(reactor.inspect(|s| s.clone()), vec![2]);
    }

    #[test]
    fn test_at_most_limits_firings() {
        let dispatcher = EventDispatcher::new();
        let pool = pool();
        let reactor = recorder(&dispatcher, at_most(2, input_not_empty("in")));
        feed(&dispatcher, &pool, &[1, 2, 3]);
        for _ in 0..5 {
            reactor.crank();
        }
        assert_eq!(reactor.inspect(|s| s.clone()), vec![1, 2]);
        assert_eq!(reactor.input("in").unwrap().size(), 1);
    }

    #[test]
    fn test_rate_limited_blocks_within_interval() {
        let dispatcher = EventDispatcher::new();
        let pool = pool();
        let reactor = recorder(
            &dispatcher,
            rate_limited(Duration::from_secs(3600), input_not_empty("in")),
        );
        feed(&dispatcher, &pool, &[7, 8]);
        assert!(reactor.crank().did_work());
        assert_eq!(reactor.crank(), CrankOutcome::Idle);
        assert_eq!(reactor.inspect(|s| s.clone()), vec![7]);
    }

    #[test]
    fn test_rate_limited_zero_interval_passes_through() {
        let dispatcher = EventDispatcher::new();
        let pool = pool();
        let reactor = recorder(
            &dispatcher,
            rate_limited(Duration::ZERO, input_not_empty("in")),
        );
        feed(&dispatcher, &pool, &[1, 2]);
        assert!(reactor.crank().did_work());
        assert!(reactor.crank().did_work());
    }

    #[test]
    fn test_boolean_combinators() {
        let dispatcher = EventDispatcher::new();
        let pool = pool();
        let reactor = recorder(
            &dispatcher,
            and(
                or(state_is(|s: &Vec<i64>| s.is_empty()), not(always::<Vec<i64>>())),
                input_not_empty("in"),
            ),
        );
        feed(&dispatcher, &pool, &[1, 2]);
        assert!(reactor.crank().did_work());
        // State is no longer empty and not(always) never holds
        assert_eq!(reactor.crank(), CrankOutcome::Idle);
    }

    #[test]
    fn test_output_not_full() {
        let dispatcher = EventDispatcher::new();
        let downstream = Reactor::builder("down", ())
            .input("in", QueueConfig::new(crate::QueueKind::Array, 1))
            .build(&dispatcher)
            .unwrap();
        let producer = Reactor::builder("up", 0u32)
            .output("out")
            .reaction(
                Reaction::new("emit")
                    .when(output_not_full("out"))
                    .then(|ports, sent: &mut u32| {
                        ports.output("out")?.send(&OperandStack::new());
                        *sent += 1;
                        Ok(())
                    }),
            )
            .build(&dispatcher)
            .unwrap();
        dispatcher
            .register(
                downstream.input("in").unwrap().subscriber(),
                producer.output("out").unwrap().event(),
            )
            .unwrap();
        producer.start().unwrap();

        assert!(producer.crank().did_work());
        assert_eq!(producer.crank(), CrankOutcome::Idle);
        assert_eq!(producer.inspect(|n| *n), 1);
    }
}
