//! Assembler - Turns a loaded topology into a runtime
//!
//! Reaction logic cannot live in a RON file, so reactors name a logic and the
//! assembler looks it up in a [`LogicRegistry`]. A logic receives a
//! [`LogicContext`] describing the reactor it should build and returns it
//! type-erased; the assembler then places it on its pump, wires its
//! subscriptions and finally the connections between reactors.

use crate::error::{Error, Result};
use crate::loader::Topology;
use crate::schema::ReactorDef;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::info;
use turbine_core::{EventDispatcher, FailureSink, Pool, QueueConfig, Reactive, Token};
use turbine_pump::Runtime;

/// What a logic factory gets to see while building a reactor
pub struct LogicContext<'a> {
    def: &'a ReactorDef,
    runtime: &'a Runtime,
}

impl<'a> LogicContext<'a> {
    /// Name the built reactor must carry
    pub fn name(&self) -> &Token {
        &self.def.name
    }

    /// Mailbox shape for the reactor's inputs
    pub fn queue(&self) -> QueueConfig {
        self.def.queue
    }

    /// Input that receives the reactor's subscriptions
    pub fn input(&self) -> &str {
        &self.def.input
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        self.runtime.dispatcher()
    }

    /// A pool declared earlier in the topology
    pub fn pool(&self, name: &str) -> Result<Arc<dyn Pool>> {
        Ok(Arc::clone(self.runtime.pool(&Token::new(name))?))
    }

    pub fn param(&self, key: &str) -> Option<i64> {
        self.def.params.get(key).copied()
    }

    pub fn param_or(&self, key: &str, default: i64) -> i64 {
        self.param(key).unwrap_or(default)
    }
}

/// Factory for a kind of reactor
pub trait ReactionLogic: Send + Sync {
    fn build(&self, context: &LogicContext<'_>) -> Result<Arc<dyn Reactive>>;
}

impl<F> ReactionLogic for F
where
    F: Fn(&LogicContext<'_>) -> Result<Arc<dyn Reactive>> + Send + Sync,
{
    fn build(&self, context: &LogicContext<'_>) -> Result<Arc<dyn Reactive>> {
        self(context)
    }
}

/// Named reaction logics
#[derive(Default)]
pub struct LogicRegistry {
    logics: IndexMap<String, Arc<dyn ReactionLogic>>,
}

impl LogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `logic` under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, logic: impl ReactionLogic + 'static) -> &mut Self {
        self.logics.insert(name.into(), Arc::new(logic));
        self
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn ReactionLogic>> {
        self.logics
            .get(name)
            .ok_or_else(|| Error::UnknownLogic(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.logics.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for LogicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.logics.keys()).finish()
    }
}

/// Builds runtimes from topologies
#[derive(Default)]
pub struct Assembler {
    registry: LogicRegistry,
    sink: Option<Arc<dyn FailureSink>>,
}

impl Assembler {
    pub fn new(registry: LogicRegistry) -> Self {
        Self {
            registry,
            sink: None,
        }
    }

    /// Report reaction failures of assembled runtimes to `sink`
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &LogicRegistry {
        &self.registry
    }

    /// Build pools, pumps, reactors and connections in that order
    ///
    /// The returned runtime is not started.
    pub fn assemble(&self, topology: &Topology) -> Result<Runtime> {
        let mut runtime = match &self.sink {
            Some(sink) => Runtime::with_failure_sink(Arc::clone(sink)),
            None => Runtime::new(),
        };

        for def in topology.pools.values() {
            let pool = def.build(|member| runtime.pool(member).ok().cloned())?;
            runtime.add_pool(pool)?;
        }

        for def in topology.pumps.values() {
            runtime.spawn_pump(def.name.clone(), def.strategy, def.config()?)?;
        }

        for def in topology.reactors.values() {
            let reactor = {
                let context = LogicContext {
                    def,
                    runtime: &runtime,
                };
                self.registry.get(&def.logic)?.build(&context)?
            };
            if reactor.name() != &def.name {
                return Err(Error::InvalidSchema(format!(
                    "logic {} built reactor {} for definition {}",
                    def.logic,
                    reactor.name(),
                    def.name
                )));
            }
            runtime.add_reactor(reactor, &def.pump)?;
            for event in &def.subscriptions {
                runtime.subscribe(&def.name, &def.input, event)?;
            }
        }

        for connection in &topology.connections {
            runtime.link(
                &connection.from,
                &connection.output,
                &connection.to,
                &connection.input,
            )?;
        }

        info!(
            site = "assembler",
            pools = topology.pools.len(),
            pumps = topology.pumps.len(),
            reactors = topology.reactors.len(),
            connections = topology.connections.len(),
            "topology assembled"
        );
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConnectionDef, PoolDef, PumpDef};
    use turbine_core::Reactor;
    use turbine_pump::PumpStrategy;

    fn passive(context: &LogicContext<'_>) -> Result<Arc<dyn Reactive>> {
        let reactor = Reactor::builder(context.name().clone(), ())
            .input(context.input(), context.queue())
            .output("out")
            .build(context.dispatcher())?;
        Ok(Arc::new(reactor))
    }

    fn registry() -> LogicRegistry {
        let mut registry = LogicRegistry::new();
        registry.register("passive", passive);
        registry
    }

    fn topology() -> Topology {
        let mut topology = Topology::new();
        topology.add_pump(PumpDef::new("main", 1, PumpStrategy::Polling)).unwrap();
        topology
    }

    #[test]
    fn test_unknown_logic() {
        let mut topology = topology();
        topology
            .add_reactor(ReactorDef::new("r", "missing", "main"))
            .unwrap();
        let result = Assembler::new(registry()).assemble(&topology);
        assert!(matches!(result, Err(Error::UnknownLogic(name)) if name == "missing"));
    }

    #[test]
    fn test_unknown_pump() {
        let mut topology = topology();
        topology
            .add_reactor(ReactorDef::new("r", "passive", "elsewhere"))
            .unwrap();
        let result = Assembler::new(registry()).assemble(&topology);
        assert!(matches!(
            result,
            Err(Error::Pump(turbine_pump::Error::UnknownPump(_)))
        ));
    }

    #[test]
    fn test_zero_capacity_queue_rejected() {
        let mut topology = topology();
        let mut loader = crate::Loader::new();
        loader
            .load_str(r#"(reactors: [(name: "r", logic: "passive", pump: "main", queue: (capacity: 0))])"#)
            .unwrap();
        for def in loader.finish().reactors.into_values() {
            topology.add_reactor(def).unwrap();
        }
        let result = Assembler::new(registry()).assemble(&topology);
        assert!(matches!(
            result,
            Err(Error::Core(turbine_core::Error::ZeroCapacity(name))) if name.as_str() == "r.in"
        ));
    }

    #[test]
    fn test_misnamed_reactor_rejected() {
        fn liar(context: &LogicContext<'_>) -> Result<Arc<dyn Reactive>> {
            let reactor = Reactor::builder("someone-else", ()).build(context.dispatcher())?;
            Ok(Arc::new(reactor))
        }
        let mut registry = registry();
        registry.register("liar", liar);
        let mut topology = topology();
        topology.add_reactor(ReactorDef::new("r", "liar", "main")).unwrap();
        let result = Assembler::new(registry).assemble(&topology);
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_wires_subscriptions_and_connections() {
        let mut topology = topology();
        topology.add_pool(PoolDef::dynamic("ints", 8, 8)).unwrap();
        topology
            .add_reactor(ReactorDef::new("a", "passive", "main").subscribe("numbers"))
            .unwrap();
        topology.add_reactor(ReactorDef::new("b", "passive", "main")).unwrap();
        topology.add_connection(ConnectionDef {
            from: Token::new("a"),
            output: "out".to_string(),
            to: Token::new("b"),
            input: "in".to_string(),
        });

        let runtime = Assembler::new(registry()).assemble(&topology).unwrap();
        let dispatcher = runtime.dispatcher();
        assert_eq!(dispatcher.subscribers(&Token::new("numbers")), vec![Token::new("a.in")]);
        assert_eq!(dispatcher.subscribers(&Token::new("a.out")), vec![Token::new("b.in")]);
        assert_eq!(runtime.placement(&Token::new("b")).unwrap(), &Token::new("main"));
        assert!(runtime.pool(&Token::new("ints")).is_ok());
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_context_exposes_params() {
        let def = ReactorDef::new("r", "passive", "main").with_param("factor", 3);
        let runtime = Runtime::new();
        let context = LogicContext {
            def: &def,
            runtime: &runtime,
        };
        assert_eq!(context.param("factor"), Some(3));
        assert_eq!(context.param_or("offset", 7), 7);
        assert!(matches!(
            context.pool("nope"),
            Err(Error::Pump(turbine_pump::Error::UnknownPool(_)))
        ));
    }
}
