//! RON topology loader

use crate::error::{Error, Result};
use crate::schema::{ConnectionDef, PoolDef, PumpDef, ReactorDef};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;
use turbine_core::Token;

/// Loaded runtime topology
///
/// Definitions keep the order they were loaded in; composite pools may only
/// name pools that come before them.
#[derive(Debug, Default)]
pub struct Topology {
    /// Pool definitions by name
    pub pools: IndexMap<Token, PoolDef>,
    /// Pump definitions by name
    pub pumps: IndexMap<Token, PumpDef>,
    /// Reactor definitions by name
    pub reactors: IndexMap<Token, ReactorDef>,
    /// Routes between reactor ports
    pub connections: Vec<ConnectionDef>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_pool(&self, name: &Token) -> Option<&PoolDef> {
        self.pools.get(name)
    }

    pub fn get_pump(&self, name: &Token) -> Option<&PumpDef> {
        self.pumps.get(name)
    }

    pub fn get_reactor(&self, name: &Token) -> Option<&ReactorDef> {
        self.reactors.get(name)
    }

    pub fn add_pool(&mut self, def: PoolDef) -> Result<()> {
        insert_unique(&mut self.pools, def.name.clone(), def)
    }

    pub fn add_pump(&mut self, def: PumpDef) -> Result<()> {
        insert_unique(&mut self.pumps, def.name.clone(), def)
    }

    pub fn add_reactor(&mut self, def: ReactorDef) -> Result<()> {
        insert_unique(&mut self.reactors, def.name.clone(), def)
    }

    pub fn add_connection(&mut self, def: ConnectionDef) {
        self.connections.push(def);
    }
}

fn insert_unique<T>(map: &mut IndexMap<Token, T>, name: Token, def: T) -> Result<()> {
    if map.contains_key(&name) {
        return Err(Error::DuplicateDefinition(name.to_string()));
    }
    map.insert(name, def);
    Ok(())
}

/// Shape of a topology file; every section is optional
#[derive(Debug, Default, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    pools: Vec<PoolDef>,
    #[serde(default)]
    pumps: Vec<PumpDef>,
    #[serde(default)]
    reactors: Vec<ReactorDef>,
    #[serde(default)]
    connections: Vec<ConnectionDef>,
}

/// Loader for RON topology files
pub struct Loader {
    topology: Topology,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            topology: Topology::new(),
        }
    }

    /// Load a topology document from a RON string
    ///
    /// Definitions merge into what was loaded before; a name defined twice is
    /// an error.
    pub fn load_str(&mut self, content: &str) -> Result<()> {
        let file: TopologyFile = ron::from_str(content)?;
        debug!(
            site = "loader",
            pools = file.pools.len(),
            pumps = file.pumps.len(),
            reactors = file.reactors.len(),
            connections = file.connections.len(),
            "topology document parsed"
        );
        for pool in file.pools {
            self.topology.add_pool(pool)?;
        }
        for pump in file.pumps {
            self.topology.add_pump(pump)?;
        }
        for reactor in file.reactors {
            self.topology.add_reactor(reactor)?;
        }
        for connection in file.connections {
            self.topology.add_connection(connection);
        }
        Ok(())
    }

    /// Load a single RON file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        debug!(site = "loader", path = %path.display(), "loading topology file");
        self.load_str(&content)
    }

    /// Load all RON files from a directory, in file name order
    pub fn load_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if !path.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {:?}", path),
            )));
        }

        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for file_path in entries {
            if file_path.extension().map(|e| e == "ron").unwrap_or(false) {
                self.load_file(&file_path)?;
            } else if file_path.is_dir() {
                self.load_directory(&file_path)?;
            }
        }

        Ok(())
    }

    /// Finish loading and return the topology
    pub fn finish(self) -> Topology {
        self.topology
    }

    /// Get the current topology (for inspection during loading)
    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
