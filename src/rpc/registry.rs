//! Method registry and version resolver.
//!
//! # Resolution
//! ```text
//! dated entries (sorted by date)          preview entries
//!   2019-01-01: foo=h1                      bar=h4
//!   2019-02-02: foo=tombstone, baz=h2          │
//!   2019-03-03: foo=h3                         ▼
//!        │                               preview table {bar}
//!        ▼
//! 2019-01-01 {foo:h1}
//! 2019-02-02 {baz:h2}            (copy previous, apply entries)
//! 2019-03-03 {foo:h3, baz:h2}
//! latest  == 2019-03-03
//! ```
//!
//! # Design Decisions
//! - Tables are re-derived from scratch after every registration, so the
//!   result never depends on registration order across versions
//! - Registration takes `&mut self`; serving shares the frozen registry
//!   behind an `Arc` and never locks
//! - Full recomputation is O(versions × methods) per call, fine at startup

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::rpc::handler::Handler;
use crate::rpc::schema::SchemaError;
use crate::rpc::version::{MethodName, ParseError, ReleaseDate, Version};

/// Configuration errors detected while registering routes.
///
/// These indicate a programming mistake and must stop startup.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("method {0} cannot be registered under \"latest\"; it is resolved, not declared")]
    LatestVersion(MethodName),

    #[error("preview method {0} cannot be withdrawn")]
    PreviewTombstone(MethodName),

    #[error("method {method} is already registered at version {version}")]
    Duplicate { method: MethodName, version: Version },

    #[error("authentication middleware must be configured before registering {method}@{version}")]
    AuthNotConfigured { method: MethodName, version: Version },

    #[error("invalid request schema for {method}@{version}: {source}")]
    Schema {
        method: MethodName,
        version: Version,
        #[source]
        source: SchemaError,
    },
}

/// A registered method implementation.
pub struct Route {
    method: MethodName,
    version: Version,
    handler: Handler,
}

impl Route {
    pub fn method(&self) -> &MethodName {
        &self.method
    }

    /// Version the route was registered under.
    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Effective method → route mapping for one version.
#[derive(Debug)]
pub struct ResolvedTable {
    version: Version,
    methods: BTreeMap<MethodName, Arc<Route>>,
}

impl ResolvedTable {
    /// Concrete version this table was resolved for. For the `latest` table
    /// this is the highest dated version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn get(&self, method: &MethodName) -> Option<&Arc<Route>> {
        self.methods.get(method)
    }

    /// Method names in ascending order.
    pub fn methods(&self) -> impl Iterator<Item = &MethodName> {
        self.methods.keys()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Per-version registrations and their resolved tables.
#[derive(Default)]
pub struct Registry {
    /// `None` marks a tombstone.
    dated: BTreeMap<ReleaseDate, BTreeMap<MethodName, Option<Arc<Route>>>>,
    preview: BTreeMap<MethodName, Arc<Route>>,
    tables: HashMap<Version, Arc<ResolvedTable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` at `version`, or withdraw the method
    /// from `version` onwards when `handler` is `None`.
    pub fn insert(
        &mut self,
        version: Version,
        method: MethodName,
        handler: Option<Handler>,
    ) -> Result<(), RegistrationError> {
        match version {
            Version::Latest => return Err(RegistrationError::LatestVersion(method)),
            Version::Preview => {
                let Some(handler) = handler else {
                    return Err(RegistrationError::PreviewTombstone(method));
                };
                if self.preview.contains_key(&method) {
                    return Err(RegistrationError::Duplicate { method, version });
                }
                let route = Arc::new(Route {
                    method: method.clone(),
                    version,
                    handler,
                });
                self.preview.insert(method, route);
            }
            Version::Dated(ref date) => {
                let entries = self.dated.entry(date.clone()).or_default();
                if entries.contains_key(&method) {
                    return Err(RegistrationError::Duplicate { method, version });
                }
                let route = handler.map(|handler| {
                    Arc::new(Route {
                        method: method.clone(),
                        version: version.clone(),
                        handler,
                    })
                });
                entries.insert(method, route);
            }
        }
        self.rebuild();
        Ok(())
    }

    /// Resolved table for a requested version, if the version is known.
    pub fn resolve(&self, version: &Version) -> Option<&Arc<ResolvedTable>> {
        self.tables.get(version)
    }

    /// Dated versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = &ReleaseDate> {
        self.dated.keys()
    }

    /// Highest dated version, the target of `latest`.
    pub fn latest(&self) -> Option<&ReleaseDate> {
        self.dated.keys().next_back()
    }

    /// Wrap every registered handler, then re-resolve.
    pub(crate) fn map_handlers(&mut self, f: impl Fn(Handler) -> Handler) {
        let rewrap = |route: &Arc<Route>| {
            Arc::new(Route {
                method: route.method.clone(),
                version: route.version.clone(),
                handler: f(route.handler.clone()),
            })
        };
        for entries in self.dated.values_mut() {
            for entry in entries.values_mut() {
                if let Some(route) = entry {
                    *route = rewrap(route);
                }
            }
        }
        for route in self.preview.values_mut() {
            *route = rewrap(route);
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let mut tables = HashMap::new();
        let mut current: BTreeMap<MethodName, Arc<Route>> = BTreeMap::new();
        let mut highest = None;

        for (date, entries) in &self.dated {
            for (method, entry) in entries {
                match entry {
                    Some(route) => {
                        current.insert(method.clone(), route.clone());
                    }
                    None => {
                        current.remove(method);
                    }
                }
            }
            let table = Arc::new(ResolvedTable {
                version: Version::Dated(date.clone()),
                methods: current.clone(),
            });
            tables.insert(Version::Dated(date.clone()), table.clone());
            highest = Some(table);
        }

        if let Some(table) = highest {
            tables.insert(Version::Latest, table);
        }

        if !self.preview.is_empty() {
            tables.insert(
                Version::Preview,
                Arc::new(ResolvedTable {
                    version: Version::Preview,
                    methods: self.preview.clone(),
                }),
            );
        }

        self.tables = tables;
    }
}
