//! Object Registry — the lookup table behind the config-driven factory.
//!
//! Modules register their constructors and plain values under dotted paths
//! at startup. Descriptors then select and build objects by name.

use crate::error::{CcmlError, ResolutionError, Result};
use crate::factory::descriptor::{DottedPath, ObjectDescriptor, Params, from_params};
use crate::identifiers::RunContext;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// An owned object built by a constructor.
pub type Instance = Box<dyn Any + Send + Sync>;

/// A registered plain value (function pointer, constant, shared object).
pub type SharedValue = Arc<dyn Any + Send + Sync>;

type BuildFn = dyn Fn(&Params) -> Result<Instance> + Send + Sync;

/// A registered constructor taking keyword parameters.
#[derive(Clone)]
pub struct Constructor {
    path: String,
    build: Arc<BuildFn>,
}

impl Constructor {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call(&self, params: &Params) -> Result<Instance> {
        (self.build)(params)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor").field("path", &self.path).finish()
    }
}

/// A named member of a registered module.
#[derive(Clone)]
pub enum Member {
    Constructor(Constructor),
    Value(SharedValue),
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructor(c) => c.fmt(f),
            Self::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// Result of resolving a descriptor.
pub enum Resolved {
    /// Built by calling a constructor.
    Instance(Instance),
    /// Returned uninvoked by a `function` lookup.
    Member(Member),
}

impl Resolved {
    pub fn is_instance(&self) -> bool {
        matches!(self, Self::Instance(_))
    }

    /// Borrow the built instance or looked-up value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Instance(obj) => obj.downcast_ref(),
            Self::Member(Member::Value(value)) => value.downcast_ref(),
            Self::Member(Member::Constructor(_)) => None,
        }
    }

    /// Take ownership of a built instance as `T`. Returns `self` back on mismatch.
    pub fn downcast<T: Any>(self) -> std::result::Result<Box<T>, Self> {
        match self {
            Self::Instance(obj) => obj.downcast::<T>().map_err(Self::Instance),
            other => Err(other),
        }
    }

    /// The looked-up constructor, for `function` descriptors naming a type.
    pub fn as_constructor(&self) -> Option<&Constructor> {
        match self {
            Self::Member(Member::Constructor(c)) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance(..)"),
            Self::Member(m) => f.debug_tuple("Member").field(m).finish(),
        }
    }
}

#[derive(Default)]
struct Module {
    members: HashMap<String, Member>,
    origin: Option<PathBuf>,
}

/// Registry of constructible types and named values, grouped by module.
#[derive(Default)]
pub struct ObjectRegistry {
    modules: HashMap<String, Module>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// A registry pre-populated with the `ccml.*` built-ins.
    pub fn with_builtins(ctx: &RunContext) -> Result<Self> {
        let mut registry = Self::new();
        crate::register_builtins(&mut registry, ctx)?;
        Ok(registry)
    }

    fn insert(&mut self, path: &str, member: Member) -> Result<()> {
        let dotted = DottedPath::parse(path)?;
        let module = self.modules.entry(dotted.module.to_string()).or_default();
        if module.members.contains_key(dotted.member) {
            return Err(CcmlError::config(format!("{path} is already registered")));
        }
        debug!(path, "Registering member");
        module.members.insert(dotted.member.to_string(), member);
        Ok(())
    }

    /// Register a constructor under `path`.
    pub fn register_constructor<F>(&mut self, path: &str, build: F) -> Result<()>
    where
        F: Fn(&Params) -> Result<Instance> + Send + Sync + 'static,
    {
        let constructor = Constructor {
            path: path.to_string(),
            build: Arc::new(build),
        };
        self.insert(path, Member::Constructor(constructor))
    }

    /// Register `T` built by deserializing its keyword parameters.
    pub fn register_deserializable<T>(&mut self, path: &str) -> Result<()>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let owned = path.to_string();
        self.register_constructor(path, move |params| {
            let obj: T = from_params(&owned, params)?;
            Ok(Box::new(obj) as Instance)
        })
    }

    /// Register a plain value under `path`. `function` lookups return it as is.
    pub fn register_value<T: Any + Send + Sync>(&mut self, path: &str, value: T) -> Result<()> {
        self.insert(path, Member::Value(Arc::new(value)))
    }

    /// Record the source directory a module comes from.
    pub fn set_module_origin(&mut self, module: &str, dir: impl Into<PathBuf>) {
        self.modules.entry(module.to_string()).or_default().origin = Some(dir.into());
    }

    /// Source directory of a registered module, if one was recorded.
    pub fn module_origin(&self, module: &str) -> Result<Option<&Path>> {
        self.modules
            .get(module)
            .map(|m| m.origin.as_deref())
            .ok_or_else(|| {
                ResolutionError::ModuleNotFound {
                    module: module.to_string(),
                    path: module.to_string(),
                }
                .into()
            })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_ok()
    }

    /// Registered module names, sorted.
    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Fully qualified member paths of a module, sorted.
    pub fn member_paths(&self, module: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .modules
            .get(module)
            .map(|m| m.members.keys().map(|k| format!("{module}.{k}")).collect())
            .unwrap_or_default();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.modules.values().map(|m| m.members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the member registered at a dotted path.
    pub fn lookup(&self, path: &str) -> Result<&Member> {
        let dotted = DottedPath::parse(path)?;
        let module = self
            .modules
            .get(dotted.module)
            .ok_or_else(|| ResolutionError::ModuleNotFound {
                module: dotted.module.to_string(),
                path: path.to_string(),
            })?;
        module.members.get(dotted.member).ok_or_else(|| {
            ResolutionError::AttributeNotFound {
                module: dotted.module.to_string(),
                member: dotted.member.to_string(),
                path: path.to_string(),
            }
            .into()
        })
    }

    /// Build or look up the object a descriptor names.
    pub fn resolve(&self, descriptor: &ObjectDescriptor) -> Result<Resolved> {
        match descriptor {
            ObjectDescriptor::Construct { path, params } => match self.lookup(path)? {
                Member::Constructor(constructor) => {
                    debug!(path = %path, params = params.len(), "Constructing object");
                    constructor.call(params).map(Resolved::Instance)
                }
                Member::Value(_) => Err(ResolutionError::NotConstructible { path: path.clone() }.into()),
            },
            ObjectDescriptor::Lookup { path } => {
                debug!(path = %path, "Looking up member");
                Ok(Resolved::Member(self.lookup(path)?.clone()))
            }
        }
    }

    /// Parse a configuration mapping as a descriptor and resolve it.
    pub fn resolve_value(&self, value: &Value) -> Result<Resolved> {
        self.resolve(&ObjectDescriptor::from_value(value)?)
    }
}
