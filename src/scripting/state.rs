//! Script engine state
//!
//! One interpreter per game session. It loads scripts through the virtual
//! filesystem, injects the synchronized random stream, looks up hooks and
//! delegates coroutine and environment persistence.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::frontend;
use crate::middle::Proto;
use crate::runtime::gc::CollectStats;
use crate::runtime::table::Table;
use crate::runtime::value::{NativeRef, ObjId, Value};
use crate::scripting::collaborators::VirtualFilesystem;
use crate::scripting::coroutine::{self, CoroutineHandle, CoroutineStatus};
use crate::scripting::errors::{GameDataError, ScriptError};
use crate::scripting::objects;
use crate::scripting::persistence::{self, SkipList, SKIPLIST};
use crate::util::config::ScriptingConfig;
use crate::vm::{HostServices, NativeCtx, NativeReturn, VMConfig, VMResult, VM};

/// Prefix of paths resolved against the map's filesystem
pub const MAP_PREFIX: &str = "map:";

/// `math.random` drawing from the simulation's synchronized stream
const SYNCHRONIZED_RANDOM: NativeRef = NativeRef::new("math.random", native_synchronized_random);

fn native_synchronized_random(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let draw = ctx.host.random_u32();
    Ok(NativeReturn::one(crate::std::math::random_value(ctx, &args, draw)?))
}

/// Resolves and compiles script files, shared with `include`
pub struct ScriptLoader {
    global_fs: Box<dyn VirtualFilesystem>,
    map_fs: Option<Box<dyn VirtualFilesystem>>,
    cache: HashMap<String, Arc<Proto>>,
}

impl ScriptLoader {
    fn new(global_fs: Box<dyn VirtualFilesystem>) -> Self {
        Self {
            global_fs,
            map_fs: None,
            cache: HashMap::new(),
        }
    }

    /// Compiled chunk for `path`, cached by resolved path
    pub fn load(
        &mut self,
        path: &str,
    ) -> Result<Arc<Proto>, ScriptError> {
        if let Some(proto) = self.cache.get(path) {
            return Ok(proto.clone());
        }
        let (fs, resolved) = match path.strip_prefix(MAP_PREFIX) {
            Some(rest) => match &self.map_fs {
                Some(fs) => (fs.as_ref(), rest),
                None => return Err(ScriptError::MissingScript(path.to_string())),
            },
            None => (self.global_fs.as_ref(), path),
        };
        if !fs.file_exists(resolved) || fs.is_directory(resolved) {
            return Err(ScriptError::MissingScript(path.to_string()));
        }
        let bytes = fs
            .load(resolved)
            .map_err(|e| ScriptError::MissingScript(format!("{}: {}", path, e)))?;
        let source = String::from_utf8(bytes)
            .map_err(|_| ScriptError::Corrupt(format!("{} is not valid UTF-8", path)))?;
        let proto = frontend::compile(&source, path)?;
        debug!(path, instructions = proto.code.len(), "script compiled");
        self.cache.insert(path.to_string(), proto.clone());
        Ok(proto)
    }
}

/// Game services plus script loading, as natives see them
pub struct EngineHost<'a> {
    pub inner: &'a mut dyn HostServices,
    pub loader: &'a mut ScriptLoader,
}

impl HostServices for EngineHost<'_> {
    fn random_u32(&mut self) -> u32 {
        self.inner.random_u32()
    }

    fn gametime(&self) -> u64 {
        self.inner.gametime()
    }

    fn player_numbers(&self) -> Vec<u8> {
        self.inner.player_numbers()
    }

    fn send_message(
        &mut self,
        player: u8,
        title: &str,
        body: &str,
    ) -> Result<(), String> {
        self.inner.send_message(player, title, body)
    }

    fn load_chunk(
        &mut self,
        path: &str,
    ) -> Result<Arc<Proto>, String> {
        self.loader.load(path).map_err(|e| e.to_string())
    }
}

/// 脚本引擎状态
pub struct ScriptEngineState {
    vm: VM,
    loader: ScriptLoader,
    skiplist: &'static SkipList,
}

impl ScriptEngineState {
    /// Interpreter with every library installed and the registry created
    pub fn new(
        config: &ScriptingConfig,
        global_fs: Box<dyn VirtualFilesystem>,
    ) -> Result<Self, ScriptError> {
        let mut vm = VM::new_with_config(VMConfig::from(config));
        crate::std::install(&mut vm)?;
        for module in crate::scripting::modules() {
            crate::std::install_module(&mut vm, module.as_ref())?;
        }
        objects::register_types(&mut vm.types);

        match vm.global("math")? {
            Value::Table(math) => {
                let table = vm.heap.table_mut(math)?;
                table.set_str("random", Value::Native(SYNCHRONIZED_RANDOM));
                table.set_str("randomseed", Value::Nil);
            }
            _ => return Err(ScriptError::Corrupt("math library missing".to_string())),
        }
        coroutine::registry(&mut vm)?;
        debug!(types = vm.types.len(), "script engine ready");

        Ok(Self {
            vm,
            loader: ScriptLoader::new(global_fs),
            skiplist: &SKIPLIST,
        })
    }

    pub fn vm(&self) -> &VM {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut VM {
        &mut self.vm
    }

    /// Use a different exclusion list for persistence
    pub fn set_skiplist(
        &mut self,
        skiplist: &'static SkipList,
    ) {
        self.skiplist = skiplist;
    }

    /// Filesystem `map:` paths resolve against
    pub fn set_map_filesystem(
        &mut self,
        fs: Option<Box<dyn VirtualFilesystem>>,
    ) {
        self.loader.map_fs = fs;
        self.loader.cache.retain(|path, _| !path.starts_with(MAP_PREFIX));
    }

    /// Run a script file to completion and return its result table
    pub fn run_script(
        &mut self,
        path: &str,
        host: &mut dyn HostServices,
    ) -> Result<ObjId, ScriptError> {
        info!(path, "running script");
        let proto = self.loader.load(path)?;
        let function = self.vm.load(proto)?;
        let mut host = EngineHost {
            inner: host,
            loader: &mut self.loader,
        };
        let results = self.vm.call(function, Vec::new(), &mut host)?;
        match results.into_iter().next() {
            None | Some(Value::Nil) => Ok(self.vm.heap.alloc_table(Table::new())),
            Some(Value::Table(id)) => Ok(id),
            Some(other) => Err(ScriptError::NotATable {
                path: path.to_string(),
                found: other.type_name(),
            }),
        }
    }

    /// `hooks[name]` when both exist and the entry is non-nil
    pub fn get_hook(
        &self,
        name: &str,
    ) -> Option<Value> {
        let hooks = match self.vm.global("hooks") {
            Ok(Value::Table(id)) => id,
            _ => return None,
        };
        let hook = self.vm.heap.table(hooks).ok()?.get_str(name);
        (!hook.is_nil()).then_some(hook)
    }

    pub fn new_coroutine(
        &mut self,
        callable: Value,
    ) -> Result<CoroutineHandle, ScriptError> {
        CoroutineHandle::create(&mut self.vm, callable)
    }

    /// Resume `handle` with `include` resolving through this engine
    pub fn resume(
        &mut self,
        handle: &mut CoroutineHandle,
        host: &mut dyn HostServices,
    ) -> Result<CoroutineStatus, ScriptError> {
        let mut host = EngineHost {
            inner: host,
            loader: &mut self.loader,
        };
        handle.resume(&mut self.vm, &mut host)
    }

    // ------------------------------------------------------------------
    // Textdomains
    // ------------------------------------------------------------------

    pub fn push_textdomain(
        &mut self,
        domain: &str,
    ) {
        self.vm.textdomains.push(domain.to_string());
    }

    pub fn pop_textdomain(&mut self) -> Option<String> {
        self.vm.textdomains.pop()
    }

    pub fn current_textdomain(&self) -> Option<&str> {
        self.vm.textdomains.last().map(String::as_str)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn collect_garbage(&mut self) -> CollectStats {
        let stats = self.vm.collect_garbage(&[]);
        debug!(live = stats.live, freed = stats.freed, "garbage collected");
        stats
    }

    /// Dump the global environment; returns the bytes written
    pub fn write_global_env(
        &mut self,
        out: &mut Vec<u8>,
    ) -> Result<usize, GameDataError> {
        self.collect_garbage();
        let written = persistence::persist(&self.vm, self.skiplist, out)?;
        self.collect_garbage();
        debug!(bytes = written, "environment persisted");
        Ok(written)
    }

    /// Replace the global environment with a dump
    ///
    /// On failure the current environment stays installed.
    pub fn read_global_env(
        &mut self,
        data: &[u8],
    ) -> Result<(), GameDataError> {
        let root = persistence::unpersist(&mut self.vm, self.skiplist, data)?;
        self.vm.set_globals(root)?;
        self.collect_garbage();
        debug!(bytes = data.len(), "environment restored");
        Ok(())
    }

    pub fn write_coroutine(
        &self,
        handle: &CoroutineHandle,
        out: &mut Vec<u8>,
    ) -> Result<(), GameDataError> {
        handle.write(out)
    }

    pub fn read_coroutine(
        &self,
        input: &mut &[u8],
    ) -> Result<CoroutineHandle, GameDataError> {
        CoroutineHandle::read(input, &self.vm)
    }
}
