//! Asset access and the model registry: skeletons shared by name, mesh groups shared by file,
//! and loaded models cached by name, failures included.

use crate::config::LoadContext;
use crate::loaders::{commit_anim, commit_mesh};
use crate::render::{ReleaseQueue, SkinningBackend};
use crate::{Adjustments, AnimNames, AnimSpec, Error, MeshGroup, ModelFormat, SkelModel, Skeleton};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

/// Where model files come from. Paths use `/` separators and are relative to the models root.
pub trait AssetSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, Error>;
}

/// Reads files below a root directory.
#[derive(Clone, Debug)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for FsSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, Error> {
        std::fs::read(self.root.join(path)).map_err(|e| {
            log::debug!("{}: {e}", self.root.join(path).display());
            Error::AssetMissing {
                path: path.to_string(),
            }
        })
    }
}

/// Files held in memory, keyed by path.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), data.into());
    }

    pub fn with(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }
}

impl AssetSource for MemorySource {
    fn read(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::AssetMissing {
                path: path.to_string(),
            })
    }
}

/// Joins a model directory and a file name.
pub(crate) fn join_path(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), file)
    }
}

/// Loaded skeletons and mesh groups, held weakly so they go away with the last model using them.
#[derive(Debug, Default)]
pub struct AssetCache {
    skeletons: HashMap<String, Weak<RefCell<Skeleton>>>,
    groups: HashMap<String, Weak<RefCell<MeshGroup>>>,
    pub anim_names: AnimNames,
    pub release: ReleaseQueue,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The skeleton registered under `name`, created empty when new.
    pub fn share_skeleton(&mut self, name: &str) -> Rc<RefCell<Skeleton>> {
        if let Some(skel) = self.skeletons.get(name).and_then(Weak::upgrade) {
            return skel;
        }
        let skel = Rc::new(RefCell::new(Skeleton::named(name)));
        self.skeletons.insert(name.to_string(), Rc::downgrade(&skel));
        skel
    }

    /// The mesh group loaded from `path`, loading it on first use. A group that fails to load
    /// is not registered and leaves any shared skeleton unchanged.
    pub fn share_group(
        &mut self,
        source: &dyn AssetSource,
        format: ModelFormat,
        path: &str,
        skel_name: Option<&str>,
        smooth: f32,
    ) -> Result<Rc<RefCell<MeshGroup>>, Error> {
        if let Some(group) = self.groups.get(path).and_then(Weak::upgrade) {
            return Ok(group);
        }
        let data = source.read(path)?;
        let skel = match skel_name {
            Some(name) => self.share_skeleton(name),
            None => Rc::new(RefCell::new(Skeleton::new())),
        };
        let import = format
            .loader(smooth)
            .load_mesh(path, &data, &skel.borrow())?;
        let mut group = MeshGroup::new(path, skel, self.release.clone());
        commit_mesh(&mut group, import);
        log::debug!("loaded {} meshes from {path}", group.meshes.len());
        let group = Rc::new(RefCell::new(group));
        self.groups.insert(path.to_string(), Rc::downgrade(&group));
        Ok(group)
    }

    /// Resolves an animation file for `group`'s skeleton, loading it when its clips are not in
    /// the store yet. IQM files may name one clip as `file.iqm:clip`; otherwise the file's first
    /// clip is returned.
    pub fn load_anim(
        &mut self,
        source: &dyn AssetSource,
        format: ModelFormat,
        group: &RefCell<MeshGroup>,
        path: &str,
        adjustments: &Adjustments,
    ) -> Result<AnimSpec, Error> {
        let skel = Rc::clone(&group.borrow().skel);
        let (file, named_clip) = match path.split_once(':') {
            Some((file, _)) if format == ModelFormat::Iqm => (file, true),
            _ => (path, false),
        };
        let lookup = |s: &Skeleton| s.find_anim(path, !named_clip).cloned();
        if let Some(spec) = lookup(&skel.borrow()) {
            return Ok(spec);
        }
        let data = source.read(file)?;
        let import = format
            .loader(0.0)
            .load_anim(file, &data, &skel.borrow(), adjustments)?;
        let specs = commit_anim(&mut skel.borrow_mut(), import);
        log::debug!("loaded {} animations from {file}", specs.len());
        let found = lookup(&skel.borrow());
        found.ok_or_else(|| Error::UnknownAnimation {
            name: path.to_string(),
        })
    }
}

/// Loaded models by name. Each name is tried as MD5, SMD, then IQM.
pub struct ModelRegistry {
    source: Box<dyn AssetSource>,
    assets: AssetCache,
    models: HashMap<String, Option<Rc<SkelModel>>>,
    preload: Vec<String>,
}

impl ModelRegistry {
    pub fn new(source: impl AssetSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            assets: AssetCache::new(),
            models: HashMap::new(),
            preload: Vec::new(),
        }
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn anim_names_mut(&mut self) -> &mut AnimNames {
        &mut self.assets.anim_names
    }

    /// Already loaded model, without attempting a load.
    pub fn find_model(&self, name: &str) -> Option<Rc<SkelModel>> {
        self.models.get(name).cloned().flatten()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Returns the model, loading it on first request. A failed load is remembered and not
    /// retried until the model is cleared.
    pub fn load_model(&mut self, name: &str) -> Option<Rc<SkelModel>> {
        if let Some(entry) = self.models.get(name) {
            return entry.clone();
        }
        if name.is_empty() {
            return None;
        }
        let mut model = None;
        for format in ModelFormat::ALL {
            match self.try_load(name, format) {
                Ok(m) => {
                    log::debug!("loaded model {name} as {}", format.name());
                    model = Some(Rc::new(m));
                    break;
                }
                Err(e) => log::debug!("{name} is not a {} model: {e}", format.name()),
            }
        }
        if model.is_none() {
            log::warn!("could not load model: {name}");
        }
        self.models.insert(name.to_string(), model.clone());
        model
    }

    fn try_load(&mut self, name: &str, format: ModelFormat) -> Result<SkelModel, Error> {
        let mut ctx = LoadContext::new(&*self.source, &mut self.assets);
        ctx.begin(name, format)?;
        if !Self::run_config(&*self.source, &mut ctx, name, format)? {
            ctx.load_default_parts()?;
        }
        ctx.finish()
    }

    /// Replays `<name>/<format>.json` when present. True when it defined any part.
    #[cfg(feature = "json")]
    fn run_config(
        source: &dyn AssetSource,
        ctx: &mut LoadContext<'_>,
        name: &str,
        format: ModelFormat,
    ) -> Result<bool, Error> {
        let path = join_path(name, &format!("{}.json", format.name()));
        let Ok(data) = source.read(&path) else {
            return Ok(false);
        };
        let config = crate::ModelConfig::from_json_slice(&path, &data)?;
        ctx.run(&config)?;
        Ok(ctx.model().is_some_and(|m| !m.parts.is_empty()))
    }

    #[cfg(not(feature = "json"))]
    fn run_config(
        _source: &dyn AssetSource,
        _ctx: &mut LoadContext<'_>,
        _name: &str,
        _format: ModelFormat,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    /// Queues a model for `flush_preloaded_models`.
    pub fn preload_model(&mut self, name: &str) {
        if name.is_empty() || self.models.contains_key(name) || self.preload.iter().any(|n| n == name)
        {
            return;
        }
        self.preload.push(name.to_string());
    }

    pub fn flush_preloaded_models(&mut self) {
        for name in std::mem::take(&mut self.preload) {
            self.load_model(&name);
        }
    }

    /// Unloads a model so the next request loads it again. Returns false when it was not
    /// loaded.
    pub fn clear_model(&mut self, name: &str) -> bool {
        match self.models.remove(name) {
            Some(model) => {
                if let Some(m) = model {
                    m.cleanup();
                }
                log::debug!("cleared model {name}");
                true
            }
            None => {
                log::warn!("model {name} is not loaded");
                false
            }
        }
    }

    /// Drops the caches and buffers of every loaded model; they are rebuilt on next render.
    pub fn cleanup_models(&mut self) {
        for m in self.models.values().flatten() {
            m.cleanup();
        }
    }

    /// Hands buffers released by cleared or cleaned models back to the backend. Call once per
    /// frame, after its draws were submitted and before the next frame records any.
    pub fn release_buffers(&self, backend: &mut dyn SkinningBackend) {
        self.assets.release.flush(backend);
    }
}
