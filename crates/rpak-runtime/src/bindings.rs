//! Asset type bindings.
//!
//! Each asset type tag maps to the callbacks that turn a freshly copied asset
//! into something the rest of the program can use. Types a container uses
//! without a registered binding get a stub so their assets still load.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use rpak_common::{FourCc, PakGuid};
use rpak_format::PagePtr;

use crate::error::{BindingError, LoaderError};
use crate::PakHandle;

/// Number of distinct asset types the table holds.
pub const MAX_TYPE_BINDINGS: usize = 64;

/// Description given to stubbed types.
pub const UNKNOWN_TYPE: &str = "<unknown>";

/// What an asset job sees of its asset.
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub pak: PakHandle,
    /// Position in the container's asset table.
    pub index: u32,
    pub guid: PakGuid,
    pub tag: FourCc,
    pub version: u32,
    /// Copy of the asset header bytes.
    pub header: Vec<u8>,
    pub data: Option<PagePtr>,
    pub stream_offset: u64,
    pub opt_stream_offset: u64,
}

/// Load and unload callbacks for one asset type.
pub trait AssetLoader: Send + Sync {
    /// Called on the job pool once the asset's head pages are copied.
    fn load(&self, asset: &AssetContext) -> Result<(), LoaderError>;

    /// Called when the owning container is freed.
    fn unload(&self, _pak: PakHandle, _guid: PakGuid) {}
}

#[derive(Clone)]
pub struct AssetBinding {
    pub tag: FourCc,
    pub version: u32,
    pub description: String,
    pub header_size: u32,
    pub native_size: u32,
    pub alignment: u32,
    pub loader: Option<Arc<dyn AssetLoader>>,
    stub: bool,
}

impl AssetBinding {
    pub fn new(tag: FourCc, version: u32, description: impl Into<String>, header_size: u32) -> Self {
        Self {
            tag,
            version,
            description: description.into(),
            header_size,
            native_size: header_size,
            alignment: 8,
            loader: None,
            stub: false,
        }
    }

    pub fn native(mut self, size: u32, alignment: u32) -> Self {
        self.native_size = size;
        self.alignment = alignment;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    fn stub(tag: FourCc, version: u32, header_size: u32, alignment: u32) -> Self {
        Self {
            stub: true,
            ..Self::new(tag, version, UNKNOWN_TYPE, header_size).native(header_size, alignment)
        }
    }

    /// Created at load time for a type nobody registered.
    pub fn is_stub(&self) -> bool {
        self.stub
    }
}

impl fmt::Debug for AssetBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetBinding")
            .field("tag", &self.tag)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("header_size", &self.header_size)
            .field("native_size", &self.native_size)
            .field("alignment", &self.alignment)
            .field("loader", &self.loader.is_some())
            .field("stub", &self.stub)
            .finish()
    }
}

/// Fixed-capacity tag → binding table.
pub struct TypeBindings {
    slots: RwLock<Vec<Option<AssetBinding>>>,
}

impl Default for TypeBindings {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeBindings {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(vec![None; MAX_TYPE_BINDINGS]),
        }
    }

    /// Probe for `tag`: the slot holding it, or the first free slot.
    fn probe(slots: &[Option<AssetBinding>], tag: FourCc) -> Option<usize> {
        let start = tag.value().wrapping_mul(0x9E37_79B9) as usize;
        (0..slots.len())
            .map(|step| (start + step) % slots.len())
            .find(|&index| slots[index].as_ref().map_or(true, |binding| binding.tag == tag))
    }

    pub fn register(&self, binding: AssetBinding) -> Result<(), BindingError> {
        let mut slots = self.slots.write();
        let index = Self::probe(&slots, binding.tag).ok_or(BindingError::TableFull(MAX_TYPE_BINDINGS))?;
        if slots[index].is_some() {
            return Err(BindingError::AlreadyBound(binding.tag));
        }
        debug!("bindings: {} registered as '{}' v{}", binding.tag, binding.description, binding.version);
        slots[index] = Some(binding);
        Ok(())
    }

    pub fn get(&self, tag: FourCc) -> Option<AssetBinding> {
        let slots = self.slots.read();
        Self::probe(&slots, tag).and_then(|index| slots[index].clone())
    }

    /// The binding for `tag`, stubbing it first if it is unknown.
    pub fn ensure(&self, tag: FourCc, version: u32, header_size: u32, alignment: u32) -> Result<AssetBinding, BindingError> {
        if let Some(binding) = self.get(tag) {
            if binding.version != version && !binding.stub {
                warn!("bindings: {tag} is bound at v{} but the container has v{version}", binding.version);
            }
            return Ok(binding);
        }

        let mut slots = self.slots.write();
        let index = Self::probe(&slots, tag).ok_or(BindingError::TableFull(MAX_TYPE_BINDINGS))?;
        if let Some(binding) = &slots[index] {
            return Ok(binding.clone());
        }
        let binding = AssetBinding::stub(tag, version, header_size, alignment);
        info!("bindings: stubbing unknown asset type {tag} (v{version}, {header_size} byte header)");
        slots[index] = Some(binding.clone());
        Ok(binding)
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every binding, ordered by tag.
    pub fn list(&self) -> Vec<AssetBinding> {
        let mut bindings: Vec<_> = self.slots.read().iter().flatten().cloned().collect();
        bindings.sort_by_key(|binding| binding.tag.bytes());
        bindings
    }
}
