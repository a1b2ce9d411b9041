//! Dependency resolution.
//!
//! Every dependency of an asset is a GUID slot inside the copied pages. Once
//! the target is found the slot is rewritten in place with a
//! [`ResolvedRef`], and the asset's remaining-dependency counter goes down
//! by one. Resolution resumes at `count - remaining`, so running it again
//! after it finished does nothing.

use log::trace;
use rpak_common::PakGuid;
use rpak_format::{PagePtr, PakContainer};

use crate::error::{LoadError, ResolveError};
use crate::pages::PageArena;
use crate::registry::AssetRegistry;
use crate::{FxHashMap, PakHandle};

/// A resolved dependency as stored in its slot: container slot in the top
/// 16 bits, page index in the next 16, byte offset in the low 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedRef {
    pub slot: u16,
    pub page: u16,
    pub offset: u32,
}

impl ResolvedRef {
    pub fn new(slot: u16, head: PagePtr) -> Self {
        Self {
            slot,
            page: head.index as u16,
            offset: head.offset,
        }
    }

    #[inline]
    pub const fn encode(self) -> u64 {
        ((self.slot as u64) << 48) | ((self.page as u64) << 32) | self.offset as u64
    }

    #[inline]
    pub const fn decode(value: u64) -> Self {
        Self {
            slot: (value >> 48) as u16,
            page: (value >> 32) as u16,
            offset: value as u32,
        }
    }

    #[inline]
    pub fn head(self) -> PagePtr {
        PagePtr::new(u32::from(self.page), self.offset)
    }
}

pub(crate) struct Resolver<'a> {
    registry: &'a AssetRegistry,
    container: &'a PakContainer,
    handle: PakHandle,
    local: FxHashMap<PakGuid, usize>,
    /// Take a dependent reference on another container; false if it is going away.
    acquire: &'a dyn Fn(PakHandle) -> bool,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        registry: &'a AssetRegistry,
        container: &'a PakContainer,
        handle: PakHandle,
        acquire: &'a dyn Fn(PakHandle) -> bool,
    ) -> Self {
        let local = container
            .assets()
            .iter()
            .enumerate()
            .map(|(index, asset)| (asset.guid, index))
            .collect();
        Self {
            registry,
            container,
            handle,
            local,
            acquire,
        }
    }

    /// Resolve what is left of asset `index`'s dependencies.
    ///
    /// Containers newly depended upon are appended to `acquired`.
    pub(crate) fn resolve_asset(
        &self,
        index: usize,
        remaining: &mut u16,
        arena: &mut PageArena,
        acquired: &mut Vec<PakHandle>,
    ) -> Result<usize, LoadError> {
        let asset = &self.container.assets()[index];
        let count = asset.dependencies_count as usize;
        let start = asset.dependencies_start as usize;
        let descriptors = self.container.guid_descriptors();

        let mut resolved = 0;
        while *remaining > 0 {
            let slot = descriptors[start + count - usize::from(*remaining)];
            let target = PakGuid(arena.read_u64(slot)?);
            let reference = self
                .lookup(target, acquired)
                .ok_or(ResolveError::UnresolvedDependency {
                    asset_guid: asset.guid,
                    target_guid: target,
                })?;
            arena.write_u64(slot, reference.encode())?;
            trace!("resolve: {} -> {target} at {reference:?}", asset.guid);
            *remaining -= 1;
            resolved += 1;
        }
        Ok(resolved)
    }

    fn lookup(&self, target: PakGuid, acquired: &mut Vec<PakHandle>) -> Option<ResolvedRef> {
        if let Some(reference) = self.lookup_registry(target, acquired) {
            return Some(reference);
        }
        if let Some(&index) = self.local.get(&target) {
            return Some(ResolvedRef::new(self.handle.slot(), self.container.assets()[index].head));
        }
        // Another container may have published it in the meantime.
        self.lookup_registry(target, acquired)
    }

    fn lookup_registry(&self, target: PakGuid, acquired: &mut Vec<PakHandle>) -> Option<ResolvedRef> {
        let entry = self.registry.lookup(target)?;
        if entry.pak != self.handle && !acquired.contains(&entry.pak) {
            if !(self.acquire)(entry.pak) {
                return None;
            }
            acquired.push(entry.pak);
        }
        Some(ResolvedRef::new(entry.pak.slot(), entry.head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::DefaultAllocator;
    use crate::registry::RegistryEntry;
    use rpak_common::FourCc;
    use rpak_format::{AssetSpec, FormatLimits, PakBuilder, SegmentKind};

    const TAG: FourCc = FourCc(u32::from_le_bytes(*b"matl"));

    /// Asset 0 depends on asset 1 (same container) and on GUID 0xF00 (elsewhere).
    fn fixture() -> (PakContainer, PageArena) {
        let mut page = vec![0u8; 64];
        page[32..40].copy_from_slice(&0xBu64.to_le_bytes());
        page[40..48].copy_from_slice(&0xF00u64.to_le_bytes());

        let mut builder = PakBuilder::new();
        let head = builder.add_segment(SegmentKind::Head, 8);
        let page = builder.add_page(head, 8, page);
        builder.add_asset(
            AssetSpec::new(PakGuid(0xA), TAG, PagePtr::new(page, 0), 16)
                .dependencies([PagePtr::new(page, 32), PagePtr::new(page, 40)]),
        );
        builder.add_asset(AssetSpec::new(PakGuid(0xB), TAG, PagePtr::new(page, 16), 16));

        let bytes = builder.build();
        let container = PakContainer::parse(&bytes, &FormatLimits::default()).unwrap();
        let mut arena = PageArena::allocate(&container, &DefaultAllocator);
        let start = container.page_stream_offset(0).unwrap() as usize;
        arena.page_mut(0).unwrap().copy_from_slice(&bytes[start..start + 64]);
        (container, arena)
    }

    #[test]
    fn test_encoding() {
        let reference = ResolvedRef::new(3, PagePtr::new(7, 0x40));
        assert_eq!(reference.encode(), 0x0003_0007_0000_0040);
        assert_eq!(ResolvedRef::decode(reference.encode()), reference);
        assert_eq!(reference.head(), PagePtr::new(7, 0x40));
    }

    #[test]
    fn test_resolves_local_and_foreign() {
        let (container, mut arena) = fixture();
        let registry = AssetRegistry::new(16);
        let me = PakHandle::new(1, 1);
        let other = PakHandle::new(4, 2);
        registry
            .publish(&[RegistryEntry {
                guid: PakGuid(0xF00),
                pak: other,
                asset_index: 0,
                head: PagePtr::new(2, 8),
            }])
            .unwrap();

        let acquire = |_: PakHandle| true;
        let resolver = Resolver::new(&registry, &container, me, &acquire);
        let mut remaining = container.assets()[0].remaining_dependencies;
        let mut acquired = Vec::new();
        assert_eq!(resolver.resolve_asset(0, &mut remaining, &mut arena, &mut acquired).unwrap(), 2);

        assert_eq!(remaining, 0);
        assert_eq!(acquired, vec![other]);
        assert_eq!(
            ResolvedRef::decode(arena.read_u64(PagePtr::new(0, 32)).unwrap()),
            ResolvedRef::new(1, PagePtr::new(0, 16))
        );
        assert_eq!(
            ResolvedRef::decode(arena.read_u64(PagePtr::new(0, 40)).unwrap()),
            ResolvedRef::new(4, PagePtr::new(2, 8))
        );

        // Idempotent: nothing left to do, nothing rewritten.
        let before = arena.to_vec();
        assert_eq!(resolver.resolve_asset(0, &mut remaining, &mut arena, &mut acquired).unwrap(), 0);
        assert_eq!(arena.to_vec(), before);
        assert_eq!(acquired.len(), 1);
    }

    #[test]
    fn test_unresolved_dependency_keeps_progress() {
        let (container, mut arena) = fixture();
        let registry = AssetRegistry::new(16);
        let acquire = |_: PakHandle| true;
        let resolver = Resolver::new(&registry, &container, PakHandle::new(0, 1), &acquire);

        let mut remaining = 2;
        let err = resolver
            .resolve_asset(0, &mut remaining, &mut arena, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::Resolve(ResolveError::UnresolvedDependency {
                asset_guid: PakGuid(0xA),
                target_guid: PakGuid(0xF00),
            })
        ));
        // The local dependency was resolved before the failure.
        assert_eq!(remaining, 1);
    }

    #[test]
    fn test_refused_acquire_is_unresolved() {
        let (container, mut arena) = fixture();
        let registry = AssetRegistry::new(16);
        registry
            .publish(&[RegistryEntry {
                guid: PakGuid(0xF00),
                pak: PakHandle::new(9, 1),
                asset_index: 0,
                head: PagePtr::new(0, 0),
            }])
            .unwrap();
        let acquire = |_: PakHandle| false;
        let resolver = Resolver::new(&registry, &container, PakHandle::new(0, 1), &acquire);

        let mut remaining = 2;
        assert!(resolver
            .resolve_asset(0, &mut remaining, &mut arena, &mut Vec::new())
            .is_err());
    }
}
