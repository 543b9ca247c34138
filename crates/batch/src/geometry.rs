use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bytemuck::Pod;
use gpubatch_arena::{DirtyRangeBuffer, FlushStats, UploadTarget, VariableBlockAllocator};
use gpubatch_common::{AllocKey, GeometryId};

use crate::config::BatchConfig;
use crate::error::GeometryError;

/// Bytes per index. Indices are always 32-bit.
pub const INDEX_B: u32 = 4;

/// A blob of vertex and index data that can be packed into the shared buffers.
pub trait GeometrySource {
    fn vertex_bytes(&self) -> &[u8];
    fn vertex_count(&self) -> u32;
    fn index_bytes(&self) -> &[u8];
    fn index_count(&self) -> u32;
}

/// Owned vertex and index data.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    vertices: Vec<u8>,
    vertex_count: u32,
    indices: Vec<u32>,
}

impl MeshData {
    pub fn from_vertices<V: Pod>(vertices: &[V], indices: &[u32]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_count: vertices.len() as u32,
            indices: indices.to_vec(),
        }
    }

    /// Vertex data already in its final layout.
    pub fn from_raw(vertices: Vec<u8>, vertex_count: u32, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            vertex_count,
            indices,
        }
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

impl GeometrySource for MeshData {
    fn vertex_bytes(&self) -> &[u8] {
        &self.vertices
    }

    fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Where a committed geometry lives in the shared buffers. Offsets are only
/// valid until the next commit or compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryInfo {
    pub vertex_offset_b: u32,
    pub vertex_size_b: u32,
    pub index_offset_b: u32,
    pub index_size_b: u32,
}

impl GeometryInfo {
    pub fn element_count(&self) -> u32 {
        self.index_size_b / INDEX_B
    }

    pub fn first_element(&self) -> u32 {
        self.index_offset_b / INDEX_B
    }

    pub fn first_vertex(&self, vertex_stride_b: u32) -> u32 {
        self.vertex_offset_b / vertex_stride_b
    }
}

/// Outcome of one [`GeometryBatchStore::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub registered: u32,
    /// Staged geometries that were already registered or staged twice.
    pub duplicates: u32,
    pub vertex_bytes: u64,
    pub index_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct Registered {
    vertices: AllocKey,
    indices: AllocKey,
}

/// Packs many geometries into one shared vertex buffer and one shared index
/// buffer.
///
/// Registration is two-phase. [`stage`](Self::stage) only queues a geometry;
/// [`commit`](Self::commit) sizes the whole batch, grows each arena at most
/// once and then writes every geometry.
pub struct GeometryBatchStore<U> {
    vertex_stride_b: u32,
    vertices: VariableBlockAllocator<DirtyRangeBuffer<U>>,
    indices: VariableBlockAllocator<DirtyRangeBuffer<U>>,
    registered: BTreeMap<GeometryId, Registered>,
    pending: Vec<(GeometryId, Arc<dyn GeometrySource>)>,
}

impl<U: UploadTarget> GeometryBatchStore<U> {
    pub fn new(config: &BatchConfig, vertex_target: U, index_target: U) -> Self {
        Self {
            vertex_stride_b: config.vertex_stride_b.max(1),
            vertices: VariableBlockAllocator::new(DirtyRangeBuffer::new(
                config.initial_vertex_capacity_b,
                vertex_target,
            )),
            indices: VariableBlockAllocator::new(DirtyRangeBuffer::new(
                config.initial_index_capacity_b,
                index_target,
            )),
            registered: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Queue a geometry for the next commit. Malformed geometry is rejected here.
    pub fn stage(
        &mut self,
        id: GeometryId,
        geometry: Arc<dyn GeometrySource>,
    ) -> Result<(), GeometryError> {
        self.check(id, geometry.as_ref())?;
        self.pending.push((id, geometry));
        Ok(())
    }

    fn check(&self, id: GeometryId, geometry: &dyn GeometrySource) -> Result<(), GeometryError> {
        let invalid = |reason: String| GeometryError::InvalidGeometry { id, reason };
        if geometry.vertex_count() == 0 || geometry.index_count() == 0 {
            return Err(invalid("geometry has no vertices or no indices".into()));
        }
        let vertex_b = geometry.vertex_count() as u64 * self.vertex_stride_b as u64;
        if geometry.vertex_bytes().len() as u64 != vertex_b {
            return Err(invalid(format!(
                "{} vertex bytes for {} vertices of {} bytes",
                geometry.vertex_bytes().len(),
                geometry.vertex_count(),
                self.vertex_stride_b
            )));
        }
        let index_b = geometry.index_count() as u64 * INDEX_B as u64;
        if geometry.index_bytes().len() as u64 != index_b {
            return Err(invalid(format!(
                "{} index bytes for {} indices",
                geometry.index_bytes().len(),
                geometry.index_count()
            )));
        }
        if vertex_b > u32::MAX as u64 || index_b > u32::MAX as u64 {
            return Err(invalid("geometry larger than a buffer can address".into()));
        }
        Ok(())
    }

    /// Register every staged geometry.
    pub fn commit(&mut self) -> Result<CommitStats, GeometryError> {
        if self.pending.is_empty() {
            return Ok(CommitStats::default());
        }
        let _span = tracing::info_span!("geometry_commit", staged = self.pending.len()).entered();

        let pending = std::mem::take(&mut self.pending);
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(pending.len());
        let mut stats = CommitStats::default();
        for (id, geometry) in pending {
            if self.registered.contains_key(&id) || !seen.insert(id) {
                stats.duplicates += 1;
                continue;
            }
            stats.vertex_bytes += geometry.vertex_bytes().len() as u64;
            stats.index_bytes += geometry.index_bytes().len() as u64;
            batch.push((id, geometry));
        }

        let reserved = self
            .vertices
            .reserve_additional(stats.vertex_bytes)
            .and_then(|()| self.indices.reserve_additional(stats.index_bytes));
        if let Err(e) = reserved {
            // Nothing was allocated yet; keep the batch staged for a retry.
            self.pending = batch;
            return Err(e.into());
        }

        for (id, geometry) in &batch {
            let vertices = self.vertices.alloc(geometry.vertex_bytes().len() as u32)?;
            self.vertices.set(vertices, geometry.vertex_bytes())?;
            let indices = self.indices.alloc(geometry.index_bytes().len() as u32)?;
            self.indices.set(indices, geometry.index_bytes())?;
            self.registered.insert(*id, Registered { vertices, indices });
        }
        stats.registered = batch.len() as u32;

        tracing::debug!(
            registered = stats.registered,
            duplicates = stats.duplicates,
            vertex_bytes = stats.vertex_bytes,
            index_bytes = stats.index_bytes,
            "committed geometry"
        );
        Ok(stats)
    }

    pub fn geometry_info(&self, id: GeometryId) -> Result<GeometryInfo, GeometryError> {
        let Some(entry) = self.registered.get(&id) else {
            if self.pending.iter().any(|(pending, _)| *pending == id) {
                return Err(GeometryError::NotCommitted(id));
            }
            return Err(GeometryError::Unregistered(id));
        };
        let vertices = self.vertices.info(entry.vertices)?;
        let indices = self.indices.info(entry.indices)?;
        Ok(GeometryInfo {
            vertex_offset_b: vertices.offset_b,
            vertex_size_b: vertices.size_b,
            index_offset_b: indices.offset_b,
            index_size_b: indices.size_b,
        })
    }

    /// Drop a geometry and any staged copy of it. Returns whether it was registered.
    pub fn release(&mut self, id: GeometryId) -> Result<bool, GeometryError> {
        self.pending.retain(|(pending, _)| *pending != id);
        let Some(entry) = self.registered.remove(&id) else {
            return Ok(false);
        };
        self.vertices.remove(entry.vertices)?;
        self.indices.remove(entry.indices)?;
        tracing::debug!(%id, "released geometry");
        Ok(true)
    }

    /// Compact each arena whose holes exceed `threshold` of its apparent size.
    pub fn compact_if_fragmented(&mut self, threshold: f32) -> Result<bool, GeometryError> {
        let mut compacted = false;
        if self.vertices.fragmentation() > threshold {
            compacted |= self.vertices.compaction()?;
        }
        if self.indices.fragmentation() > threshold {
            compacted |= self.indices.compaction()?;
        }
        Ok(compacted)
    }

    /// Compact both arenas unconditionally.
    pub fn compact(&mut self) -> Result<bool, GeometryError> {
        let vertices = self.vertices.compaction()?;
        let indices = self.indices.compaction()?;
        Ok(vertices || indices)
    }

    /// Push pending writes in both buffers to their upload targets.
    pub fn flush_uploads(&mut self) -> FlushStats {
        let mut stats = self.vertices.flush();
        stats.accumulate(self.indices.flush());
        stats
    }

    pub fn contains(&self, id: GeometryId) -> bool {
        self.registered.contains_key(&id)
    }

    pub fn is_staged(&self, id: GeometryId) -> bool {
        self.pending.iter().any(|(pending, _)| *pending == id)
    }

    /// Registered geometries.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Registered geometry ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = GeometryId> + '_ {
        self.registered.keys().copied()
    }

    pub fn vertex_stride(&self) -> u32 {
        self.vertex_stride_b
    }

    pub fn vertex_arena(&self) -> &VariableBlockAllocator<DirtyRangeBuffer<U>> {
        &self.vertices
    }

    pub fn index_arena(&self) -> &VariableBlockAllocator<DirtyRangeBuffer<U>> {
        &self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpubatch_arena::{HostUploadTarget, MemoryBlock};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Vertex {
        position: [f32; 3],
        normal: [f32; 3],
    }

    fn mesh(vertex_count: u32, index_count: u32, seed: f32) -> Arc<dyn GeometrySource> {
        let vertices: Vec<_> = (0..vertex_count)
            .map(|i| Vertex {
                position: [seed, i as f32, 0.0],
                normal: [0.0, 1.0, 0.0],
            })
            .collect();
        let indices: Vec<u32> = (0..index_count).map(|i| i % vertex_count).collect();
        Arc::new(MeshData::from_vertices(&vertices, &indices))
    }

    fn store() -> GeometryBatchStore<HostUploadTarget> {
        let config = BatchConfig {
            initial_vertex_capacity_b: 64,
            initial_index_capacity_b: 16,
            ..BatchConfig::default()
        };
        GeometryBatchStore::new(&config, HostUploadTarget::new(), HostUploadTarget::new())
    }

    fn read_vertices(store: &GeometryBatchStore<HostUploadTarget>, info: GeometryInfo) -> Vec<u8> {
        let mut out = vec![0u8; info.vertex_size_b as usize];
        store
            .vertex_arena()
            .memory()
            .read(info.vertex_offset_b, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn commit_packs_geometry_back_to_back() {
        let mut s = store();
        let a = GeometryId::from_name("a");
        let b = GeometryId::from_name("b");
        s.stage(a, mesh(4, 6, 1.0)).unwrap();
        s.stage(b, mesh(3, 3, 2.0)).unwrap();

        let stats = s.commit().unwrap();
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.vertex_bytes, 7 * 24);
        assert_eq!(stats.index_bytes, 9 * 4);

        let ia = s.geometry_info(a).unwrap();
        let ib = s.geometry_info(b).unwrap();
        assert_eq!(ia.vertex_offset_b, 0);
        assert_eq!(ib.vertex_offset_b, 96);
        assert_eq!(ib.first_vertex(24), 4);
        assert_eq!(ia.element_count(), 6);
        assert_eq!(ib.first_element(), 6);
        assert_eq!(ib.element_count(), 3);
    }

    #[test]
    fn commit_grows_each_arena_once() {
        let mut s = store();
        for i in 0..8 {
            s.stage(GeometryId::from_name(&format!("g{i}")), mesh(4, 6, i as f32))
                .unwrap();
        }
        s.commit().unwrap();
        assert_eq!(s.vertex_arena().capacity(), 1024);
        assert_eq!(s.index_arena().capacity(), 256);
        assert_eq!(s.len(), 8);
    }

    #[test]
    fn duplicates_register_once() {
        let mut s = store();
        let a = GeometryId::from_name("a");
        s.stage(a, mesh(4, 6, 1.0)).unwrap();
        s.stage(a, mesh(4, 6, 1.0)).unwrap();
        assert_eq!(s.commit().unwrap().duplicates, 1);

        s.stage(a, mesh(4, 6, 1.0)).unwrap();
        let stats = s.commit().unwrap();
        assert_eq!(stats.registered, 0);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(s.vertex_arena().len(), 1);
    }

    #[test]
    fn unknown_and_uncommitted_lookups() {
        let mut s = store();
        let a = GeometryId::from_name("a");
        assert_eq!(s.geometry_info(a), Err(GeometryError::Unregistered(a)));
        s.stage(a, mesh(4, 6, 1.0)).unwrap();
        assert!(s.is_staged(a));
        assert_eq!(s.geometry_info(a), Err(GeometryError::NotCommitted(a)));
        s.commit().unwrap();
        assert!(s.geometry_info(a).is_ok());
    }

    #[test]
    fn malformed_geometry_is_rejected_at_stage() {
        let mut s = store();
        let id = GeometryId::from_name("bad");
        let short = Arc::new(MeshData::from_raw(vec![0; 20], 1, vec![0, 0, 0]));
        let err = s.stage(id, short).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidGeometry { .. }));
        assert!(err.is_contract_violation());
        assert!(s.stage(id, mesh(3, 0, 0.0)).is_err());
        assert!(!s.is_staged(id));
    }

    #[test]
    fn release_then_compact_preserves_survivors() {
        let mut s = store();
        let ids: Vec<_> = (0..4).map(|i| GeometryId::from_name(&format!("g{i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            s.stage(*id, mesh(2 + i as u32, 3, i as f32)).unwrap();
        }
        s.commit().unwrap();
        let before = read_vertices(&s, s.geometry_info(ids[2]).unwrap());

        assert!(s.release(ids[0]).unwrap());
        assert!(s.release(ids[1]).unwrap());
        assert!(!s.release(ids[1]).unwrap());
        assert!(!s.compact_if_fragmented(0.9).unwrap());
        assert!(s.compact_if_fragmented(0.3).unwrap());

        let info = s.geometry_info(ids[2]).unwrap();
        assert_eq!(info.vertex_offset_b, 0);
        assert_eq!(info.index_offset_b, 0);
        assert_eq!(read_vertices(&s, info), before);
        assert_eq!(
            s.geometry_info(ids[0]),
            Err(GeometryError::Unregistered(ids[0]))
        );
    }

    #[test]
    fn flush_reaches_upload_targets() {
        let mut s = store();
        let a = GeometryId::from_name("a");
        s.stage(a, mesh(4, 6, 3.0)).unwrap();
        s.commit().unwrap();

        let stats = s.flush_uploads();
        assert!(stats.full_upload);
        let target = s.vertex_arena().memory().target();
        assert_eq!(target.as_bytes(), s.vertex_arena().memory().as_bytes());
        assert_eq!(s.flush_uploads(), FlushStats::default());
    }

    #[test]
    fn commit_into_empty_arenas() {
        let config = BatchConfig {
            initial_vertex_capacity_b: 0,
            initial_index_capacity_b: 0,
            ..BatchConfig::default()
        };
        let mut s = GeometryBatchStore::new(&config, HostUploadTarget::new(), HostUploadTarget::new());
        let id = GeometryId::from_name("huge");
        let huge = Arc::new(MeshData::from_raw(
            vec![0; 24 * 8],
            8,
            vec![0; 64],
        ));
        s.stage(id, huge).unwrap();
        s.commit().unwrap();
        assert!(s.contains(id));
        assert_eq!(s.vertex_arena().capacity(), 256);
    }

    #[test]
    fn empty_commit_touches_nothing() {
        let mut s = store();
        assert_eq!(s.commit().unwrap(), CommitStats::default());
        assert_eq!(s.vertex_arena().capacity(), 64);
    }
}
