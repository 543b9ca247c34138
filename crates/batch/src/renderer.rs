use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Mat4;
use gpubatch_arena::{FlushStats, UploadTarget};
use gpubatch_common::{BufferRole, GeometryId, InstanceSlot, MaterialId};

use crate::compiler::{DrawBatchCompiler, DrawUnit, SubmitStats};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::geometry::{CommitStats, GeometryBatchStore, GeometrySource};
use crate::instance::{InstanceStore, InstanceTransform};
use crate::sink::DrawSink;

/// An item bound to the renderer, keyed by its instance slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundItem {
    pub geometry: GeometryId,
    pub material: MaterialId,
    pub visible: bool,
    pub odd_negative_scale: bool,
}

/// What one [`BatchRenderer::execute`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub committed: CommitStats,
    pub compacted: bool,
    pub instances_written: usize,
    /// Geometry and instance buffer uploads.
    pub data_uploads: FlushStats,
    pub submit: SubmitStats,
}

impl FrameStats {
    pub fn upload_calls(&self) -> u32 {
        self.data_uploads.upload_calls() + self.submit.uploads.upload_calls()
    }
}

/// Frame orchestration over the geometry store, instance store and compiler.
///
/// Items are bound once and drawn every frame until unbound. Geometry and
/// transforms are staged on bind and update, then committed together at the
/// start of [`execute`](Self::execute).
pub struct BatchRenderer<U> {
    config: BatchConfig,
    geometry: GeometryBatchStore<U>,
    instances: InstanceStore<U>,
    compiler: DrawBatchCompiler<U>,
    items: BTreeMap<InstanceSlot, BoundItem>,
    units: Vec<DrawUnit>,
}

impl<U: UploadTarget> BatchRenderer<U> {
    /// Build a renderer, creating each buffer's upload target through `make_target`.
    pub fn new(
        config: BatchConfig,
        mut make_target: impl FnMut(BufferRole) -> U,
    ) -> Result<Self, BatchError> {
        let geometry = GeometryBatchStore::new(
            &config,
            make_target(BufferRole::Vertex),
            make_target(BufferRole::Index),
        );
        let instances = InstanceStore::new(
            config.initial_instance_capacity,
            make_target(BufferRole::Instance),
        )?;
        let compiler = DrawBatchCompiler::new(
            &config,
            make_target(BufferRole::Command),
            make_target(BufferRole::InstanceIndex),
        )?;
        tracing::info!(
            vertex_stride_b = config.vertex_stride_b,
            instances = config.initial_instance_capacity,
            "batch renderer ready"
        );
        Ok(Self {
            config,
            geometry,
            instances,
            compiler,
            items: BTreeMap::new(),
            units: Vec::new(),
        })
    }

    /// Bind one drawable item. The geometry is staged the first time its id is seen.
    pub fn bind(
        &mut self,
        geometry_id: GeometryId,
        geometry: Arc<dyn GeometrySource>,
        material: MaterialId,
        local_to_world: Mat4,
    ) -> Result<InstanceSlot, BatchError> {
        if !self.geometry.contains(geometry_id) && !self.geometry.is_staged(geometry_id) {
            self.geometry.stage(geometry_id, geometry)?;
        }
        let transform = InstanceTransform::from_matrix(local_to_world);
        let slot = self.instances.register()?;
        self.instances.stage(slot, transform)?;
        self.items.insert(
            slot,
            BoundItem {
                geometry: geometry_id,
                material,
                visible: true,
                odd_negative_scale: transform.has_odd_negative_scale(),
            },
        );
        Ok(slot)
    }

    /// Stop drawing an item. Its geometry stays registered. Returns whether it was bound.
    pub fn unbind(&mut self, slot: InstanceSlot) -> Result<bool, BatchError> {
        if self.items.remove(&slot).is_none() {
            return Ok(false);
        }
        self.instances.unregister(slot)?;
        Ok(true)
    }

    pub fn update_transform(
        &mut self,
        slot: InstanceSlot,
        local_to_world: Mat4,
    ) -> Result<(), BatchError> {
        let item = self.items.get_mut(&slot).ok_or(BatchError::UnknownItem(slot))?;
        let transform = InstanceTransform::from_matrix(local_to_world);
        item.odd_negative_scale = transform.has_odd_negative_scale();
        self.instances.stage(slot, transform)?;
        Ok(())
    }

    pub fn set_visible(&mut self, slot: InstanceSlot, visible: bool) -> Result<(), BatchError> {
        let item = self.items.get_mut(&slot).ok_or(BatchError::UnknownItem(slot))?;
        item.visible = visible;
        Ok(())
    }

    /// Release every registered geometry no bound item uses. Returns how many went.
    pub fn release_unused_geometry(&mut self) -> Result<usize, BatchError> {
        let unused: Vec<_> = self
            .geometry
            .ids()
            .filter(|id| !self.items.values().any(|item| item.geometry == *id))
            .collect();
        for id in &unused {
            self.geometry.release(*id)?;
        }
        Ok(unused.len())
    }

    /// Commit staged data, upload it, then compile and submit every bound item.
    pub fn execute(&mut self, sink: &mut dyn DrawSink<U>) -> Result<FrameStats, BatchError> {
        let _span = tracing::info_span!("frame", items = self.items.len()).entered();

        let committed = self.geometry.commit()?;
        let compacted = self
            .geometry
            .compact_if_fragmented(self.config.compaction_threshold)?;
        let instances_written = self.instances.commit()?;

        let mut data_uploads = self.geometry.flush_uploads();
        data_uploads.accumulate(self.instances.flush_uploads());

        self.units.clear();
        self.units.extend(self.items.iter().map(|(slot, item)| DrawUnit {
            geometry: item.geometry,
            material: item.material,
            instance_slot: *slot,
            visible: item.visible,
            odd_negative_scale: item.odd_negative_scale,
        }));
        self.compiler.compile(&mut self.units, &self.geometry)?;
        let submit = self
            .compiler
            .submit(&self.geometry, Some(&self.instances), sink)?;

        Ok(FrameStats {
            committed,
            compacted,
            instances_written,
            data_uploads,
            submit,
        })
    }

    pub fn item(&self, slot: InstanceSlot) -> Option<&BoundItem> {
        self.items.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn geometry(&self) -> &GeometryBatchStore<U> {
        &self.geometry
    }

    pub fn instances(&self) -> &InstanceStore<U> {
        &self.instances
    }

    pub fn compiler(&self) -> &DrawBatchCompiler<U> {
        &self.compiler
    }
}
